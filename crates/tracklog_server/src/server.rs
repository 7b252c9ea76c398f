//! Main tracker server.

use crate::auth::TokenAuthenticator;
use crate::config::ServerConfig;
use crate::error::{ConfigError, ServerError, ServerResult};
use crate::guard::RequestGuard;
use crate::handler::{HandlerContext, RequestHandler, ETAG_HEADER};
use crate::rate_limit::{RateLimiter, SlidingWindowLimiter};
use crate::request::{Method, Request, Response};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, warn};
use tracklog_core::VersionedStore;
use tracklog_storage::{unix_millis, KeyValueBackend};

/// The tracker server.
///
/// Transport-agnostic: an HTTP adapter turns each inbound request into a
/// [`Request`], calls [`TrackerServer::handle`] and writes back the
/// [`Response`]. The server is `Send + Sync` and meant to be shared in an
/// `Arc` across worker threads.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tracklog_server::{AuthConfig, Method, Request, ServerConfig, TrackerServer};
/// use tracklog_storage::InMemoryBackend;
///
/// let config = ServerConfig::new(AuthConfig::new("an-example-secret-of-32-bytes-or-more"));
/// let server = TrackerServer::new(config, Arc::new(InMemoryBackend::new())).unwrap();
///
/// let registered = server.handle(&Request::new(Method::Post, "/users"));
/// assert_eq!(registered.status, 201);
///
/// let token = registered.body["token"].as_str().unwrap();
/// let workouts = server.handle(
///     &Request::new(Method::Get, "/workouts").with_header("Authorization", format!("Bearer {token}")),
/// );
/// assert_eq!(workouts.status, 200);
/// ```
pub struct TrackerServer {
    handler: RequestHandler,
    guard: RequestGuard,
    limiter: Arc<dyn RateLimiter>,
    context: Arc<HandlerContext>,
}

enum Route<'a> {
    Users,
    Refresh,
    Settings,
    Workouts,
    Workout(&'a str),
    Account,
}

impl<'a> Route<'a> {
    fn parse(path: &'a str) -> Option<Self> {
        let path = path.trim_end_matches('/');
        match path {
            "/users" => Some(Self::Users),
            "/auth/refresh" => Some(Self::Refresh),
            "/settings" => Some(Self::Settings),
            "/workouts" => Some(Self::Workouts),
            "/account" => Some(Self::Account),
            _ => {
                let id = path.strip_prefix("/workouts/")?;
                (!id.is_empty() && !id.contains('/')).then_some(Self::Workout(id))
            }
        }
    }
}

impl TrackerServer {
    /// Creates a new server with an in-process rate limiter.
    ///
    /// # Errors
    ///
    /// Refuses to start without a usable token secret.
    pub fn new(config: ServerConfig, backend: Arc<dyn KeyValueBackend>) -> Result<Self, ConfigError> {
        Self::with_limiter(config, backend, Arc::new(SlidingWindowLimiter::new()))
    }

    /// Creates a server with a caller-supplied rate limiter.
    ///
    /// # Errors
    ///
    /// Refuses to start without a usable token secret.
    pub fn with_limiter(
        config: ServerConfig,
        backend: Arc<dyn KeyValueBackend>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Result<Self, ConfigError> {
        let authenticator = Arc::new(TokenAuthenticator::new(&config.auth)?);
        let guard = RequestGuard::new(
            Arc::clone(&authenticator),
            Arc::clone(&limiter),
            config.rate_limit,
            config.allow_legacy_identity,
        );
        if config.allow_legacy_identity {
            warn!(deprecated = true, "unsigned legacy identities are accepted");
        }
        let context = Arc::new(HandlerContext::new(
            config,
            VersionedStore::new(backend),
            authenticator,
        ));
        let handler = RequestHandler::new(Arc::clone(&context));

        Ok(Self {
            handler,
            guard,
            limiter,
            context,
        })
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the token authenticator.
    pub fn authenticator(&self) -> &TokenAuthenticator {
        &self.context.authenticator
    }

    /// Handles a request. Never panics and never fails: every error becomes
    /// a response.
    pub fn handle(&self, request: &Request) -> Response {
        match self.dispatch(request) {
            Ok(response) => response,
            Err(err) => self.error_response(request, &err),
        }
    }

    /// Drops rate-limit state for clients idle for a full window.
    ///
    /// Call periodically from the host's maintenance task.
    pub fn prune_rate_limits(&self) -> usize {
        let removed = self
            .limiter
            .prune_idle(self.context.config.rate_limit.window, unix_millis());
        debug!(removed, "pruned idle rate-limit entries");
        removed
    }

    /// Releases rate-limit state. Call on shutdown.
    pub fn shutdown(&self) {
        self.limiter.clear();
    }

    fn dispatch(&self, request: &Request) -> ServerResult<Response> {
        // Every request counts against the client's budget, routable or not.
        self.guard.throttle(request)?;

        let route = Route::parse(&request.path)
            .ok_or_else(|| ServerError::NotFound(format!("route {}", request.path)))?;
        let h = &self.handler;
        let caller = || self.guard.authenticate(request);

        match (route, &request.method) {
            (Route::Users, Method::Post) => h.handle_register(),
            (Route::Refresh, Method::Post) => h.handle_refresh(request),
            (Route::Settings, Method::Get) => h.handle_get_settings(&caller()?),
            (Route::Settings, Method::Put) => h.handle_put_settings(&caller()?, request),
            (Route::Workouts, Method::Get) => h.handle_get_workouts(&caller()?),
            (Route::Workouts, Method::Post) => h.handle_append_workout(&caller()?, request),
            (Route::Workouts, Method::Put) => h.handle_import_workouts(&caller()?, request),
            (Route::Workout(id), Method::Put) => {
                h.handle_replace_workout(&caller()?, id, request)
            }
            (Route::Workout(id), Method::Delete) => {
                h.handle_delete_workout(&caller()?, id, request)
            }
            (Route::Account, Method::Delete) => h.handle_delete_account(&caller()?),
            _ => Err(ServerError::MethodNotAllowed),
        }
    }

    fn error_response(&self, request: &Request, err: &ServerError) -> Response {
        if err.is_server_error() {
            error!(
                method = ?request.method,
                path = %request.path,
                error = %err,
                "request failed"
            );
        } else {
            debug!(path = %request.path, code = err.code(), "request rejected");
        }

        let mut body = json!({
            "error": err.code(),
            "message": err.public_message(),
        });
        let mut response_headers = Vec::new();
        match err {
            ServerError::RateLimited {
                reset_at,
                retry_after_secs,
            } => {
                body["resetAt"] = json!(reset_at);
                response_headers.push(("Retry-After", retry_after_secs.to_string()));
            }
            ServerError::Conflict {
                current: Some(current),
            } => {
                body["current"] = json!(current);
                response_headers.push((ETAG_HEADER, format!("\"{current}\"")));
            }
            _ => {}
        }

        response_headers
            .into_iter()
            .fold(Response::json(err.status_code(), body), |response, (name, value)| {
                response.with_header(name, value)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, RateLimitPolicy};
    use std::time::Duration;
    use tracklog_storage::InMemoryBackend;

    fn server() -> TrackerServer {
        let config = ServerConfig::new(AuthConfig::new("server-test-secret-0123456789abcdef"));
        TrackerServer::new(config, Arc::new(InMemoryBackend::new())).unwrap()
    }

    #[test]
    fn refuses_placeholder_secret() {
        let config = ServerConfig::new(AuthConfig::new("change-me"));
        let result = TrackerServer::new(config, Arc::new(InMemoryBackend::new()));
        assert!(matches!(result, Err(ConfigError::PlaceholderSecret)));
    }

    #[test]
    fn route_parsing() {
        assert!(matches!(Route::parse("/users"), Some(Route::Users)));
        assert!(matches!(Route::parse("/workouts/"), Some(Route::Workouts)));
        assert!(matches!(Route::parse("/workouts/abc"), Some(Route::Workout("abc"))));
        assert!(Route::parse("/workouts/a/b").is_none());
        assert!(Route::parse("/nope").is_none());
    }

    #[test]
    fn unknown_route_and_method() {
        let server = server();
        assert_eq!(server.handle(&Request::new(Method::Get, "/nope")).status, 404);
        let response = server.handle(&Request::new(Method::Other("PATCH".into()), "/users"));
        assert_eq!(response.status, 405);
    }

    #[test]
    fn unauthenticated_body() {
        let server = server();
        let response = server.handle(&Request::new(Method::Get, "/workouts"));
        assert_eq!(response.status, 401);
        assert_eq!(response.body["error"], "unauthenticated");
        assert_eq!(
            response.body["message"],
            "unauthenticated: authentication required"
        );
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let config = ServerConfig::new(AuthConfig::new("server-test-secret-0123456789abcdef"))
            .with_rate_limit(RateLimitPolicy {
                window: Duration::from_secs(30),
                max_requests: 1,
            });
        let server = TrackerServer::new(config, Arc::new(InMemoryBackend::new())).unwrap();

        assert_eq!(server.handle(&Request::new(Method::Post, "/users")).status, 201);
        let response = server.handle(&Request::new(Method::Post, "/users"));
        assert_eq!(response.status, 429);
        let retry: u64 = response.header("Retry-After").unwrap().parse().unwrap();
        assert!((1..=30).contains(&retry));
        assert!(response.body["resetAt"].is_u64());
    }

    #[test]
    fn unroutable_requests_are_throttled() {
        let config = ServerConfig::new(AuthConfig::new("server-test-secret-0123456789abcdef"))
            .with_rate_limit(RateLimitPolicy {
                window: Duration::from_secs(30),
                max_requests: 2,
            });
        let server = TrackerServer::new(config, Arc::new(InMemoryBackend::new())).unwrap();

        assert_eq!(server.handle(&Request::new(Method::Get, "/nope")).status, 404);
        assert_eq!(server.handle(&Request::new(Method::Get, "/users")).status, 405);
        assert_eq!(server.handle(&Request::new(Method::Get, "/nope")).status, 429);
        assert_eq!(server.handle(&Request::new(Method::Post, "/users")).status, 429);
    }

    #[test]
    fn prune_and_shutdown() {
        let server = server();
        server.handle(&Request::new(Method::Post, "/users"));
        assert_eq!(server.prune_rate_limits(), 0);
        server.shutdown();
    }
}
