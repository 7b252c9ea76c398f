//! Admission control: rate limiting followed by authentication.

use crate::auth::{Identity, TokenAuthenticator};
use crate::config::RateLimitPolicy;
use crate::error::{ServerError, ServerResult};
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::request::Request;
use std::sync::Arc;
use tracing::warn;
use tracklog_storage::unix_millis;

/// Rate-limit key used when the peer address is not known.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Gate every request passes before reaching a handler.
#[derive(Clone)]
pub struct RequestGuard {
    authenticator: Arc<TokenAuthenticator>,
    limiter: Arc<dyn RateLimiter>,
    policy: RateLimitPolicy,
    allow_legacy_identity: bool,
}

impl RequestGuard {
    /// Creates a new guard.
    pub fn new(
        authenticator: Arc<TokenAuthenticator>,
        limiter: Arc<dyn RateLimiter>,
        policy: RateLimitPolicy,
        allow_legacy_identity: bool,
    ) -> Self {
        Self {
            authenticator,
            limiter,
            policy,
            allow_legacy_identity,
        }
    }

    /// Applies only the rate limit.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::RateLimited`] when the caller is over the limit.
    pub fn throttle(&self, request: &Request) -> ServerResult<()> {
        self.throttle_at(request, unix_millis())
    }

    fn throttle_at(&self, request: &Request, now_ms: u64) -> ServerResult<()> {
        let client = client_key(request);
        match self
            .limiter
            .check_at(&client, self.policy.window, self.policy.max_requests, now_ms)
        {
            RateDecision::Allowed { .. } => Ok(()),
            RateDecision::Limited { reset_at } => {
                warn!(client = %client, path = %request.path, reset_at, "request throttled");
                Err(ServerError::RateLimited {
                    reset_at,
                    retry_after_secs: retry_after_secs(reset_at, now_ms),
                })
            }
        }
    }

    /// Rate-limits then authenticates `request`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::RateLimited`] or [`ServerError::Unauthenticated`].
    /// A throttled request is never authenticated.
    pub fn admit(&self, request: &Request) -> ServerResult<Identity> {
        self.throttle(request)?;
        self.authenticate(request)
    }

    /// Authenticates an already throttled `request`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Unauthenticated`].
    pub fn authenticate(&self, request: &Request) -> ServerResult<Identity> {
        let identity = self
            .authenticator
            .extract_identity(request, self.allow_legacy_identity)?;
        Ok(identity)
    }
}

fn client_key(request: &Request) -> String {
    request
        .remote_addr
        .map_or_else(|| UNKNOWN_CLIENT.to_string(), |addr| addr.to_string())
}

/// Whole seconds until `reset_at`, rounded up, never below one.
fn retry_after_secs(reset_at: u64, now_ms: u64) -> u64 {
    reset_at.saturating_sub(now_ms).div_ceil(1_000).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthMethod;
    use crate::config::AuthConfig;
    use crate::error::AuthError;
    use crate::rate_limit::SlidingWindowLimiter;
    use crate::request::Method;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tracklog_core::UserId;

    fn guard(max_requests: u32, legacy: bool) -> (RequestGuard, Arc<TokenAuthenticator>) {
        let auth = Arc::new(
            TokenAuthenticator::new(&AuthConfig::new("guard-test-secret-0123456789abcdef"))
                .unwrap(),
        );
        let policy = RateLimitPolicy {
            window: Duration::from_secs(60),
            max_requests,
        };
        let guard = RequestGuard::new(
            Arc::clone(&auth),
            Arc::new(SlidingWindowLimiter::new()),
            policy,
            legacy,
        );
        (guard, auth)
    }

    fn from(addr: [u8; 4]) -> Request {
        Request::new(Method::Get, "/workouts").with_remote_addr(IpAddr::V4(Ipv4Addr::from(addr)))
    }

    #[test]
    fn admits_authenticated_caller() {
        let (guard, auth) = guard(10, false);
        let user = UserId::generate();
        let token = auth.issue(&user, Duration::from_secs(60));
        let request = from([10, 0, 0, 1]).with_header("Authorization", format!("Bearer {token}"));

        let identity = guard.admit(&request).unwrap();
        assert_eq!(identity.user_id, user);
        assert_eq!(identity.method, AuthMethod::Bearer);
    }

    #[test]
    fn throttles_before_authenticating() {
        let (guard, _) = guard(2, false);
        let request = from([10, 0, 0, 2]);

        for _ in 0..2 {
            assert!(matches!(
                guard.admit(&request),
                Err(ServerError::Unauthenticated(AuthError::Missing))
            ));
        }
        let err = guard.admit(&request).unwrap_err();
        assert!(matches!(err, ServerError::RateLimited { .. }));
        assert_eq!(err.status_code(), 429);

        // A different address has its own budget.
        assert!(guard.throttle(&from([10, 0, 0, 3])).is_ok());
    }

    #[test]
    fn unknown_peers_share_a_bucket() {
        let (guard, _) = guard(1, false);
        let anonymous = Request::new(Method::Post, "/users");
        assert!(guard.throttle(&anonymous).is_ok());
        assert!(guard.throttle(&anonymous.clone()).is_err());
    }

    #[test]
    fn retry_after_rounds_up() {
        let (guard, _) = guard(1, false);
        let request = from([10, 0, 0, 4]);
        guard.throttle_at(&request, 1_000).unwrap();

        match guard.throttle_at(&request, 1_500) {
            Err(ServerError::RateLimited {
                reset_at,
                retry_after_secs,
            }) => {
                assert_eq!(reset_at, 61_000);
                assert_eq!(retry_after_secs, 60);
            }
            other => panic!("expected rate limit, got {other:?}"),
        }

        assert_eq!(retry_after_secs(10_001, 10_000), 1);
        assert_eq!(retry_after_secs(10_000, 10_000), 1);
        assert_eq!(retry_after_secs(12_001, 10_000), 3);
    }

    #[test]
    fn authenticate_does_not_consume_budget() {
        let (guard, auth) = guard(1, false);
        let token = auth.issue(&UserId::generate(), Duration::from_secs(60));
        let request = from([10, 0, 0, 6]).with_header("X-Auth-Token", token);

        for _ in 0..3 {
            assert!(guard.authenticate(&request).is_ok());
        }
        assert!(guard.admit(&request).is_ok());
        assert!(matches!(
            guard.admit(&request),
            Err(ServerError::RateLimited { .. })
        ));
    }

    #[test]
    fn legacy_flag_is_forwarded() {
        let (strict, _) = guard(10, false);
        let (lenient, _) = guard(10, true);
        let request = from([10, 0, 0, 5]).with_header("X-User-Id", "u_legacy");

        assert!(strict.admit(&request).is_err());
        assert_eq!(lenient.admit(&request).unwrap().method, AuthMethod::Legacy);
    }
}
