//! Request handlers for tracker endpoints.
//!
//! Handlers receive an already-admitted caller; rate limiting and
//! authentication happen in [`crate::RequestGuard`].

use crate::auth::{Identity, TokenAuthenticator};
use crate::config::ServerConfig;
use crate::error::{AuthError, ServerError, ServerResult};
use crate::request::{Request, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use tracklog_core::{
    ActivityLog, ActivityMutation, Document, MutationOutcome, Settings, UserId, Version,
    VersionedDocument, VersionedStore, Workout,
};
use tracklog_storage::unix_millis;

/// Request header carrying the version a write is based on.
pub const IF_MATCH_HEADER: &str = "if-match";
/// Body field carrying the version a write is based on.
pub const IF_MATCH_FIELD: &str = "ifMatch";
/// Response header carrying the committed version.
pub const ETAG_HEADER: &str = "ETag";

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Per-user document store.
    pub store: VersionedStore,
    /// Token issuer, shared with the request guard.
    pub authenticator: Arc<TokenAuthenticator>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(
        config: ServerConfig,
        store: VersionedStore,
        authenticator: Arc<TokenAuthenticator>,
    ) -> Self {
        Self {
            config,
            store,
            authenticator,
        }
    }
}

/// Handler for tracker requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Creates a user and issues its first token.
    pub fn handle_register(&self) -> ServerResult<Response> {
        let user_id = UserId::generate();
        let auth = &self.context.authenticator;
        let now = unix_millis();
        let token = auth.issue_at(&user_id, auth.token_ttl(), now);
        let expires_at = now.saturating_add(auth.token_ttl().as_millis() as u64);
        info!(user_id = %user_id, "registered user");
        Ok(Response::json(
            201,
            json!({
                "userId": user_id,
                "token": token,
                "expiresAt": expires_at,
            }),
        ))
    }

    /// Exchanges the presented token for a fresh one.
    pub fn handle_refresh(&self, request: &Request) -> ServerResult<Response> {
        let auth = &self.context.authenticator;
        let (token, _) = auth.presented_token(request)?.ok_or(AuthError::Missing)?;
        let (fresh, verified) = auth.refresh(token)?;
        Ok(Response::json(
            200,
            json!({
                "userId": verified.user_id,
                "token": fresh,
                "expiresAt": verified.expires_at,
            }),
        ))
    }

    /// Returns the caller's settings, or the defaults if never written.
    pub fn handle_get_settings(&self, identity: &Identity) -> ServerResult<Response> {
        self.read::<Settings>(&identity.user_id)
    }

    /// Replaces the caller's settings.
    pub fn handle_put_settings(
        &self,
        identity: &Identity,
        request: &Request,
    ) -> ServerResult<Response> {
        let settings: Settings = parse_body(request)?;
        let outcome =
            self.context
                .store
                .replace(&identity.user_id, settings, if_match(request).as_ref())?;
        respond(outcome, 200)
    }

    /// Returns the caller's activity log.
    pub fn handle_get_workouts(&self, identity: &Identity) -> ServerResult<Response> {
        self.read::<ActivityLog>(&identity.user_id)
    }

    /// Appends one workout.
    pub fn handle_append_workout(
        &self,
        identity: &Identity,
        request: &Request,
    ) -> ServerResult<Response> {
        let workout: Workout = parse_body(request)?;
        self.mutate(identity, request, ActivityMutation::Append(workout), 201)
    }

    /// Replaces the workout with `id`.
    pub fn handle_replace_workout(
        &self,
        identity: &Identity,
        id: &str,
        request: &Request,
    ) -> ServerResult<Response> {
        let workout: Workout = parse_body(request)?;
        let mutation = ActivityMutation::Replace {
            id: id.to_string(),
            workout,
        };
        self.mutate(identity, request, mutation, 200)
    }

    /// Deletes the workout with `id`.
    pub fn handle_delete_workout(
        &self,
        identity: &Identity,
        id: &str,
        request: &Request,
    ) -> ServerResult<Response> {
        let mutation = ActivityMutation::Delete { id: id.to_string() };
        self.mutate(identity, request, mutation, 200)
    }

    /// Replaces every workout. Unconditional unless the caller sends a version.
    pub fn handle_import_workouts(
        &self,
        identity: &Identity,
        request: &Request,
    ) -> ServerResult<Response> {
        let workouts: Vec<Workout> = match request.body.as_ref().and_then(|b| b.get("workouts")) {
            Some(list) => serde_json::from_value(list.clone())
                .map_err(|e| ServerError::InvalidRequest(format!("workouts: {e}")))?,
            None => {
                return Err(ServerError::InvalidRequest(
                    "body must contain a workouts array".into(),
                ))
            }
        };
        let count = workouts.len();

        let mut log = ActivityLog::default();
        // Fails only on repeated ids within the import.
        ActivityMutation::ReplaceAll(workouts)
            .apply(&mut log)
            .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;

        let outcome =
            self.context
                .store
                .replace(&identity.user_id, log, if_match(request).as_ref())?;
        info!(user_id = %identity.user_id, count, "imported workouts");
        respond(outcome, 200)
    }

    /// Deletes every document the caller owns.
    pub fn handle_delete_account(&self, identity: &Identity) -> ServerResult<Response> {
        let store = &self.context.store;
        let user = &identity.user_id;
        store.delete::<ActivityLog>(user, None)?;
        store.delete::<Settings>(user, None)?;
        info!(user_id = %user, "deleted account data");
        Ok(Response::json(200, json!({ "deleted": true })))
    }

    fn read<D: Document>(&self, user: &UserId) -> ServerResult<Response> {
        match self.context.store.read_with_version::<D>(user)? {
            Some(doc) => document_response(200, &doc),
            None => Ok(Response::json(
                200,
                json!({ "data": to_value(&D::default())?, "etag": null }),
            )),
        }
    }

    fn mutate(
        &self,
        identity: &Identity,
        request: &Request,
        mutation: ActivityMutation,
        status: u16,
    ) -> ServerResult<Response> {
        let outcome = self.context.store.mutate::<ActivityLog, _>(
            &identity.user_id,
            if_match(request).as_ref(),
            |log| mutation.apply(log),
        )?;
        respond(outcome, status)
    }
}

/// Reads the caller's base version from `If-Match` or the body's `ifMatch`.
///
/// Quotes and a weak `W/` prefix are stripped. `*` and empty values mean
/// "no precondition".
pub fn if_match(request: &Request) -> Option<Version> {
    let raw = request
        .header(IF_MATCH_HEADER)
        .or_else(|| request.body_str(IF_MATCH_FIELD))?;
    let raw = raw.trim();
    let raw = raw.strip_prefix("W/").unwrap_or(raw);
    let raw = raw.trim_matches('"');
    if raw.is_empty() || raw == "*" {
        return None;
    }
    Some(Version::from_client(raw))
}

fn parse_body<T: DeserializeOwned>(request: &Request) -> ServerResult<T> {
    let body = request
        .body
        .as_ref()
        .ok_or_else(|| ServerError::InvalidRequest("missing JSON body".into()))?;
    serde_json::from_value(body.clone()).map_err(|e| ServerError::InvalidRequest(e.to_string()))
}

fn to_value<T: Serialize>(data: &T) -> ServerResult<Value> {
    serde_json::to_value(data).map_err(|e| ServerError::Backend(e.into()))
}

fn document_response<D: Serialize>(status: u16, doc: &VersionedDocument<D>) -> ServerResult<Response> {
    let body = json!({
        "data": to_value(&doc.data)?,
        "etag": doc.version,
        "lastModified": doc.last_modified,
    });
    Ok(Response::json(status, body).with_header(ETAG_HEADER, format!("\"{}\"", doc.version)))
}

fn respond<D: Serialize>(outcome: MutationOutcome<D>, status: u16) -> ServerResult<Response> {
    match outcome {
        MutationOutcome::Committed(doc) => document_response(status, &doc),
        MutationOutcome::Conflict { current } => Err(ServerError::Conflict { current }),
        MutationOutcome::NotFound { record_id } => {
            Err(ServerError::NotFound(format!("workout {record_id}")))
        }
        MutationOutcome::DuplicateRecord { record_id } => Err(ServerError::InvalidRequest(
            format!("workout id {record_id} is already taken"),
        )),
    }
}
