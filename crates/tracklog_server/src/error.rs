//! Error types for the tracklog server.

use thiserror::Error;
use tracklog_core::{CoreError, Version};

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Why a credential could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MalformedReason {
    /// Not exactly two non-empty `.`-separated segments.
    #[error("invalid format")]
    InvalidFormat,
    /// The payload segment is not base64-encoded JSON of the expected shape.
    #[error("invalid payload")]
    InvalidPayload,
    /// The carried user id failed validation.
    #[error("invalid identity")]
    InvalidIdentity,
}

/// Authentication failures. All of them are terminal for the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No credential was presented.
    #[error("authentication required")]
    Missing,

    /// The credential could not be parsed.
    #[error("malformed credential: {0}")]
    Malformed(MalformedReason),

    /// The signature does not match the payload.
    #[error("invalid token signature")]
    BadSignature,

    /// The signature is valid but the token is past its expiry.
    #[error("token expired")]
    Expired {
        /// Unix milliseconds at which the token expired.
        expired_at: u64,
    },
}

/// Configuration refused at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No signing secret was configured.
    #[error("token signing secret is not configured")]
    MissingSecret,

    /// The signing secret is a well-known placeholder.
    #[error("token signing secret is a placeholder value")]
    PlaceholderSecret,

    /// A setting could not be parsed.
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue {
        /// Setting name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },
}

/// Errors that can occur while handling a request.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Authentication failed.
    #[error("unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),

    /// The caller exceeded the request rate.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        /// Unix milliseconds at which a new request will be admitted.
        reset_at: u64,
        /// Seconds until `reset_at`, rounded up.
        retry_after_secs: u64,
    },

    /// The addressed record or route does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An optimistic-concurrency check failed.
    #[error("version conflict")]
    Conflict {
        /// Version currently stored, if any.
        current: Option<Version>,
    },

    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The route exists but not for this method.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// The document store failed.
    #[error("backend failure: {0}")]
    Backend(#[from] CoreError),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Backend(_))
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::Unauthenticated(_) => 401,
            ServerError::NotFound(_) => 404,
            ServerError::MethodNotAllowed => 405,
            ServerError::Conflict { .. } => 409,
            ServerError::RateLimited { .. } => 429,
            ServerError::Backend(_) => 500,
        }
    }

    /// Short machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "invalid-request",
            ServerError::Unauthenticated(_) => "unauthenticated",
            ServerError::NotFound(_) => "not-found",
            ServerError::MethodNotAllowed => "method-not-allowed",
            ServerError::Conflict { .. } => "conflict",
            ServerError::RateLimited { .. } => "rate-limited",
            ServerError::Backend(_) => "internal",
        }
    }

    /// Message safe to send to an untrusted caller.
    ///
    /// Backend failures collapse to a generic message; their details only
    /// go to the server log.
    pub fn public_message(&self) -> String {
        match self {
            ServerError::Backend(_) => "internal server error".into(),
            other => other.to_string(),
        }
    }
}
