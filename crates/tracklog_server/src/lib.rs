//! # Tracklog Server
//!
//! Request handling for the tracklog workout tracker.
//!
//! This crate provides:
//! - Signed bearer tokens (HMAC-SHA256) with expiry
//! - Per-client sliding-window rate limiting
//! - Authenticated, optimistically concurrent document endpoints
//!
//! # Request pipeline
//!
//! Every request goes through the [`RequestGuard`]: the client address is
//! rate-limited first, then the caller is authenticated. Only then does a
//! handler read or write the caller's documents through
//! [`tracklog_core::VersionedStore`]. A write based on a stale version is
//! answered with `409 Conflict` and never retried server-side.
//!
//! # Authentication
//!
//! ```rust
//! use std::time::Duration;
//! use tracklog_core::UserId;
//! use tracklog_server::{AuthConfig, TokenAuthenticator};
//!
//! let auth = TokenAuthenticator::new(&AuthConfig::new("my-secure-secret-32-bytes-long!!")).unwrap();
//! let user = UserId::generate();
//! let token = auth.issue(&user, Duration::from_secs(3600));
//! assert_eq!(auth.verify(&token).unwrap().user_id, user);
//! ```
//!
//! The server has no HTTP stack of its own; see [`TrackerServer`].

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod guard;
mod handler;
mod rate_limit;
mod request;
mod server;

pub use auth::{AuthMethod, Identity, TokenAuthenticator, VerifiedToken};
pub use config::{ttl_from_days, AuthConfig, RateLimitPolicy, ServerConfig, DEFAULT_TOKEN_TTL};
pub use error::{AuthError, ConfigError, MalformedReason, ServerError, ServerResult};
pub use guard::RequestGuard;
pub use handler::{if_match, HandlerContext, RequestHandler};
pub use rate_limit::{RateDecision, RateLimiter, SlidingWindowLimiter};
pub use request::{Method, Request, Response};
pub use server::TrackerServer;

/// Names of the environment variables read by [`ServerConfig::from_env`].
pub mod env {
    pub use crate::config::{
        ENV_ALLOW_LEGACY_AUTH, ENV_RATE_LIMIT_MAX, ENV_RATE_LIMIT_WINDOW_MS, ENV_TOKEN_SECRET,
        ENV_TOKEN_TTL_DAYS,
    };
}
