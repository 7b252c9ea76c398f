//! Server configuration.

use crate::error::ConfigError;
use std::fmt;
use std::time::Duration;
use zeroize::Zeroizing;

/// Environment variable holding the token signing secret.
pub const ENV_TOKEN_SECRET: &str = "TRACKLOG_TOKEN_SECRET";
/// Environment variable enabling the deprecated unsigned-identity fallback.
pub const ENV_ALLOW_LEGACY_AUTH: &str = "TRACKLOG_ALLOW_LEGACY_AUTH";
/// Environment variable overriding the token lifetime, in days.
pub const ENV_TOKEN_TTL_DAYS: &str = "TRACKLOG_TOKEN_TTL_DAYS";
/// Environment variable overriding the rate-limit window, in milliseconds.
pub const ENV_RATE_LIMIT_WINDOW_MS: &str = "TRACKLOG_RATE_LIMIT_WINDOW_MS";
/// Environment variable overriding the requests allowed per window.
pub const ENV_RATE_LIMIT_MAX: &str = "TRACKLOG_RATE_LIMIT_MAX";

/// Default token lifetime: 30 days.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Secrets that ship in sample configs and must never sign real tokens.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me",
    "changeme",
    "change-this",
    "secret",
    "your-secret-key",
    "your-secret-here",
    "replace-me",
    "dev-secret",
    "default",
    "password",
    "test",
];

/// Token signing configuration.
#[derive(Clone)]
pub struct AuthConfig {
    secret: Zeroizing<Vec<u8>>,
    /// Token lifetime used by `issue` and `refresh`.
    pub token_ttl: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    ///
    /// The secret is checked by [`AuthConfig::validate`], which
    /// [`crate::TokenAuthenticator::new`] runs before accepting it.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
            token_ttl: DEFAULT_TOKEN_TTL,
        }
    }

    /// Sets the token lifetime.
    #[must_use]
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub(crate) fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Refuses an empty secret or a known placeholder.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] or [`ConfigError::PlaceholderSecret`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let trimmed = String::from_utf8_lossy(&self.secret).trim().to_ascii_lowercase();
        if trimmed.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if PLACEHOLDER_SECRETS.contains(&trimmed.as_str()) {
            return Err(ConfigError::PlaceholderSecret);
        }
        Ok(())
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("token_ttl", &self.token_ttl)
            .finish()
    }
}

/// Sliding-window limits applied per client address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Length of the trailing window.
    pub window: Duration,
    /// Requests admitted per window.
    pub max_requests: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 100,
        }
    }
}

/// Configuration for the tracker server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Token signing configuration.
    pub auth: AuthConfig,
    /// Accept unsigned identities from `X-User-Id` / body `userId`.
    ///
    /// Migration shim only; every use is logged as deprecated.
    pub allow_legacy_identity: bool,
    /// Rate-limit policy.
    pub rate_limit: RateLimitPolicy,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(auth: AuthConfig) -> Self {
        Self {
            auth,
            allow_legacy_identity: false,
            rate_limit: RateLimitPolicy::default(),
        }
    }

    /// Enables or disables the legacy identity fallback.
    #[must_use]
    pub fn with_legacy_identity(mut self, allowed: bool) -> Self {
        self.allow_legacy_identity = allowed;
        self
    }

    /// Sets the rate-limit policy.
    #[must_use]
    pub fn with_rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit = policy;
        self
    }

    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Fails if the secret is absent or a placeholder, or if a numeric
    /// setting does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads the configuration through `lookup`, which maps a variable name
    /// to its value.
    ///
    /// # Errors
    ///
    /// Same as [`ServerConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let secret = lookup(ENV_TOKEN_SECRET).ok_or(ConfigError::MissingSecret)?;
        let mut auth = AuthConfig::new(secret);
        auth.validate()?;

        if let Some(days) = parse_var::<u64>(&lookup, ENV_TOKEN_TTL_DAYS)? {
            let ttl = ttl_from_days(days).ok_or_else(|| ConfigError::InvalidValue {
                name: ENV_TOKEN_TTL_DAYS,
                value: days.to_string(),
            })?;
            auth = auth.with_token_ttl(ttl);
        }

        let mut rate_limit = RateLimitPolicy::default();
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_RATE_LIMIT_WINDOW_MS)? {
            rate_limit.window = Duration::from_millis(ms);
        }
        if let Some(max) = parse_var::<u32>(&lookup, ENV_RATE_LIMIT_MAX)? {
            rate_limit.max_requests = max;
        }

        let allow_legacy_identity = match lookup(ENV_ALLOW_LEGACY_AUTH) {
            None => false,
            Some(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidValue {
                name: ENV_ALLOW_LEGACY_AUTH,
                value: raw,
            })?,
        };

        Ok(Self {
            auth,
            allow_legacy_identity,
            rate_limit,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
    }
}

/// Converts a lifetime in days, or `None` if it does not fit in `u64`
/// milliseconds (the unit of a token's `exp`).
pub fn ttl_from_days(days: u64) -> Option<Duration> {
    days.checked_mul(24 * 60 * 60 * 1_000).map(Duration::from_millis)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
