//! Authentication support for the tracker server.
//!
//! This module provides stateless bearer tokens signed with HMAC-SHA256.
//! There is no session table: a token is valid exactly when its signature
//! checks out and its expiry has not passed.
//!
//! ## Token Format
//!
//! ```text
//! base64(payload) "." hex(HMAC-SHA256(secret, payload))
//! payload = {"userId":"<id>","exp":<unix millis>}
//! ```
//!
//! The MAC is always computed over the exact bytes decoded from the first
//! segment, never over a re-serialization of the parsed fields.

use crate::config::AuthConfig;
use crate::error::{AuthError, ConfigError, MalformedReason};
use crate::request::Request;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use tracklog_core::UserId;
use tracklog_storage::unix_millis;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying a bare token.
pub const TOKEN_HEADER: &str = "x-auth-token";
/// Deprecated header carrying an unsigned user id.
pub const LEGACY_USER_HEADER: &str = "x-user-id";
/// Deprecated body field carrying an unsigned user id.
pub const LEGACY_USER_FIELD: &str = "userId";

/// Secrets shorter than this are accepted with a warning.
const RECOMMENDED_SECRET_LEN: usize = 32;

#[derive(Serialize, Deserialize)]
struct TokenPayload {
    #[serde(rename = "userId")]
    user_id: String,
    exp: u64,
}

/// A successfully verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    /// The user the token was issued to.
    pub user_id: UserId,
    /// Unix milliseconds after which the token is no longer accepted.
    pub expires_at: u64,
}

/// Which credential carrier produced an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// `Authorization: Bearer <token>`.
    Bearer,
    /// `X-Auth-Token: <token>`.
    TokenHeader,
    /// Unsigned `X-User-Id` header or body `userId` field. Deprecated.
    Legacy,
}

/// The caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Resolved user.
    pub user_id: UserId,
    /// How the user was resolved.
    pub method: AuthMethod,
}

/// Issues and verifies signed identity tokens.
#[derive(Clone)]
pub struct TokenAuthenticator {
    keyed: HmacSha256,
    token_ttl: Duration,
}

impl fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenAuthenticator {
    /// Creates a new authenticator.
    ///
    /// # Errors
    ///
    /// Refuses a missing or placeholder secret. This is the fail-fast boot
    /// check: a process without a usable secret must not start.
    pub fn new(config: &AuthConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.secret().len() < RECOMMENDED_SECRET_LEN {
            warn!(
                len = config.secret().len(),
                recommended = RECOMMENDED_SECRET_LEN,
                "token signing secret is shorter than recommended"
            );
        }
        let keyed = HmacSha256::new_from_slice(config.secret())
            .map_err(|_| ConfigError::MissingSecret)?;
        Ok(Self {
            keyed,
            token_ttl: config.token_ttl,
        })
    }

    /// Returns the default token lifetime.
    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    /// Creates a token for `user_id` valid for `ttl`.
    pub fn issue(&self, user_id: &UserId, ttl: Duration) -> String {
        self.issue_at(user_id, ttl, unix_millis())
    }

    /// Creates a token as if the current time were `now_ms`.
    pub fn issue_at(&self, user_id: &UserId, ttl: Duration, now_ms: u64) -> String {
        let payload = TokenPayload {
            user_id: user_id.to_string(),
            exp: now_ms.saturating_add(ttl.as_millis() as u64),
        };
        // Serializing a struct of a string and an integer cannot fail.
        let bytes = serde_json::to_vec(&payload).unwrap_or_default();
        format!("{}.{}", BASE64.encode(&bytes), hex::encode(self.sign(&bytes)))
    }

    /// Verifies a token against the current time.
    ///
    /// # Errors
    ///
    /// See [`TokenAuthenticator::verify_at`].
    pub fn verify(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        self.verify_at(token, unix_millis())
    }

    /// Verifies a token as if the current time were `now_ms`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Malformed`] if the token is not two segments, or the
    ///   first segment is not base64 JSON; the signature is not checked then
    /// - [`AuthError::BadSignature`] if the MAC does not match
    /// - [`AuthError::Expired`] if the MAC matches but `now_ms` is past `exp`
    pub fn verify_at(&self, token: &str, now_ms: u64) -> Result<VerifiedToken, AuthError> {
        let mut segments = token.split('.');
        let (Some(payload_b64), Some(signature_hex), None) =
            (segments.next(), segments.next(), segments.next())
        else {
            return Err(AuthError::Malformed(MalformedReason::InvalidFormat));
        };
        if payload_b64.is_empty() || signature_hex.is_empty() {
            return Err(AuthError::Malformed(MalformedReason::InvalidFormat));
        }

        let payload_bytes = BASE64
            .decode(payload_b64)
            .map_err(|_| AuthError::Malformed(MalformedReason::InvalidPayload))?;
        let payload: TokenPayload = serde_json::from_slice(&payload_bytes)
            .map_err(|_| AuthError::Malformed(MalformedReason::InvalidPayload))?;

        let signature = hex::decode(signature_hex).map_err(|_| AuthError::BadSignature)?;
        let mut mac = self.keyed.clone();
        mac.update(&payload_bytes);
        // verify_slice compares in constant time.
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::BadSignature)?;

        if now_ms > payload.exp {
            return Err(AuthError::Expired {
                expired_at: payload.exp,
            });
        }

        let user_id = UserId::parse(&payload.user_id)
            .map_err(|_| AuthError::Malformed(MalformedReason::InvalidIdentity))?;
        Ok(VerifiedToken {
            user_id,
            expires_at: payload.exp,
        })
    }

    /// Exchanges a valid token for a new one with a fresh default lifetime.
    ///
    /// The old token stays valid until its own expiry.
    ///
    /// # Errors
    ///
    /// Any [`TokenAuthenticator::verify`] failure, including expiry.
    pub fn refresh(&self, token: &str) -> Result<(String, VerifiedToken), AuthError> {
        let verified = self.verify(token)?;
        let now = unix_millis();
        let fresh = self.issue_at(&verified.user_id, self.token_ttl, now);
        let expires_at = now.saturating_add(self.token_ttl.as_millis() as u64);
        Ok((
            fresh,
            VerifiedToken {
                user_id: verified.user_id,
                expires_at,
            },
        ))
    }

    /// Returns the signed token presented by `request`, if any, and the
    /// carrier it came in.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Malformed`] for an `Authorization: Bearer` header
    /// with no token.
    pub fn presented_token<'r>(
        &self,
        request: &'r Request,
    ) -> Result<Option<(&'r str, AuthMethod)>, AuthError> {
        if let Some(value) = request.header("authorization") {
            if let Some((scheme, token)) = value.split_once(' ') {
                if scheme.eq_ignore_ascii_case("bearer") {
                    let token = token.trim();
                    if token.is_empty() {
                        return Err(AuthError::Malformed(MalformedReason::InvalidFormat));
                    }
                    return Ok(Some((token, AuthMethod::Bearer)));
                }
            } else if value.eq_ignore_ascii_case("bearer") {
                return Err(AuthError::Malformed(MalformedReason::InvalidFormat));
            }
        }
        match request.header(TOKEN_HEADER) {
            Some(token) if !token.is_empty() => Ok(Some((token, AuthMethod::TokenHeader))),
            _ => Ok(None),
        }
    }

    /// Resolves the caller of `request`.
    ///
    /// Carriers are tried in order and the first one present decides; an
    /// invalid credential fails the request rather than falling through:
    ///
    /// 1. `Authorization: Bearer <token>`
    /// 2. `X-Auth-Token: <token>`
    /// 3. only if `legacy_allowed`: unsigned `X-User-Id` header, then body
    ///    field `userId`. Every such use is logged as deprecated.
    ///
    /// # Errors
    ///
    /// [`AuthError::Missing`] if nothing matches, otherwise the failure of
    /// the carrier that matched.
    pub fn extract_identity(
        &self,
        request: &Request,
        legacy_allowed: bool,
    ) -> Result<Identity, AuthError> {
        if let Some((token, method)) = self.presented_token(request)? {
            let verified = self.verify(token).inspect_err(|e| {
                debug!(error = %e, ?method, "token rejected");
            })?;
            return Ok(Identity {
                user_id: verified.user_id,
                method,
            });
        }

        let legacy = request
            .header(LEGACY_USER_HEADER)
            .map(|id| (id, "header"))
            .or_else(|| request.body_str(LEGACY_USER_FIELD).map(|id| (id, "body")));

        match legacy {
            Some((raw, source)) if legacy_allowed => {
                let user_id = UserId::parse(raw)
                    .map_err(|_| AuthError::Malformed(MalformedReason::InvalidIdentity))?;
                warn!(
                    deprecated = true,
                    source,
                    user_id = %user_id,
                    "accepted unsigned legacy identity"
                );
                Ok(Identity {
                    user_id,
                    method: AuthMethod::Legacy,
                })
            }
            Some((_, source)) => {
                debug!(source, "legacy identity presented but fallback is disabled");
                Err(AuthError::Missing)
            }
            None => Err(AuthError::Missing),
        }
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = self.keyed.clone();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}
