//! User identifier.

use crate::error::{CoreError, CoreResult};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracklog_storage::unix_millis;

/// Prefix of every generated identifier.
const PREFIX: &str = "u_";
/// Number of random characters appended to the time component.
const ENTROPY_LEN: usize = 12;
/// Longest identifier accepted from the outside.
pub(crate) const MAX_LEN: usize = 64;

/// Opaque identifier of a user.
///
/// User IDs are:
/// - Generated once at account creation from the creation time plus random entropy
/// - Immutable once assigned
/// - Never reused
///
/// Identifiers accepted from the outside (token payloads, legacy headers)
/// go through [`UserId::parse`], which only admits `[A-Za-z0-9_.-]` so an
/// identifier can never address another user's storage key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Creates a new identifier: `u_<base36 millis>_<random>`.
    #[must_use]
    pub fn generate() -> Self {
        let entropy: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ENTROPY_LEN)
            .map(char::from)
            .collect();
        Self(format!("{PREFIX}{}_{entropy}", to_base36(unix_millis())))
    }

    /// Validates an identifier received from a client or a token.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidUserId`] if the identifier is empty, longer
    /// than 64 bytes, or contains characters outside `[A-Za-z0-9_.-]`.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        if raw.is_empty() {
            return Err(CoreError::invalid_user_id("empty"));
        }
        if raw.len() > MAX_LEN {
            return Err(CoreError::invalid_user_id(format!(
                "longer than {MAX_LEN} bytes"
            )));
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(CoreError::invalid_user_id(format!(
                "unexpected character {c:?}"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = CoreError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}
