//! Value, version and write-condition types shared by all backends.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Opaque version token assigned by a backend on every successful write.
///
/// Callers must treat the contents as opaque. Two writes to the same key
/// never produce the same version.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// Generates a fresh, never-before-seen version.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wraps a version previously handed out to a client (e.g. an `If-Match` value).
    #[must_use]
    pub fn from_client(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the version as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata of a committed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMeta {
    /// Version assigned by the write.
    pub version: Version,
    /// Unix milliseconds of the write.
    pub last_modified: u64,
}

/// A value read back from a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    /// Raw bytes as written.
    pub value: Vec<u8>,
    /// Current version of the key.
    pub version: Version,
    /// Unix milliseconds of the last write.
    pub last_modified: u64,
}

impl StoredValue {
    /// Returns the metadata part of this value.
    #[must_use]
    pub fn meta(&self) -> StoredMeta {
        StoredMeta {
            version: self.version.clone(),
            last_modified: self.last_modified,
        }
    }
}

/// Predicate a write must satisfy to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// Always commit (last-writer-wins).
    Any,
    /// Commit only if the key does not exist yet.
    Absent,
    /// Commit only if the key's current version equals this one.
    Matches(Version),
}

impl WriteCondition {
    /// Builds a condition from an optional expected version.
    ///
    /// `Some(v)` becomes [`WriteCondition::Matches`], `None` becomes
    /// [`WriteCondition::Any`].
    #[must_use]
    pub fn from_expected(expected: Option<&Version>) -> Self {
        match expected {
            Some(v) => Self::Matches(v.clone()),
            None => Self::Any,
        }
    }

    /// Evaluates the condition against the key's current version.
    #[must_use]
    pub fn holds(&self, current: Option<&Version>) -> bool {
        match self {
            Self::Any => true,
            Self::Absent => current.is_none(),
            Self::Matches(expected) => current == Some(expected),
        }
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied.
    Committed(StoredMeta),
    /// The condition did not hold; the stored value is unchanged.
    Rejected {
        /// Version stored at the moment of the attempt, if any.
        current: Option<Version>,
    },
}

impl WriteOutcome {
    /// Returns true if the write was applied.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

/// Current wall-clock time as Unix milliseconds.
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
