//! Key-value backend trait definition.

use crate::error::StorageResult;
use crate::types::{StoredValue, WriteCondition, WriteOutcome};

/// A versioned key-value backend.
///
/// Backends store opaque bytes per key and attach a fresh [`Version`] to
/// every committed write. Higher layers build optimistic concurrency on top
/// of [`KeyValueBackend::put`] with a [`WriteCondition`].
///
/// # Invariants
///
/// - `get` returns exactly the bytes of the last committed write, with its version
/// - Every committed `put` produces a version different from all earlier ones for that key
/// - Evaluating the condition and applying the write happen atomically
/// - A rejected `put` or `delete` leaves the stored value untouched
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
///
/// [`Version`]: crate::Version
pub trait KeyValueBackend: Send + Sync {
    /// Reads the current value and version for `key`.
    ///
    /// Returns `Ok(None)` if the key has never been written or was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<StoredValue>>;

    /// Writes `value` under `key` if `condition` holds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails. A condition that does not
    /// hold is *not* an error: it is reported as [`WriteOutcome::Rejected`].
    fn put(&self, key: &str, value: &[u8], condition: WriteCondition)
        -> StorageResult<WriteOutcome>;

    /// Removes `key` if `condition` holds.
    ///
    /// Deleting a missing key with [`WriteCondition::Any`] is a no-op that
    /// reports `Ok(true)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn delete(&self, key: &str, condition: WriteCondition) -> StorageResult<bool>;

    /// Lists keys starting with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be enumerated.
    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>>;
}
