//! In-memory key-value backend for testing.

use crate::backend::KeyValueBackend;
use crate::error::StorageResult;
use crate::types::{unix_millis, StoredMeta, StoredValue, Version, WriteCondition, WriteOutcome};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory key-value backend.
///
/// This backend stores all values in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Single-process deployments that don't need persistence
///
/// # Thread Safety
///
/// The condition check and the write run under one write lock, so
/// conditional puts are atomic with respect to every other caller.
///
/// # Example
///
/// ```rust
/// use tracklog_storage::{InMemoryBackend, KeyValueBackend, WriteCondition};
///
/// let backend = InMemoryBackend::new();
/// backend.put("user/1", b"{}", WriteCondition::Any).unwrap();
/// assert_eq!(backend.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: RwLock<BTreeMap<String, StoredValue>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Clears all data from the backend.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl KeyValueBackend for InMemoryBackend {
    fn get(&self, key: &str) -> StorageResult<Option<StoredValue>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(
        &self,
        key: &str,
        value: &[u8],
        condition: WriteCondition,
    ) -> StorageResult<WriteOutcome> {
        let mut entries = self.entries.write();
        let current = entries.get(key).map(|v| &v.version);

        if !condition.holds(current) {
            return Ok(WriteOutcome::Rejected {
                current: current.cloned(),
            });
        }

        let meta = StoredMeta {
            version: Version::generate(),
            last_modified: unix_millis(),
        };
        entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_vec(),
                version: meta.version.clone(),
                last_modified: meta.last_modified,
            },
        );
        Ok(WriteOutcome::Committed(meta))
    }

    fn delete(&self, key: &str, condition: WriteCondition) -> StorageResult<bool> {
        let mut entries = self.entries.write();
        if !condition.holds(entries.get(key).map(|v| &v.version)) {
            return Ok(false);
        }
        entries.remove(key);
        Ok(true)
    }

    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .entries
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
