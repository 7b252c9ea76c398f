//! Optimistic-concurrency document store.
//!
//! [`VersionedStore`] layers a read-transform-commit protocol over a
//! [`KeyValueBackend`]:
//!
//! 1. Read `{data, version}`; a missing document reads as `D::default()`
//!    and the commit is then conditioned on the key still being absent.
//! 2. Apply a pure transform. A transform addressing a missing record
//!    yields [`MutationOutcome::NotFound`], one reusing a taken record id
//!    yields [`MutationOutcome::DuplicateRecord`]; nothing is written.
//! 3. Recompute all derived aggregates from the whole document.
//! 4. Commit with a compare-and-set on the version read in step 1.
//! 5. If the caller sent an `If-Match` version that differs from the one
//!    read, or the compare-and-set fails, report [`MutationOutcome::Conflict`].
//!
//! There is no retry. A retry on top of a stale read could discard a
//! concurrent writer's edit; the caller re-reads and resubmits instead.
//! The only atomicity this relies on is the backend's conditional put.

use crate::document::{Document, VersionedDocument};
use crate::error::{CoreResult, MutationError};
use crate::user::UserId;
use std::sync::Arc;
use tracing::{debug, info};
use tracklog_storage::{KeyValueBackend, Version, WriteCondition, WriteOutcome};

/// Result of a write attempt. Conflicts and missing records are ordinary
/// outcomes, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<D> {
    /// The new document was committed.
    Committed(VersionedDocument<D>),
    /// Another writer got there first; nothing was written.
    Conflict {
        /// Version stored when the conflict was detected, if any.
        current: Option<Version>,
    },
    /// The transform addressed a record that does not exist; nothing was written.
    NotFound {
        /// Id of the missing record.
        record_id: String,
    },
    /// The transform would create a second record with an existing id;
    /// nothing was written.
    DuplicateRecord {
        /// The colliding id.
        record_id: String,
    },
}

impl<D> MutationOutcome<D> {
    /// Returns the committed document, if any.
    #[must_use]
    pub fn committed(self) -> Option<VersionedDocument<D>> {
        match self {
            Self::Committed(doc) => Some(doc),
            _ => None,
        }
    }

    /// Returns true if the write lost a race.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Per-user document store with optimistic concurrency.
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct VersionedStore {
    backend: Arc<dyn KeyValueBackend>,
}

impl std::fmt::Debug for VersionedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedStore").finish_non_exhaustive()
    }
}

impl VersionedStore {
    /// Creates a store over `backend`.
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self { backend }
    }

    /// Returns the underlying backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn KeyValueBackend> {
        &self.backend
    }

    /// Reads `user`'s document of type `D` together with its version.
    ///
    /// Returns `Ok(None)` if the document has never been written.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or the stored bytes do not
    /// decode as `D`.
    pub fn read_with_version<D: Document>(
        &self,
        user: &UserId,
    ) -> CoreResult<Option<VersionedDocument<D>>> {
        let Some(stored) = self.backend.get(&D::key_for(user))? else {
            return Ok(None);
        };
        let data = serde_json::from_slice(&stored.value)?;
        Ok(Some(VersionedDocument {
            data,
            version: stored.version,
            last_modified: stored.last_modified,
        }))
    }

    /// Writes `data` as `user`'s document.
    ///
    /// With `expected == None` the write is unconditional (last-writer-wins)
    /// and always commits. Otherwise it commits only if the stored version
    /// still equals `expected`; on mismatch the stored document is untouched
    /// and [`MutationOutcome::Conflict`] is returned.
    ///
    /// Aggregates are recomputed before writing. Never returns
    /// [`MutationOutcome::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the backend fails.
    pub fn write_if_version<D: Document>(
        &self,
        user: &UserId,
        data: D,
        expected: Option<&Version>,
    ) -> CoreResult<MutationOutcome<D>> {
        self.commit(user, data, WriteCondition::from_expected(expected))
    }

    /// Runs the read-transform-commit protocol on `user`'s document.
    ///
    /// `if_match` is a version the client saw earlier (e.g. across a network
    /// round trip). When present it must equal the version read now.
    ///
    /// # Errors
    ///
    /// Returns an error only if the backend or the document codec fails.
    pub fn mutate<D, F>(
        &self,
        user: &UserId,
        if_match: Option<&Version>,
        transform: F,
    ) -> CoreResult<MutationOutcome<D>>
    where
        D: Document,
        F: FnOnce(&mut D) -> Result<(), MutationError>,
    {
        let (mut data, read_version) = match self.read_with_version::<D>(user)? {
            Some(doc) => (doc.data, Some(doc.version)),
            None => (D::default(), None),
        };

        if let Some(expected) = if_match {
            if read_version.as_ref() != Some(expected) {
                info!(
                    key = %D::key_for(user),
                    expected = %expected,
                    "stale If-Match version"
                );
                return Ok(MutationOutcome::Conflict {
                    current: read_version,
                });
            }
        }

        match transform(&mut data) {
            Ok(()) => {}
            Err(MutationError::RecordNotFound(record_id)) => {
                return Ok(MutationOutcome::NotFound { record_id });
            }
            Err(MutationError::DuplicateRecord(record_id)) => {
                return Ok(MutationOutcome::DuplicateRecord { record_id });
            }
        }

        let condition = match read_version {
            Some(version) => WriteCondition::Matches(version),
            None => WriteCondition::Absent,
        };
        self.commit(user, data, condition)
    }

    /// Replaces `user`'s whole document.
    ///
    /// Without `if_match` this is an unconditional bulk replace that accepts
    /// last-writer-wins; with it, a conditional write on that version.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the backend fails.
    pub fn replace<D: Document>(
        &self,
        user: &UserId,
        data: D,
        if_match: Option<&Version>,
    ) -> CoreResult<MutationOutcome<D>> {
        self.write_if_version(user, data, if_match)
    }

    /// Deletes `user`'s document of type `D`.
    ///
    /// Returns `false` if `if_match` is given and no longer current.
    /// Deleting a missing document unconditionally succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn delete<D: Document>(&self, user: &UserId, if_match: Option<&Version>) -> CoreResult<bool> {
        let key = D::key_for(user);
        let deleted = self
            .backend
            .delete(&key, WriteCondition::from_expected(if_match))?;
        debug!(key = %key, deleted, "delete document");
        Ok(deleted)
    }

    fn commit<D: Document>(
        &self,
        user: &UserId,
        mut data: D,
        condition: WriteCondition,
    ) -> CoreResult<MutationOutcome<D>> {
        data.recompute_aggregates();
        let key = D::key_for(user);
        let bytes = serde_json::to_vec(&data)?;

        match self.backend.put(&key, &bytes, condition)? {
            WriteOutcome::Committed(meta) => {
                debug!(key = %key, version = %meta.version, "committed document");
                Ok(MutationOutcome::Committed(VersionedDocument {
                    data,
                    version: meta.version,
                    last_modified: meta.last_modified,
                }))
            }
            WriteOutcome::Rejected { current } => {
                info!(key = %key, current = ?current, "write conflict");
                Ok(MutationOutcome::Conflict { current })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{ActivityLog, ActivityMutation, Workout};
    use crate::settings::{Settings, Units};
    use tracklog_storage::InMemoryBackend;

    fn store() -> VersionedStore {
        VersionedStore::new(Arc::new(InMemoryBackend::new()))
    }

    fn run(minutes: u32) -> Workout {
        Workout::new("2024-04-01".parse().unwrap(), "run", minutes)
    }

    fn append(
        store: &VersionedStore,
        user: &UserId,
        if_match: Option<&Version>,
        workout: Workout,
    ) -> MutationOutcome<ActivityLog> {
        store
            .mutate::<ActivityLog, _>(user, if_match, |log| {
                ActivityMutation::Append(workout).apply(log)
            })
            .unwrap()
    }

    #[test]
    fn read_missing_document() {
        let store = store();
        let user = UserId::generate();
        assert!(store.read_with_version::<Settings>(&user).unwrap().is_none());
    }

    #[test]
    fn mutate_creates_document() {
        let store = store();
        let user = UserId::generate();

        let doc = append(&store, &user, None, run(30)).committed().unwrap();
        assert_eq!(doc.data.workouts.len(), 1);
        assert_eq!(doc.data.totals.duration_minutes, 30);

        let read = store.read_with_version::<ActivityLog>(&user).unwrap().unwrap();
        assert_eq!(read.version, doc.version);
        assert_eq!(read.data, doc.data);
    }

    #[test]
    fn stale_if_match_conflicts_without_writing() {
        let store = store();
        let user = UserId::generate();

        let v1 = append(&store, &user, None, run(10)).committed().unwrap().version;
        let v2 = append(&store, &user, Some(&v1), run(20))
            .committed()
            .unwrap()
            .version;

        let outcome = append(&store, &user, Some(&v1), run(30));
        assert_eq!(outcome, MutationOutcome::Conflict { current: Some(v2.clone()) });

        let read = store.read_with_version::<ActivityLog>(&user).unwrap().unwrap();
        assert_eq!(read.version, v2);
        assert_eq!(read.data.workouts.len(), 2);
    }

    #[test]
    fn if_match_on_missing_document_conflicts() {
        let store = store();
        let user = UserId::generate();
        let outcome = append(&store, &user, Some(&Version::generate()), run(10));
        assert_eq!(outcome, MutationOutcome::Conflict { current: None });
        assert!(store.read_with_version::<ActivityLog>(&user).unwrap().is_none());
    }

    #[test]
    fn duplicate_id_writes_nothing() {
        let store = store();
        let user = UserId::generate();
        let v1 = append(&store, &user, None, run(10).with_id("dup"))
            .committed()
            .unwrap()
            .version;

        let outcome = append(&store, &user, Some(&v1), run(20).with_id("dup"));
        assert_eq!(
            outcome,
            MutationOutcome::DuplicateRecord {
                record_id: "dup".into()
            }
        );
        let read = store.read_with_version::<ActivityLog>(&user).unwrap().unwrap();
        assert_eq!(read.version, v1);
        assert_eq!(read.data.workouts.len(), 1);
    }

    #[test]
    fn not_found_writes_nothing() {
        let store = store();
        let user = UserId::generate();
        let v1 = append(&store, &user, None, run(10)).committed().unwrap().version;

        let outcome = store
            .mutate::<ActivityLog, _>(&user, None, |log| {
                ActivityMutation::Delete { id: "missing".into() }.apply(log)
            })
            .unwrap();
        assert_eq!(
            outcome,
            MutationOutcome::NotFound {
                record_id: "missing".into()
            }
        );
        let read = store.read_with_version::<ActivityLog>(&user).unwrap().unwrap();
        assert_eq!(read.version, v1);
    }

    #[test]
    fn race_between_read_and_commit_conflicts() {
        let store = store();
        let user = UserId::generate();
        append(&store, &user, None, run(10));

        // A second writer commits while the first is inside its transform.
        let outcome = store
            .mutate::<ActivityLog, _>(&user, None, |log| {
                append(&store, &user, None, run(99));
                ActivityMutation::Append(run(20)).apply(log)
            })
            .unwrap();
        assert!(outcome.is_conflict());

        let read = store.read_with_version::<ActivityLog>(&user).unwrap().unwrap();
        let minutes: Vec<_> = read.data.workouts.iter().map(|w| w.duration_minutes).collect();
        assert_eq!(minutes, vec![10, 99]);
    }

    #[test]
    fn concurrent_creation_first_writer_wins() {
        let store = store();
        let user = UserId::generate();

        let outcome = store
            .mutate::<ActivityLog, _>(&user, None, |log| {
                append(&store, &user, None, run(1));
                ActivityMutation::Append(run(2)).apply(log)
            })
            .unwrap();
        assert!(outcome.is_conflict());
        let read = store.read_with_version::<ActivityLog>(&user).unwrap().unwrap();
        assert_eq!(read.data.workouts[0].duration_minutes, 1);
    }

    #[test]
    fn unconditional_replace_always_commits() {
        let store = store();
        let user = UserId::generate();
        append(&store, &user, None, run(10));
        append(&store, &user, None, run(20));

        let outcome = store
            .replace(&user, ActivityLog::from_workouts(vec![run(5)]), None)
            .unwrap();
        let doc = outcome.committed().unwrap();
        assert_eq!(doc.data.totals.duration_minutes, 5);
    }

    #[test]
    fn replace_recomputes_client_aggregates() {
        let store = store();
        let user = UserId::generate();

        let mut log = ActivityLog::default();
        log.workouts.push(run(10).with_id("x"));
        log.totals.workouts = 42;

        let doc = store.replace(&user, log, None).unwrap().committed().unwrap();
        assert_eq!(doc.data.totals.workouts, 1);
    }

    #[test]
    fn conditional_write_if_version() {
        let store = store();
        let user = UserId::generate();

        let settings = Settings {
            units: Units::Imperial,
            ..Settings::default()
        };
        let v1 = store
            .write_if_version(&user, settings.clone(), None)
            .unwrap()
            .committed()
            .unwrap()
            .version;
        let v2 = store
            .write_if_version(&user, Settings::default(), Some(&v1))
            .unwrap()
            .committed()
            .unwrap()
            .version;

        let stale = store
            .write_if_version(&user, settings, Some(&v1))
            .unwrap();
        assert_eq!(stale, MutationOutcome::Conflict { current: Some(v2) });
        let read = store.read_with_version::<Settings>(&user).unwrap().unwrap();
        assert_eq!(read.data.units, Units::Metric);
    }

    #[test]
    fn delete_document() {
        let store = store();
        let user = UserId::generate();
        let v = store
            .write_if_version(&user, Settings::default(), None)
            .unwrap()
            .committed()
            .unwrap()
            .version;

        assert!(!store
            .delete::<Settings>(&user, Some(&Version::generate()))
            .unwrap());
        assert!(store.delete::<Settings>(&user, Some(&v)).unwrap());
        assert!(store.read_with_version::<Settings>(&user).unwrap().is_none());
    }

    #[test]
    fn documents_are_isolated_per_user_and_kind() {
        let store = store();
        let alice = UserId::generate();
        let bob = UserId::generate();

        append(&store, &alice, None, run(10));
        store
            .write_if_version(&alice, Settings::default(), None)
            .unwrap();

        assert!(store.read_with_version::<ActivityLog>(&bob).unwrap().is_none());
        assert_eq!(store.backend().keys("").unwrap().len(), 2);
    }
}
