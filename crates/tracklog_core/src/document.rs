//! Document trait and the versioned wrapper handed to callers.

use crate::user::UserId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracklog_storage::Version;

/// A per-user JSON document stored under `<KIND>/<user id>`.
///
/// A document that has never been written reads as [`Default::default`].
pub trait Document: Serialize + DeserializeOwned + Default + Clone + Send + Sync {
    /// Storage namespace for this document type.
    const KIND: &'static str;

    /// Rebuilds every derived field from the source records.
    ///
    /// Called on every write. Implementations must start from scratch and
    /// never patch the previous aggregates.
    fn recompute_aggregates(&mut self) {}

    /// Returns the storage key of this document for `user`.
    fn key_for(user: &UserId) -> String {
        format!("{}/{}", Self::KIND, user)
    }
}

/// A document together with the version it was read or committed at.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedDocument<D> {
    /// The document contents.
    pub data: D,
    /// Opaque version; surfaced to clients as an ETag.
    pub version: Version,
    /// Unix milliseconds of the write that produced this version.
    pub last_modified: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Notes;

    impl Document for Notes {
        const KIND: &'static str = "notes";
    }

    #[test]
    fn key_layout() {
        let user = UserId::parse("u_1").unwrap();
        assert_eq!(Notes::key_for(&user), "notes/u_1");
    }
}
