//! # tracklog Storage
//!
//! Versioned key-value backends for tracklog.
//!
//! This crate provides the lowest-level storage abstraction. Backends are
//! **opaque byte stores** keyed by string: they do not interpret the
//! documents they hold, but every stored value carries an opaque
//! [`Version`] that changes on every write.
//!
//! ## Design Principles
//!
//! - Reads return the value together with its current version
//! - Writes take a [`WriteCondition`] and the compare-and-set is atomic
//! - A rejected conditional write leaves the stored value untouched
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - Directory of records, atomic across processes via a lock file
//!
//! ## Example
//!
//! ```rust
//! use tracklog_storage::{InMemoryBackend, KeyValueBackend, WriteCondition, WriteOutcome};
//!
//! let backend = InMemoryBackend::new();
//! let first = backend.put("k", b"v1", WriteCondition::Absent).unwrap();
//! let WriteOutcome::Committed(meta) = first else { panic!("fresh key") };
//!
//! // A stale condition is rejected and nothing changes.
//! backend.put("k", b"v2", WriteCondition::Matches(meta.version.clone())).unwrap();
//! let stale = backend.put("k", b"v3", WriteCondition::Matches(meta.version)).unwrap();
//! assert!(!stale.is_committed());
//! assert_eq!(backend.get("k").unwrap().unwrap().value, b"v2");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod types;

pub use backend::KeyValueBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use types::{unix_millis, StoredMeta, StoredValue, Version, WriteCondition, WriteOutcome};
