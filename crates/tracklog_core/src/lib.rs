//! # tracklog Core
//!
//! Per-user documents and the optimistic-concurrency document store.
//!
//! This crate provides:
//! - [`UserId`] generation and validation
//! - The [`Document`] trait and the two shipped documents, [`ActivityLog`]
//!   and [`Settings`]
//! - [`VersionedStore`], a read-transform-commit protocol on top of any
//!   [`tracklog_storage::KeyValueBackend`]
//!
//! # Concurrency
//!
//! Writers never lock. Every mutation reads the document together with its
//! version, transforms it, recomputes derived aggregates from scratch and
//! commits with a compare-and-set on the version it read. A concurrent
//! writer in between turns the commit into [`MutationOutcome::Conflict`];
//! nothing is retried, the caller re-reads and resubmits.
//!
//! ```rust
//! use std::sync::Arc;
//! use tracklog_core::{ActivityLog, ActivityMutation, MutationOutcome, UserId, VersionedStore, Workout};
//! use tracklog_storage::InMemoryBackend;
//!
//! let store = VersionedStore::new(Arc::new(InMemoryBackend::new()));
//! let user = UserId::generate();
//!
//! let workout = Workout::new("2024-03-04".parse().unwrap(), "run", 30);
//! let outcome = store
//!     .mutate::<ActivityLog, _>(&user, None, |log| ActivityMutation::Append(workout).apply(log))
//!     .unwrap();
//! let MutationOutcome::Committed(doc) = outcome else { panic!("fresh document") };
//! assert_eq!(doc.data.totals.workouts, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod activity;
mod document;
mod error;
mod settings;
mod store;
mod user;

pub use activity::{ActivityLog, ActivityMutation, Tally, Workout};
pub use document::{Document, VersionedDocument};
pub use error::{CoreError, CoreResult, MutationError};
pub use settings::{Settings, Units};
pub use store::{MutationOutcome, VersionedStore};
pub use user::UserId;

pub use tracklog_storage::Version;
