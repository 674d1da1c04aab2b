//! # Marlin Collection Catalog
//!
//! Process-wide, in-memory registry mapping namespaces and collection UUIDs
//! to live collection descriptors, serving consistent snapshots of that
//! mapping to every reader and writer in the server.
//!
//! ## Versioned snapshots
//!
//! The catalog is published as immutable versions. Readers atomically load
//! the current version through [`CatalogPublisher`] and keep it for as long
//! as they need; nothing they observe ever mutates. Writers submit jobs to
//! the publisher, which serializes them, batches concurrent jobs onto one
//! structural-sharing clone, and publishes the result in a single atomic
//! swap. All maps inside a version are persistent data structures, so the
//! clone taken for a write is cheap regardless of catalog size.
//!
//! ## Two-phase DDL
//!
//! Collection creation under an intent-exclusive lock is split in two:
//! the descriptor first enters a pending overlay where ordinary lookups do
//! not see it, then moves into the authoritative maps when the storage
//! transaction commits. A lookup that hits the overlay consults the
//! operation's storage snapshot to decide whether the creation is visible
//! to it yet.
//!
//! ## Point-in-time reads
//!
//! Per-namespace and per-UUID history vectors record `(timestamp, record
//! id)` events, answering "did this collection exist at time t?" entirely
//! in memory. Reads below the maintained history window fall back to a
//! durable-catalog scan whose outcome is cached. An external oldest-
//! timestamp signal prunes history and, together with ident-drop
//! notifications from the storage engine, reaps drop-pending descriptors.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod catalog;
pub mod collection;
mod drop_pending;
pub mod durable;
pub mod error;
pub mod history;
pub mod names;
pub mod operation;
pub mod profile;
pub mod publish;
mod uncommitted;
pub mod views;

pub use catalog::{
    CatalogStats, CollectionCatalog, NamespaceConflictCheck, NUM_COLLECTION_REFERENCES_STORED,
};
pub use collection::{CappedOptions, Collection, CollectionOptions, IndexCatalogEntry, IndexDescriptor};
pub use durable::{
    CollectionMetadata, DurableCatalog, DurableCatalogEntry, DurableIndexEntry, StorageSnapshot,
};
pub use error::CatalogError;
pub use history::{CatalogIdLookup, Existence};
pub use names::{DatabaseName, NamespaceString, NamespaceStringOrUuid, TenantId};
pub use operation::{CatalogStasher, LockMode, LockState, OperationContext, WriteUnitOfWork};
pub use profile::{ProfileFilter, ProfileLevel, ProfileSettings};
pub use publish::{BatchedCatalogWriter, CatalogPublisher};
pub use views::{RawViewDefinition, ViewDefinition, ViewDurability, ViewStats, ViewsForDatabase};

pub(crate) type Result<T, E = CatalogError> = std::result::Result<T, E>;
