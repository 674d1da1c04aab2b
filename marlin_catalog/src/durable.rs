//! Read-only interfaces to the storage engine.
//!
//! The catalog never persists anything itself. When a read predates what the
//! in-memory maps can answer, it consults the durable catalog through
//! [`DurableCatalog`], always in the context of an opened
//! [`StorageSnapshot`]. Both are implemented by the storage layer; the tests
//! in this crate supply in-memory fakes.

use std::fmt::Debug;
use std::sync::Arc;

use marlin_id::{CollectionUuid, RecordId, Timestamp};

use crate::collection::CollectionOptions;
use crate::names::{DatabaseName, NamespaceString};
use crate::views::RawViewDefinition;
use crate::Result;

/// An opened storage-engine snapshot. All durable reads made through it are
/// mutually consistent.
pub trait StorageSnapshot: Send + Sync + Debug {
    /// The timestamp this snapshot reads at, or `None` for an untimestamped
    /// read of the latest durable state.
    fn read_timestamp(&self) -> Option<Timestamp>;
}

/// Narrow, read-only window onto the storage engine's durable catalog.
pub trait DurableCatalog: Send + Sync + Debug {
    /// Point lookup by durable record id, as of `snapshot`.
    fn fetch_entry(
        &self,
        snapshot: &dyn StorageSnapshot,
        record_id: RecordId,
    ) -> Result<Option<DurableCatalogEntry>>;

    /// Lookup by namespace, as of `snapshot`. This is the scan fallback for
    /// reads that predate the in-memory history window.
    fn fetch_entry_by_nss(
        &self,
        snapshot: &dyn StorageSnapshot,
        nss: &NamespaceString,
    ) -> Result<Option<DurableCatalogEntry>>;

    /// Lookup by collection identity, as of `snapshot`.
    fn fetch_entry_by_uuid(
        &self,
        snapshot: &dyn StorageSnapshot,
        uuid: CollectionUuid,
    ) -> Result<Option<DurableCatalogEntry>>;

    /// Read the raw view definitions stored in `db`'s `system.views`
    /// collection, as of `snapshot`.
    fn load_views(
        &self,
        snapshot: &dyn StorageSnapshot,
        db: &DatabaseName,
    ) -> Result<Vec<RawViewDefinition>>;
}

/// One collection's record in the durable catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct DurableCatalogEntry {
    pub record_id: RecordId,
    pub nss: NamespaceString,
    pub uuid: CollectionUuid,
    /// Storage-engine identifier of the backing table. Unique per create;
    /// a dropped and re-created collection gets a fresh ident.
    pub ident: Arc<str>,
    pub metadata: CollectionMetadata,
}

/// The metadata payload of a durable catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionMetadata {
    pub options: CollectionOptions,
    pub indexes: Vec<DurableIndexEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DurableIndexEntry {
    pub name: Arc<str>,
    pub key_pattern: serde_json::Value,
    pub ident: Arc<str>,
    pub unique: bool,
    pub sparse: bool,
    pub multikey: bool,
    pub ready: bool,
}
