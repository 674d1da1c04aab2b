//! In-memory collection descriptors.
//!
//! A [`Collection`] is the catalog's value-like view of one durable
//! collection: namespace, stable identity, storage ident, options, and the
//! index entries hanging off it. The catalog never mutates a descriptor in
//! place; metadata writes clone it, mutate the clone, and publish the clone.
//! Expensive immutable state ([`IndexDescriptor`]) is shared between clones
//! through `Arc`, which is what makes point-in-time "compatible clones"
//! cheap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use marlin_id::{CollectionUuid, RecordId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::durable::{DurableCatalogEntry, DurableIndexEntry};
use crate::names::NamespaceString;

/// Creation-time options for a collection. Value-typed and comparable, so a
/// descriptor can be checked for metadata equality against a durable entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionOptions {
    /// Fixed-size collection; oldest documents are evicted on overflow.
    pub capped: Option<CappedOptions>,
    /// Documents are stored ordered by the cluster key instead of a hidden
    /// record id.
    pub clustered: bool,
    /// Document validation expression applied on write.
    pub validator: Option<serde_json::Value>,
    /// Default collation for comparisons within this collection.
    pub collation: Option<serde_json::Value>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct CappedOptions {
    pub size_bytes: u64,
    pub max_documents: Option<u64>,
}

/// Immutable definition of an index: everything that is fixed at index
/// creation. Shared by reference between descriptor clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: Arc<str>,
    /// Key pattern document, e.g. `{"a": 1, "b": -1}`.
    pub key_pattern: serde_json::Value,
    pub unique: bool,
    pub sparse: bool,
}

/// Runtime state of one index on a collection.
///
/// The `multikey` flag is deliberately a relaxed atomic: index writers may
/// raise it on a shared instance without copying the whole descriptor. It is
/// allowed to over-report (claim multikey where the storage snapshot says
/// otherwise) but must never under-report; planners treat it as a hint only.
#[derive(Debug)]
pub struct IndexCatalogEntry {
    descriptor: Arc<IndexDescriptor>,
    ident: Arc<str>,
    ready: bool,
    multikey: AtomicBool,
}

impl IndexCatalogEntry {
    pub fn new(descriptor: Arc<IndexDescriptor>, ident: impl Into<Arc<str>>, ready: bool) -> Self {
        Self {
            descriptor,
            ident: ident.into(),
            ready,
            multikey: AtomicBool::new(false),
        }
    }

    pub fn descriptor(&self) -> &Arc<IndexDescriptor> {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn ident(&self) -> &Arc<str> {
        &self.ident
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_multikey(&self) -> bool {
        self.multikey.load(Ordering::Relaxed)
    }

    /// Raise the multikey flag. There is no way to lower it on a live entry.
    pub fn set_multikey(&self) {
        self.multikey.store(true, Ordering::Relaxed);
    }
}

impl Clone for IndexCatalogEntry {
    fn clone(&self) -> Self {
        Self {
            descriptor: Arc::clone(&self.descriptor),
            ident: Arc::clone(&self.ident),
            ready: self.ready,
            multikey: AtomicBool::new(self.is_multikey()),
        }
    }
}

/// In-memory metadata for one durable collection.
#[derive(Debug)]
pub struct Collection {
    nss: NamespaceString,
    uuid: CollectionUuid,
    record_id: RecordId,
    ident: Arc<str>,
    options: CollectionOptions,
    indexes: Vec<Arc<IndexCatalogEntry>>,
    /// Reads at snapshots older than this must reconstruct the descriptor
    /// from the durable catalog; the in-memory instance is too new for them.
    minimum_valid_snapshot: Option<Timestamp>,
    /// Flipped once the creating DDL commits and the descriptor moves out of
    /// the pending overlay. Interior mutability because the flip happens on
    /// an instance already shared with the overlay.
    committed: AtomicBool,
}

impl Collection {
    pub fn new(
        nss: NamespaceString,
        uuid: CollectionUuid,
        record_id: RecordId,
        ident: impl Into<Arc<str>>,
        options: CollectionOptions,
    ) -> Self {
        Self {
            nss,
            uuid,
            record_id,
            ident: ident.into(),
            options,
            indexes: Vec::new(),
            minimum_valid_snapshot: None,
            committed: AtomicBool::new(true),
        }
    }

    /// Build a descriptor from a durable catalog entry, from scratch. Used
    /// on the point-in-time read path when no in-memory instance is
    /// compatible with the entry.
    pub fn from_durable_entry(entry: &DurableCatalogEntry) -> Self {
        let mut coll = Self::new(
            entry.nss.clone(),
            entry.uuid,
            entry.record_id,
            Arc::clone(&entry.ident),
            entry.metadata.options.clone(),
        );
        for index in &entry.metadata.indexes {
            coll.push_index_from_durable(index, None);
        }
        coll
    }

    /// Build a descriptor for the durable entry that shares index
    /// definitions with `latest`, the current in-memory instance for the
    /// same ident. Requires [`Collection::matches_durable`] on `latest`.
    pub fn compatible_clone(latest: &Self, entry: &DurableCatalogEntry) -> Self {
        let mut coll = Self::new(
            entry.nss.clone(),
            entry.uuid,
            entry.record_id,
            Arc::clone(&entry.ident),
            entry.metadata.options.clone(),
        );
        for index in &entry.metadata.indexes {
            let shared = latest
                .index_by_name(&index.name)
                .map(|e| Arc::clone(e.descriptor()));
            coll.push_index_from_durable(index, shared);
            // Multikey may over-approximate: keep the flag if the live
            // instance has seen multikey writes the snapshot has not.
            if let (Some(live), Some(new)) = (
                latest.index_by_name(&index.name),
                coll.indexes.last(),
            ) {
                if live.is_multikey() {
                    new.set_multikey();
                }
            }
        }
        coll
    }

    fn push_index_from_durable(
        &mut self,
        index: &DurableIndexEntry,
        shared: Option<Arc<IndexDescriptor>>,
    ) {
        let descriptor = shared.unwrap_or_else(|| {
            Arc::new(IndexDescriptor {
                name: Arc::clone(&index.name),
                key_pattern: index.key_pattern.clone(),
                unique: index.unique,
                sparse: index.sparse,
            })
        });
        let entry = IndexCatalogEntry::new(descriptor, Arc::clone(&index.ident), index.ready);
        if index.multikey {
            entry.set_multikey();
        }
        self.indexes.push(Arc::new(entry));
    }

    pub fn ns(&self) -> &NamespaceString {
        &self.nss
    }

    pub fn uuid(&self) -> CollectionUuid {
        self.uuid
    }

    pub fn record_id(&self) -> RecordId {
        self.record_id
    }

    pub fn ident(&self) -> &Arc<str> {
        &self.ident
    }

    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    pub fn is_capped(&self) -> bool {
        self.options.capped.is_some()
    }

    pub fn is_clustered(&self) -> bool {
        self.options.clustered
    }

    pub fn indexes(&self) -> &[Arc<IndexCatalogEntry>] {
        &self.indexes
    }

    pub fn index_by_name(&self, name: &str) -> Option<&Arc<IndexCatalogEntry>> {
        self.indexes.iter().find(|e| e.name() == name)
    }

    pub fn index_by_ident(&self, ident: &str) -> Option<&Arc<IndexCatalogEntry>> {
        self.indexes.iter().find(|e| e.ident().as_ref() == ident)
    }

    pub fn add_index(&mut self, entry: IndexCatalogEntry) {
        self.indexes.push(Arc::new(entry));
    }

    pub fn remove_index(&mut self, name: &str) -> Option<Arc<IndexCatalogEntry>> {
        let pos = self.indexes.iter().position(|e| e.name() == name)?;
        Some(self.indexes.remove(pos))
    }

    pub fn minimum_valid_snapshot(&self) -> Option<Timestamp> {
        self.minimum_valid_snapshot
    }

    /// Record that this instance reflects state as of `ts`. Only ever moves
    /// forward.
    pub fn set_minimum_valid_snapshot(&mut self, ts: Timestamp) {
        if self.minimum_valid_snapshot.map_or(true, |cur| cur < ts) {
            self.minimum_valid_snapshot = Some(ts);
        }
    }

    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }

    pub fn set_committed(&self, committed: bool) {
        self.committed.store(committed, Ordering::Release);
    }

    /// Rename support: produce the descriptor under its new namespace.
    pub fn with_namespace(&self, nss: NamespaceString) -> Self {
        let mut cloned = self.clone();
        cloned.nss = nss;
        cloned
    }

    /// True when the durable entry describes the same storage-level object
    /// as this instance: same ident and an index set with matching idents.
    /// When it holds, a point-in-time read may share index definitions with
    /// this instance instead of rebuilding them.
    pub fn matches_durable(&self, entry: &DurableCatalogEntry) -> bool {
        if self.ident != entry.ident || self.uuid != entry.uuid {
            return false;
        }
        entry.metadata.indexes.iter().all(|index| {
            self.index_by_name(&index.name)
                .is_some_and(|live| live.ident() == &index.ident)
        })
    }
}

impl Clone for Collection {
    fn clone(&self) -> Self {
        Self {
            nss: self.nss.clone(),
            uuid: self.uuid,
            record_id: self.record_id,
            ident: Arc::clone(&self.ident),
            options: self.options.clone(),
            indexes: self.indexes.clone(),
            minimum_valid_snapshot: self.minimum_valid_snapshot,
            committed: AtomicBool::new(self.is_committed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::durable::CollectionMetadata;
    use crate::names::DatabaseName;

    fn test_entry() -> DurableCatalogEntry {
        DurableCatalogEntry {
            record_id: RecordId::new(11),
            nss: NamespaceString::new(DatabaseName::new("app"), "orders"),
            uuid: CollectionUuid::from(1_u128),
            ident: Arc::from("collection-11"),
            metadata: CollectionMetadata {
                options: CollectionOptions::default(),
                indexes: vec![DurableIndexEntry {
                    name: Arc::from("a_1"),
                    key_pattern: json!({"a": 1}),
                    ident: Arc::from("index-11-a"),
                    unique: false,
                    sparse: false,
                    multikey: false,
                    ready: true,
                }],
            },
        }
    }

    #[test]
    fn compatible_clone_shares_index_descriptors() {
        let entry = test_entry();
        let latest = Collection::from_durable_entry(&entry);
        let clone = Collection::compatible_clone(&latest, &entry);

        let live = latest.index_by_name("a_1").unwrap();
        let shared = clone.index_by_name("a_1").unwrap();
        assert!(Arc::ptr_eq(live.descriptor(), shared.descriptor()));
    }

    #[test]
    fn compatible_clone_keeps_multikey_over_approximation() {
        let entry = test_entry();
        let latest = Collection::from_durable_entry(&entry);
        latest.index_by_name("a_1").unwrap().set_multikey();

        // Durable entry says "not multikey"; the clone still reports it.
        let clone = Collection::compatible_clone(&latest, &entry);
        assert!(clone.index_by_name("a_1").unwrap().is_multikey());
    }

    #[test]
    fn matches_durable_requires_same_ident() {
        let entry = test_entry();
        let latest = Collection::from_durable_entry(&entry);
        assert!(latest.matches_durable(&entry));

        let mut moved = entry.clone();
        moved.ident = Arc::from("collection-99");
        assert!(!latest.matches_durable(&moved));
    }

    #[test]
    fn minimum_valid_snapshot_only_advances() {
        let entry = test_entry();
        let mut coll = Collection::from_durable_entry(&entry);
        coll.set_minimum_valid_snapshot(Timestamp::new(20));
        coll.set_minimum_valid_snapshot(Timestamp::new(10));
        assert_eq!(coll.minimum_valid_snapshot(), Some(Timestamp::new(20)));
    }
}
