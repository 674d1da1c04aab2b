//! Descriptors whose logical drop has committed but whose backing table or
//! index has not yet been removed from disk.
//!
//! Entries are keyed by storage ident and hold *weak* references: the
//! catalog must not extend a dropped descriptor's lifetime, external holders
//! decide when it dies. The storage engine reports actual file removal via
//! `notify_ident_dropped`, at which point the entry disappears; a lookup in
//! between returns the descriptor only while someone still keeps it alive.

use std::sync::{Arc, Weak};

use observability_deps::tracing::debug;

use crate::collection::{Collection, IndexCatalogEntry};

#[derive(Debug, Clone, Default)]
pub(crate) struct DropPendingIdents {
    collections: imbl::HashMap<Arc<str>, Weak<Collection>>,
    indexes: imbl::HashMap<Arc<str>, Weak<IndexCatalogEntry>>,
}

impl DropPendingIdents {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register_collection(&mut self, ident: Arc<str>, coll: &Arc<Collection>) {
        debug!(ident = %ident, uuid = %coll.uuid(), "collection drop pending");
        self.collections.insert(ident, Arc::downgrade(coll));
    }

    pub(crate) fn register_index(&mut self, ident: Arc<str>, entry: &Arc<IndexCatalogEntry>) {
        debug!(ident = %ident, index = entry.name(), "index drop pending");
        self.indexes.insert(ident, Arc::downgrade(entry));
    }

    /// The storage engine removed the ident's files; forget the entry. Any
    /// surviving external reference now points at a descriptor without
    /// backing storage, but no new lookup can produce it.
    pub(crate) fn notify_ident_dropped(&mut self, ident: &str) {
        let dropped_collection = self.collections.remove(ident).is_some();
        let dropped_index = self.indexes.remove(ident).is_some();
        if dropped_collection || dropped_index {
            debug!(ident = %ident, "drop pending ident removed from disk");
        }
    }

    /// Returns the drop-pending collection for `ident` if it is still alive
    /// and its files are still on disk.
    pub(crate) fn find_collection(&self, ident: &str) -> Option<Arc<Collection>> {
        self.collections.get(ident).and_then(Weak::upgrade)
    }

    /// Returns the drop-pending index for `ident` if it is still alive and
    /// its files are still on disk.
    pub(crate) fn find_index(&self, ident: &str) -> Option<Arc<IndexCatalogEntry>> {
        self.indexes.get(ident).and_then(Weak::upgrade)
    }

    pub(crate) fn clear(&mut self) {
        self.collections.clear();
        self.indexes.clear();
    }
}

#[cfg(test)]
mod tests {
    use marlin_id::{CollectionUuid, RecordId};

    use super::*;
    use crate::collection::CollectionOptions;
    use crate::names::{DatabaseName, NamespaceString};

    fn test_collection() -> Arc<Collection> {
        Arc::new(Collection::new(
            NamespaceString::new(DatabaseName::new("app"), "orders"),
            CollectionUuid::from(1_u128),
            RecordId::new(7),
            "collection-7",
            CollectionOptions::default(),
        ))
    }

    #[test]
    fn lookup_upgrades_while_alive() {
        let coll = test_collection();
        let mut pending = DropPendingIdents::new();
        pending.register_collection(Arc::clone(coll.ident()), &coll);

        let found = pending.find_collection("collection-7").unwrap();
        assert!(Arc::ptr_eq(&found, &coll));
    }

    #[test]
    fn lookup_fails_after_last_reference_drops() {
        let coll = test_collection();
        let mut pending = DropPendingIdents::new();
        pending.register_collection(Arc::clone(coll.ident()), &coll);

        drop(coll);
        assert!(pending.find_collection("collection-7").is_none());
    }

    #[test]
    fn notify_removes_entry_even_while_alive() {
        let coll = test_collection();
        let mut pending = DropPendingIdents::new();
        pending.register_collection(Arc::clone(coll.ident()), &coll);

        pending.notify_ident_dropped("collection-7");
        assert!(pending.find_collection("collection-7").is_none());
    }
}
