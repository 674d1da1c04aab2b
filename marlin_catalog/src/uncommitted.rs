//! Catalog changes staged by a single operation before its storage
//! transaction commits.
//!
//! DDL never mutates the shared catalog directly. Each operation stages its
//! intent here: cloned descriptors for metadata writes, two-phase creates,
//! renames, drops, and replaced per-database view state. Lookups made by the
//! owning operation consult these entries first, so the operation reads its
//! own writes; every other operation keeps seeing the published catalog.
//! Commit folds all entries into one catalog write job; rollback discards
//! them and clears any shared-state reservations the operation took.

use std::sync::Arc;

use marlin_id::{CollectionUuid, Timestamp};

use crate::catalog::CollectionCatalog;
use crate::collection::{Collection, IndexCatalogEntry};
use crate::names::{DatabaseName, NamespaceString};
use crate::views::ViewsForDatabase;
use crate::Result;

#[derive(Debug, Clone)]
pub(crate) enum UncommittedEntry {
    /// Two-phase creation; the shared catalog carries a matching
    /// pending-overlay entry until commit or rollback.
    CreatedCollection { coll: Arc<Collection> },
    /// Copy-on-write clone taken for a metadata write.
    WritableCollection { coll: Arc<Collection> },
    /// Writable clone carrying the new namespace; `from` is the old one.
    RenamedCollection {
        coll: Arc<Collection>,
        from: NamespaceString,
    },
    DroppedCollection {
        coll: Arc<Collection>,
        drop_pending: bool,
    },
    DroppedIndex {
        entry: Arc<IndexCatalogEntry>,
        drop_pending: bool,
    },
    /// Wholesale replacement of one database's view state.
    ReplacedViewsForDatabase {
        db: DatabaseName,
        views: ViewsForDatabase,
    },
    /// Name reservation taken in the shared catalog for a view creation;
    /// must be released on commit and rollback alike.
    ViewReservation { nss: NamespaceString },
}

/// Result of resolving a name or identity against staged entries.
#[derive(Debug, Clone)]
pub(crate) enum UncommittedLookup {
    /// Nothing staged for the key; fall through to the shared catalog.
    NotStaged,
    /// The operation dropped (or renamed away) the key; it must read as
    /// absent even though the shared catalog still has it.
    Dropped,
    Found(Arc<Collection>),
}

#[derive(Debug, Default)]
pub(crate) struct UncommittedCatalogUpdates {
    entries: Vec<UncommittedEntry>,
}

impl UncommittedCatalogUpdates {
    pub(crate) fn create_collection(&mut self, coll: Arc<Collection>) {
        self.entries.push(UncommittedEntry::CreatedCollection { coll });
    }

    pub(crate) fn writable_collection(&mut self, coll: Arc<Collection>) {
        self.entries
            .push(UncommittedEntry::WritableCollection { coll });
    }

    pub(crate) fn rename_collection(&mut self, coll: Arc<Collection>, from: NamespaceString) {
        self.entries
            .push(UncommittedEntry::RenamedCollection { coll, from });
    }

    pub(crate) fn drop_collection(&mut self, coll: Arc<Collection>, drop_pending: bool) {
        self.entries
            .push(UncommittedEntry::DroppedCollection { coll, drop_pending });
    }

    pub(crate) fn drop_index(&mut self, entry: Arc<IndexCatalogEntry>, drop_pending: bool) {
        self.entries
            .push(UncommittedEntry::DroppedIndex { entry, drop_pending });
    }

    pub(crate) fn replace_views(&mut self, db: DatabaseName, views: ViewsForDatabase) {
        // Later replacements for the same database supersede earlier ones.
        self.entries
            .retain(|e| !matches!(e, UncommittedEntry::ReplacedViewsForDatabase { db: d, .. } if *d == db));
        self.entries
            .push(UncommittedEntry::ReplacedViewsForDatabase { db, views });
    }

    pub(crate) fn add_view_reservation(&mut self, nss: NamespaceString) {
        self.entries.push(UncommittedEntry::ViewReservation { nss });
    }

    /// Resolve `uuid` against staged entries, newest first.
    pub(crate) fn lookup_by_uuid(&self, uuid: CollectionUuid) -> UncommittedLookup {
        for entry in self.entries.iter().rev() {
            match entry {
                UncommittedEntry::CreatedCollection { coll }
                | UncommittedEntry::WritableCollection { coll }
                | UncommittedEntry::RenamedCollection { coll, .. }
                    if coll.uuid() == uuid =>
                {
                    return UncommittedLookup::Found(Arc::clone(coll));
                }
                UncommittedEntry::DroppedCollection { coll, .. } if coll.uuid() == uuid => {
                    return UncommittedLookup::Dropped;
                }
                _ => {}
            }
        }
        UncommittedLookup::NotStaged
    }

    /// Resolve `nss` against staged entries, newest first. A rename makes
    /// the old namespace read as dropped for the renaming operation.
    pub(crate) fn lookup_by_nss(&self, nss: &NamespaceString) -> UncommittedLookup {
        for entry in self.entries.iter().rev() {
            match entry {
                UncommittedEntry::CreatedCollection { coll }
                | UncommittedEntry::WritableCollection { coll }
                    if coll.ns() == nss =>
                {
                    return UncommittedLookup::Found(Arc::clone(coll));
                }
                UncommittedEntry::RenamedCollection { coll, from } => {
                    if coll.ns() == nss {
                        return UncommittedLookup::Found(Arc::clone(coll));
                    }
                    if from == nss {
                        return UncommittedLookup::Dropped;
                    }
                }
                UncommittedEntry::DroppedCollection { coll, .. } if coll.ns() == nss => {
                    return UncommittedLookup::Dropped;
                }
                _ => {}
            }
        }
        UncommittedLookup::NotStaged
    }

    /// Mutable access to an already-staged descriptor. Repeated metadata
    /// writes within one operation keep hitting the same clone.
    pub(crate) fn writable_mut(&mut self, uuid: CollectionUuid) -> Option<&mut Collection> {
        for entry in self.entries.iter_mut().rev() {
            match entry {
                UncommittedEntry::CreatedCollection { coll }
                | UncommittedEntry::WritableCollection { coll }
                | UncommittedEntry::RenamedCollection { coll, .. }
                    if coll.uuid() == uuid =>
                {
                    return Some(Arc::make_mut(coll));
                }
                _ => {}
            }
        }
        None
    }

    pub(crate) fn views_for_database(&self, db: &DatabaseName) -> Option<&ViewsForDatabase> {
        self.entries.iter().rev().find_map(|e| match e {
            UncommittedEntry::ReplacedViewsForDatabase { db: d, views } if d == db => Some(views),
            _ => None,
        })
    }

    /// True when the operation staged `coll` itself (pointer identity).
    pub(crate) fn contains_collection(&self, coll: &Arc<Collection>) -> bool {
        self.entries.iter().any(|e| match e {
            UncommittedEntry::CreatedCollection { coll: c }
            | UncommittedEntry::WritableCollection { coll: c }
            | UncommittedEntry::RenamedCollection { coll: c, .. } => Arc::ptr_eq(c, coll),
            _ => false,
        })
    }

    pub(crate) fn take_entries(&mut self) -> Vec<UncommittedEntry> {
        std::mem::take(&mut self.entries)
    }
}

/// Fold staged entries into the catalog at storage-commit time. Runs inside
/// a single write job, so either every entry lands in the next published
/// version or, on error, none of them do.
pub(crate) fn apply_commit(
    catalog: &mut CollectionCatalog,
    entries: Vec<UncommittedEntry>,
    commit_ts: Option<Timestamp>,
) -> Result<()> {
    for entry in entries {
        match entry {
            UncommittedEntry::CreatedCollection { coll } => {
                catalog.publish_two_phase_collection(coll, commit_ts)?;
            }
            UncommittedEntry::WritableCollection { coll } => {
                catalog.apply_metadata_write(coll, commit_ts)?;
            }
            UncommittedEntry::RenamedCollection { coll, from } => {
                catalog.apply_rename(coll, &from, commit_ts)?;
            }
            UncommittedEntry::DroppedCollection { coll, drop_pending } => {
                catalog.deregister_collection(coll.uuid(), drop_pending, commit_ts)?;
            }
            UncommittedEntry::DroppedIndex {
                entry,
                drop_pending,
            } => {
                catalog.deregister_index(&entry, drop_pending);
            }
            UncommittedEntry::ReplacedViewsForDatabase { db, views } => {
                catalog.replace_views_for_database(db, views);
            }
            UncommittedEntry::ViewReservation { nss } => {
                catalog.deregister_uncommitted_view(&nss);
            }
        }
    }
    Ok(())
}

/// Undo the shared-catalog side effects of staged entries after the storage
/// transaction aborts. Private clones are simply dropped; only pending
/// overlays and reservations live in the shared catalog before commit.
pub(crate) fn apply_rollback(catalog: &mut CollectionCatalog, entries: Vec<UncommittedEntry>) {
    for entry in entries {
        match entry {
            UncommittedEntry::CreatedCollection { coll } => {
                catalog.remove_two_phase_collection(coll.uuid());
            }
            UncommittedEntry::ViewReservation { nss } => {
                catalog.deregister_uncommitted_view(&nss);
            }
            UncommittedEntry::WritableCollection { .. }
            | UncommittedEntry::RenamedCollection { .. }
            | UncommittedEntry::DroppedCollection { .. }
            | UncommittedEntry::DroppedIndex { .. }
            | UncommittedEntry::ReplacedViewsForDatabase { .. } => {}
        }
    }
}
