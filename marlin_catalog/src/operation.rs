//! Operation-scoped catalog state.
//!
//! Every reader and writer acts in the context of an [`OperationContext`]:
//! it carries the operation's stashed catalog version (for repeatable reads
//! across a long-lived storage snapshot), the open snapshot itself, the
//! catalog changes the operation has staged but not committed, and the lock
//! modes the caller holds. The catalog only ever *asserts* lock modes; it
//! never acquires them.

use std::fmt;
use std::sync::Arc;

use marlin_id::{CollectionUuid, Timestamp};
use observability_deps::tracing::warn;
use parking_lot::{Mutex, MutexGuard};

use crate::catalog::CollectionCatalog;
use crate::collection::Collection;
use crate::durable::{DurableCatalog, StorageSnapshot};
use crate::names::{DatabaseName, NamespaceString, NamespaceStringOrUuid};
use crate::publish::CatalogPublisher;
use crate::uncommitted::{self, UncommittedCatalogUpdates};
use crate::Result;

/// Lock modes of the external lock manager, in the order the catalog cares
/// about them. The catalog checks these as preconditions only.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum LockMode {
    IntentShared,
    IntentExclusive,
    Shared,
    Exclusive,
}

impl LockMode {
    /// Whether holding `self` satisfies a requirement of `needed`.
    pub fn covers(self, needed: Self) -> bool {
        use LockMode::*;
        match (self, needed) {
            (Exclusive, _) => true,
            (Shared, Shared | IntentShared) => true,
            (IntentExclusive, IntentExclusive | IntentShared) => true,
            (IntentShared, IntentShared) => true,
            _ => false,
        }
    }
}

/// The lock modes an operation currently holds, as reported by the caller.
#[derive(Debug, Default)]
pub struct LockState {
    global: Option<LockMode>,
    databases: hashbrown::HashMap<DatabaseName, LockMode>,
    collections: hashbrown::HashMap<NamespaceString, LockMode>,
}

impl LockState {
    pub fn set_global(&mut self, mode: Option<LockMode>) {
        self.global = mode;
    }

    pub fn set_database(&mut self, db: DatabaseName, mode: LockMode) {
        self.databases.insert(db, mode);
    }

    pub fn set_collection(&mut self, nss: NamespaceString, mode: LockMode) {
        self.collections.insert(nss, mode);
    }

    pub fn release_database(&mut self, db: &DatabaseName) {
        self.databases.remove(db);
    }

    pub fn release_collection(&mut self, nss: &NamespaceString) {
        self.collections.remove(nss);
    }

    pub fn is_global_locked_with(&self, needed: LockMode) -> bool {
        self.global.is_some_and(|held| held.covers(needed))
    }

    pub fn is_database_locked_with(&self, db: &DatabaseName, needed: LockMode) -> bool {
        self.databases
            .get(db)
            .is_some_and(|held| held.covers(needed))
            || self.is_global_locked_with(needed)
    }

    pub fn is_collection_locked_with(&self, nss: &NamespaceString, needed: LockMode) -> bool {
        self.collections
            .get(nss)
            .is_some_and(|held| held.covers(needed))
            || self.is_database_locked_with(nss.db(), needed)
    }
}

/// A collection instance (or confirmed absence) materialized consistent
/// with the operation's storage snapshot; repeated lookups return it.
#[derive(Debug, Clone)]
struct OpenedCollection {
    nss: Option<NamespaceString>,
    uuid: Option<CollectionUuid>,
    coll: Option<Arc<Collection>>,
}

/// Per-operation catalog context.
pub struct OperationContext {
    publisher: Arc<CatalogPublisher>,
    durable: Arc<dyn DurableCatalog>,
    snapshot: Mutex<Option<Arc<dyn StorageSnapshot>>>,
    stash: Mutex<Option<Arc<CollectionCatalog>>>,
    uncommitted: Mutex<UncommittedCatalogUpdates>,
    opened: Mutex<Vec<OpenedCollection>>,
    locks: Mutex<LockState>,
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("stashed", &self.stash.lock().is_some())
            .field("snapshot", &self.snapshot.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl OperationContext {
    pub fn new(publisher: Arc<CatalogPublisher>, durable: Arc<dyn DurableCatalog>) -> Self {
        Self {
            publisher,
            durable,
            snapshot: Mutex::new(None),
            stash: Mutex::new(None),
            uncommitted: Mutex::new(UncommittedCatalogUpdates::default()),
            opened: Mutex::new(Vec::new()),
            locks: Mutex::new(LockState::default()),
        }
    }

    pub fn publisher(&self) -> &Arc<CatalogPublisher> {
        &self.publisher
    }

    pub fn durable(&self) -> &Arc<dyn DurableCatalog> {
        &self.durable
    }

    /// Associate an opened storage snapshot with this operation.
    pub fn open_storage_snapshot(&self, snapshot: Arc<dyn StorageSnapshot>) {
        *self.snapshot.lock() = Some(snapshot);
    }

    /// Close the snapshot. Anything scoped to it goes with it: the stashed
    /// catalog version and every collection instance established against it.
    pub fn close_storage_snapshot(&self) {
        *self.snapshot.lock() = None;
        *self.stash.lock() = None;
        self.opened.lock().clear();
    }

    pub fn storage_snapshot(&self) -> Option<Arc<dyn StorageSnapshot>> {
        self.snapshot.lock().clone()
    }

    pub fn read_timestamp(&self) -> Option<Timestamp> {
        self.snapshot.lock().as_ref().and_then(|s| s.read_timestamp())
    }

    pub fn stashed_catalog(&self) -> Option<Arc<CollectionCatalog>> {
        self.stash.lock().clone()
    }

    /// Installing a stash is idempotent; the newest one wins.
    pub fn set_stashed_catalog(&self, catalog: Arc<CollectionCatalog>) {
        *self.stash.lock() = Some(catalog);
    }

    pub fn clear_stashed_catalog(&self) {
        *self.stash.lock() = None;
    }

    pub(crate) fn uncommitted(&self) -> MutexGuard<'_, UncommittedCatalogUpdates> {
        self.uncommitted.lock()
    }

    pub fn locks(&self) -> MutexGuard<'_, LockState> {
        self.locks.lock()
    }

    pub(crate) fn record_opened(
        &self,
        key: &NamespaceStringOrUuid,
        coll: Option<Arc<Collection>>,
    ) {
        let (nss, uuid) = match &coll {
            Some(coll) => (Some(coll.ns().clone()), Some(coll.uuid())),
            None => (key.nss().cloned(), key.uuid()),
        };
        self.opened.lock().push(OpenedCollection { nss, uuid, coll });
    }

    /// An instance previously established against the open snapshot, if
    /// any. `Some(None)` is a cached negative result.
    pub(crate) fn opened_lookup(
        &self,
        key: &NamespaceStringOrUuid,
    ) -> Option<Option<Arc<Collection>>> {
        if self.snapshot.lock().is_none() {
            return None;
        }
        let opened = self.opened.lock();
        opened
            .iter()
            .find(|entry| match key {
                NamespaceStringOrUuid::Namespace(nss) => entry.nss.as_ref() == Some(nss),
                NamespaceStringOrUuid::Uuid(_, uuid) => entry.uuid == Some(*uuid),
            })
            .map(|entry| entry.coll.clone())
    }
}

/// RAII holder of a stashed catalog version.
///
/// Installs `catalog` on the operation so that reads through
/// [`CatalogPublisher::get`] observe that version repeatably; releases the
/// stash when dropped, on every exit path.
#[derive(Debug)]
pub struct CatalogStasher {
    op: Arc<OperationContext>,
}

impl CatalogStasher {
    pub fn new(op: Arc<OperationContext>, catalog: Arc<CollectionCatalog>) -> Self {
        op.set_stashed_catalog(catalog);
        Self { op }
    }

    /// Replace the stashed version.
    pub fn stash(&self, catalog: Arc<CollectionCatalog>) {
        self.op.set_stashed_catalog(catalog);
    }
}

impl Drop for CatalogStasher {
    fn drop(&mut self) {
        self.op.clear_stashed_catalog();
    }
}

/// RAII scope for DDL staged through the operation.
///
/// Everything staged while the unit is open becomes visible to other
/// operations only through [`commit`](Self::commit), which folds the staged
/// entries into a single catalog write job at the storage commit timestamp.
/// Dropping the unit without committing rolls back: private clones are
/// discarded and shared-state reservations (pending overlays, view name
/// reservations) are removed.
#[derive(Debug)]
pub struct WriteUnitOfWork {
    op: Arc<OperationContext>,
    finished: bool,
}

impl WriteUnitOfWork {
    pub fn new(op: Arc<OperationContext>) -> Self {
        Self { op, finished: false }
    }

    pub fn op(&self) -> &Arc<OperationContext> {
        &self.op
    }

    /// Publish the staged catalog updates at `commit_ts` (the storage
    /// transaction's commit timestamp; `None` for untimestamped commits
    /// such as startup recovery).
    pub fn commit(mut self, commit_ts: Option<Timestamp>) -> Result<()> {
        self.finished = true;
        let entries = self.op.uncommitted().take_entries();
        if entries.is_empty() {
            return Ok(());
        }
        let for_rollback = entries.clone();
        let result = self
            .op
            .publisher()
            .write(move |catalog| uncommitted::apply_commit(catalog, entries, commit_ts));
        if result.is_err() {
            // The commit job was discarded wholesale; shared-state
            // reservations taken at stage time still need releasing.
            let rollback = self.op.publisher().write(move |catalog| {
                uncommitted::apply_rollback(catalog, for_rollback);
                Ok(())
            });
            if let Err(e) = rollback {
                warn!(error = %e, "failed to roll back staged catalog updates");
            }
        }
        result
    }

    /// Explicit rollback; equivalent to dropping the unit.
    pub fn abort(mut self) {
        self.rollback();
    }

    fn rollback(&mut self) {
        self.finished = true;
        let entries = self.op.uncommitted().take_entries();
        if entries.is_empty() {
            return;
        }
        let result = self.op.publisher().write(move |catalog| {
            uncommitted::apply_rollback(catalog, entries);
            Ok(())
        });
        if let Err(e) = result {
            warn!(error = %e, "failed to roll back staged catalog updates");
        }
    }
}

impl Drop for WriteUnitOfWork {
    fn drop(&mut self) {
        if !self.finished {
            self.rollback();
        }
    }
}
