//! The in-memory collection catalog.
//!
//! A [`CollectionCatalog`] value is one immutable version of the process's
//! collection metadata: every map inside it is persistent (structural
//! sharing), so cloning a version for the next write is cheap and readers
//! holding an older version are never disturbed. All mutating methods take
//! `&mut self` and run inside write jobs serialized by
//! [`CatalogPublisher`](crate::publish::CatalogPublisher); read methods take
//! `&self` and, where per-operation visibility matters, an
//! [`OperationContext`].

use std::collections::BTreeSet;
use std::sync::Arc;

use marlin_id::{CatalogEpoch, CollectionUuid, RecordId, Timestamp};
use observability_deps::tracing::{debug, info, warn};

use crate::collection::{Collection, IndexCatalogEntry};
use crate::drop_pending::DropPendingIdents;
use crate::durable::{DurableCatalogEntry, StorageSnapshot};
use crate::error::CatalogError;
use crate::history::{CatalogIdHistory, CatalogIdLookup, Existence};
use crate::names::{DatabaseName, NamespaceString, NamespaceStringOrUuid, TenantId};
use crate::operation::{LockMode, OperationContext};
use crate::profile::{ProfileFilter, ProfileSettings};
use crate::uncommitted::UncommittedLookup;
use crate::views::{ViewDefinition, ViewDurability, ViewStats, ViewsForDatabase};
use crate::Result;

/// Number of references to a single committed `Collection` stored inside
/// one catalog version: the primary map, the namespace map, and the ordered
/// map. A strong count above this (plus version sharing) indicates external
/// holders.
pub const NUM_COLLECTION_REFERENCES_STORED: usize = 3;

/// Which name spaces to consider when checking a namespace for conflicts.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NamespaceConflictCheck {
    CollectionsAndViews,
    CollectionsOnly,
}

/// Counts of collection kinds currently registered.
///
/// Total collections = `internal` + `user_collections`.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct CatalogStats {
    /// Non-system collections on non-internal databases.
    pub user_collections: usize,
    /// Non-system capped collections on non-internal databases.
    pub user_capped: usize,
    /// Non-system clustered collections on non-internal databases.
    pub user_clustered: usize,
    /// System collections or collections on internal databases.
    pub internal: usize,
}

#[derive(Debug, Clone)]
pub struct CollectionCatalog {
    by_uuid: imbl::HashMap<CollectionUuid, Arc<Collection>>,
    by_namespace: imbl::HashMap<NamespaceString, Arc<Collection>>,
    /// Ordered by `(database, uuid)` to support per-database scans with
    /// deterministic iteration order.
    ordered_by_db_uuid: imbl::OrdMap<(DatabaseName, CollectionUuid), Arc<Collection>>,

    /// Two-phase DDL overlay: registered but not yet visible. A lookup that
    /// hits these must consult the storage snapshot to decide visibility.
    pending_by_namespace: imbl::HashMap<NamespaceString, Arc<Collection>>,
    pending_by_uuid: imbl::HashMap<CollectionUuid, Arc<Collection>>,

    /// Name reservations for in-flight view creations.
    uncommitted_views: imbl::HashSet<NamespaceString>,
    views_per_db: imbl::HashMap<DatabaseName, ViewsForDatabase>,

    nss_history: CatalogIdHistory<NamespaceString>,
    uuid_history: CatalogIdHistory<CollectionUuid>,
    /// Earliest oldest-timestamp value at which any history cleanup could
    /// remove something; `Timestamp::MAX` when nothing is prunable.
    lowest_cleanup_ts: Timestamp,
    /// Lower bound of the maintained history window. Queries below it
    /// answer `Unknown`; `Timestamp::MAX` until the first timestamped write.
    oldest_maintained: Timestamp,

    drop_pending: DropPendingIdents,

    /// UUID-to-namespace resolution preserved while the catalog is closed
    /// during storage engine restart.
    shadow_catalog: Option<imbl::HashMap<CollectionUuid, NamespaceString>>,
    /// Bumped on every close/open cycle so yielded operations can detect
    /// that their collection pointers went stale.
    epoch: CatalogEpoch,

    profile_settings: imbl::HashMap<DatabaseName, ProfileSettings>,
    stats: CatalogStats,
}

impl Default for CollectionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionCatalog {
    pub fn new() -> Self {
        Self {
            by_uuid: imbl::HashMap::new(),
            by_namespace: imbl::HashMap::new(),
            ordered_by_db_uuid: imbl::OrdMap::new(),
            pending_by_namespace: imbl::HashMap::new(),
            pending_by_uuid: imbl::HashMap::new(),
            uncommitted_views: imbl::HashSet::new(),
            views_per_db: imbl::HashMap::new(),
            nss_history: CatalogIdHistory::new(),
            uuid_history: CatalogIdHistory::new(),
            lowest_cleanup_ts: Timestamp::MAX,
            oldest_maintained: Timestamp::MAX,
            drop_pending: DropPendingIdents::new(),
            shadow_catalog: None,
            epoch: CatalogEpoch::default(),
            profile_settings: imbl::HashMap::new(),
            stats: CatalogStats::default(),
        }
    }

    // ---------------------------------------------------------------------
    // Registration (run inside write jobs)

    /// Register a committed collection. Requires the global lock in
    /// exclusive mode; used by startup and by DDL paths that hold it.
    pub fn register_collection(
        &mut self,
        uuid: CollectionUuid,
        coll: Arc<Collection>,
        commit_ts: Option<Timestamp>,
    ) -> Result<()> {
        debug_assert_eq!(uuid, coll.uuid());
        self.ensure_namespace_does_not_exist(
            coll.ns(),
            NamespaceConflictCheck::CollectionsAndViews,
        )?;
        if self.by_uuid.contains_key(&uuid) || self.pending_by_uuid.contains_key(&uuid) {
            return Err(CatalogError::unexpected(format!(
                "collection {uuid} is already registered"
            )));
        }
        coll.set_committed(true);
        let coll = Self::finalize_for_publish(coll, commit_ts);
        info!(ns = %coll.ns(), %uuid, "registering collection");
        self.push_catalog_id(coll.ns(), uuid, Some(coll.record_id()), commit_ts);
        self.insert_committed(coll);
        Ok(())
    }

    /// First phase of a two-phase registration: the collection enters the
    /// pending overlay, where ordinary lookups do not see it. An
    /// intent-exclusive lock on the namespace suffices. The second phase is
    /// [`publish_two_phase_collection`](Self::publish_two_phase_collection)
    /// on storage commit, or
    /// [`remove_two_phase_collection`](Self::remove_two_phase_collection)
    /// on rollback.
    pub fn register_collection_two_phase(
        &mut self,
        uuid: CollectionUuid,
        coll: Arc<Collection>,
    ) -> Result<()> {
        debug_assert_eq!(uuid, coll.uuid());
        self.ensure_namespace_does_not_exist(
            coll.ns(),
            NamespaceConflictCheck::CollectionsAndViews,
        )?;
        if self.by_uuid.contains_key(&uuid) || self.pending_by_uuid.contains_key(&uuid) {
            return Err(CatalogError::unexpected(format!(
                "collection {uuid} is already registered"
            )));
        }
        coll.set_committed(false);
        debug!(ns = %coll.ns(), %uuid, "registering collection as pending commit");
        self.pending_by_namespace
            .insert(coll.ns().clone(), Arc::clone(&coll));
        self.pending_by_uuid.insert(uuid, coll);
        Ok(())
    }

    /// Second phase of a two-phase registration: move the (possibly
    /// since-mutated) descriptor into the authoritative maps and record its
    /// creation in the history.
    pub fn publish_two_phase_collection(
        &mut self,
        coll: Arc<Collection>,
        commit_ts: Option<Timestamp>,
    ) -> Result<()> {
        let uuid = coll.uuid();
        let pending = self.pending_by_uuid.remove(&uuid).ok_or_else(|| {
            CatalogError::unexpected(format!("collection {uuid} is not pending commit"))
        })?;
        self.pending_by_namespace.remove(pending.ns());
        coll.set_committed(true);
        let coll = Self::finalize_for_publish(coll, commit_ts);
        info!(ns = %coll.ns(), %uuid, commit_ts = ?commit_ts, "committing two-phase collection");
        self.push_catalog_id(coll.ns(), uuid, Some(coll.record_id()), commit_ts);
        self.insert_committed(coll);
        Ok(())
    }

    /// Roll back the first phase: forget the pending registration.
    pub fn remove_two_phase_collection(&mut self, uuid: CollectionUuid) {
        if let Some(pending) = self.pending_by_uuid.remove(&uuid) {
            self.pending_by_namespace.remove(pending.ns());
            debug!(ns = %pending.ns(), %uuid, "rolled back pending collection");
        }
    }

    /// Deregister a committed collection, recording the drop in the history
    /// and, when `is_drop_pending`, parking the descriptor weakly until the
    /// storage engine reports the ident removed from disk. The descriptor
    /// is returned so the caller can keep it alive while needed.
    pub fn deregister_collection(
        &mut self,
        uuid: CollectionUuid,
        is_drop_pending: bool,
        commit_ts: Option<Timestamp>,
    ) -> Result<Arc<Collection>> {
        let coll = self
            .by_uuid
            .remove(&uuid)
            .ok_or(CatalogError::CollectionNotFound(uuid))?;
        self.by_namespace.remove(coll.ns());
        self.ordered_by_db_uuid.remove(&(coll.ns().db().clone(), uuid));
        self.stats_remove(&coll);
        info!(ns = %coll.ns(), %uuid, drop_pending = is_drop_pending, "deregistering collection");
        if is_drop_pending {
            self.drop_pending
                .register_collection(Arc::clone(coll.ident()), &coll);
        }
        self.push_catalog_id(coll.ns(), uuid, None, commit_ts);
        Ok(coll)
    }

    /// Replace a collection instance after a metadata write.
    pub fn apply_metadata_write(
        &mut self,
        coll: Arc<Collection>,
        commit_ts: Option<Timestamp>,
    ) -> Result<()> {
        let uuid = coll.uuid();
        if !self.by_uuid.contains_key(&uuid) {
            return Err(CatalogError::CollectionNotFound(uuid));
        }
        let coll = Self::finalize_for_publish(coll, commit_ts);
        self.insert_committed(coll);
        Ok(())
    }

    /// Move a collection to a new namespace. `coll` carries the new name;
    /// history entries are appended under both names at the same timestamp.
    pub fn apply_rename(
        &mut self,
        coll: Arc<Collection>,
        from: &NamespaceString,
        commit_ts: Option<Timestamp>,
    ) -> Result<()> {
        let uuid = coll.uuid();
        if !self.by_uuid.contains_key(&uuid) {
            return Err(CatalogError::CollectionNotFound(uuid));
        }
        self.ensure_namespace_does_not_exist(
            coll.ns(),
            NamespaceConflictCheck::CollectionsAndViews,
        )?;
        let record_id = coll.record_id();
        let to = coll.ns().clone();
        info!(%from, %to, %uuid, "renaming collection");
        self.by_namespace.remove(from);
        self.ordered_by_db_uuid.remove(&(from.db().clone(), uuid));
        let coll = Self::finalize_for_publish(coll, commit_ts);
        self.insert_committed(coll);
        if let Some(ts) = commit_ts {
            let c1 = self.nss_history.push(from, None, ts);
            let c2 = self.nss_history.push(&to, Some(record_id), ts);
            self.fold_cleanup_candidates([c1, c2]);
            self.oldest_maintained = self.oldest_maintained.min(ts);
        }
        Ok(())
    }

    /// Park a dropped index entry until its ident is reaped.
    pub fn deregister_index(&mut self, entry: &Arc<IndexCatalogEntry>, is_drop_pending: bool) {
        if is_drop_pending {
            self.drop_pending
                .register_index(Arc::clone(entry.ident()), entry);
        }
    }

    /// Drop every collection and view from the catalog. Requires the global
    /// lock in exclusive mode; used when the storage engine shuts down or
    /// restarts.
    pub fn deregister_all_collections_and_views(&mut self) {
        info!(
            collections = self.by_uuid.len(),
            "deregistering all collections and views"
        );
        self.by_uuid.clear();
        self.by_namespace.clear();
        self.ordered_by_db_uuid.clear();
        self.pending_by_namespace.clear();
        self.pending_by_uuid.clear();
        self.uncommitted_views.clear();
        self.views_per_db.clear();
        self.drop_pending.clear();
        self.stats = CatalogStats::default();
    }

    fn insert_committed(&mut self, coll: Arc<Collection>) {
        let uuid = coll.uuid();
        if let Some(previous) = self.by_uuid.get(&uuid).cloned() {
            self.stats_remove(&previous);
        }
        self.stats_add(&coll);
        self.by_namespace
            .insert(coll.ns().clone(), Arc::clone(&coll));
        self.ordered_by_db_uuid
            .insert((coll.ns().db().clone(), uuid), Arc::clone(&coll));
        self.by_uuid.insert(uuid, coll);
    }

    /// Bump the minimum valid snapshot for an instance about to be
    /// published. Clones only when the caller still shares the `Arc`.
    fn finalize_for_publish(coll: Arc<Collection>, commit_ts: Option<Timestamp>) -> Arc<Collection> {
        match commit_ts {
            None => coll,
            Some(ts) => {
                let mut owned =
                    Arc::try_unwrap(coll).unwrap_or_else(|shared| (*shared).clone());
                owned.set_minimum_valid_snapshot(ts);
                Arc::new(owned)
            }
        }
    }

    fn stats_add(&mut self, coll: &Arc<Collection>) {
        if coll.ns().db().is_internal() || coll.ns().is_system() {
            self.stats.internal += 1;
        } else {
            self.stats.user_collections += 1;
            if coll.is_capped() {
                self.stats.user_capped += 1;
            }
            if coll.is_clustered() {
                self.stats.user_clustered += 1;
            }
        }
    }

    fn stats_remove(&mut self, coll: &Arc<Collection>) {
        if coll.ns().db().is_internal() || coll.ns().is_system() {
            self.stats.internal -= 1;
        } else {
            self.stats.user_collections -= 1;
            if coll.is_capped() {
                self.stats.user_capped -= 1;
            }
            if coll.is_clustered() {
                self.stats.user_clustered -= 1;
            }
        }
    }

    /// Fail if `nss` is taken by a committed collection, a pending-commit
    /// collection, or (optionally) a view or view reservation. Pending
    /// collisions surface as retryable write conflicts.
    pub fn ensure_namespace_does_not_exist(
        &self,
        nss: &NamespaceString,
        check: NamespaceConflictCheck,
    ) -> Result<()> {
        if self.by_namespace.contains_key(nss) {
            return Err(CatalogError::NamespaceExists(nss.clone()));
        }
        if self.pending_by_namespace.contains_key(nss) {
            return Err(CatalogError::WriteConflict { nss: nss.clone() });
        }
        if check == NamespaceConflictCheck::CollectionsAndViews {
            if self.uncommitted_views.contains(nss) {
                return Err(CatalogError::WriteConflict { nss: nss.clone() });
            }
            if let Some(views) = self.views_per_db.get(nss.db()) {
                if views.lookup(nss).is_some() {
                    return Err(CatalogError::NamespaceExists(nss.clone()));
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Lookups

    /// Resolve `uuid` for this operation: staged clones first, then
    /// instances established against the open snapshot, then the pending
    /// overlay (visible only if the snapshot observed the commit), then the
    /// committed map.
    pub fn lookup_collection_by_uuid(
        &self,
        op: &OperationContext,
        uuid: CollectionUuid,
    ) -> Option<Arc<Collection>> {
        match op.uncommitted().lookup_by_uuid(uuid) {
            UncommittedLookup::Found(coll) => return Some(coll),
            UncommittedLookup::Dropped => return None,
            UncommittedLookup::NotStaged => {}
        }
        if let Some(pending) = self.pending_by_uuid.get(&uuid) {
            let key = NamespaceStringOrUuid::Uuid(pending.ns().db().clone(), uuid);
            return self.open_for_lookup(op, &key);
        }
        self.by_uuid.get(&uuid).cloned()
    }

    /// Namespace twin of [`lookup_collection_by_uuid`](Self::lookup_collection_by_uuid).
    pub fn lookup_collection_by_namespace(
        &self,
        op: &OperationContext,
        nss: &NamespaceString,
    ) -> Option<Arc<Collection>> {
        match op.uncommitted().lookup_by_nss(nss) {
            UncommittedLookup::Found(coll) => return Some(coll),
            UncommittedLookup::Dropped => return None,
            UncommittedLookup::NotStaged => {}
        }
        if self.pending_by_namespace.contains_key(nss) {
            let key = NamespaceStringOrUuid::Namespace(nss.clone());
            return self.open_for_lookup(op, &key);
        }
        self.by_namespace.get(nss).cloned()
    }

    pub fn lookup_collection_by_namespace_or_uuid(
        &self,
        op: &OperationContext,
        key: &NamespaceStringOrUuid,
    ) -> Option<Arc<Collection>> {
        match key {
            NamespaceStringOrUuid::Namespace(nss) => self.lookup_collection_by_namespace(op, nss),
            NamespaceStringOrUuid::Uuid(_, uuid) => self.lookup_collection_by_uuid(op, *uuid),
        }
    }

    fn open_for_lookup(
        &self,
        op: &OperationContext,
        key: &NamespaceStringOrUuid,
    ) -> Option<Arc<Collection>> {
        if let Some(cached) = op.opened_lookup(key) {
            return cached;
        }
        match self.open_collection_at_latest(op, key) {
            Ok(coll) => coll,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to resolve pending-commit collection");
                None
            }
        }
    }

    /// Lookup ignoring per-operation state: only committed, published
    /// collections.
    pub fn lookup_committed_collection_by_uuid(
        &self,
        uuid: CollectionUuid,
    ) -> Option<Arc<Collection>> {
        self.by_uuid.get(&uuid).cloned()
    }

    pub fn lookup_committed_collection_by_namespace(
        &self,
        nss: &NamespaceString,
    ) -> Option<Arc<Collection>> {
        self.by_namespace.get(nss).cloned()
    }

    /// Namespace a UUID currently maps to. While the catalog is closed the
    /// shadow table answers, so auth and replication can keep resolving
    /// UUIDs without database locks.
    pub fn lookup_nss_by_uuid(
        &self,
        op: &OperationContext,
        uuid: CollectionUuid,
    ) -> Option<NamespaceString> {
        match op.uncommitted().lookup_by_uuid(uuid) {
            UncommittedLookup::Found(coll) => return Some(coll.ns().clone()),
            UncommittedLookup::Dropped => return None,
            UncommittedLookup::NotStaged => {}
        }
        if let Some(coll) = self.by_uuid.get(&uuid) {
            return Some(coll.ns().clone());
        }
        self.shadow_catalog
            .as_ref()
            .and_then(|shadow| shadow.get(&uuid).cloned())
    }

    pub fn lookup_uuid_by_nss(
        &self,
        op: &OperationContext,
        nss: &NamespaceString,
    ) -> Option<CollectionUuid> {
        match op.uncommitted().lookup_by_nss(nss) {
            UncommittedLookup::Found(coll) => return Some(coll.uuid()),
            UncommittedLookup::Dropped => return None,
            UncommittedLookup::NotStaged => {}
        }
        self.by_namespace.get(nss).map(|coll| coll.uuid())
    }

    /// Resolve a name-or-identity to a concrete namespace without taking
    /// any locks. Fails when the UUID is unknown, or resolves into a
    /// database other than the one the caller named.
    pub fn resolve_namespace(
        &self,
        op: &OperationContext,
        key: &NamespaceStringOrUuid,
    ) -> Result<NamespaceString> {
        match key {
            NamespaceStringOrUuid::Namespace(nss) => Ok(nss.clone()),
            NamespaceStringOrUuid::Uuid(db, uuid) => {
                let nss = self
                    .lookup_nss_by_uuid(op, *uuid)
                    .ok_or_else(|| CatalogError::namespace_not_found(uuid))?;
                if nss.db() == db {
                    Ok(nss)
                } else {
                    Err(CatalogError::namespace_not_found(format!(
                        "{uuid}: found {nss}, expected database {db}"
                    )))
                }
            }
        }
    }

    /// True if this catalog version stores `coll` itself, or the operation
    /// staged it.
    pub fn contains_collection(&self, op: &OperationContext, coll: &Arc<Collection>) -> bool {
        if op.uncommitted().contains_collection(coll) {
            return true;
        }
        self.by_uuid
            .get(&coll.uuid())
            .is_some_and(|stored| Arc::ptr_eq(stored, coll))
    }

    /// Run `predicate` against the latest committed instance for `uuid`.
    pub fn check_if_collection_satisfiable<F>(&self, uuid: CollectionUuid, predicate: F) -> bool
    where
        F: FnOnce(&Collection) -> bool,
    {
        self.by_uuid
            .get(&uuid)
            .map(|coll| predicate(coll))
            .unwrap_or(false)
    }

    /// True while `uuid` sits in the pending-commit overlay.
    pub fn is_collection_awaiting_visibility(&self, uuid: CollectionUuid) -> bool {
        self.pending_by_uuid.contains_key(&uuid)
    }

    /// Whether anyone outside this catalog version holds the committed
    /// descriptor for `uuid`. An undisturbed descriptor is referenced
    /// exactly [`NUM_COLLECTION_REFERENCES_STORED`] times by the version
    /// that stores it; older versions that still share the instance add
    /// the same number each, so this is meaningful once superseded
    /// versions have been released. Drop paths use it to detect in-flight
    /// external readers.
    pub fn is_collection_externally_referenced(&self, uuid: CollectionUuid) -> Option<bool> {
        self.by_uuid
            .get(&uuid)
            .map(|coll| Arc::strong_count(coll) > NUM_COLLECTION_REFERENCES_STORED)
    }

    /// True when the operation may mutate `nss`: it holds an exclusive
    /// collection lock, or an intent-exclusive one and the namespace is an
    /// uncommitted creation of its own.
    pub fn has_exclusive_access_to_collection(
        &self,
        op: &OperationContext,
        nss: &NamespaceString,
    ) -> bool {
        if op.locks().is_collection_locked_with(nss, LockMode::Exclusive) {
            return true;
        }
        let own_uncommitted_creation = matches!(
            op.uncommitted().lookup_by_nss(nss),
            UncommittedLookup::Found(ref coll) if !coll.is_committed()
        );
        own_uncommitted_creation
            && op
                .locks()
                .is_collection_locked_with(nss, LockMode::IntentExclusive)
    }

    // ---------------------------------------------------------------------
    // Metadata writes (copy-on-write through the operation)

    /// Clone `uuid`'s descriptor for a DDL write. The clone is private to
    /// the operation until its unit of work commits; repeated calls within
    /// the operation return the same clone. Requires an exclusive lock on
    /// the collection, or intent-exclusive if the collection is an
    /// uncommitted creation of this operation.
    pub fn lookup_collection_by_uuid_for_metadata_write(
        &self,
        op: &OperationContext,
        uuid: CollectionUuid,
    ) -> Result<Arc<Collection>> {
        let mut uncommitted = op.uncommitted();
        match uncommitted.lookup_by_uuid(uuid) {
            UncommittedLookup::Found(coll) => {
                debug_assert!(
                    op.locks()
                        .is_collection_locked_with(coll.ns(), LockMode::IntentExclusive),
                    "metadata write requires at least an intent-exclusive collection lock"
                );
                Ok(coll)
            }
            UncommittedLookup::Dropped => Err(CatalogError::CollectionNotFound(uuid)),
            UncommittedLookup::NotStaged => {
                let latest = self
                    .by_uuid
                    .get(&uuid)
                    .ok_or(CatalogError::CollectionNotFound(uuid))?;
                debug_assert!(
                    op.locks()
                        .is_collection_locked_with(latest.ns(), LockMode::Exclusive),
                    "metadata write on a committed collection requires an exclusive lock"
                );
                let clone = Arc::new((**latest).clone());
                uncommitted.writable_collection(Arc::clone(&clone));
                Ok(clone)
            }
        }
    }

    pub fn lookup_collection_by_namespace_for_metadata_write(
        &self,
        op: &OperationContext,
        nss: &NamespaceString,
    ) -> Result<Arc<Collection>> {
        let uuid = self
            .lookup_uuid_by_nss(op, nss)
            .ok_or_else(|| CatalogError::namespace_not_found(nss))?;
        self.lookup_collection_by_uuid_for_metadata_write(op, uuid)
    }

    /// Apply `mutate` to the operation's private clone of `uuid`,
    /// staging the clone first if this is the operation's first write to
    /// the collection.
    pub fn update_collection_for_metadata_write<F, R>(
        &self,
        op: &OperationContext,
        uuid: CollectionUuid,
        mutate: F,
    ) -> Result<R>
    where
        F: FnOnce(&mut Collection) -> R,
    {
        drop(self.lookup_collection_by_uuid_for_metadata_write(op, uuid)?);
        let mut uncommitted = op.uncommitted();
        let writable = uncommitted
            .writable_mut(uuid)
            .expect("collection was staged for write above");
        Ok(mutate(writable))
    }

    // ---------------------------------------------------------------------
    // Staged DDL

    /// Begin a two-phase creation: reserve the descriptor in the shared
    /// pending overlay and stage it on the operation so the creating
    /// operation reads its own write. Commit through the operation's
    /// [`WriteUnitOfWork`](crate::operation::WriteUnitOfWork).
    pub fn stage_create_collection(
        &self,
        op: &OperationContext,
        coll: Collection,
    ) -> Result<Arc<Collection>> {
        debug_assert!(
            op.locks()
                .is_collection_locked_with(coll.ns(), LockMode::IntentExclusive),
            "two-phase registration requires an intent-exclusive namespace lock"
        );
        let coll = Arc::new(coll);
        let uuid = coll.uuid();
        let shared = Arc::clone(&coll);
        op.publisher()
            .write(move |catalog| catalog.register_collection_two_phase(uuid, shared))?;
        op.uncommitted().create_collection(Arc::clone(&coll));
        Ok(coll)
    }

    /// Stage a rename. The target namespace must be free in this version;
    /// the check is repeated inside the commit job.
    pub fn stage_rename_collection(
        &self,
        op: &OperationContext,
        uuid: CollectionUuid,
        to: NamespaceString,
    ) -> Result<()> {
        self.ensure_namespace_does_not_exist(&to, NamespaceConflictCheck::CollectionsAndViews)?;
        let coll = self.lookup_collection_by_uuid_for_metadata_write(op, uuid)?;
        let from = coll.ns().clone();
        let renamed = Arc::new(coll.with_namespace(to));
        op.uncommitted().rename_collection(renamed, from);
        Ok(())
    }

    /// Stage a drop. The collection reads as absent for this operation from
    /// now on; other operations keep seeing it until commit.
    pub fn stage_drop_collection(
        &self,
        op: &OperationContext,
        uuid: CollectionUuid,
        is_drop_pending: bool,
    ) -> Result<Arc<Collection>> {
        let coll = self
            .lookup_collection_by_uuid(op, uuid)
            .ok_or(CatalogError::CollectionNotFound(uuid))?;
        debug_assert!(
            op.locks()
                .is_collection_locked_with(coll.ns(), LockMode::Exclusive),
            "dropping a collection requires an exclusive collection lock"
        );
        op.uncommitted()
            .drop_collection(Arc::clone(&coll), is_drop_pending);
        Ok(coll)
    }

    /// Stage an index drop; committed through the unit of work like
    /// collection drops.
    pub fn stage_drop_index(
        &self,
        op: &OperationContext,
        nss: &NamespaceString,
        entry: Arc<IndexCatalogEntry>,
        is_drop_pending: bool,
    ) {
        debug_assert!(
            op.locks()
                .is_collection_locked_with(nss, LockMode::Exclusive),
            "dropping an index requires an exclusive collection lock"
        );
        op.uncommitted().drop_index(entry, is_drop_pending);
    }

    // ---------------------------------------------------------------------
    // Point-in-time reads

    /// Establish a collection instance consistent with the operation's open
    /// storage snapshot at `read_ts` (or at the snapshot's own view of
    /// latest when `read_ts` is `None`).
    ///
    /// Returns `None` when reading from a point in time where the
    /// collection did not exist. The returned instance stays valid only
    /// while the storage snapshot and the operation's catalog handle are
    /// both live. May read from the durable catalog and therefore block on
    /// I/O; must not be called with any catalog-internal lock held.
    pub fn establish_consistent_collection(
        &self,
        op: &OperationContext,
        key: &NamespaceStringOrUuid,
        read_ts: Option<Timestamp>,
    ) -> Result<Option<Arc<Collection>>> {
        if let Some(cached) = op.opened_lookup(key) {
            return Ok(cached);
        }
        if !self.needs_open_collection(key, read_ts) {
            return Ok(self.lookup_collection_by_namespace_or_uuid(op, key));
        }
        match read_ts {
            None => self.open_collection_at_latest(op, key),
            Some(ts) => self.open_collection_at_point_in_time(op, key, ts),
        }
    }

    /// Whether the in-memory state can serve `key` directly, or the durable
    /// catalog has to be consulted: either the read is older than the
    /// in-memory descriptor, or the namespace is in the middle of a
    /// two-phase DDL.
    fn needs_open_collection(&self, key: &NamespaceStringOrUuid, read_ts: Option<Timestamp>) -> bool {
        match read_ts {
            None => match key {
                NamespaceStringOrUuid::Namespace(nss) => {
                    self.pending_by_namespace.contains_key(nss)
                }
                NamespaceStringOrUuid::Uuid(_, uuid) => self.pending_by_uuid.contains_key(uuid),
            },
            Some(ts) => {
                let latest = match key {
                    NamespaceStringOrUuid::Namespace(nss) => self.by_namespace.get(nss),
                    NamespaceStringOrUuid::Uuid(_, uuid) => self.by_uuid.get(uuid),
                };
                match latest {
                    Some(coll) => {
                        ts < coll.minimum_valid_snapshot().unwrap_or(Timestamp::MIN)
                    }
                    None => true,
                }
            }
        }
    }

    /// Latest-visibility resolution for a namespace in mid-DDL: the pending
    /// descriptor is returned only if the storage snapshot already observed
    /// the creating transaction's commit.
    fn open_collection_at_latest(
        &self,
        op: &OperationContext,
        key: &NamespaceStringOrUuid,
    ) -> Result<Option<Arc<Collection>>> {
        let snapshot = op.storage_snapshot().ok_or(CatalogError::NoStorageSnapshot)?;
        let pending = match key {
            NamespaceStringOrUuid::Namespace(nss) => self.pending_by_namespace.get(nss),
            NamespaceStringOrUuid::Uuid(_, uuid) => self.pending_by_uuid.get(uuid),
        };
        let entry = self.fetch_durable_by_key(op, &*snapshot, key)?;
        let opened = match (pending, entry) {
            (Some(pending), Some(entry)) if entry.uuid == pending.uuid() => {
                // The snapshot has observed the commit; materialize the
                // pending descriptor.
                Some(Arc::clone(pending))
            }
            (_, Some(entry)) => Some(self.materialize_point_in_time(&entry)),
            (_, None) => None,
        };
        op.record_opened(key, opened.clone());
        Ok(opened)
    }

    fn open_collection_at_point_in_time(
        &self,
        op: &OperationContext,
        key: &NamespaceStringOrUuid,
        read_ts: Timestamp,
    ) -> Result<Option<Arc<Collection>>> {
        let snapshot = op.storage_snapshot().ok_or(CatalogError::NoStorageSnapshot)?;
        let lookup = match key {
            NamespaceStringOrUuid::Namespace(nss) => {
                self.lookup_catalog_id_by_nss(nss, Some(read_ts))
            }
            NamespaceStringOrUuid::Uuid(_, uuid) => {
                self.lookup_catalog_id_by_uuid(*uuid, Some(read_ts))
            }
        };
        let opened = match lookup.existence {
            Existence::NotExists => None,
            Existence::Exists => {
                let record_id = lookup.record_id.expect("exists implies a record id");
                op.durable()
                    .fetch_entry(&*snapshot, record_id)?
                    .map(|entry| self.materialize_point_in_time(&entry))
            }
            Existence::Unknown => {
                // Below the maintained window: scan the durable catalog and
                // cache what it says so the next reader skips the scan.
                let entry = self.fetch_durable_by_key(op, &*snapshot, key)?;
                let found = entry.as_ref().map(|e| (e.nss.clone(), e.uuid, e.record_id));
                let (nss, uuid, record_id) = match (&found, key) {
                    (Some((nss, uuid, record_id)), _) => {
                        (Some(nss.clone()), Some(*uuid), Some(*record_id))
                    }
                    (None, NamespaceStringOrUuid::Namespace(nss)) => {
                        (Some(nss.clone()), None, None)
                    }
                    (None, NamespaceStringOrUuid::Uuid(_, uuid)) => (None, Some(*uuid), None),
                };
                op.publisher().write(move |catalog| {
                    catalog.insert_catalog_id_after_scan(nss, uuid, record_id, read_ts);
                    Ok(())
                })?;
                entry.map(|e| self.materialize_point_in_time(&e))
            }
        };
        op.record_opened(key, opened.clone());
        Ok(opened)
    }

    fn fetch_durable_by_key(
        &self,
        op: &OperationContext,
        snapshot: &dyn StorageSnapshot,
        key: &NamespaceStringOrUuid,
    ) -> Result<Option<DurableCatalogEntry>> {
        match key {
            NamespaceStringOrUuid::Namespace(nss) => {
                op.durable().fetch_entry_by_nss(snapshot, nss)
            }
            NamespaceStringOrUuid::Uuid(_, uuid) => {
                op.durable().fetch_entry_by_uuid(snapshot, *uuid)
            }
        }
    }

    /// Turn a durable entry into a descriptor, sharing immutable index
    /// state with the live in-memory instance when the entry describes the
    /// same storage object.
    fn materialize_point_in_time(&self, entry: &DurableCatalogEntry) -> Arc<Collection> {
        let coll = match self.by_uuid.get(&entry.uuid) {
            Some(latest) if latest.matches_durable(entry) => {
                Collection::compatible_clone(latest, entry)
            }
            _ => Collection::from_durable_entry(entry),
        };
        Arc::new(coll)
    }

    // ---------------------------------------------------------------------
    // Historical record-id resolution

    pub fn lookup_catalog_id_by_nss(
        &self,
        nss: &NamespaceString,
        ts: Option<Timestamp>,
    ) -> CatalogIdLookup {
        self.nss_history.lookup(nss, ts, self.oldest_maintained)
    }

    pub fn lookup_catalog_id_by_uuid(
        &self,
        uuid: CollectionUuid,
        ts: Option<Timestamp>,
    ) -> CatalogIdLookup {
        self.uuid_history.lookup(&uuid, ts, self.oldest_maintained)
    }

    fn push_catalog_id(
        &mut self,
        nss: &NamespaceString,
        uuid: CollectionUuid,
        record_id: Option<RecordId>,
        ts: Option<Timestamp>,
    ) {
        let Some(ts) = ts else { return };
        let c1 = self.nss_history.push(nss, record_id, ts);
        let c2 = self.uuid_history.push(&uuid, record_id, ts);
        self.fold_cleanup_candidates([c1, c2]);
        self.oldest_maintained = self.oldest_maintained.min(ts);
    }

    /// Record the outcome of a durable-catalog scan so subsequent readers
    /// at the same point in time resolve from memory.
    pub(crate) fn insert_catalog_id_after_scan(
        &mut self,
        nss: Option<NamespaceString>,
        uuid: Option<CollectionUuid>,
        record_id: Option<RecordId>,
        ts: Timestamp,
    ) {
        let c1 = nss.map(|nss| self.nss_history.insert_after_scan(&nss, record_id, ts));
        let c2 = uuid.map(|uuid| self.uuid_history.insert_after_scan(&uuid, record_id, ts));
        self.fold_cleanup_candidates([c1.flatten(), c2.flatten()]);
    }

    fn fold_cleanup_candidates(&mut self, candidates: [Option<Timestamp>; 2]) {
        for candidate in candidates.into_iter().flatten() {
            self.lowest_cleanup_ts = self.lowest_cleanup_ts.min(candidate);
        }
    }

    /// Cheap pre-check for the reaper loop: can advancing the oldest
    /// timestamp to `oldest` prune anything?
    pub fn needs_cleanup_for_oldest_timestamp(&self, oldest: Timestamp) -> bool {
        self.lowest_cleanup_ts <= oldest
    }

    /// Prune history entries no read at or after `oldest` can observe.
    pub fn cleanup_for_oldest_timestamp_advanced(&mut self, oldest: Timestamp) {
        self.lowest_cleanup_ts = Timestamp::MAX;
        let c1 = self.nss_history.cleanup(oldest);
        let c2 = self.uuid_history.cleanup(oldest);
        self.fold_cleanup_candidates([c1, c2]);
        if self.oldest_maintained != Timestamp::MAX {
            self.oldest_maintained = self.oldest_maintained.max(oldest);
        }
        debug!(%oldest, "pruned catalog id history");
    }

    /// Discard history newer than `stable` after the storage engine rolled
    /// back to it and the catalog is being reopened.
    pub fn cleanup_for_catalog_reopen(&mut self, stable: Timestamp) {
        self.lowest_cleanup_ts = Timestamp::MAX;
        let c1 = self.nss_history.truncate_after(stable);
        let c2 = self.uuid_history.truncate_after(stable);
        self.fold_cleanup_candidates([c1, c2]);
        info!(%stable, "truncated catalog id history for catalog reopen");
    }

    // ---------------------------------------------------------------------
    // Drop-pending idents

    /// The storage engine removed this ident's files from disk.
    pub fn notify_ident_dropped(&mut self, ident: &str) {
        self.drop_pending.notify_ident_dropped(ident);
    }

    /// A drop-pending index entry, if it is still alive and on disk.
    pub fn find_drop_pending_index(&self, ident: &str) -> Option<Arc<IndexCatalogEntry>> {
        self.drop_pending.find_index(ident)
    }

    /// A drop-pending collection descriptor, if it is still alive and on
    /// disk.
    pub fn find_drop_pending_collection(&self, ident: &str) -> Option<Arc<Collection>> {
        self.drop_pending.find_collection(ident)
    }

    // ---------------------------------------------------------------------
    // Views

    fn views_for_database(&self, op: &OperationContext, db: &DatabaseName) -> ViewsForDatabase {
        if let Some(staged) = op.uncommitted().views_for_database(db) {
            return staged.clone();
        }
        self.views_per_db.get(db).cloned().unwrap_or_default()
    }

    /// Create view `view_name` reading from `view_on` through `pipeline`.
    /// Must run inside a unit of work; creation rolls back with it. With
    /// [`ViewDurability::NotYetDurable`] the caller is responsible for the
    /// matching `system.views` insert in the same storage transaction.
    pub fn create_view(
        &self,
        op: &OperationContext,
        view_name: &NamespaceString,
        view_on: &NamespaceString,
        pipeline: serde_json::Value,
        collation: Option<serde_json::Value>,
        durability: ViewDurability,
    ) -> Result<()> {
        debug_assert!(
            op.locks()
                .is_collection_locked_with(view_name, LockMode::IntentExclusive),
            "creating a view requires an intent-exclusive lock on its namespace"
        );
        let definition = Arc::new(ViewDefinition::new(
            view_name.clone(),
            view_on.clone(),
            pipeline,
            collation,
        )?);
        self.ensure_namespace_does_not_exist(
            view_name,
            NamespaceConflictCheck::CollectionsAndViews,
        )?;
        if durability == ViewDurability::NotYetDurable {
            // Shared reservation so a concurrent collection or view creation
            // at this namespace conflicts; re-checked atomically in the job.
            let nss = view_name.clone();
            op.publisher()
                .write(move |catalog| catalog.register_uncommitted_view(nss))?;
            op.uncommitted().add_view_reservation(view_name.clone());
        }
        let mut views = self.views_for_database(op, view_name.db());
        views.insert(definition);
        op.uncommitted().replace_views(view_name.db().clone(), views);
        Ok(())
    }

    /// Drop the view at `view_name`; rolls back with the unit of work.
    pub fn drop_view(&self, op: &OperationContext, view_name: &NamespaceString) -> Result<()> {
        let mut views = self.views_for_database(op, view_name.db());
        if views.remove(view_name).is_none() {
            return Err(CatalogError::namespace_not_found(view_name));
        }
        op.uncommitted().replace_views(view_name.db().clone(), views);
        Ok(())
    }

    /// Point the view at a new source and pipeline; rolls back with the
    /// unit of work.
    pub fn modify_view(
        &self,
        op: &OperationContext,
        view_name: &NamespaceString,
        view_on: &NamespaceString,
        pipeline: serde_json::Value,
    ) -> Result<()> {
        let mut views = self.views_for_database(op, view_name.db());
        let existing = views
            .lookup(view_name)
            .ok_or_else(|| CatalogError::namespace_not_found(view_name))?;
        let collation = existing.collation().cloned();
        views.remove(view_name);
        views.insert(Arc::new(ViewDefinition::new(
            view_name.clone(),
            view_on.clone(),
            pipeline,
            collation,
        )?));
        op.uncommitted().replace_views(view_name.db().clone(), views);
        Ok(())
    }

    /// Reload the database's views from `system.views`, replacing the
    /// in-memory state immediately. Callers must re-fetch the catalog to
    /// observe the change. Stops at the first invalid durable definition,
    /// installing what loaded and returning the error.
    pub fn reload_views(&self, op: &OperationContext, db: &DatabaseName) -> Result<()> {
        let snapshot = op.storage_snapshot().ok_or(CatalogError::NoStorageSnapshot)?;
        let raw = op.durable().load_views(&*snapshot, db)?;
        let (views, outcome) = ViewsForDatabase::reload(db, &raw);
        debug!(db = %db, "reloading views");
        let db = db.clone();
        op.publisher().write(move |catalog| {
            catalog.replace_views_for_database(db, views);
            Ok(())
        })?;
        outcome
    }

    /// Throw away the database's in-memory view state immediately. Callers
    /// must re-fetch the catalog to observe the change.
    pub fn clear_views(&self, op: &OperationContext, db: &DatabaseName) -> Result<()> {
        let db = db.clone();
        op.publisher().write(move |catalog| {
            catalog.replace_views_for_database(db, ViewsForDatabase::new());
            Ok(())
        })
    }

    /// Look up a view, requiring the durable view state to be valid.
    pub fn lookup_view(
        &self,
        op: &OperationContext,
        nss: &NamespaceString,
    ) -> Result<Option<Arc<ViewDefinition>>> {
        let views = self.views_for_database(op, nss.db());
        if !views.is_valid() {
            return Err(CatalogError::unexpected(format!(
                "the view catalog of {} is invalid; a reload is required",
                nss.db()
            )));
        }
        Ok(views.lookup(nss).cloned())
    }

    /// Like [`lookup_view`](Self::lookup_view) but serves whatever loaded
    /// even when the durable state failed validation.
    pub fn lookup_view_without_validating(
        &self,
        op: &OperationContext,
        nss: &NamespaceString,
    ) -> Option<Arc<ViewDefinition>> {
        self.views_for_database(op, nss.db()).lookup(nss).cloned()
    }

    /// Apply `callback` to each view of `db` until it returns `false`.
    pub fn iterate_views<F>(&self, op: &OperationContext, db: &DatabaseName, mut callback: F)
    where
        F: FnMut(&ViewDefinition) -> bool,
    {
        let views = self.views_for_database(op, db);
        for view in views.iter() {
            if !callback(view) {
                break;
            }
        }
    }

    pub fn view_stats_for_database(
        &self,
        op: &OperationContext,
        db: &DatabaseName,
    ) -> Option<ViewStats> {
        if op.uncommitted().views_for_database(db).is_some() {
            return Some(self.views_for_database(op, db).stats());
        }
        self.views_per_db.get(db).map(|views| views.stats())
    }

    /// Databases that currently carry view state.
    pub fn view_catalog_db_names(&self) -> Vec<DatabaseName> {
        self.views_per_db.keys().cloned().collect()
    }

    /// Install reloaded or startup view definitions for `db`.
    pub fn replace_views_for_database(&mut self, db: DatabaseName, views: ViewsForDatabase) {
        self.views_per_db.insert(db, views);
    }

    /// Reserve `nss` for an in-flight view creation.
    pub fn register_uncommitted_view(&mut self, nss: NamespaceString) -> Result<()> {
        self.ensure_namespace_does_not_exist(&nss, NamespaceConflictCheck::CollectionsAndViews)?;
        self.uncommitted_views.insert(nss);
        Ok(())
    }

    /// Release a view-name reservation; called on commit and rollback.
    pub fn deregister_uncommitted_view(&mut self, nss: &NamespaceString) {
        self.uncommitted_views.remove(nss);
    }

    /// Drop the per-database view state when a database instance closes.
    pub fn on_close_database(&mut self, db: &DatabaseName) {
        self.views_per_db.remove(db);
    }

    // ---------------------------------------------------------------------
    // Iteration and enumeration

    /// Iterate the committed collections of `db` ordered by UUID. The
    /// iterator walks this catalog version; writes published later are
    /// invisible to it.
    pub fn iter_db<'a>(
        &'a self,
        db: &DatabaseName,
    ) -> impl Iterator<Item = (CollectionUuid, &'a Arc<Collection>)> + 'a {
        let db = db.clone();
        self.ordered_by_db_uuid
            .range((db.clone(), CollectionUuid::nil())..)
            .take_while(move |(key, _)| key.0 == db)
            .map(|(key, coll)| (key.1, coll))
    }

    /// All database names with at least one committed collection, sorted
    /// ascending. Requires the global lock in at least intent-shared mode.
    pub fn get_all_db_names(&self) -> Vec<DatabaseName> {
        let mut out: Vec<DatabaseName> = Vec::new();
        for (key, _) in self.ordered_by_db_uuid.iter() {
            if out.last() != Some(&key.0) {
                out.push(key.0.clone());
            }
        }
        out
    }

    /// Database names belonging to `tenant` (or untagged databases for
    /// `None`), sorted ascending.
    pub fn get_all_db_names_for_tenant(&self, tenant: Option<&TenantId>) -> Vec<DatabaseName> {
        let mut out: Vec<DatabaseName> = Vec::new();
        for (key, _) in self.ordered_by_db_uuid.iter() {
            if key.0.tenant() == tenant && out.last() != Some(&key.0) {
                out.push(key.0.clone());
            }
        }
        out
    }

    /// All tenants with at least one non-empty database, ascending.
    pub fn get_all_tenants(&self) -> BTreeSet<TenantId> {
        self.ordered_by_db_uuid
            .keys()
            .filter_map(|(db, _)| db.tenant().cloned())
            .collect()
    }

    /// UUIDs of every committed collection in `db`.
    pub fn get_all_collection_uuids_from_db(&self, db: &DatabaseName) -> Vec<CollectionUuid> {
        self.iter_db(db).map(|(uuid, _)| uuid).collect()
    }

    /// Namespaces of every committed collection in `db`. Callers should
    /// hold a strong database lock or the result may be stale immediately.
    pub fn get_all_collection_names_from_db(&self, db: &DatabaseName) -> Vec<NamespaceString> {
        self.iter_db(db).map(|(_, coll)| coll.ns().clone()).collect()
    }

    // ---------------------------------------------------------------------
    // Profiling and statistics

    pub fn set_database_profile_settings(
        &mut self,
        db: DatabaseName,
        settings: ProfileSettings,
    ) {
        self.profile_settings.insert(db, settings);
    }

    /// The database's profile settings, or the defaults when it has none.
    pub fn database_profile_settings(&self, db: &DatabaseName) -> ProfileSettings {
        self.profile_settings.get(db).cloned().unwrap_or_default()
    }

    pub fn database_profile_level(&self, db: &DatabaseName) -> i32 {
        self.database_profile_settings(db).level.get()
    }

    pub fn clear_database_profile_settings(&mut self, db: &DatabaseName) {
        self.profile_settings.remove(db);
    }

    /// Replace the filter on every database with non-default settings.
    pub fn set_all_database_profile_filters(&mut self, filter: Option<Arc<dyn ProfileFilter>>) {
        let dbs: Vec<DatabaseName> = self.profile_settings.keys().cloned().collect();
        for db in dbs {
            if let Some(settings) = self.profile_settings.get_mut(&db) {
                settings.filter = filter.clone();
            }
        }
    }

    pub fn stats(&self) -> CatalogStats {
        self.stats
    }

    // ---------------------------------------------------------------------
    // Close/open lifecycle

    /// Put the catalog in closed state for a storage engine restart. UUID
    /// resolution keeps working through a shadow table while the primary
    /// maps are about to be emptied. Requires the global exclusive lock.
    pub fn on_close_catalog(&mut self) {
        debug_assert!(self.shadow_catalog.is_none(), "catalog is already closed");
        info!("closing collection catalog");
        let shadow = self
            .by_uuid
            .iter()
            .map(|(uuid, coll)| (*uuid, coll.ns().clone()))
            .collect();
        self.shadow_catalog = Some(shadow);
    }

    /// Reopen the catalog, dropping the shadow table and bumping the epoch
    /// so yielded operations notice the restart. Requires the global
    /// exclusive lock.
    pub fn on_open_catalog(&mut self) {
        debug_assert!(self.shadow_catalog.is_some(), "catalog is not closed");
        self.shadow_catalog = None;
        self.epoch = self.epoch.next();
        info!(epoch = %self.epoch, "reopened collection catalog");
    }

    pub fn epoch(&self) -> CatalogEpoch {
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_helpers::assert_contains;

    use super::*;
    use crate::collection::{CappedOptions, CollectionOptions};
    use crate::history::Existence;
    use crate::testing::{new_collection, test_op, FakeDurableCatalog, FakeSnapshot};
    use crate::publish::CatalogPublisher;

    fn ts(t: u64) -> Timestamp {
        Timestamp::new(t)
    }

    fn nss(s: &str) -> NamespaceString {
        NamespaceString::parse(s).unwrap()
    }

    #[test]
    fn register_and_lookup_roundtrip() {
        let mut catalog = CollectionCatalog::new();
        let coll = new_collection("db.c", 1, 7);
        let uuid = coll.uuid();
        catalog
            .register_collection(uuid, Arc::clone(&coll), Some(ts(10)))
            .unwrap();

        let by_uuid = catalog.lookup_committed_collection_by_uuid(uuid).unwrap();
        assert_eq!(by_uuid.ns(), &nss("db.c"));
        let by_nss = catalog
            .lookup_committed_collection_by_namespace(&nss("db.c"))
            .unwrap();
        assert!(Arc::ptr_eq(&by_uuid, &by_nss));

        // History resolves the registration timestamp.
        let lookup = catalog.lookup_catalog_id_by_nss(&nss("db.c"), Some(ts(10)));
        assert_eq!(lookup.existence, Existence::Exists);
        assert_eq!(lookup.record_id, Some(RecordId::new(7)));
        // Just below the maintained window start.
        let lookup = catalog.lookup_catalog_id_by_nss(&nss("db.c"), Some(ts(9)));
        assert_eq!(lookup.existence, Existence::Unknown);
    }

    #[test]
    fn register_bumps_minimum_valid_snapshot() {
        let mut catalog = CollectionCatalog::new();
        let coll = new_collection("db.c", 1, 7);
        catalog
            .register_collection(coll.uuid(), Arc::clone(&coll), Some(ts(10)))
            .unwrap();
        let stored = catalog
            .lookup_committed_collection_by_uuid(coll.uuid())
            .unwrap();
        assert_eq!(stored.minimum_valid_snapshot(), Some(ts(10)));
    }

    #[test]
    fn duplicate_namespace_is_rejected() {
        let mut catalog = CollectionCatalog::new();
        let first = new_collection("db.c", 1, 7);
        catalog
            .register_collection(first.uuid(), first, Some(ts(10)))
            .unwrap();

        let second = new_collection("db.c", 2, 8);
        let err = catalog
            .register_collection(second.uuid(), second, Some(ts(11)))
            .unwrap_err();
        assert_contains!(err.to_string(), "already exists");
    }

    #[test]
    fn pending_namespace_is_a_write_conflict() {
        let mut catalog = CollectionCatalog::new();
        let pending = new_collection("db.c", 1, 7);
        catalog
            .register_collection_two_phase(pending.uuid(), pending)
            .unwrap();

        let second = new_collection("db.c", 2, 8);
        let err = catalog
            .register_collection(second.uuid(), second, Some(ts(11)))
            .unwrap_err();
        assert_contains!(err.to_string(), "concurrent operation");
    }

    #[test]
    fn two_phase_is_invisible_until_published() {
        let mut catalog = CollectionCatalog::new();
        let coll = new_collection("db.c", 1, 7);
        let uuid = coll.uuid();
        catalog
            .register_collection_two_phase(uuid, Arc::clone(&coll))
            .unwrap();

        assert!(catalog.lookup_committed_collection_by_uuid(uuid).is_none());
        assert!(catalog.is_collection_awaiting_visibility(uuid));
        assert!(!coll.is_committed());

        catalog
            .publish_two_phase_collection(Arc::clone(&coll), Some(ts(20)))
            .unwrap();
        let stored = catalog.lookup_committed_collection_by_uuid(uuid).unwrap();
        assert!(stored.is_committed());
        assert!(!catalog.is_collection_awaiting_visibility(uuid));
        assert_eq!(
            catalog
                .lookup_catalog_id_by_uuid(uuid, Some(ts(20)))
                .existence,
            Existence::Exists
        );
    }

    #[test]
    fn two_phase_rollback_forgets_the_pending_entry() {
        let mut catalog = CollectionCatalog::new();
        let coll = new_collection("db.c", 1, 7);
        let uuid = coll.uuid();
        catalog
            .register_collection_two_phase(uuid, Arc::clone(&coll))
            .unwrap();
        catalog.remove_two_phase_collection(uuid);

        assert!(!catalog.is_collection_awaiting_visibility(uuid));
        // The namespace is free again.
        let again = new_collection("db.c", 2, 8);
        catalog
            .register_collection(again.uuid(), again, Some(ts(11)))
            .unwrap();
    }

    #[test]
    fn rename_updates_maps_and_history() {
        let mut catalog = CollectionCatalog::new();
        let coll = new_collection("a.x", 3, 5);
        let uuid = coll.uuid();
        catalog
            .register_collection(uuid, Arc::clone(&coll), Some(ts(30)))
            .unwrap();

        let renamed = Arc::new(coll.with_namespace(nss("a.y")));
        catalog
            .apply_rename(renamed, &nss("a.x"), Some(ts(40)))
            .unwrap();

        assert!(catalog
            .lookup_committed_collection_by_namespace(&nss("a.x"))
            .is_none());
        let now = catalog
            .lookup_committed_collection_by_namespace(&nss("a.y"))
            .unwrap();
        assert_eq!(now.uuid(), uuid);

        assert_eq!(
            catalog
                .lookup_catalog_id_by_nss(&nss("a.x"), Some(ts(35)))
                .existence,
            Existence::Exists
        );
        assert_eq!(
            catalog
                .lookup_catalog_id_by_nss(&nss("a.x"), Some(ts(40)))
                .existence,
            Existence::NotExists
        );
        assert_eq!(
            catalog
                .lookup_catalog_id_by_nss(&nss("a.y"), Some(ts(40)))
                .existence,
            Existence::Exists
        );
        assert_eq!(
            catalog
                .lookup_catalog_id_by_nss(&nss("a.y"), Some(ts(39)))
                .existence,
            Existence::NotExists
        );
        // UUID history is untouched by the rename: one create at 30.
        assert_eq!(
            catalog
                .lookup_catalog_id_by_uuid(uuid, Some(ts(45)))
                .existence,
            Existence::Exists
        );
    }

    #[test]
    fn deregister_moves_to_drop_pending_and_reaps() {
        let mut catalog = CollectionCatalog::new();
        let coll = new_collection("db.c", 1, 7);
        let uuid = coll.uuid();
        catalog
            .register_collection(uuid, Arc::clone(&coll), Some(ts(10)))
            .unwrap();

        let dropped = catalog
            .deregister_collection(uuid, true, Some(ts(50)))
            .unwrap();
        assert!(catalog.lookup_committed_collection_by_uuid(uuid).is_none());
        assert_eq!(
            catalog
                .lookup_catalog_id_by_uuid(uuid, Some(ts(50)))
                .existence,
            Existence::NotExists
        );

        // Still reachable by ident while someone holds it.
        let found = catalog.find_drop_pending_collection("coll-7").unwrap();
        assert!(Arc::ptr_eq(&found, &dropped));

        catalog.notify_ident_dropped("coll-7");
        assert!(catalog.find_drop_pending_collection("coll-7").is_none());

        // Oldest timestamp passing the drop point prunes the history.
        assert!(catalog.needs_cleanup_for_oldest_timestamp(ts(60)));
        catalog.cleanup_for_oldest_timestamp_advanced(ts(60));
        assert_eq!(
            catalog
                .lookup_catalog_id_by_nss(&nss("db.c"), Some(ts(60)))
                .existence,
            Existence::NotExists
        );
        assert!(!catalog.needs_cleanup_for_oldest_timestamp(ts(60)));
    }

    #[test]
    fn close_open_cycle_bumps_epoch_and_serves_shadow() {
        let mut catalog = CollectionCatalog::new();
        let coll = new_collection("db.c", 1, 7);
        let uuid = coll.uuid();
        catalog
            .register_collection(uuid, coll, Some(ts(10)))
            .unwrap();

        let publisher = Arc::new(CatalogPublisher::default());
        let op = test_op(&publisher, |_| {});

        let epoch_before = catalog.epoch();
        catalog.on_close_catalog();
        catalog.deregister_all_collections_and_views();

        // Primary maps are empty, the shadow still resolves the UUID.
        assert!(catalog.lookup_committed_collection_by_uuid(uuid).is_none());
        assert_eq!(catalog.lookup_nss_by_uuid(&op, uuid), Some(nss("db.c")));

        catalog.on_open_catalog();
        assert_eq!(catalog.epoch(), epoch_before.next());
        assert_eq!(catalog.lookup_nss_by_uuid(&op, uuid), None);
    }

    #[test]
    fn iteration_is_per_database_and_uuid_ordered() {
        let mut catalog = CollectionCatalog::new();
        for (ns, uuid, record) in [
            ("db2.a", 30_u128, 3_u64),
            ("db1.b", 20, 2),
            ("db1.a", 10, 1),
        ] {
            let coll = new_collection(ns, uuid, record);
            catalog
                .register_collection(coll.uuid(), coll, Some(ts(record)))
                .unwrap();
        }

        let db1 = DatabaseName::new("db1");
        let uuids: Vec<CollectionUuid> = catalog.iter_db(&db1).map(|(uuid, _)| uuid).collect();
        assert_eq!(
            uuids,
            vec![CollectionUuid::from(10_u128), CollectionUuid::from(20_u128)]
        );

        assert_eq!(
            catalog.get_all_db_names(),
            vec![DatabaseName::new("db1"), DatabaseName::new("db2")]
        );
        assert_eq!(catalog.get_all_collection_uuids_from_db(&db1).len(), 2);
        assert_eq!(
            catalog.get_all_collection_names_from_db(&DatabaseName::new("db2")),
            vec![nss("db2.a")]
        );
    }

    #[test]
    fn tenant_enumeration() {
        let mut catalog = CollectionCatalog::new();
        let tenant = TenantId::new("acme");
        let tenant_db = DatabaseName::new_for_tenant(tenant.clone(), "app");
        for (db, uuid) in [
            (DatabaseName::new("plain"), 1_u128),
            (tenant_db.clone(), 2),
        ] {
            let coll = Arc::new(Collection::new(
                NamespaceString::new(db, "c"),
                CollectionUuid::from(uuid),
                RecordId::new(uuid as u64),
                format!("coll-{uuid}"),
                CollectionOptions::default(),
            ));
            catalog
                .register_collection(coll.uuid(), coll, Some(ts(uuid as u64)))
                .unwrap();
        }

        assert_eq!(catalog.get_all_tenants().len(), 1);
        assert_eq!(
            catalog.get_all_db_names_for_tenant(Some(&tenant)),
            vec![tenant_db]
        );
        assert_eq!(
            catalog.get_all_db_names_for_tenant(None),
            vec![DatabaseName::new("plain")]
        );
    }

    #[test]
    fn stats_track_collection_kinds() {
        let mut catalog = CollectionCatalog::new();

        let mut user = Collection::new(
            nss("app.orders"),
            CollectionUuid::from(1_u128),
            RecordId::new(1),
            "coll-1",
            CollectionOptions {
                capped: Some(CappedOptions {
                    size_bytes: 1 << 20,
                    max_documents: None,
                }),
                ..Default::default()
            },
        );
        user.set_minimum_valid_snapshot(ts(1));
        catalog
            .register_collection(user.uuid(), Arc::new(user), None)
            .unwrap();

        let system = new_collection("app.system.views", 2, 2);
        catalog
            .register_collection(system.uuid(), system, None)
            .unwrap();
        let internal = new_collection("admin.users", 3, 3);
        catalog
            .register_collection(internal.uuid(), internal, None)
            .unwrap();

        let stats = catalog.stats();
        assert_eq!(stats.user_collections, 1);
        assert_eq!(stats.user_capped, 1);
        assert_eq!(stats.internal, 2);

        catalog
            .deregister_collection(CollectionUuid::from(1_u128), false, None)
            .unwrap();
        assert_eq!(catalog.stats().user_collections, 0);
        assert_eq!(catalog.stats().user_capped, 0);
    }

    #[test]
    fn undisturbed_descriptor_has_exactly_the_stored_references() {
        let mut catalog = CollectionCatalog::new();
        let coll = new_collection("db.c", 1, 7);
        let uuid = coll.uuid();
        catalog.register_collection(uuid, coll, Some(ts(10))).unwrap();

        // Only the three maps hold it.
        assert_eq!(catalog.is_collection_externally_referenced(uuid), Some(false));

        let external = catalog.lookup_committed_collection_by_uuid(uuid).unwrap();
        assert_eq!(catalog.is_collection_externally_referenced(uuid), Some(true));
        drop(external);
        assert_eq!(catalog.is_collection_externally_referenced(uuid), Some(false));

        assert_eq!(
            catalog.is_collection_externally_referenced(CollectionUuid::from(9_u128)),
            None
        );
    }

    #[test]
    fn profile_settings_roundtrip() {
        use crate::profile::ProfileLevel;

        let mut catalog = CollectionCatalog::new();
        let db = DatabaseName::new("app");
        assert_eq!(catalog.database_profile_level(&db), 0);

        catalog.set_database_profile_settings(
            db.clone(),
            ProfileSettings::new(ProfileLevel::new(2).unwrap(), None),
        );
        assert_eq!(catalog.database_profile_level(&db), 2);

        catalog.clear_database_profile_settings(&db);
        assert_eq!(catalog.database_profile_level(&db), 0);
    }

    #[test]
    fn uncommitted_view_reservation_blocks_collection_creation() {
        let mut catalog = CollectionCatalog::new();
        catalog.register_uncommitted_view(nss("app.v")).unwrap();

        let coll = new_collection("app.v", 1, 1);
        let err = catalog
            .register_collection(coll.uuid(), coll, None)
            .unwrap_err();
        assert_contains!(err.to_string(), "concurrent operation");

        catalog.deregister_uncommitted_view(&nss("app.v"));
        let coll = new_collection("app.v", 2, 2);
        catalog.register_collection(coll.uuid(), coll, None).unwrap();
    }

    #[test]
    fn establish_consistent_collection_fast_path() {
        let publisher = Arc::new(CatalogPublisher::default());
        let coll = new_collection("db.c", 1, 7);
        let uuid = coll.uuid();
        publisher
            .write(move |catalog| catalog.register_collection(coll.uuid(), coll, Some(ts(10))))
            .unwrap();

        let op = test_op(&publisher, |_| {});
        let catalog = publisher.latest();
        let key = NamespaceStringOrUuid::Uuid(DatabaseName::new("db"), uuid);
        let found = catalog
            .establish_consistent_collection(&op, &key, None)
            .unwrap()
            .unwrap();
        assert_eq!(found.uuid(), uuid);
    }

    #[test]
    fn establish_at_timestamp_before_drop_reconstructs() {
        let durable = Arc::new(FakeDurableCatalog::default());
        let publisher = Arc::new(CatalogPublisher::default());

        // A collection created at 10 and dropped at 50; the durable catalog
        // still serves its entry for snapshots in between.
        let coll = new_collection("db.c", 1, 7);
        let uuid = coll.uuid();
        durable.insert_entry(crate::testing::durable_entry_for(&coll), ts(10), Some(ts(50)));
        publisher
            .write({
                let coll = Arc::clone(&coll);
                move |catalog| catalog.register_collection(coll.uuid(), coll, Some(ts(10)))
            })
            .unwrap();
        publisher
            .write(move |catalog| {
                catalog.deregister_collection(uuid, true, Some(ts(50))).map(drop)
            })
            .unwrap();

        let op = test_op_with_durable(&publisher, &durable);
        op.open_storage_snapshot(Arc::new(FakeSnapshot::at(ts(30))));

        let catalog = publisher.latest();
        let key = NamespaceStringOrUuid::Namespace(nss("db.c"));
        let found = catalog
            .establish_consistent_collection(&op, &key, Some(ts(30)))
            .unwrap()
            .unwrap();
        assert_eq!(found.uuid(), uuid);
        assert_eq!(found.record_id(), RecordId::new(7));

        // After the drop point the collection reads as absent. Fresh
        // operation: instances established against a snapshot are cached on
        // the operation that opened them.
        let late_op = test_op_with_durable(&publisher, &durable);
        late_op.open_storage_snapshot(Arc::new(FakeSnapshot::at(ts(55))));
        let gone = catalog
            .establish_consistent_collection(&late_op, &key, Some(ts(55)))
            .unwrap();
        assert!(gone.is_none());
    }

    #[test]
    fn establish_below_window_scans_and_caches() {
        let durable = Arc::new(FakeDurableCatalog::default());
        let publisher = Arc::new(CatalogPublisher::default());

        let coll = new_collection("db.c", 1, 7);
        durable.insert_entry(crate::testing::durable_entry_for(&coll), ts(5), None);
        // Registered at 20: the maintained window starts there, so a read
        // at 10 is below it.
        publisher
            .write({
                let coll = Arc::clone(&coll);
                move |catalog| catalog.register_collection(coll.uuid(), coll, Some(ts(20)))
            })
            .unwrap();

        let op = test_op_with_durable(&publisher, &durable);
        op.open_storage_snapshot(Arc::new(FakeSnapshot::at(ts(10))));

        let catalog = publisher.latest();
        let key = NamespaceStringOrUuid::Namespace(nss("db.c"));
        assert_eq!(
            catalog
                .lookup_catalog_id_by_nss(&nss("db.c"), Some(ts(10)))
                .existence,
            Existence::Unknown
        );
        let found = catalog
            .establish_consistent_collection(&op, &key, Some(ts(10)))
            .unwrap();
        assert!(found.is_some());

        // The scan result was cached in the next published version.
        let lookup = publisher
            .latest()
            .lookup_catalog_id_by_nss(&nss("db.c"), Some(ts(10)));
        assert_eq!(lookup.existence, Existence::Exists);
        assert_eq!(lookup.record_id, Some(RecordId::new(7)));
    }

    #[test]
    fn catalog_reopen_truncates_history_to_stable() {
        let mut catalog = CollectionCatalog::new();
        let coll = new_collection("db.c", 1, 7);
        let uuid = coll.uuid();
        catalog
            .register_collection(uuid, Arc::clone(&coll), Some(ts(10)))
            .unwrap();
        catalog.deregister_collection(uuid, false, Some(ts(40))).unwrap();

        // The storage engine rolled back to 20: the drop never happened as
        // far as history is concerned.
        catalog.cleanup_for_catalog_reopen(ts(20));
        assert_eq!(
            catalog
                .lookup_catalog_id_by_nss(&nss("db.c"), Some(ts(40)))
                .existence,
            Existence::Exists
        );
        assert_eq!(
            catalog
                .lookup_catalog_id_by_uuid(uuid, Some(ts(40)))
                .existence,
            Existence::Exists
        );
    }

    #[test]
    fn resolve_namespace_checks_the_expected_database() {
        let publisher = Arc::new(CatalogPublisher::default());
        let coll = new_collection("db.c", 1, 7);
        let uuid = coll.uuid();
        publisher
            .write(move |catalog| catalog.register_collection(coll.uuid(), coll, Some(ts(10))))
            .unwrap();

        let op = test_op(&publisher, |_| {});
        let catalog = publisher.latest();

        let resolved = catalog
            .resolve_namespace(
                &op,
                &NamespaceStringOrUuid::Uuid(DatabaseName::new("db"), uuid),
            )
            .unwrap();
        assert_eq!(resolved, nss("db.c"));

        // Same UUID named under the wrong database fails.
        let err = catalog
            .resolve_namespace(
                &op,
                &NamespaceStringOrUuid::Uuid(DatabaseName::new("other"), uuid),
            )
            .unwrap_err();
        assert_contains!(err.to_string(), "expected database other");

        let err = catalog
            .resolve_namespace(
                &op,
                &NamespaceStringOrUuid::Uuid(
                    DatabaseName::new("db"),
                    CollectionUuid::from(99_u128),
                ),
            )
            .unwrap_err();
        assert_contains!(err.to_string(), "unable to resolve");
    }

    #[test]
    fn membership_and_predicate_queries() {
        let publisher = Arc::new(CatalogPublisher::default());
        let coll = new_collection("db.c", 1, 7);
        let uuid = coll.uuid();
        publisher
            .write({
                let coll = Arc::clone(&coll);
                move |catalog| catalog.register_collection(coll.uuid(), coll, Some(ts(10)))
            })
            .unwrap();

        let op = test_op(&publisher, |_| {});
        let catalog = publisher.latest();

        let stored = catalog.lookup_committed_collection_by_uuid(uuid).unwrap();
        assert!(catalog.contains_collection(&op, &stored));
        // The pre-registration instance is a different allocation.
        assert!(!catalog.contains_collection(&op, &coll));

        assert!(catalog.check_if_collection_satisfiable(uuid, |c| c.ns().coll() == "c"));
        assert!(!catalog.check_if_collection_satisfiable(uuid, Collection::is_capped));
        assert!(!catalog.check_if_collection_satisfiable(CollectionUuid::from(9_u128), |_| true));
    }

    fn test_op_with_durable(
        publisher: &Arc<CatalogPublisher>,
        durable: &Arc<FakeDurableCatalog>,
    ) -> Arc<OperationContext> {
        Arc::new(OperationContext::new(
            Arc::clone(publisher),
            Arc::clone(durable) as _,
        ))
    }
}
