//! Publication of catalog versions.
//!
//! One [`CatalogPublisher`] per process owns the published catalog pointer.
//! Readers load it atomically and keep whatever version they saw for as
//! long as they hold the `Arc`; writers are serialized behind a mutex and
//! batched: whichever writer acquires the serialization lock first drains
//! the whole queue onto a single structural-sharing clone, then publishes
//! once. A job failure discards only that job's sub-clone; the rest of the
//! batch commits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use marlin_id::CollectionUuid;
use observability_deps::tracing::{debug, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::catalog::CollectionCatalog;
use crate::collection::Collection;
use crate::error::CatalogError;
use crate::operation::{LockMode, OperationContext};
use crate::Result;

type WriteJob = Box<dyn FnOnce(&mut CollectionCatalog) -> Result<()> + Send>;

struct QueuedJob {
    job: WriteJob,
    result: Arc<Mutex<Option<Result<()>>>>,
}

impl std::fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedJob").finish_non_exhaustive()
    }
}

/// Process-wide holder of the published [`CollectionCatalog`].
#[derive(Debug)]
pub struct CatalogPublisher {
    published: ArcSwap<CollectionCatalog>,
    write_queue: Mutex<VecDeque<QueuedJob>>,
    /// Serializes batch committers. Also held for the whole lifetime of a
    /// [`BatchedCatalogWriter`], which is what blocks ordinary writers out
    /// of batched mode.
    commit_lock: Mutex<()>,
    publish_count: AtomicU64,
}

impl Default for CatalogPublisher {
    fn default() -> Self {
        Self::new(CollectionCatalog::new())
    }
}

impl CatalogPublisher {
    pub fn new(catalog: CollectionCatalog) -> Self {
        Self {
            published: ArcSwap::from_pointee(catalog),
            write_queue: Mutex::new(VecDeque::new()),
            commit_lock: Mutex::new(()),
            publish_count: AtomicU64::new(0),
        }
    }

    /// The latest published catalog, bypassing any stash on the operation.
    pub fn latest(&self) -> Arc<CollectionCatalog> {
        self.published.load_full()
    }

    /// The catalog the operation should read: its stashed version when one
    /// is installed, the latest published version otherwise.
    pub fn get(&self, op: &OperationContext) -> Arc<CollectionCatalog> {
        op.stashed_catalog().unwrap_or_else(|| self.latest())
    }

    /// Install `catalog` as the operation's stashed version; `get` returns
    /// it until the stash is released.
    pub fn stash(&self, op: &OperationContext, catalog: Arc<CollectionCatalog>) {
        op.set_stashed_catalog(catalog);
    }

    /// Run `job` against a copy of the current catalog and publish the
    /// result.
    ///
    /// Concurrent callers are batched: every job queued while one committer
    /// holds the serialization lock is applied, in submission order, to the
    /// same clone, and a single publication makes them all visible at once.
    /// An `Err` from a job discards that job's changes only and is returned
    /// to its submitter.
    ///
    /// Jobs must not block on I/O or lock acquisition; they execute while
    /// every other writer in the process is queued behind them. They may
    /// run on a different thread than the submitter's.
    pub fn write<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce(&mut CollectionCatalog) -> Result<()> + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(None));
        self.write_queue.lock().push_back(QueuedJob {
            job: Box::new(job),
            result: Arc::clone(&slot),
        });

        let _commit = self.commit_lock.lock();
        if let Some(result) = slot.lock().take() {
            // An earlier committer drained the queue while we waited.
            return result;
        }

        let jobs: Vec<QueuedJob> = {
            let mut queue = self.write_queue.lock();
            queue.drain(..).collect()
        };
        let mut working = (*self.published.load_full()).clone();
        let batch_size = jobs.len();
        for queued in jobs {
            let mut sub = working.clone();
            match (queued.job)(&mut sub) {
                Ok(()) => {
                    working = sub;
                    *queued.result.lock() = Some(Ok(()));
                }
                Err(e) => {
                    *queued.result.lock() = Some(Err(e));
                }
            }
        }
        self.published.store(Arc::new(working));
        self.publish_count.fetch_add(1, Ordering::Relaxed);
        debug!(batch_size, "published catalog version");

        let result = slot
            .lock()
            .take()
            .expect("committer drained the queue containing its own job");
        result
    }

    /// Number of versions published since startup. One batch is one
    /// publication regardless of how many jobs it carried.
    pub fn publish_count(&self) -> u64 {
        self.publish_count.load(Ordering::Relaxed)
    }

    /// Enter batched-writer mode: a single clone absorbs many operations and
    /// is published when the returned guard commits or drops. Requires the
    /// global lock in exclusive mode; ordinary `write` calls queue behind
    /// the guard for its entire lifetime, so the holding thread must go
    /// through the guard for every catalog write it makes.
    pub fn batched_writer<'a>(&'a self, op: &OperationContext) -> BatchedCatalogWriter<'a> {
        debug_assert!(
            op.locks().is_global_locked_with(LockMode::Exclusive),
            "batched catalog writes require the global exclusive lock"
        );
        let serialization = self.commit_lock.lock();
        let base = self.published.load_full();
        let working = (*base).clone();
        BatchedCatalogWriter {
            publisher: self,
            _serialization: serialization,
            base,
            working: Some(working),
            cloned_for_batch: hashbrown::HashSet::new(),
            finished: false,
        }
    }
}

/// RAII guard for bulk DDL: many catalog writes, one clone, one
/// publication.
///
/// Dropping the guard publishes; [`commit`](Self::commit) does the same but
/// surfaces errors. While the guard lives, no other writer in the process
/// can touch the catalog, and the holding thread must not call
/// [`CatalogPublisher::write`] (it would queue behind itself).
#[derive(Debug)]
pub struct BatchedCatalogWriter<'a> {
    publisher: &'a CatalogPublisher,
    _serialization: MutexGuard<'a, ()>,
    base: Arc<CollectionCatalog>,
    working: Option<CollectionCatalog>,
    /// Descriptors already copied for this batch; a second write to the
    /// same collection reuses the batch-private instance's state and does
    /// not restage it.
    cloned_for_batch: hashbrown::HashSet<CollectionUuid>,
    finished: bool,
}

impl BatchedCatalogWriter<'_> {
    /// The batch-private catalog, including all writes applied so far.
    pub fn catalog(&self) -> &CollectionCatalog {
        self.working.as_ref().expect("batch still active")
    }

    /// Apply `job` to the batch-private catalog. On `Err` the job's
    /// mutations are discarded and the batch continues from its previous
    /// state.
    pub fn write<F>(&mut self, job: F) -> Result<()>
    where
        F: FnOnce(&mut CollectionCatalog) -> Result<()>,
    {
        let working = self.working.as_mut().expect("batch still active");
        let mut sub = working.clone();
        job(&mut sub)?;
        *working = sub;
        Ok(())
    }

    /// Copy-on-write metadata update of one collection within the batch.
    /// The descriptor is cloned at most once per batch; repeated updates
    /// mutate the batch-private instance's successor state.
    pub fn update_collection<F>(&mut self, uuid: CollectionUuid, f: F) -> Result<()>
    where
        F: FnOnce(&mut Collection),
    {
        let first_write = !self.cloned_for_batch.contains(&uuid);
        self.write(|catalog| {
            let current = catalog
                .lookup_committed_collection_by_uuid(uuid)
                .ok_or(CatalogError::CollectionNotFound(uuid))?;
            let mut clone = (*current).clone();
            f(&mut clone);
            catalog.apply_metadata_write(Arc::new(clone), None)
        })?;
        if first_write {
            self.cloned_for_batch.insert(uuid);
        }
        Ok(())
    }

    /// Publish the batch. Fails only on a programming error: someone
    /// published past the batch's base version despite the exclusive lock.
    pub fn commit(mut self) -> Result<()> {
        self.publish()
    }

    fn publish(&mut self) -> Result<()> {
        let working = self.working.take().expect("batch published once");
        self.finished = true;
        let current = self.publisher.published.load_full();
        if !Arc::ptr_eq(&current, &self.base) {
            debug_assert!(false, "catalog version superseded during a batched write");
            return Err(CatalogError::unexpected(
                "catalog version superseded during a batched write",
            ));
        }
        self.publisher.published.store(Arc::new(working));
        self.publisher.publish_count.fetch_add(1, Ordering::Relaxed);
        debug!("published batched catalog write");
        Ok(())
    }
}

impl Drop for BatchedCatalogWriter<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.publish() {
                warn!(error = %e, "failed to publish batched catalog write");
            }
        }
    }
}
