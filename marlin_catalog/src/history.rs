//! Time-indexed mapping from namespaces and collection identities to
//! durable record ids.
//!
//! For each known key the catalog keeps a short, strictly time-ordered
//! vector of `(timestamp, record id)` entries, where a missing record id
//! means "dropped at this time". The vectors answer the question *"did this
//! collection exist at time t, and under which durable record?"* without
//! touching storage. Entries older than the oldest timestamp the server
//! still serves are pruned incrementally; queries below the maintained
//! window punt to a durable-catalog scan.

use std::hash::Hash;

use marlin_id::{RecordId, Timestamp};

/// Outcome of a historical lookup.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Existence {
    /// The key existed at the requested time; the record id is available.
    Exists,
    /// The key did not exist at the requested time.
    NotExists,
    /// The requested time predates the maintained window; the durable
    /// catalog must be scanned to find out.
    Unknown,
}

/// A resolved `(record id, existence)` pair.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CatalogIdLookup {
    pub record_id: Option<RecordId>,
    pub existence: Existence,
}

impl CatalogIdLookup {
    fn exists(record_id: RecordId) -> Self {
        Self {
            record_id: Some(record_id),
            existence: Existence::Exists,
        }
    }

    fn not_exists() -> Self {
        Self {
            record_id: None,
            existence: Existence::NotExists,
        }
    }

    fn unknown() -> Self {
        Self {
            record_id: None,
            existence: Existence::Unknown,
        }
    }

    fn from_entry(entry: &TimestampedCatalogId) -> Self {
        match entry.record_id {
            Some(record_id) => Self::exists(record_id),
            None => Self::not_exists(),
        }
    }
}

/// One event in a key's history. `record_id == None` records a drop.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct TimestampedCatalogId {
    pub(crate) record_id: Option<RecordId>,
    pub(crate) ts: Timestamp,
}

/// History vectors for one key space (namespaces, or collection UUIDs).
///
/// Persistent maps keep version clones O(1); the per-key vectors are tiny
/// (UUID keys hold at most two entries: create and drop) so path-copying
/// them on write is cheap.
#[derive(Debug, Clone)]
pub(crate) struct CatalogIdHistory<K>
where
    K: Hash + Eq + Clone,
{
    ids: imbl::HashMap<K, Vec<TimestampedCatalogId>>,
    /// Keys with entries that become prunable once the oldest timestamp
    /// advances far enough.
    changes: imbl::HashSet<K>,
}

impl<K> Default for CatalogIdHistory<K>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> CatalogIdHistory<K>
where
    K: Hash + Eq + Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            ids: imbl::HashMap::new(),
            changes: imbl::HashSet::new(),
        }
    }

    /// Append an entry for `key`. The timestamp must be strictly greater
    /// than every existing entry for the key; writers are serialized so this
    /// holds by construction. Returns the earliest timestamp at which this
    /// key could be pruned, if pruning became possible.
    pub(crate) fn push(
        &mut self,
        key: &K,
        record_id: Option<RecordId>,
        ts: Timestamp,
    ) -> Option<Timestamp> {
        let vec = match self.ids.get_mut(key) {
            Some(vec) => vec,
            None => {
                self.ids.insert(key.clone(), Vec::with_capacity(2));
                self.ids.get_mut(key).expect("entry was just inserted")
            }
        };
        if let Some(last) = vec.last() {
            debug_assert!(last.ts < ts, "history timestamps must strictly increase");
            debug_assert!(
                record_id.is_some() || last.record_id.is_some(),
                "a drop must not follow a drop"
            );
        }
        vec.push(TimestampedCatalogId { record_id, ts });
        self.mark_for_cleanup_if_needed(key)
    }

    /// Cache an entry discovered by scanning the durable catalog. Unlike
    /// [`push`](Self::push) the timestamp may fall anywhere; the entry is
    /// inserted in order. A scan result that repeats the state already
    /// implied by the neighboring entry is dropped on the floor.
    pub(crate) fn insert_after_scan(
        &mut self,
        key: &K,
        record_id: Option<RecordId>,
        ts: Timestamp,
    ) -> Option<Timestamp> {
        let vec = match self.ids.get_mut(key) {
            Some(vec) => vec,
            None => {
                self.ids.insert(key.clone(), Vec::with_capacity(2));
                self.ids.get_mut(key).expect("entry was just inserted")
            }
        };
        let pos = vec.partition_point(|e| e.ts < ts);
        if pos < vec.len() && vec[pos].ts == ts {
            vec[pos].record_id = record_id;
        } else if pos > 0 && vec[pos - 1].record_id == record_id {
            // Already implied; nothing to cache.
        } else {
            vec.insert(pos, TimestampedCatalogId { record_id, ts });
        }
        self.mark_for_cleanup_if_needed(key)
    }

    /// Resolve `key` at time `ts` (or at latest when `ts` is `None`).
    /// `oldest_maintained` is the catalog-wide lower bound of the window;
    /// anything below it is [`Existence::Unknown`].
    pub(crate) fn lookup(
        &self,
        key: &K,
        ts: Option<Timestamp>,
        oldest_maintained: Timestamp,
    ) -> CatalogIdLookup {
        let Some(vec) = self.ids.get(key) else {
            return match ts {
                // Latest state is authoritative: nothing recorded, nothing
                // exists.
                None => CatalogIdLookup::not_exists(),
                Some(t) => Self::below_window(t, oldest_maintained),
            };
        };
        match ts {
            None => vec
                .last()
                .map(CatalogIdLookup::from_entry)
                .unwrap_or_else(CatalogIdLookup::not_exists),
            Some(t) => {
                let pos = vec.partition_point(|e| e.ts <= t);
                if pos == 0 {
                    Self::below_window(t, oldest_maintained)
                } else {
                    CatalogIdLookup::from_entry(&vec[pos - 1])
                }
            }
        }
    }

    fn below_window(ts: Timestamp, oldest_maintained: Timestamp) -> CatalogIdLookup {
        if oldest_maintained != Timestamp::MAX && ts >= oldest_maintained {
            CatalogIdLookup::not_exists()
        } else {
            CatalogIdLookup::unknown()
        }
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.ids.contains_key(key)
    }

    /// Prune entries that can no longer be observed now that every read in
    /// the system happens at or after `oldest`. Returns the earliest
    /// timestamp at which another pruning pass could remove more.
    pub(crate) fn cleanup(&mut self, oldest: Timestamp) -> Option<Timestamp> {
        let keys: Vec<K> = self.changes.iter().cloned().collect();
        let mut lowest = None;
        for key in keys {
            self.changes.remove(&key);
            let remove_key = match self.ids.get_mut(&key) {
                None => continue,
                Some(vec) => {
                    Self::prune_vector(vec, oldest);
                    vec.is_empty()
                }
            };
            if remove_key {
                self.ids.remove(&key);
            } else if let Some(candidate) = self.mark_for_cleanup_if_needed(&key) {
                lowest = Some(lowest.map_or(candidate, |l: Timestamp| l.min(candidate)));
            }
        }
        lowest
    }

    fn prune_vector(vec: &mut Vec<TimestampedCatalogId>, oldest: Timestamp) {
        // The newest entry at or before `oldest` still answers reads in
        // [oldest, next); keep it unless it records a drop, in which case
        // the maintained-window floor answers those reads instead.
        let pos = vec.partition_point(|e| e.ts <= oldest);
        if pos == 0 {
            return;
        }
        let survivor = pos - 1;
        if vec[survivor].record_id.is_some() {
            vec.drain(..survivor);
        } else {
            vec.drain(..=survivor);
        }
    }

    /// Truncate entries newer than `stable`; used when the catalog reopens
    /// after the storage engine rolls back to a stable timestamp. Returns
    /// the new earliest cleanup candidate across all keys.
    pub(crate) fn truncate_after(&mut self, stable: Timestamp) -> Option<Timestamp> {
        let keys: Vec<K> = self.ids.keys().cloned().collect();
        let mut lowest = None;
        for key in keys {
            let remove_key = {
                let vec = self.ids.get_mut(&key).expect("iterating known keys");
                let keep = vec.partition_point(|e| e.ts <= stable);
                vec.truncate(keep);
                vec.is_empty()
            };
            if remove_key {
                self.ids.remove(&key);
                self.changes.remove(&key);
            } else if let Some(candidate) = self.mark_for_cleanup_if_needed(&key) {
                lowest = Some(lowest.map_or(candidate, |l: Timestamp| l.min(candidate)));
            }
        }
        lowest
    }

    /// Record whether `key`'s vector holds prunable entries, returning the
    /// earliest oldest-timestamp value that would make pruning fire.
    fn mark_for_cleanup_if_needed(&mut self, key: &K) -> Option<Timestamp> {
        let candidate = {
            let vec = self.ids.get(key)?;
            match vec.as_slice() {
                [] => None,
                // A vector whose oldest event is a drop can lose that entry
                // as soon as the window reaches it.
                [first, ..] if first.record_id.is_none() => Some(first.ts),
                // A single create is the floor of its key; never prunable.
                [_] => None,
                [_, second, ..] => Some(second.ts),
            }
        };
        match candidate {
            Some(_) => {
                self.changes.insert(key.clone());
            }
            None => {
                self.changes.remove(key);
            }
        }
        candidate
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ts(t: u64) -> Timestamp {
        Timestamp::new(t)
    }

    fn id(i: u64) -> RecordId {
        RecordId::new(i)
    }

    fn exists(i: u64) -> CatalogIdLookup {
        CatalogIdLookup {
            record_id: Some(id(i)),
            existence: Existence::Exists,
        }
    }

    fn not_exists() -> CatalogIdLookup {
        CatalogIdLookup {
            record_id: None,
            existence: Existence::NotExists,
        }
    }

    fn unknown() -> CatalogIdLookup {
        CatalogIdLookup {
            record_id: None,
            existence: Existence::Unknown,
        }
    }

    #[test]
    fn create_then_lookup() {
        let mut history = CatalogIdHistory::<&str>::new();
        history.push(&"db.c", Some(id(7)), ts(10));

        assert_eq!(history.lookup(&"db.c", Some(ts(10)), ts(10)), exists(7));
        assert_eq!(history.lookup(&"db.c", Some(ts(25)), ts(10)), exists(7));
        assert_eq!(history.lookup(&"db.c", None, ts(10)), exists(7));
        // Below the earliest entry but inside the maintained window.
        assert_eq!(history.lookup(&"db.c", Some(ts(9)), ts(5)), not_exists());
        // Below the maintained window entirely.
        assert_eq!(history.lookup(&"db.c", Some(ts(4)), ts(5)), unknown());
    }

    #[test]
    fn create_then_drop_segments() {
        let mut history = CatalogIdHistory::<&str>::new();
        history.push(&"db.c", Some(id(7)), ts(10));
        history.push(&"db.c", None, ts(20));

        assert_eq!(history.lookup(&"db.c", Some(ts(10)), ts(10)), exists(7));
        assert_eq!(history.lookup(&"db.c", Some(ts(19)), ts(10)), exists(7));
        assert_eq!(history.lookup(&"db.c", Some(ts(20)), ts(10)), not_exists());
        assert_eq!(history.lookup(&"db.c", Some(ts(99)), ts(10)), not_exists());
        assert_eq!(history.lookup(&"db.c", None, ts(10)), not_exists());
    }

    #[test]
    fn unknown_key_without_timestamp_is_not_exists() {
        let history = CatalogIdHistory::<&str>::new();
        assert_eq!(history.lookup(&"nope", None, Timestamp::MAX), not_exists());
        // With a timestamp and an unbounded window, existence is unknowable.
        assert_eq!(
            history.lookup(&"nope", Some(ts(5)), Timestamp::MAX),
            unknown()
        );
    }

    #[test]
    fn rename_pushes_to_both_keys_at_one_timestamp() {
        let mut history = CatalogIdHistory::<&str>::new();
        history.push(&"a.x", Some(id(3)), ts(30));
        // Rename a.x -> a.y at 40: drop under the old name, create under the
        // new one, same timestamp, different keys.
        history.push(&"a.x", None, ts(40));
        history.push(&"a.y", Some(id(3)), ts(40));

        assert_eq!(history.lookup(&"a.x", Some(ts(35)), ts(30)), exists(3));
        assert_eq!(history.lookup(&"a.x", Some(ts(40)), ts(30)), not_exists());
        assert_eq!(history.lookup(&"a.y", Some(ts(40)), ts(30)), exists(3));
        assert_eq!(history.lookup(&"a.y", Some(ts(39)), ts(30)), not_exists());
    }

    #[test]
    fn push_returns_cleanup_candidate() {
        let mut history = CatalogIdHistory::<&str>::new();
        assert_eq!(history.push(&"db.c", Some(id(1)), ts(10)), None);
        // Two entries: the older one becomes prunable once oldest reaches
        // the second entry's timestamp.
        assert_eq!(history.push(&"db.c", None, ts(20)), Some(ts(20)));
    }

    #[test]
    fn cleanup_keeps_newest_create_at_or_below_oldest() {
        let mut history = CatalogIdHistory::<&str>::new();
        history.push(&"db.c", Some(id(1)), ts(10));
        history.push(&"db.c", None, ts(20));
        history.push(&"db.c", Some(id(2)), ts(30));

        history.cleanup(ts(30));
        // Only the live create survives; reads at >= 30 still resolve.
        assert_eq!(history.lookup(&"db.c", Some(ts(30)), ts(30)), exists(2));
        assert_eq!(history.lookup(&"db.c", Some(ts(31)), ts(30)), exists(2));
        // Reads below the window now punt to storage.
        assert_eq!(history.lookup(&"db.c", Some(ts(15)), ts(30)), unknown());
    }

    #[test]
    fn cleanup_removes_vector_ending_in_old_drop() {
        let mut history = CatalogIdHistory::<&str>::new();
        history.push(&"db.c", Some(id(1)), ts(10));
        history.push(&"db.c", None, ts(20));

        history.cleanup(ts(25));
        assert!(!history.contains(&"db.c"));
        // Within the advanced window the answer stays NotExists.
        assert_eq!(history.lookup(&"db.c", Some(ts(26)), ts(25)), not_exists());
    }

    #[test]
    fn cleanup_is_incremental() {
        let mut history = CatalogIdHistory::<&str>::new();
        history.push(&"db.c", Some(id(1)), ts(10));
        history.push(&"db.c", None, ts(20));
        history.push(&"db.c", Some(id(2)), ts(30));
        history.push(&"db.c", None, ts(40));

        // Advancing to 20 removes the first create and the first drop, and
        // reports the next candidate.
        let next = history.cleanup(ts(20));
        assert_eq!(next, Some(ts(40)));
        assert_eq!(history.lookup(&"db.c", Some(ts(30)), ts(20)), exists(2));
        assert_eq!(history.lookup(&"db.c", Some(ts(25)), ts(20)), not_exists());
    }

    #[test]
    fn insert_after_scan_backfills_in_order() {
        let mut history = CatalogIdHistory::<&str>::new();
        history.push(&"db.c", Some(id(9)), ts(50));
        // A durable scan discovered the collection also existed at 30 under
        // a different record id.
        history.insert_after_scan(&"db.c", Some(id(4)), ts(30));

        assert_eq!(history.lookup(&"db.c", Some(ts(35)), ts(10)), exists(4));
        assert_eq!(history.lookup(&"db.c", Some(ts(50)), ts(10)), exists(9));
    }

    #[test]
    fn insert_after_scan_caches_negative_results() {
        let mut history = CatalogIdHistory::<&str>::new();
        history.insert_after_scan(&"db.c", None, ts(30));
        assert_eq!(history.lookup(&"db.c", Some(ts(30)), ts(10)), not_exists());
    }

    #[test]
    fn insert_after_scan_skips_redundant_entries() {
        let mut history = CatalogIdHistory::<&str>::new();
        history.push(&"db.c", Some(id(9)), ts(50));
        history.insert_after_scan(&"db.c", Some(id(9)), ts(60));
        // The redundant entry was not stored: lookups past 50 already
        // resolved to record 9, and the vector stayed at length one, so the
        // key never entered the cleanup set.
        assert_eq!(history.push(&"db.c", None, ts(70)), Some(ts(70)));
    }

    #[test]
    fn truncate_after_rolls_back_history() {
        let mut history = CatalogIdHistory::<&str>::new();
        history.push(&"db.c", Some(id(1)), ts(10));
        history.push(&"db.c", None, ts(20));
        history.push(&"db.d", Some(id(2)), ts(25));

        history.truncate_after(ts(15));
        assert_eq!(history.lookup(&"db.c", Some(ts(20)), ts(5)), exists(1));
        assert!(!history.contains(&"db.d"));
    }
}
