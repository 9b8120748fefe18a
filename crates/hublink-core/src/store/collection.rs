// ── Generic ordered entity collection ──
//
// Lock-free concurrent storage with O(1) lookups and stable insertion
// order. The ordered snapshot is rebuilt lazily, on the first read after
// a mutation, so bulk loading never sorts more than once.

use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

struct Slot<T> {
    seq: u64,
    value: Arc<T>,
}

/// Ordered values as of `version`.
struct Snapshot<T> {
    version: u64,
    values: Arc<Vec<Arc<T>>>,
}

/// A lock-free, ordered collection for a single entity type.
///
/// Uses `DashMap` for concurrent lookups and an `ArcSwap` caching the
/// ordered snapshot. Every entity remembers the sequence number of
/// its first insertion, so snapshots are always in insertion order even
/// though the map itself is unordered. Updating an existing key keeps its
/// position.
pub(crate) struct EntityCollection<K, T>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    by_key: DashMap<K, Slot<T>>,

    next_seq: AtomicU64,

    /// Bumped after every mutation of `by_key`.
    version: AtomicU64,

    snapshot: ArcSwap<Snapshot<T>>,
}

impl<K, T> EntityCollection<K, T>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            by_key: DashMap::new(),
            next_seq: AtomicU64::new(0),
            version: AtomicU64::new(0),
            snapshot: ArcSwap::from_pointee(Snapshot {
                version: 0,
                values: Arc::new(Vec::new()),
            }),
        }
    }

    /// Insert or update an entity. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, key: K, entity: T) -> bool {
        let value = Arc::new(entity);
        let is_new = match self.by_key.entry(key) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().value = value;
                false
            }
            Entry::Vacant(vacant) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                vacant.insert(Slot { seq, value });
                true
            }
        };

        self.touch();

        is_new
    }

    /// Remove an entity by key. Returns the removed entity if it existed.
    pub(crate) fn remove(&self, key: &K) -> Option<Arc<T>> {
        let removed = self.by_key.remove(key).map(|(_, slot)| slot.value);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    pub(crate) fn get(&self, key: &K) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(&r.value().value))
    }

    /// Values in insertion order. Cheap `Arc` clone unless the collection
    /// changed since the last call.
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        let version = self.version.load(Ordering::Acquire);
        let cached = self.snapshot.load();
        if cached.version == version {
            return Arc::clone(&cached.values);
        }

        let values = Arc::new(self.collect_ordered());
        self.snapshot.store(Arc::new(Snapshot {
            version,
            values: Arc::clone(&values),
        }));
        values
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn touch(&self) {
        self.version.fetch_add(1, Ordering::Release);
    }

    fn collect_ordered(&self) -> Vec<Arc<T>> {
        let mut slots: Vec<(u64, Arc<T>)> = self
            .by_key
            .iter()
            .map(|r| (r.value().seq, Arc::clone(&r.value().value)))
            .collect();
        slots.sort_unstable_by_key(|(seq, _)| *seq);
        slots.into_iter().map(|(_, v)| v).collect()
    }
}
