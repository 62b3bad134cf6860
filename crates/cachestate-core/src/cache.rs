//! Bounded local cache: LRU shield in front of a backing map.
//!
//! BoundedLocalCache absorbs repeated reads and writes of the same keys
//! within a processing batch so they do not reach the remote store.
//!
//! **Read path**: hits served locally, misses forwarded in one backing call
//! **Write path**: de-duplicate, write through, then refresh cache entries
//! **Eviction**: strict least-recently-used by access; never touches the backing map

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::backing::BackingMap;
use crate::error::{StateError, StateResult};
use crate::keys::CompoundKey;

/// Statistics about local cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Keys served from the local cache
    pub hits: u64,
    /// Keys not served locally, counted per position like `hits`
    pub misses: u64,
    /// Entries dropped due to capacity
    pub evictions: u64,
    /// Entries currently cached
    pub entries: usize,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheEntry<T> {
    /// Cached value; `None` records a key known to be absent remotely
    value: Option<T>,
    /// Recency tick of the last access
    tick: u64,
}

/// LRU index: entries by key plus keys ordered by last access.
struct Lru<T> {
    capacity: usize,
    entries: HashMap<CompoundKey, CacheEntry<T>>,
    recency: BTreeMap<u64, CompoundKey>,
    next_tick: u64,
    /// Bumped by every write-through, successful or not
    write_epoch: u64,
}

impl<T: Clone> Lru<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(4096)),
            recency: BTreeMap::new(),
            next_tick: 0,
            write_epoch: 0,
        }
    }

    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    /// Look up and mark as most recently used.
    fn get(&mut self, key: &CompoundKey) -> Option<Option<T>> {
        let tick = self.bump();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.tick);
        entry.tick = tick;
        self.recency.insert(tick, key.clone());
        Some(entry.value.clone())
    }

    /// Insert or refresh, returning how many entries were evicted.
    fn put(&mut self, key: CompoundKey, value: Option<T>) -> u64 {
        if self.capacity == 0 {
            return 0;
        }
        let tick = self.bump();
        if let Some(entry) = self.entries.get_mut(&key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            entry.value = value;
            self.recency.insert(tick, key);
            return 0;
        }

        let mut evicted = 0;
        while self.entries.len() >= self.capacity {
            match self.recency.pop_first() {
                Some((_, oldest)) => {
                    self.entries.remove(&oldest);
                    evicted += 1;
                }
                None => break,
            }
        }
        self.recency.insert(tick, key.clone());
        self.entries.insert(key, CacheEntry { value, tick });
        evicted
    }

    /// Insert only if `key` has no entry, returning how many entries were evicted.
    fn insert_if_absent(&mut self, key: CompoundKey, value: Option<T>) -> u64 {
        if self.entries.contains_key(&key) {
            return 0;
        }
        self.put(key, value)
    }

    fn remove(&mut self, key: &CompoundKey) {
        if let Some(entry) = self.entries.remove(key) {
            self.recency.remove(&entry.tick);
        }
    }

    fn contains(&self, key: &CompoundKey) -> bool {
        self.entries.contains_key(key)
    }
}

/// LRU-bounded cache wrapping any [`BackingMap`].
///
/// All methods take `&self`; the LRU index sits behind a Mutex that is never
/// held across backing-map I/O.
pub struct BoundedLocalCache<T, B> {
    backing: B,
    lru: Mutex<Lru<T>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<T: Clone, B: BackingMap<T>> BoundedLocalCache<T, B> {
    pub fn new(backing: B, capacity: usize) -> Self {
        Self {
            backing,
            lru: Mutex::new(Lru::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn backing(&self) -> &B {
        &self.backing
    }

    pub fn capacity(&self) -> usize {
        self.lru.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.lru.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is cached. Does not count as an access.
    pub fn contains(&self, key: &CompoundKey) -> bool {
        self.lru.lock().contains(key)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn record_evictions(&self, evicted: u64) {
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
    }
}

impl<T, B> BackingMap<T> for BoundedLocalCache<T, B>
where
    T: Clone + Send,
    B: BackingMap<T>,
{
    fn multi_get(&self, keys: &[CompoundKey]) -> StateResult<Vec<Option<T>>> {
        let mut results: Vec<Option<T>> = Vec::with_capacity(keys.len());
        // unique missing keys, each with every input position that wants it
        let mut misses: Vec<(&CompoundKey, Vec<usize>)> = Vec::new();
        let mut miss_index: HashMap<&CompoundKey, usize> = HashMap::new();
        let epoch = {
            let mut lru = self.lru.lock();
            for (i, key) in keys.iter().enumerate() {
                if let Some(&slot) = miss_index.get(key) {
                    misses[slot].1.push(i);
                    results.push(None);
                    continue;
                }
                match lru.get(key) {
                    Some(value) => results.push(value),
                    None => {
                        miss_index.insert(key, misses.len());
                        misses.push((key, vec![i]));
                        results.push(None);
                    }
                }
            }
            lru.write_epoch
        };

        let miss_count = misses.iter().map(|(_, p)| p.len()).sum::<usize>() as u64;
        let hit_count = keys.len() as u64 - miss_count;
        self.hits.fetch_add(hit_count, Ordering::Relaxed);
        self.misses.fetch_add(miss_count, Ordering::Relaxed);
        if misses.is_empty() {
            return Ok(results);
        }

        let to_fetch: Vec<CompoundKey> = misses.iter().map(|(k, _)| (*k).clone()).collect();
        let fetched = self.backing.multi_get(&to_fetch)?;

        let mut evicted = 0;
        {
            let mut lru = self.lru.lock();
            // a write-through finished during the read: what we fetched may
            // predate it, so leave the cache to the writer
            let fill = lru.write_epoch == epoch;
            for ((key, positions), value) in misses.into_iter().zip(fetched) {
                for &pos in &positions {
                    results[pos] = value.clone();
                }
                if fill {
                    evicted += lru.insert_if_absent(key.clone(), value);
                }
            }
        }
        self.record_evictions(evicted);
        debug!(
            keys = keys.len(),
            hits = hit_count,
            fetched = to_fetch.len(),
            "Local cache multi_get"
        );
        Ok(results)
    }

    fn multi_put(&self, keys: &[CompoundKey], values: &[T]) -> StateResult<()> {
        if keys.len() != values.len() {
            return Err(StateError::MismatchedBatch {
                keys: keys.len(),
                values: values.len(),
            });
        }

        // last write wins for keys named more than once
        let mut unique_keys: Vec<CompoundKey> = Vec::with_capacity(keys.len());
        let mut unique_values: Vec<T> = Vec::with_capacity(values.len());
        let mut slots: HashMap<&CompoundKey, usize> = HashMap::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(values) {
            match slots.get(key) {
                Some(&slot) => unique_values[slot] = value.clone(),
                None => {
                    slots.insert(key, unique_keys.len());
                    unique_keys.push(key.clone());
                    unique_values.push(value.clone());
                }
            }
        }

        if let Err(err) = self.backing.multi_put(&unique_keys, &unique_values) {
            // remote state of these keys is unknown now; force the retry to re-read it
            let mut lru = self.lru.lock();
            lru.write_epoch += 1;
            for key in &unique_keys {
                lru.remove(key);
            }
            warn!(
                keys = unique_keys.len(),
                error = %err,
                "Write-through failed, dropped batch from local cache"
            );
            return Err(err);
        }

        let mut evicted = 0;
        {
            let mut lru = self.lru.lock();
            lru.write_epoch += 1;
            for (key, value) in unique_keys.into_iter().zip(unique_values) {
                evicted += lru.put(key, Some(value));
            }
        }
        self.record_evictions(evicted);
        Ok(())
    }
}
