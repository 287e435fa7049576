//! Reclaimable record cache
//!
//! Maps `(table, id)` to a weakly held `Arc<Record>`. An entry moves through
//! three states:
//!
//! - *live*: someone still holds the record (a caller, or the cache's own
//!   retention queue of the most recent puts)
//! - *reclaimed*: every strong reference is gone but the entry is still
//!   indexed; lookups miss
//! - *drained*: removed from the index, listener notified
//!
//! Draining runs every `times_cache_clear` puts and on demand. It scans for
//! reclaimed entries under the read lock, then removes them under the write
//! lock, skipping any entry whose generation changed in between (it was
//! re-cached). `evict`, `clear` and `clear_table` remove entries directly and
//! are not counted as evictions.
//!
//! The cache accelerates reads only; the store stays the system of record.

use parking_lot::RwLock;
use redmap_core::Record;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Notified once per drained entry
pub trait CacheoutListener: Send + Sync {
    /// `table`/`id` left the cache after its record was reclaimed
    fn on_cacheout(&self, table: &str, id: &str);
}

impl<F> CacheoutListener for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn on_cacheout(&self, table: &str, id: &str) {
        self(table, id)
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Indexed entries, live or reclaimed
    pub size: u64,
    /// Lookups that found a live record
    pub hits: u64,
    /// Lookups that found nothing or a reclaimed record
    pub misses: u64,
    /// Records cached
    pub puts: u64,
    /// Reclaimed entries drained
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, 0.0 before any lookup
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct Entry {
    record: Weak<Record>,
    generation: u64,
}

#[derive(Debug, Default)]
struct Index {
    tables: FxHashMap<String, FxHashMap<String, Entry>>,
    retained: VecDeque<Arc<Record>>,
    len: usize,
}

impl Index {
    fn remove(&mut self, table: &str, id: &str) -> Option<Entry> {
        let ids = self.tables.get_mut(table)?;
        let entry = ids.remove(id)?;
        if ids.is_empty() {
            self.tables.remove(table);
        }
        self.len -= 1;
        Some(entry)
    }
}

/// Weak-reference record cache with drain accounting
pub struct ReclaimableCache {
    index: RwLock<Index>,
    listener: RwLock<Option<Arc<dyn CacheoutListener>>>,
    times_cache_clear: u64,
    retain: usize,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
}

impl ReclaimableCache {
    /// Cache draining every `times_cache_clear` puts (at least 1) and holding
    /// the `retain` most recent puts strongly
    pub fn new(times_cache_clear: u64, retain: usize) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            listener: RwLock::new(None),
            times_cache_clear: times_cache_clear.max(1),
            retain,
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Install the drain listener, replacing any previous one
    pub fn set_listener(&self, listener: impl CacheoutListener + 'static) {
        *self.listener.write() = Some(Arc::new(listener));
    }

    /// Remove the drain listener
    pub fn clear_listener(&self) {
        *self.listener.write() = None;
    }

    /// Cache a record under its table and id
    ///
    /// Records without an id are ignored.
    pub fn cache(&self, record: &Arc<Record>) {
        let Some(id) = record.id() else {
            return;
        };
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut index = self.index.write();
            let previous = index
                .tables
                .entry(record.table().to_string())
                .or_default()
                .insert(
                    id.to_string(),
                    Entry {
                        record: Arc::downgrade(record),
                        generation,
                    },
                );
            if previous.is_none() {
                index.len += 1;
            }
            if self.retain > 0 {
                index.retained.push_back(Arc::clone(record));
                while index.retained.len() > self.retain {
                    index.retained.pop_front();
                }
            }
        }
        let puts = self.puts.fetch_add(1, Ordering::Relaxed) + 1;
        if puts % self.times_cache_clear == 0 {
            self.drain_reclaimed();
        }
    }

    /// Live cached record, counting a hit or a miss
    pub fn get(&self, table: &str, id: &str) -> Option<Arc<Record>> {
        let found = self
            .index
            .read()
            .tables
            .get(table)
            .and_then(|ids| ids.get(id))
            .and_then(|entry| entry.record.upgrade());
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Live cached record without touching the counters
    pub fn peek(&self, table: &str, id: &str) -> Option<Arc<Record>> {
        self.index
            .read()
            .tables
            .get(table)
            .and_then(|ids| ids.get(id))
            .and_then(|entry| entry.record.upgrade())
    }

    /// Remove one entry; returns whether it was indexed
    pub fn evict(&self, table: &str, id: &str) -> bool {
        self.index.write().remove(table, id).is_some()
    }

    /// Evict the entry for `current`'s id unless it is `current` itself
    ///
    /// Returns whether an entry was removed.
    pub fn evict_other(&self, current: &Record) -> bool {
        let Some(id) = current.id() else {
            return false;
        };
        let mut index = self.index.write();
        let stale = index
            .tables
            .get(current.table())
            .and_then(|ids| ids.get(id))
            .map(|entry| !std::ptr::eq(entry.record.as_ptr(), current))
            .unwrap_or(false);
        if stale {
            index.remove(current.table(), id);
        }
        stale
    }

    /// Remove every entry
    pub fn clear(&self) {
        let mut index = self.index.write();
        index.tables.clear();
        index.retained.clear();
        index.len = 0;
    }

    /// Remove every entry of one table
    pub fn clear_table(&self, table: &str) {
        let mut index = self.index.write();
        if let Some(ids) = index.tables.remove(table) {
            index.len -= ids.len();
        }
        index.retained.retain(|r| r.table() != table);
    }

    /// Drain reclaimed entries and notify the listener; returns the count
    pub fn drain_reclaimed(&self) -> usize {
        let candidates: Vec<(String, String, u64)> = {
            let index = self.index.read();
            index
                .tables
                .iter()
                .flat_map(|(table, ids)| {
                    ids.iter()
                        .filter(|(_, entry)| entry.record.strong_count() == 0)
                        .map(move |(id, entry)| (table.clone(), id.clone(), entry.generation))
                })
                .collect()
        };
        if candidates.is_empty() {
            return 0;
        }

        let mut drained = Vec::with_capacity(candidates.len());
        {
            let mut index = self.index.write();
            for (table, id, generation) in candidates {
                let unchanged = index
                    .tables
                    .get(&table)
                    .and_then(|ids| ids.get(&id))
                    .map(|e| e.generation == generation && e.record.strong_count() == 0)
                    .unwrap_or(false);
                if unchanged {
                    index.remove(&table, &id);
                    drained.push((table, id));
                }
            }
        }
        self.evictions
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        debug!(target: "redmap::cache", drained = drained.len(), "drained reclaimed entries");

        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            for (table, id) in &drained {
                listener.on_cacheout(table, id);
            }
        }
        drained.len()
    }

    /// Number of indexed entries
    pub fn len(&self) -> usize {
        self.index.read().len
    }

    /// Whether nothing is indexed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len() as u64,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for ReclaimableCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReclaimableCache")
            .field("times_cache_clear", &self.times_cache_clear)
            .field("retain", &self.retain)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn record(table: &str, id: &str) -> Arc<Record> {
        Arc::new(Record::with_id(table, id).with("n", 1i32))
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = ReclaimableCache::new(100, 10);
        let r = record("te", "1");
        cache.cache(&r);
        assert!(Arc::ptr_eq(&cache.get("te", "1").unwrap(), &r));
        assert!(cache.get("te", "2").is_none());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.puts, stats.size), (1, 1, 1, 1));
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reclaimed_entry_misses_until_drained() {
        let cache = ReclaimableCache::new(100, 0);
        cache.cache(&record("te", "1"));
        // nothing holds the record any more
        assert!(cache.get("te", "1").is_none());
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.drain_reclaimed(), 1);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_retention_keeps_recent_puts_alive() {
        let cache = ReclaimableCache::new(100, 2);
        for id in ["1", "2", "3"] {
            cache.cache(&record("te", id));
        }
        assert!(cache.peek("te", "1").is_none());
        assert!(cache.peek("te", "2").is_some());
        assert!(cache.peek("te", "3").is_some());
        assert_eq!(cache.drain_reclaimed(), 1);
    }

    #[test]
    fn test_periodic_drain_fires_listener() {
        let cache = ReclaimableCache::new(5, 0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        cache.set_listener(move |table: &str, id: &str| {
            sink.lock().push(format!("{}:{}", table, id));
        });

        for i in 0..5 {
            cache.cache(&record("te", &i.to_string()));
        }
        // the fifth record was still borrowed by `cache` during the drain
        let drained = seen.lock().len();
        assert_eq!(drained, 4);
        let stats = cache.stats();
        assert_eq!(stats.evictions, 4);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn test_evict_and_clear_do_not_count_or_notify() {
        let cache = ReclaimableCache::new(100, 10);
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        cache.set_listener(move |_: &str, _: &str| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        cache.cache(&record("te", "1"));
        cache.cache(&record("te", "2"));
        cache.cache(&record("other", "1"));

        assert!(cache.evict("te", "1"));
        assert!(!cache.evict("te", "1"));
        cache.clear_table("te");
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_recache_resets_reclaimed_entry() {
        let cache = ReclaimableCache::new(100, 0);
        cache.cache(&record("te", "1"));
        let fresh = record("te", "1");
        cache.cache(&fresh);
        assert_eq!(cache.drain_reclaimed(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evict_other_keeps_same_instance() {
        let cache = ReclaimableCache::new(100, 10);
        let cached = record("te", "1");
        cache.cache(&cached);
        assert!(!cache.evict_other(&cached));
        let copy = record("te", "1");
        assert!(cache.evict_other(&copy));
        assert!(cache.peek("te", "1").is_none());
    }

    #[test]
    fn test_records_without_id_are_ignored() {
        let cache = ReclaimableCache::new(100, 10);
        cache.cache(&Arc::new(Record::new("te")));
        assert_eq!(cache.stats().puts, 0);
        assert!(cache.is_empty());
    }
}
