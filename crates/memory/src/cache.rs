//! Tick aged cache pools.
//!
//! A pool is split into regions. New entries always land in the current
//! region; a sweep advances to the next region and drops whatever it held,
//! so one sweep evicts roughly `1 / regions` of the pool. Independently of
//! sweeping, an entry older than the pool validity (in ticks) is stale and
//! is never returned as fresh.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Where a cached value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Backend,
    Predictive,
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    tick: u64,
    source: Source,
}

#[derive(Debug)]
struct Regions<K, V> {
    regions: Vec<HashMap<K, Entry<V>>>,
    current: usize,
    validity: u64,
}

impl<K: Hash + Eq, V> Regions<K, V> {
    fn find(&self, key: &K, recent_only: bool) -> Option<&Entry<V>> {
        if recent_only {
            return self.regions[self.current].get(key);
        }
        // newest region first
        let n = self.regions.len();
        (0..n)
            .map(|back| (self.current + n - back) % n)
            .find_map(|idx| self.regions[idx].get(key))
    }

    fn remove(&mut self, key: &K) -> bool {
        let mut removed = false;
        for region in &mut self.regions {
            removed |= region.remove(key).is_some();
        }
        removed
    }

    fn len(&self) -> usize {
        self.regions.iter().map(HashMap::len).sum()
    }
}

/// Options for a single lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lookup {
    /// Search only the most recently filled region.
    pub recent_only: bool,
    /// Accept entries past their validity window.
    pub allow_stale: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub name: &'static str,
    pub entries: usize,
    pub regions: usize,
    pub validity: u64,
    pub hits: u64,
    pub misses: u64,
    pub sweeps: u64,
    pub predictive_hits: u64,
}

/// One independently locked cache pool.
#[derive(Debug)]
pub struct Pool<K, V> {
    name: &'static str,
    inner: RwLock<Regions<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    sweeps: AtomicU64,
    predictive_hits: AtomicU64,
}

impl<K, V> Pool<K, V>
where
    K: Hash + Eq + Copy + std::fmt::Debug,
    V: Clone,
{
    pub fn new(name: &'static str, regions: usize, validity: u64) -> Self {
        let regions = regions.clamp(1, config::MAX_CACHE_REGIONS);
        Self {
            name,
            inner: RwLock::new(Regions {
                regions: (0..regions).map(|_| HashMap::new()).collect(),
                current: 0,
                validity: validity.max(1),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sweeps: AtomicU64::new(0),
            predictive_hits: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn validity(&self) -> u64 {
        self.inner.read().validity
    }

    pub fn set_validity(&self, validity: u64) {
        self.inner.write().validity = validity.max(1);
    }

    /// Change the number of regions. Existing entries are dropped.
    pub fn set_regions(&self, regions: usize) {
        let regions = regions.clamp(1, config::MAX_CACHE_REGIONS);
        let mut inner = self.inner.write();
        if inner.regions.len() != regions {
            inner.regions = (0..regions).map(|_| HashMap::new()).collect();
            inner.current = 0;
        }
    }

    pub fn get(&self, key: &K, now: u64, lookup: Lookup) -> Option<V> {
        let inner = self.inner.read();
        let found = inner.find(key, lookup.recent_only).filter(|entry| {
            lookup.allow_stale || now.saturating_sub(entry.tick) < inner.validity
        });
        match found {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if entry.source == Source::Predictive {
                    self.predictive_hits.fetch_add(1, Ordering::Relaxed);
                }
                Some(entry.value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Fresh lookup that does not touch hit/miss counters.
    pub fn peek(&self, key: &K, now: u64) -> Option<V> {
        let inner = self.inner.read();
        inner
            .find(key, false)
            .filter(|entry| now.saturating_sub(entry.tick) < inner.validity)
            .map(|entry| entry.value.clone())
    }

    pub fn contains_fresh(&self, key: &K, now: u64) -> bool {
        let inner = self.inner.read();
        inner
            .find(key, false)
            .is_some_and(|entry| now.saturating_sub(entry.tick) < inner.validity)
    }

    pub fn put(&self, key: K, value: V, now: u64, source: Source) {
        let mut inner = self.inner.write();
        inner.remove(&key);
        let current = inner.current;
        inner.regions[current].insert(
            key,
            Entry {
                value,
                tick: now,
                source,
            },
        );
    }

    /// Drop `key` from every region. Returns whether anything was cached.
    pub fn invalidate(&self, key: &K) -> bool {
        let removed = self.inner.write().remove(key);
        if removed {
            trace!(pool = self.name, ?key, "invalidated");
        }
        removed
    }

    /// Advance to the next region, evicting what it held.
    pub fn age(&self) -> usize {
        let mut inner = self.inner.write();
        let n = inner.regions.len();
        inner.current = (inner.current + 1) % n;
        let current = inner.current;
        let evicted = inner.regions[current].len();
        inner.regions[current].clear();
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        trace!(pool = self.name, evicted, "aged");
        evicted
    }

    /// Age the pool if `now` falls on its sweep period.
    ///
    /// The period spreads one full rotation across the validity window.
    pub fn tick(&self, now: u64) -> bool {
        let period = {
            let inner = self.inner.read();
            inner.validity.div_ceil(inner.regions.len() as u64).max(1)
        };
        if now % period == 0 {
            self.age();
            true
        } else {
            false
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        for region in &mut inner.regions {
            region.clear();
        }
        inner.current = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.read();
        PoolStats {
            name: self.name,
            entries: inner.len(),
            regions: inner.regions.len(),
            validity: inner.validity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            predictive_hits: self.predictive_hits.load(Ordering::Relaxed),
        }
    }
}
