//! Bounded in-memory view over the on-disk day series.
//!
//! Two LRU maps share one mutex: day series by date (capacity `S`) and
//! aggregate results (capacity `S * 100`). A series marked modified is
//! written back when it is evicted; if that write fails the series stays
//! cached so nothing is lost, and the cache runs over capacity until a
//! later eviction succeeds.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::Mutex;
use ss_core::AggregateKind;
use ss_runtime::MetricsRegistry;
use ss_series::{DaySeries, SeriesError, SeriesFileStore};
use tracing::{debug, error};

/// Aggregates grow with the series cache by this factor.
const AGGREGATES_PER_SERIES: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregateKey {
    pub kind: AggregateKind,
    pub product: String,
    pub days: i32,
}

/// Recency-ordered map. `tick` only grows; the smallest live tick is the
/// least recently used entry.
struct Lru<K, V> {
    entries: HashMap<K, (V, u64)>,
    order: BTreeMap<u64, K>,
    tick: u64,
}

impl<K: Clone + Eq + Hash, V> Lru<K, V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            tick: 0,
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn get(&mut self, key: &K) -> Option<&V> {
        let tick = self.next_tick();
        let (_, used) = self.entries.get_mut(key)?;
        self.order.remove(&*used);
        *used = tick;
        self.order.insert(tick, key.clone());
        self.entries.get(key).map(|(value, _)| value)
    }

    fn insert(&mut self, key: K, value: V) {
        let tick = self.next_tick();
        if let Some((_, used)) = self.entries.insert(key.clone(), (value, tick)) {
            self.order.remove(&used);
        }
        self.order.insert(tick, key);
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let (value, used) = self.entries.remove(key)?;
        self.order.remove(&used);
        Some(value)
    }

    fn oldest(&self) -> Option<(&K, &V)> {
        let (_, key) = self.order.first_key_value()?;
        self.entries.get(key).map(|(value, _)| (key, value))
    }

    fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(key, (value, _))| (key, value))
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

struct Inner {
    series: Lru<NaiveDate, Arc<DaySeries>>,
    dirty: HashSet<NaiveDate>,
    aggregates: Lru<AggregateKey, f64>,
}

pub struct SeriesCache {
    store: SeriesFileStore,
    capacity: usize,
    inner: Mutex<Inner>,
    metrics: MetricsRegistry,
}

impl SeriesCache {
    pub fn new(store: SeriesFileStore, capacity: usize, metrics: MetricsRegistry) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                series: Lru::new(),
                dirty: HashSet::new(),
                aggregates: Lru::new(),
            }),
            metrics,
        }
    }

    pub fn store(&self) -> &SeriesFileStore {
        &self.store
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dirty(&self, date: NaiveDate) -> bool {
        self.inner.lock().dirty.contains(&date)
    }

    /// The series for `date`, loading it from disk on a miss.
    pub fn get(&self, date: NaiveDate) -> Result<Option<Arc<DaySeries>>, SeriesError> {
        let mut inner = self.inner.lock();
        if let Some(series) = inner.series.get(&date) {
            return Ok(Some(Arc::clone(series)));
        }

        let Some(series) = self.store.load(date)?.map(Arc::new) else {
            return Ok(None);
        };
        inner.series.insert(date, Arc::clone(&series));
        self.evict(&mut inner);
        Ok(Some(series))
    }

    /// Persists `series` right away and caches it as clean.
    pub fn put(&self, series: Arc<DaySeries>) -> Result<(), SeriesError> {
        let date = series.date();
        let mut inner = self.inner.lock();
        self.store.save(&series, date)?;
        inner.dirty.remove(&date);
        inner.series.insert(date, series);
        self.evict(&mut inner);
        Ok(())
    }

    /// Flags `series` as changed since its last save and makes it the most
    /// recently used entry, re-inserting it if it had been evicted.
    pub fn mark_modified(&self, series: &Arc<DaySeries>) {
        let date = series.date();
        let mut inner = self.inner.lock();
        inner.dirty.insert(date);
        let cached = inner
            .series
            .get(&date)
            .is_some_and(|current| Arc::ptr_eq(current, series));
        if !cached {
            inner.series.insert(date, Arc::clone(series));
            self.evict(&mut inner);
        }
    }

    pub fn aggregate(&self, key: &AggregateKey) -> Option<f64> {
        let hit = self.inner.lock().aggregates.get(key).copied();
        if hit.is_some() {
            self.metrics.inc_aggregate_cache_hits(1);
        } else {
            self.metrics.inc_aggregate_cache_misses(1);
        }
        hit
    }

    pub fn put_aggregate(&self, key: AggregateKey, value: f64) {
        let limit = self.capacity * AGGREGATES_PER_SERIES;
        let mut inner = self.inner.lock();
        inner.aggregates.insert(key, value);
        while inner.aggregates.len() > limit {
            let Some(oldest) = inner.aggregates.oldest().map(|(k, _)| k.clone()) else {
                break;
            };
            inner.aggregates.remove(&oldest);
        }
    }

    pub fn clear_aggregates(&self) {
        self.inner.lock().aggregates.clear();
    }

    /// Writes every modified series back to disk. Stops at the first
    /// failure; series not yet written stay marked.
    pub fn flush(&self) -> Result<usize, SeriesError> {
        let mut inner = self.inner.lock();
        let pending: Vec<(NaiveDate, Arc<DaySeries>)> = inner
            .series
            .iter()
            .filter(|(date, _)| inner.dirty.contains(*date))
            .map(|(date, series)| (*date, Arc::clone(series)))
            .collect();

        let mut written = 0;
        for (date, series) in pending {
            self.store.save(&series, date)?;
            inner.dirty.remove(&date);
            written += 1;
        }
        debug!(written, "series cache flushed");
        Ok(written)
    }

    fn evict(&self, inner: &mut Inner) {
        while inner.series.len() > self.capacity {
            let Some((date, series)) = inner
                .series
                .oldest()
                .map(|(date, series)| (*date, Arc::clone(series)))
            else {
                break;
            };

            if inner.dirty.contains(&date) {
                if let Err(err) = self.store.save(&series, date) {
                    error!(%date, error = %err, "write-back failed; keeping series cached");
                    break;
                }
                inner.dirty.remove(&date);
            }
            inner.series.remove(&date);
            debug!(%date, "series evicted");
        }
    }
}
