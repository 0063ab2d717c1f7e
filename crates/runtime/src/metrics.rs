use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Clone, Default)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    events_appended: AtomicU64,
    days_closed: AtomicU64,
    aggregate_cache_hits: AtomicU64,
    aggregate_cache_misses: AtomicU64,
    connections_peak: AtomicU64,
}

impl MetricsRegistry {
    pub fn inc_frames_received(&self, delta: u64) {
        self.inner.frames_received.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_frames_sent(&self, delta: u64) {
        self.inner.frames_sent.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_events_appended(&self, delta: u64) {
        self.inner.events_appended.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_days_closed(&self, delta: u64) {
        self.inner.days_closed.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_aggregate_cache_hits(&self, delta: u64) {
        self.inner.aggregate_cache_hits.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_aggregate_cache_misses(&self, delta: u64) {
        self.inner
            .aggregate_cache_misses
            .fetch_add(delta, Ordering::Relaxed);
    }

    pub fn record_connections(&self, active: u64) {
        self.inner.connections_peak.fetch_max(active, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.inner.frames_received.load(Ordering::Relaxed),
            frames_sent: self.inner.frames_sent.load(Ordering::Relaxed),
            events_appended: self.inner.events_appended.load(Ordering::Relaxed),
            days_closed: self.inner.days_closed.load(Ordering::Relaxed),
            aggregate_cache_hits: self.inner.aggregate_cache_hits.load(Ordering::Relaxed),
            aggregate_cache_misses: self.inner.aggregate_cache_misses.load(Ordering::Relaxed),
            connections_peak: self.inner.connections_peak.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub frames_sent: u64,
    pub events_appended: u64,
    pub days_closed: u64,
    pub aggregate_cache_hits: u64,
    pub aggregate_cache_misses: u64,
    pub connections_peak: u64,
}

impl MetricsSnapshot {
    pub fn to_json_line(&self, label: &str, elapsed: Option<Duration>) -> String {
        #[derive(Serialize)]
        struct Line<'a> {
            label: &'a str,
            #[serde(flatten)]
            counters: &'a MetricsSnapshot,
            elapsed_ms: Option<u128>,
        }

        let line = Line {
            label,
            counters: self,
            elapsed_ms: elapsed.map(|d| d.as_millis()),
        };
        serde_json::to_string(&line).unwrap_or_else(|_| String::from("{}"))
    }
}

pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
