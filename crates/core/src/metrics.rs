// crates/core/src/metrics.rs
//! Per-forest metrics registry.
//!
//! - Counters and histograms are registered on first use under a static key;
//!   increments and observations after that are atomic, so read-only paths
//!   (delta computation takes `&Forest`) can record too.
//! - Histograms count small sizes (entries per delta) into fixed buckets and
//!   report p50/p95 as bucket upper bounds.
//! - `snapshot_csv` emits a header and one row with keys sorted, so the
//!   column order is stable.
//!
//! Each `Forest` owns its own registry; nothing here is process-wide.

use std::collections::BTreeMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, PoisonError, RwLock,
};

pub const ADDS_TOTAL: &str = "adds_total";
pub const REMOVES_TOTAL: &str = "removes_total";
pub const REMOVALS_EVICTED: &str = "removals_evicted";
pub const GENERATIONS_ADVANCED: &str = "generations_advanced";
pub const DELTAS_CURRENT: &str = "deltas_current";
pub const DELTAS_INCREMENTAL: &str = "deltas_incremental";
pub const DELTAS_SNAPSHOT: &str = "deltas_snapshot";
pub const DELTA_ENTRIES: &str = "delta_entries";

/// Histogram bucket upper bounds; the last bucket is +Inf (implicit).
const SIZE_BUCKETS: &[u64] = &[0, 1, 2, 5, 10, 20, 50, 100, 200, 500, 1_000, 10_000];

fn bucket_index(n: u64) -> usize {
    match SIZE_BUCKETS.binary_search(&n) {
        Ok(idx) => idx,
        Err(pos) => pos,
    }
}

struct Histo {
    buckets: Vec<AtomicU64>,
    sum: AtomicU64,
    max: AtomicU64,
}

impl Histo {
    fn new() -> Self {
        Self {
            buckets: (0..=SIZE_BUCKETS.len()).map(|_| AtomicU64::new(0)).collect(),
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    fn observe(&self, n: u64) {
        let idx = bucket_index(n).min(self.buckets.len() - 1);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(n, Ordering::Relaxed);
        self.max.fetch_max(n, Ordering::Relaxed);
    }

    fn reset(&self) {
        for b in &self.buckets {
            b.store(0, Ordering::Relaxed);
        }
        self.sum.store(0, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
    }

    /// (count, sum, p50, p95, max)
    fn snapshot(&self) -> (u64, u64, u64, u64, u64) {
        let counts: Vec<u64> = self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect();
        (
            counts.iter().sum(),
            self.sum.load(Ordering::Relaxed),
            quantile(&counts, 0.50),
            quantile(&counts, 0.95),
            self.max.load(Ordering::Relaxed),
        )
    }
}

/// Upper-bound quantile: the bucket bound holding the q-th observation.
fn quantile(bucket_counts: &[u64], q: f64) -> u64 {
    let total: u64 = bucket_counts.iter().sum();
    if total == 0 {
        return 0;
    }
    let target = ((q * total as f64).ceil() as u64).max(1);
    let mut acc = 0u64;
    for (i, c) in bucket_counts.iter().enumerate() {
        acc += c;
        if acc >= target {
            return SIZE_BUCKETS.get(i).copied().unwrap_or(u64::MAX);
        }
    }
    u64::MAX
}

#[derive(Default)]
pub struct Metrics {
    counters: RwLock<BTreeMap<&'static str, Arc<AtomicU64>>>,
    histos: RwLock<BTreeMap<&'static str, Arc<Histo>>>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, key: &'static str, by: u64) {
        // Read guard must drop before the write path takes the lock.
        let existing = {
            let r = self.counters.read().unwrap_or_else(PoisonError::into_inner);
            r.get(key).cloned()
        };
        let cell = match existing {
            Some(c) => c,
            None => {
                let mut w = self.counters.write().unwrap_or_else(PoisonError::into_inner);
                w.entry(key).or_insert_with(|| Arc::new(AtomicU64::new(0))).clone()
            }
        };
        cell.fetch_add(by, Ordering::Relaxed);
    }

    pub fn observe(&self, key: &'static str, n: u64) {
        let existing = {
            let r = self.histos.read().unwrap_or_else(PoisonError::into_inner);
            r.get(key).cloned()
        };
        let h = match existing {
            Some(h) => h,
            None => {
                let mut w = self.histos.write().unwrap_or_else(PoisonError::into_inner);
                w.entry(key).or_insert_with(|| Arc::new(Histo::new())).clone()
            }
        };
        h.observe(n);
    }

    /// Current value of a counter; 0 if never touched.
    pub fn counter(&self, key: &str) -> u64 {
        let r = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        r.get(key).map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Zero everything, keeping keys registered.
    pub fn reset(&self) {
        for c in self.counters.read().unwrap_or_else(PoisonError::into_inner).values() {
            c.store(0, Ordering::Relaxed);
        }
        for h in self.histos.read().unwrap_or_else(PoisonError::into_inner).values() {
            h.reset();
        }
    }

    /// Header line plus one row. Counters are plain columns; each histogram
    /// expands to `<key>_count,<key>_sum,<key>_p50,<key>_p95,<key>_max`.
    pub fn snapshot_csv(&self) -> String {
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        let histos = self.histos.read().unwrap_or_else(PoisonError::into_inner);

        let mut header: Vec<String> = Vec::new();
        let mut row: Vec<String> = Vec::new();
        for (k, v) in counters.iter() {
            header.push((*k).to_string());
            row.push(v.load(Ordering::Relaxed).to_string());
        }
        for (k, h) in histos.iter() {
            let (cnt, sum, p50, p95, max) = h.snapshot();
            for (suffix, val) in [("count", cnt), ("sum", sum), ("p50", p50), ("p95", p95), ("max", max)] {
                header.push(format!("{k}_{suffix}"));
                row.push(val.to_string());
            }
        }

        let mut out = header.join(",");
        out.push('\n');
        out.push_str(&row.join(","));
        out
    }
}
