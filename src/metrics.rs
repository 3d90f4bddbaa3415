//! Pipeline metrics counters
//!
//! Process-wide state is confined to configuration and these counters.
//! All counters are monotonic and lock-free; a snapshot feeds the periodic
//! `stats` egress message.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::InputErrorKind;

/// Monotonic counters shared across pipeline stages
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    // Malformed-input drops, per category
    unparseable: AtomicU64,
    bad_quantity: AtomicU64,
    off_grid_price: AtomicU64,
    bad_timestamp: AtomicU64,

    // Ingress queue
    depth_dropped: AtomicU64,
    trades_ingested: AtomicU64,
    depth_ingested: AtomicU64,
    duplicate_trades: AtomicU64,

    // Book
    crossed_levels_cleared: AtomicU64,
    levels_pruned: AtomicU64,

    // Detectors / coordinator
    detector_failures: AtomicU64,
    candidates_offered: AtomicU64,
    candidates_deduplicated: AtomicU64,
    signals_emitted: AtomicU64,
    signals_suppressed_cooldown: AtomicU64,

    // Invariants
    invariant_violations: AtomicU64,

    // Egress
    egress_rate_limited: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_malformed(&self, kind: InputErrorKind) {
        let counter = match kind {
            InputErrorKind::Unparseable => &self.unparseable,
            InputErrorKind::BadQuantity => &self.bad_quantity,
            InputErrorKind::OffGridPrice => &self.off_grid_price,
            InputErrorKind::BadTimestamp => &self.bad_timestamp,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_depth_drop(&self) {
        self.depth_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trade_ingested(&self) {
        self.trades_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_depth_ingested(&self) {
        self.depth_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_trade(&self) {
        self.duplicate_trades.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_crossed_level_cleared(&self) {
        self.crossed_levels_cleared.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_levels_pruned(&self, count: u64) {
        self.levels_pruned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_detector_failure(&self) {
        self.detector_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_candidate_offered(&self) {
        self.candidates_offered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_candidate_deduplicated(&self) {
        self.candidates_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signal_emitted(&self) {
        self.signals_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signal_suppressed(&self) {
        self.signals_suppressed_cooldown.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invariant_violation(&self) {
        self.invariant_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_egress_rate_limited(&self) {
        self.egress_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn candidates_offered(&self) -> u64 {
        self.candidates_offered.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            malformed_unparseable: self.unparseable.load(Ordering::Relaxed),
            malformed_bad_quantity: self.bad_quantity.load(Ordering::Relaxed),
            malformed_off_grid_price: self.off_grid_price.load(Ordering::Relaxed),
            malformed_bad_timestamp: self.bad_timestamp.load(Ordering::Relaxed),
            depth_dropped: self.depth_dropped.load(Ordering::Relaxed),
            trades_ingested: self.trades_ingested.load(Ordering::Relaxed),
            depth_ingested: self.depth_ingested.load(Ordering::Relaxed),
            duplicate_trades: self.duplicate_trades.load(Ordering::Relaxed),
            crossed_levels_cleared: self.crossed_levels_cleared.load(Ordering::Relaxed),
            levels_pruned: self.levels_pruned.load(Ordering::Relaxed),
            detector_failures: self.detector_failures.load(Ordering::Relaxed),
            candidates_offered: self.candidates_offered.load(Ordering::Relaxed),
            candidates_deduplicated: self.candidates_deduplicated.load(Ordering::Relaxed),
            signals_emitted: self.signals_emitted.load(Ordering::Relaxed),
            signals_suppressed_cooldown: self.signals_suppressed_cooldown.load(Ordering::Relaxed),
            invariant_violations: self.invariant_violations.load(Ordering::Relaxed),
            egress_rate_limited: self.egress_rate_limited.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of all counters, serialized into the `stats` message
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub malformed_unparseable: u64,
    pub malformed_bad_quantity: u64,
    pub malformed_off_grid_price: u64,
    pub malformed_bad_timestamp: u64,
    pub depth_dropped: u64,
    pub trades_ingested: u64,
    pub depth_ingested: u64,
    pub duplicate_trades: u64,
    pub crossed_levels_cleared: u64,
    pub levels_pruned: u64,
    pub detector_failures: u64,
    pub candidates_offered: u64,
    pub candidates_deduplicated: u64,
    pub signals_emitted: u64,
    pub signals_suppressed_cooldown: u64,
    pub invariant_violations: u64,
    pub egress_rate_limited: u64,
}
