//! Order book state machine
//!
//! A `BTreeMap` keyed by integer tick index holds one `PassiveLevel` per
//! price. Depth deltas mutate quantities and feed the add/consume counters;
//! aggressive trades consume the opposite passive side. Bid/ask
//! disjointness is enforced as a single atomic step per price: writing one
//! side clears a stored opposite side so crossed exchange updates can never
//! persist.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::OrderBookConfig;
use crate::error::{EngineError, InputErrorKind, Result};
use crate::metrics::PipelineMetrics;
use crate::ticks::TickGrid;
use crate::types::{
    BookSide, DepthDelta, DepthEntry, DepthLevelView, DepthSnapshot, DepthUpdate, DepthView,
};

/// One stored price level with its passive history counters
///
/// Counters accumulate over the level's retention lifetime; the level is
/// retired once both sides are zero and `last_update` ages past the
/// configured bound.
#[derive(Debug, Clone, Default)]
pub struct PassiveLevel {
    pub bid: f64,
    pub ask: f64,
    pub added_bid: f64,
    pub consumed_bid: f64,
    pub added_ask: f64,
    pub consumed_ask: f64,
    pub last_update: i64,
}

impl PassiveLevel {
    fn is_empty(&self) -> bool {
        self.bid == 0.0 && self.ask == 0.0
    }
}

pub struct OrderBookState {
    grid: TickGrid,
    config: OrderBookConfig,
    levels: BTreeMap<i64, PassiveLevel>,
    updates_since_prune: u64,
    metrics: Arc<PipelineMetrics>,
}

impl OrderBookState {
    pub fn new(grid: TickGrid, config: OrderBookConfig, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            grid,
            config,
            levels: BTreeMap::new(),
            updates_since_prune: 0,
            metrics,
        }
    }

    pub fn grid(&self) -> &TickGrid {
        &self.grid
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Apply an incremental depth update
    ///
    /// Invalid entries (NaN/negative quantity, off-grid price) are counted
    /// and skipped without mutating state. Returns the per-price changes
    /// actually applied, for the book-watching detectors.
    pub fn apply_depth(&mut self, update: &DepthUpdate) -> Vec<DepthDelta> {
        let mut deltas = Vec::with_capacity(update.bids.len() + update.asks.len());

        for entry in &update.bids {
            self.apply_entry(entry, BookSide::Bid, update.event_time, &mut deltas);
        }
        for entry in &update.asks {
            self.apply_entry(entry, BookSide::Ask, update.event_time, &mut deltas);
        }

        self.updates_since_prune += 1;
        if self.updates_since_prune % self.config.prune_interval_updates == 0 {
            self.prune(update.event_time);
        }

        deltas
    }

    /// Reconcile against a full snapshot (connect/reconnect bootstrap)
    ///
    /// Diffs against stored state so that a snapshot equal to the current
    /// book touches nothing but `last_update`. Levels absent from the
    /// snapshot are zeroed without counter attribution: reconciliation is
    /// not flow.
    pub fn apply_snapshot(&mut self, snapshot: &DepthSnapshot) -> Vec<DepthDelta> {
        let mut deltas = Vec::new();
        let mut seen = Vec::with_capacity(snapshot.bids.len() + snapshot.asks.len());

        for entry in &snapshot.bids {
            if let Some(ticks) =
                self.apply_entry(entry, BookSide::Bid, snapshot.event_time, &mut deltas)
            {
                seen.push(ticks);
            }
        }
        for entry in &snapshot.asks {
            if let Some(ticks) =
                self.apply_entry(entry, BookSide::Ask, snapshot.event_time, &mut deltas)
            {
                seen.push(ticks);
            }
        }

        seen.sort_unstable();
        let stale: Vec<i64> = self
            .levels
            .iter()
            .filter(|(ticks, level)| !level.is_empty() && seen.binary_search(ticks).is_err())
            .map(|(ticks, _)| *ticks)
            .collect();
        for ticks in stale {
            if let Some(level) = self.levels.get_mut(&ticks) {
                level.bid = 0.0;
                level.ask = 0.0;
                level.last_update = snapshot.event_time;
            }
        }

        deltas
    }

    fn apply_entry(
        &mut self,
        entry: &DepthEntry,
        side: BookSide,
        time: i64,
        deltas: &mut Vec<DepthDelta>,
    ) -> Option<i64> {
        let ticks = match self.validate_entry(entry) {
            Ok(ticks) => ticks,
            Err(err) => {
                if let EngineError::MalformedInput { kind, ref detail } = err {
                    self.metrics.record_malformed(kind);
                    debug!(detail = %detail, "Dropping malformed depth entry");
                }
                return None;
            }
        };

        // A removal for a level we never stored needs no entry.
        if entry.quantity == 0.0 && !self.levels.contains_key(&ticks) {
            return Some(ticks);
        }

        let level = self.levels.entry(ticks).or_default();
        let prev = match side {
            BookSide::Bid => level.bid,
            BookSide::Ask => level.ask,
        };
        let qty = entry.quantity;

        if qty > prev {
            match side {
                BookSide::Bid => level.added_bid += qty - prev,
                BookSide::Ask => level.added_ask += qty - prev,
            }
        } else if qty < prev {
            match side {
                BookSide::Bid => level.consumed_bid += prev - qty,
                BookSide::Ask => level.consumed_ask += prev - qty,
            }
        }

        match side {
            BookSide::Bid => level.bid = qty,
            BookSide::Ask => level.ask = qty,
        }
        level.last_update = time;

        if qty != prev {
            deltas.push(DepthDelta {
                time,
                price_ticks: ticks,
                side,
                prev_qty: prev,
                new_qty: qty,
            });
        }

        // Disjointness: a nonzero write clears any stored opposite side in
        // the same step, so crossed exchange updates cannot persist.
        if qty > 0.0 {
            let opposite_prev = match side {
                BookSide::Bid => level.ask,
                BookSide::Ask => level.bid,
            };
            if opposite_prev > 0.0 {
                match side {
                    BookSide::Bid => level.ask = 0.0,
                    BookSide::Ask => level.bid = 0.0,
                }
                self.metrics.record_crossed_level_cleared();
                deltas.push(DepthDelta {
                    time,
                    price_ticks: ticks,
                    side: match side {
                        BookSide::Bid => BookSide::Ask,
                        BookSide::Ask => BookSide::Bid,
                    },
                    prev_qty: opposite_prev,
                    new_qty: 0.0,
                });
            }
        }

        Some(ticks)
    }

    fn validate_entry(&self, entry: &DepthEntry) -> Result<i64> {
        if !entry.quantity.is_finite() || entry.quantity < 0.0 {
            return Err(EngineError::MalformedInput {
                kind: InputErrorKind::BadQuantity,
                detail: format!("depth quantity {} at {}", entry.quantity, entry.price),
            });
        }
        self.grid.to_ticks(entry.price)
    }

    /// Apply an aggressive trade as consumption of the opposite passive side
    ///
    /// The consumed counter records the full executed quantity; when the
    /// visible level is smaller (or absent) the difference is a synthetic
    /// consumption against a zero level, which is what the hidden-order
    /// detector reads.
    pub fn apply_trade(&mut self, price_ticks: i64, quantity: f64, buyer_is_maker: bool, time: i64) {
        let level = self.levels.entry(price_ticks).or_default();
        if buyer_is_maker {
            // Aggressive sell consumes the bid.
            level.consumed_bid += quantity;
            level.bid = (level.bid - quantity).max(0.0);
        } else {
            level.consumed_ask += quantity;
            level.ask = (level.ask - quantity).max(0.0);
        }
        level.last_update = time;
    }

    /// Passive quantities currently stored at a price
    pub fn passive_at(&self, price_ticks: i64) -> (f64, f64) {
        self.levels
            .get(&price_ticks)
            .map(|level| (level.bid, level.ask))
            .unwrap_or((0.0, 0.0))
    }

    pub fn level(&self, price_ticks: i64) -> Option<&PassiveLevel> {
        self.levels.get(&price_ticks)
    }

    pub fn best_bid_ticks(&self) -> Option<i64> {
        self.levels
            .iter()
            .rev()
            .find(|(_, level)| level.bid > 0.0)
            .map(|(ticks, _)| *ticks)
    }

    pub fn best_ask_ticks(&self) -> Option<i64> {
        self.levels
            .iter()
            .find(|(_, level)| level.ask > 0.0)
            .map(|(ticks, _)| *ticks)
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.best_bid_ticks().map(|t| self.grid.to_price(t))
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.best_ask_ticks().map(|t| self.grid.to_price(t))
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => {
                Some(((bid + ask) / Decimal::TWO).round_dp(self.grid.price_precision() + 1))
            }
            _ => None,
        }
    }

    /// Immutable copy of levels within `half_width_ticks` of `center_ticks`
    pub fn snapshot_near(&self, center_ticks: i64, half_width_ticks: i64, now: i64) -> DepthView {
        let min = center_ticks - half_width_ticks;
        let max = center_ticks + half_width_ticks;
        let levels = self
            .levels
            .range(min..=max)
            .filter(|(_, level)| !level.is_empty())
            .map(|(ticks, level)| DepthLevelView {
                price: self.grid.to_price(*ticks),
                price_ticks: *ticks,
                bid: level.bid,
                ask: level.ask,
            })
            .collect();
        DepthView {
            captured_at: now,
            center_ticks,
            levels,
        }
    }

    /// Sum of passive bid/ask quantities over `[min_ticks, max_ticks)`
    pub fn sum_range(&self, min_ticks: i64, max_ticks: i64) -> (f64, f64) {
        let mut bid = 0.0;
        let mut ask = 0.0;
        for (_, level) in self.levels.range(min_ticks..max_ticks) {
            bid += level.bid;
            ask += level.ask;
        }
        (bid, ask)
    }

    /// Remove retired and far-from-mid levels
    ///
    /// Idempotent; runs inline on every N-th update.
    pub fn prune(&mut self, now: i64) {
        let mid = match (self.best_bid_ticks(), self.best_ask_ticks()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2),
            _ => None,
        };
        let max_age = self.config.max_age_ms;
        let max_distance = self.config.max_distance_ticks;
        let before = self.levels.len();

        self.levels.retain(|ticks, level| {
            if level.is_empty() && now - level.last_update > max_age {
                return false;
            }
            if let Some(mid) = mid {
                if (*ticks - mid).abs() > max_distance {
                    return false;
                }
            }
            true
        });

        let pruned = before - self.levels.len();
        if pruned > 0 {
            self.metrics.record_levels_pruned(pruned as u64);
            debug!(pruned, remaining = self.levels.len(), "Pruned book levels");
        }
    }

    /// Verify bid/ask disjointness; restores by evicting the offender
    ///
    /// A violation is a class-3 error: it should be unreachable given the
    /// atomic clear in `apply_entry`, so any hit is logged with context and
    /// the level is dropped to restore the invariant.
    pub fn check_disjointness(&mut self) -> Result<()> {
        let offender = self
            .levels
            .iter()
            .find(|(_, level)| level.bid > 0.0 && level.ask > 0.0)
            .map(|(ticks, level)| (*ticks, level.bid, level.ask));
        if let Some((ticks, bid, ask)) = offender {
            self.metrics.record_invariant_violation();
            warn!(
                price = %self.grid.to_price(ticks),
                bid,
                ask,
                "Bid/ask disjointness violated; evicting level"
            );
            self.levels.remove(&ticks);
            return Err(EngineError::InvariantViolation(format!(
                "both sides nonzero at {} (bid {bid}, ask {ask})",
                self.grid.to_price(ticks)
            )));
        }
        Ok(())
    }
}
