//! Orderflow preprocessing
//!
//! The single point where raw events become detector inputs. Each trade is
//! applied to the book, enriched with pre-consumption passive context and a
//! standardized zone snapshot, and emitted in strict event-time order.
//! While the pipeline is degraded (upstream silence) state keeps updating
//! but nothing is emitted; a fresh depth snapshot reconciles and clears the
//! condition.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::book::OrderBookState;
use crate::config::{PipelineConfig, ZoneConfig};
use crate::error::{EngineError, InputErrorKind, Result};
use crate::metrics::PipelineMetrics;
use crate::ticks::TickGrid;
use crate::types::{
    DepthDelta, DepthSnapshot, DepthUpdate, EnrichedTradeEvent, RawTrade,
};
use crate::zones::ZoneAggregator;

/// Cap on remembered trade ids when dedup is enabled
const TRADE_ID_MEMORY: usize = 65_536;

pub struct OrderFlowPreprocessor {
    grid: TickGrid,
    config: PipelineConfig,
    book: OrderBookState,
    zones: ZoneAggregator,
    metrics: Arc<PipelineMetrics>,
    degraded: Arc<AtomicBool>,
    last_emitted_time: i64,
    seen_trade_ids: HashSet<u64>,
    seen_order: VecDeque<u64>,
}

impl OrderFlowPreprocessor {
    pub fn new(
        grid: TickGrid,
        config: PipelineConfig,
        zone_config: ZoneConfig,
        book: OrderBookState,
        metrics: Arc<PipelineMetrics>,
        degraded: Arc<AtomicBool>,
    ) -> Self {
        let zones = ZoneAggregator::new(grid.clone(), zone_config);
        Self {
            grid,
            config,
            book,
            zones,
            metrics,
            degraded,
            last_emitted_time: 0,
            seen_trade_ids: HashSet::new(),
            seen_order: VecDeque::new(),
        }
    }

    pub fn book(&self) -> &OrderBookState {
        &self.book
    }

    pub fn book_mut(&mut self) -> &mut OrderBookState {
        &mut self.book
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn remember_trade_id(&mut self, trade_id: u64) -> bool {
        if !self.seen_trade_ids.insert(trade_id) {
            return false;
        }
        self.seen_order.push_back(trade_id);
        while self.seen_order.len() > TRADE_ID_MEMORY {
            if let Some(evicted) = self.seen_order.pop_front() {
                self.seen_trade_ids.remove(&evicted);
            }
        }
        true
    }

    /// Enrich one raw trade
    ///
    /// Returns `Ok(None)` for duplicates and for trades consumed while the
    /// pipeline is degraded; returns the class-1 error for malformed input,
    /// which never mutates state.
    pub fn handle_trade(&mut self, raw: &RawTrade) -> Result<Option<EnrichedTradeEvent>> {
        if !raw.quantity.is_finite() || raw.quantity <= 0.0 {
            let err = EngineError::MalformedInput {
                kind: InputErrorKind::BadQuantity,
                detail: format!("trade {} quantity {}", raw.trade_id, raw.quantity),
            };
            self.metrics.record_malformed(InputErrorKind::BadQuantity);
            return Err(err);
        }
        let price_ticks = match self.grid.to_ticks(raw.price) {
            Ok(ticks) => ticks,
            Err(err) => {
                self.metrics.record_malformed(InputErrorKind::OffGridPrice);
                return Err(err);
            }
        };

        if self.config.enable_trade_id_dedup && !self.remember_trade_id(raw.trade_id) {
            self.metrics.record_duplicate_trade();
            debug!(trade_id = raw.trade_id, "Duplicate trade id dropped");
            return Ok(None);
        }

        // Emitted events are strictly ordered by event time; a regressed
        // upstream timestamp is clamped forward, never reordered.
        let event_time = raw.event_time.max(self.last_emitted_time);

        // Passive context and the depth view are read before the trade's
        // own consumption mutates the book.
        let (passive_bid, passive_ask) = self.book.passive_at(price_ticks);
        let depth_snapshot = Arc::new(self.book.snapshot_near(
            price_ticks,
            self.config.depth_snapshot_half_width_ticks,
            event_time,
        ));

        self.book
            .apply_trade(price_ticks, raw.quantity, raw.buyer_is_maker, event_time);
        self.zones
            .on_trade(price_ticks, raw.quantity, !raw.buyer_is_maker, event_time);

        let zone_data = self.zones.standard_data(price_ticks, &self.book, event_time);
        let finest = self
            .zones
            .resolutions()
            .first()
            .copied()
            .unwrap_or(5);
        let (zone_bid, zone_ask) = zone_data
            .nearest(finest, price_ticks)
            .map(|zone| (zone.passive_bid_volume, zone.passive_ask_volume))
            .unwrap_or((0.0, 0.0));

        self.metrics.record_trade_ingested();
        self.last_emitted_time = event_time;

        if self.is_degraded() {
            debug!(trade_id = raw.trade_id, "Pipeline degraded; trade consumed without emission");
            return Ok(None);
        }

        let best_bid_ticks = self.book.best_bid_ticks();
        let best_ask_ticks = self.book.best_ask_ticks();
        Ok(Some(EnrichedTradeEvent {
            trade_id: raw.trade_id,
            event_time,
            price: self.grid.to_price(price_ticks),
            price_ticks,
            quantity: raw.quantity,
            buyer_is_maker: raw.buyer_is_maker,
            passive_bid_volume: passive_bid,
            passive_ask_volume: passive_ask,
            zone_passive_bid_volume: zone_bid,
            zone_passive_ask_volume: zone_ask,
            best_bid: self.book.best_bid(),
            best_ask: self.book.best_ask(),
            best_bid_ticks,
            best_ask_ticks,
            spread: self.book.spread(),
            mid_price: self.book.mid_price(),
            depth_snapshot,
            zone_data,
        }))
    }

    /// Apply a depth update to the book; malformed entries are dropped and
    /// counted inside the book
    pub fn handle_depth(&mut self, update: &DepthUpdate) -> Vec<DepthDelta> {
        self.metrics.record_depth_ingested();
        self.book.apply_depth(update)
    }

    /// Reconcile against a bootstrap snapshot and leave the degraded state
    pub fn handle_snapshot(&mut self, snapshot: &DepthSnapshot) -> Vec<DepthDelta> {
        let deltas = self.book.apply_snapshot(snapshot);
        if self.degraded.swap(false, Ordering::Relaxed) {
            tracing::info!("Fresh depth snapshot received; pipeline leaving degraded state");
        }
        deltas
    }

    /// Zone neighborhood passthrough for ad-hoc queries
    pub fn zones_near(&mut self, price_ticks: i64, half_width_ticks: i64, now: i64) -> usize {
        self.zones
            .zones_near(price_ticks, half_width_ticks, &self.book, now)
            .iter()
            .map(|zones| zones.len())
            .sum()
    }
}
