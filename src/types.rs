//! Core market event types
//!
//! Raw ingress events, the enriched trade the detectors consume, and the
//! immutable depth view lent to one trade's processing. Prices carry both
//! the boundary `Decimal` and the authoritative integer tick index.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::zones::StandardZoneData;

/// Taker side of a trade or direction of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Passive side of the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Bid,
    Ask,
}

/// Raw aggregated trade after wire parsing, before enrichment
///
/// `buyer_is_maker = true` means the taker was a seller (aggressive sell).
#[derive(Debug, Clone, PartialEq)]
pub struct RawTrade {
    pub trade_id: u64,
    pub event_time: i64,
    pub price: Decimal,
    pub quantity: f64,
    pub buyer_is_maker: bool,
}

impl RawTrade {
    /// Aggressor side implied by the maker flag
    pub fn aggressor(&self) -> Side {
        if self.buyer_is_maker {
            Side::Sell
        } else {
            Side::Buy
        }
    }
}

/// One absolute-quantity level inside a raw depth update
#[derive(Debug, Clone, PartialEq)]
pub struct DepthEntry {
    pub price: Decimal,
    pub quantity: f64,
}

/// Incremental depth update after wire parsing
///
/// Quantities are absolute; zero removes the level.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DepthUpdate {
    pub event_time: i64,
    pub bids: Vec<DepthEntry>,
    pub asks: Vec<DepthEntry>,
}

/// Full book snapshot delivered on connect/reconnect
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DepthSnapshot {
    pub event_time: i64,
    pub last_update_id: i64,
    pub bids: Vec<DepthEntry>,
    pub asks: Vec<DepthEntry>,
}

/// Per-price book change observed while applying a depth event
///
/// Feeds the book-watching detectors (spoofing wall tracking).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthDelta {
    pub time: i64,
    pub price_ticks: i64,
    pub side: BookSide,
    pub prev_qty: f64,
    pub new_qty: f64,
}

/// One level of an immutable depth view
#[derive(Debug, Clone, Serialize)]
pub struct DepthLevelView {
    pub price: Decimal,
    #[serde(skip)]
    pub price_ticks: i64,
    pub bid: f64,
    pub ask: f64,
}

/// Read-only window of book levels around a center price
///
/// Built by copying; consumers never hold references into the live book.
#[derive(Debug, Clone, Serialize)]
pub struct DepthView {
    pub captured_at: i64,
    #[serde(skip)]
    pub center_ticks: i64,
    pub levels: Vec<DepthLevelView>,
}

impl DepthView {
    /// Visible quantity on the given passive side at `ticks`, folding in
    /// neighbors within `tolerance_ticks`
    pub fn visible_near(&self, side: BookSide, ticks: i64, tolerance_ticks: i64) -> f64 {
        self.levels
            .iter()
            .filter(|level| (level.price_ticks - ticks).abs() <= tolerance_ticks)
            .map(|level| match side {
                BookSide::Bid => level.bid,
                BookSide::Ask => level.ask,
            })
            .sum()
    }

    pub fn age_ms(&self, now: i64) -> i64 {
        now - self.captured_at
    }
}

/// Raw trade enriched with book and zone context; the detector input
///
/// Ephemeral: built per trade, passed through the detector chain, not
/// retained. Passive volumes are read before the trade's own consumption
/// mutates the book.
#[derive(Debug, Clone)]
pub struct EnrichedTradeEvent {
    pub trade_id: u64,
    pub event_time: i64,
    pub price: Decimal,
    pub price_ticks: i64,
    pub quantity: f64,
    pub buyer_is_maker: bool,

    /// Passive quantities at the trade price, pre-consumption
    pub passive_bid_volume: f64,
    pub passive_ask_volume: f64,

    /// Passive quantities aggregated over the nearest zone of each resolution
    pub zone_passive_bid_volume: f64,
    pub zone_passive_ask_volume: f64,

    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub best_bid_ticks: Option<i64>,
    pub best_ask_ticks: Option<i64>,
    pub spread: Option<Decimal>,
    pub mid_price: Option<Decimal>,

    pub depth_snapshot: Arc<DepthView>,
    pub zone_data: StandardZoneData,
}

impl EnrichedTradeEvent {
    pub fn aggressor(&self) -> Side {
        if self.buyer_is_maker {
            Side::Sell
        } else {
            Side::Buy
        }
    }
}
