//! Zone snapshot types
//!
//! Logically derived views over the aggregator state; serialized as-is onto
//! the dashboard stream.

use rust_decimal::Decimal;
use serde::Serialize;

/// Strict price bounds of a zone: `min < price_level < max`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ZoneBoundaries {
    pub min: Decimal,
    pub max: Decimal,
}

/// Aggregated orderflow statistics for one (resolution, bucket) zone
#[derive(Debug, Clone, Serialize)]
pub struct ZoneSnapshot {
    pub zone_id: String,
    /// Zone center price
    pub price_level: Decimal,
    pub tick_size: Decimal,
    pub boundaries: ZoneBoundaries,
    /// Zone width in ticks
    #[serde(skip)]
    pub resolution: i64,
    #[serde(skip)]
    pub bucket: i64,
    #[serde(skip)]
    pub center_ticks: i64,

    pub aggressive_buy_volume: f64,
    pub aggressive_sell_volume: f64,
    /// Always exactly `aggressive_buy_volume + aggressive_sell_volume`
    pub aggressive_volume: f64,
    pub passive_bid_volume: f64,
    pub passive_ask_volume: f64,
    /// Always exactly `passive_bid_volume + passive_ask_volume`
    pub passive_volume: f64,

    pub trade_count: u64,
    /// Time between the oldest and newest retained trade
    pub timespan_ms: i64,
    pub volume_weighted_price: f64,
    pub last_update: i64,
}

impl ZoneSnapshot {
    /// Directional share of aggressive buys; 0.5 when the zone is empty
    pub fn buy_ratio(&self) -> f64 {
        if self.aggressive_volume > 0.0 {
            self.aggressive_buy_volume / self.aggressive_volume
        } else {
            0.5
        }
    }
}

/// Zone neighborhoods around the latest trade at all three resolutions
#[derive(Debug, Clone, Default, Serialize)]
pub struct StandardZoneData {
    #[serde(rename = "zones5Tick")]
    pub zones_5_tick: Vec<ZoneSnapshot>,
    #[serde(rename = "zones10Tick")]
    pub zones_10_tick: Vec<ZoneSnapshot>,
    #[serde(rename = "zones20Tick")]
    pub zones_20_tick: Vec<ZoneSnapshot>,
}

impl StandardZoneData {
    pub fn zones_for(&self, resolution: i64) -> &[ZoneSnapshot] {
        match resolution {
            5 => &self.zones_5_tick,
            10 => &self.zones_10_tick,
            20 => &self.zones_20_tick,
            _ => &[],
        }
    }

    /// The zone whose center is closest to `price_ticks` at a resolution
    pub fn nearest(&self, resolution: i64, price_ticks: i64) -> Option<&ZoneSnapshot> {
        self.zones_for(resolution)
            .iter()
            .min_by_key(|zone| (zone.center_ticks - price_ticks).abs())
    }

    pub fn all(&self) -> impl Iterator<Item = &ZoneSnapshot> {
        self.zones_5_tick
            .iter()
            .chain(self.zones_10_tick.iter())
            .chain(self.zones_20_tick.iter())
    }
}
