//! Rolling zone aggregation
//!
//! For each resolution R, trades land in bucket ⌊price_ticks / R⌋. Each
//! bucket keeps a deque of per-trade records so window eviction is
//! amortized O(1); running sums are maintained alongside. Passive bid/ask
//! volumes are read from the live book at snapshot time, never stored.

use std::collections::{HashMap, VecDeque};

use crate::book::OrderBookState;
use crate::config::ZoneConfig;
use crate::ticks::TickGrid;
use crate::zones::{StandardZoneData, ZoneBoundaries, ZoneSnapshot};

#[derive(Debug, Clone, Copy)]
struct TradeRecord {
    time: i64,
    quantity: f64,
    price_ticks: i64,
    is_buy: bool,
}

#[derive(Debug, Default)]
struct ZoneState {
    records: VecDeque<TradeRecord>,
    aggressive_buy: f64,
    aggressive_sell: f64,
    /// Σ price·qty over retained records, for the VWAP
    weighted_price: f64,
    last_update: i64,
}

impl ZoneState {
    fn push(&mut self, record: TradeRecord, tick_size: f64) {
        if record.is_buy {
            self.aggressive_buy += record.quantity;
        } else {
            self.aggressive_sell += record.quantity;
        }
        self.weighted_price += record.price_ticks as f64 * tick_size * record.quantity;
        self.last_update = record.time;
        self.records.push_back(record);
    }

    fn evict_before(&mut self, cutoff: i64, tick_size: f64) {
        while let Some(front) = self.records.front() {
            if front.time >= cutoff {
                break;
            }
            let record = self.records.pop_front().expect("front checked");
            if record.is_buy {
                self.aggressive_buy = (self.aggressive_buy - record.quantity).max(0.0);
            } else {
                self.aggressive_sell = (self.aggressive_sell - record.quantity).max(0.0);
            }
            self.weighted_price -= record.price_ticks as f64 * tick_size * record.quantity;
        }
        if self.records.is_empty() {
            self.aggressive_buy = 0.0;
            self.aggressive_sell = 0.0;
            self.weighted_price = 0.0;
        }
    }

    fn timespan_ms(&self) -> i64 {
        match (self.records.front(), self.records.back()) {
            (Some(first), Some(last)) => last.time - first.time,
            _ => 0,
        }
    }
}

pub struct ZoneAggregator {
    grid: TickGrid,
    config: ZoneConfig,
    /// One bucket map per configured resolution, same order as the config
    maps: Vec<HashMap<i64, ZoneState>>,
}

impl ZoneAggregator {
    pub fn new(grid: TickGrid, config: ZoneConfig) -> Self {
        let maps = config.resolutions.iter().map(|_| HashMap::new()).collect();
        Self { grid, config, maps }
    }

    pub fn resolutions(&self) -> &[i64] {
        &self.config.resolutions
    }

    /// Record an aggressive trade in its bucket at every resolution
    pub fn on_trade(&mut self, price_ticks: i64, quantity: f64, is_buy: bool, time: i64) {
        let tick_size = self.grid.tick_size_f64();
        let cutoff = time - self.config.zone_time_window_ms;
        let record = TradeRecord {
            time,
            quantity,
            price_ticks,
            is_buy,
        };
        for (idx, resolution) in self.config.resolutions.iter().enumerate() {
            let bucket = self.grid.bucket(price_ticks, *resolution);
            let state = self.maps[idx].entry(bucket).or_default();
            state.evict_before(cutoff, tick_size);
            state.push(record, tick_size);
        }
    }

    /// Drop zones idle past the window; idempotent
    pub fn sweep(&mut self, now: i64) {
        let cutoff = now - self.config.zone_time_window_ms;
        for map in &mut self.maps {
            map.retain(|_, state| state.last_update >= cutoff);
        }
    }

    /// Zones whose center lies within `half_width_ticks` of `price_ticks`,
    /// per resolution, windows evicted as of `now`
    ///
    /// Zones whose `last_update` is older than the window never appear.
    pub fn zones_near(
        &mut self,
        price_ticks: i64,
        half_width_ticks: i64,
        book: &OrderBookState,
        now: i64,
    ) -> Vec<Vec<ZoneSnapshot>> {
        let tick_size = self.grid.tick_size_f64();
        let cutoff = now - self.config.zone_time_window_ms;
        let resolutions = self.config.resolutions.clone();
        let mut result = Vec::with_capacity(resolutions.len());

        for (idx, resolution) in resolutions.iter().enumerate() {
            let min_bucket = self.grid.bucket(price_ticks - half_width_ticks, *resolution);
            let max_bucket = self.grid.bucket(price_ticks + half_width_ticks, *resolution);
            let mut snapshots = Vec::new();

            for bucket in min_bucket..=max_bucket {
                let Some(state) = self.maps[idx].get_mut(&bucket) else {
                    continue;
                };
                state.evict_before(cutoff, tick_size);
                if state.records.is_empty() || state.last_update < cutoff {
                    continue;
                }
                let center_ticks = self.grid.bucket_min_ticks(bucket, *resolution)
                    + resolution / 2;
                if (center_ticks - price_ticks).abs() > half_width_ticks {
                    continue;
                }
                snapshots.push(build_snapshot(
                    &self.grid,
                    *resolution,
                    bucket,
                    state,
                    book,
                ));
            }

            snapshots.sort_by_key(|zone| zone.center_ticks);
            result.push(snapshots);
        }

        result
    }

    /// Standard three-resolution neighborhood for the enrichment stage
    pub fn standard_data(
        &mut self,
        price_ticks: i64,
        book: &OrderBookState,
        now: i64,
    ) -> StandardZoneData {
        let mut per_resolution =
            self.zones_near(price_ticks, self.config.half_width_ticks, book, now);
        let mut data = StandardZoneData::default();
        // Iterate in reverse so pop() hands each resolution its own vec.
        for (idx, resolution) in self.config.resolutions.iter().enumerate().rev() {
            let zones = per_resolution.pop().unwrap_or_default();
            debug_assert_eq!(per_resolution.len(), idx);
            match resolution {
                5 => data.zones_5_tick = zones,
                10 => data.zones_10_tick = zones,
                20 => data.zones_20_tick = zones,
                _ => {}
            }
        }
        data
    }
}

fn build_snapshot(
    grid: &TickGrid,
    resolution: i64,
    bucket: i64,
    state: &ZoneState,
    book: &OrderBookState,
) -> ZoneSnapshot {
    let min_ticks = grid.bucket_min_ticks(bucket, resolution);
    let max_ticks = grid.bucket_max_ticks(bucket, resolution);
    let (passive_bid, passive_ask) = book.sum_range(min_ticks, max_ticks);

    let aggressive_volume = state.aggressive_buy + state.aggressive_sell;
    let volume_weighted_price = if aggressive_volume > 0.0 {
        state.weighted_price / aggressive_volume
    } else {
        0.0
    };

    ZoneSnapshot {
        zone_id: format!("{resolution}t:{bucket}"),
        price_level: grid.bucket_center(bucket, resolution),
        tick_size: grid.tick_size(),
        boundaries: ZoneBoundaries {
            min: grid.to_price(min_ticks),
            max: grid.to_price(max_ticks),
        },
        resolution,
        bucket,
        center_ticks: min_ticks + resolution / 2,
        aggressive_buy_volume: state.aggressive_buy,
        aggressive_sell_volume: state.aggressive_sell,
        aggressive_volume,
        passive_bid_volume: passive_bid,
        passive_ask_volume: passive_ask,
        passive_volume: passive_bid + passive_ask,
        trade_count: state.records.len() as u64,
        timespan_ms: state.timespan_ms(),
        volume_weighted_price,
        last_update: state.last_update,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrderBookConfig;
    use crate::metrics::PipelineMetrics;
    use crate::types::{DepthEntry, DepthUpdate};
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use std::sync::Arc;

    fn grid() -> TickGrid {
        TickGrid::new(Decimal::from_str("0.01").unwrap(), 2).unwrap()
    }

    fn book_with_levels(levels: Vec<(&str, f64, f64)>) -> OrderBookState {
        let mut book = OrderBookState::new(
            grid(),
            OrderBookConfig::default(),
            Arc::new(PipelineMetrics::new()),
        );
        let update = DepthUpdate {
            event_time: 1,
            bids: levels
                .iter()
                .filter(|(_, bid, _)| *bid > 0.0)
                .map(|(price, bid, _)| DepthEntry {
                    price: Decimal::from_str(price).unwrap(),
                    quantity: *bid,
                })
                .collect(),
            asks: levels
                .iter()
                .filter(|(_, _, ask)| *ask > 0.0)
                .map(|(price, _, ask)| DepthEntry {
                    price: Decimal::from_str(price).unwrap(),
                    quantity: *ask,
                })
                .collect(),
        };
        book.apply_depth(&update);
        book
    }

    fn aggregator() -> ZoneAggregator {
        ZoneAggregator::new(grid(), ZoneConfig::default())
    }

    #[test]
    fn test_aggressive_totals_are_exact() {
        let mut zones = aggregator();
        let book = book_with_levels(vec![("85.00", 40.0, 0.0), ("85.05", 0.0, 25.0)]);
        zones.on_trade(8502, 10.0, true, 1000);
        zones.on_trade(8502, 4.0, false, 2000);
        zones.on_trade(8503, 6.0, true, 3000);

        let data = zones.standard_data(8502, &book, 3000);
        let zone = data.nearest(5, 8502).unwrap();
        assert_eq!(zone.aggressive_buy_volume, 16.0);
        assert_eq!(zone.aggressive_sell_volume, 4.0);
        assert_eq!(
            zone.aggressive_volume,
            zone.aggressive_buy_volume + zone.aggressive_sell_volume
        );
        assert_eq!(zone.trade_count, 3);
        assert_eq!(zone.timespan_ms, 2000);
    }

    #[test]
    fn test_passive_sums_read_from_book() {
        let mut zones = aggregator();
        // 85.00..85.04 inclusive sit inside the 5-tick bucket of 85.02.
        let book = book_with_levels(vec![("85.00", 30.0, 0.0), ("85.04", 0.0, 12.0)]);
        zones.on_trade(8502, 1.0, true, 1000);

        let data = zones.standard_data(8502, &book, 1000);
        let zone = data.nearest(5, 8502).unwrap();
        assert_eq!(zone.passive_bid_volume, 30.0);
        assert_eq!(zone.passive_ask_volume, 12.0);
        assert_eq!(zone.passive_volume, 42.0);
    }

    #[test]
    fn test_window_eviction_removes_stale_zones() {
        let mut zones = aggregator();
        let book = book_with_levels(vec![("85.00", 1.0, 0.0)]);
        zones.on_trade(8502, 10.0, true, 1000);

        let window = ZoneConfig::default().zone_time_window_ms;
        let later = 1000 + window + 1;
        let data = zones.standard_data(8502, &book, later);
        assert!(data.nearest(5, 8502).is_none());
    }

    #[test]
    fn test_boundaries_strictly_contain_center() {
        let mut zones = aggregator();
        let book = book_with_levels(vec![("85.00", 1.0, 0.0)]);
        zones.on_trade(8502, 1.0, true, 1000);
        let data = zones.standard_data(8502, &book, 1000);
        for zone in data.all() {
            assert!(zone.boundaries.min < zone.price_level, "{}", zone.zone_id);
            assert!(zone.price_level < zone.boundaries.max, "{}", zone.zone_id);
        }
    }

    #[test]
    fn test_sweep_drops_idle_buckets() {
        let mut zones = aggregator();
        zones.on_trade(8502, 1.0, true, 1000);
        let window = ZoneConfig::default().zone_time_window_ms;
        zones.sweep(1000 + window + 1);
        assert!(zones.maps.iter().all(|map| map.is_empty()));
    }
}
