//! Absorption detection
//!
//! Large aggressive flow met by deep passive liquidity without
//! commensurate price movement. Bid-side absorption (aggressive sells held
//! by bids) predicts an upward reversal; ask-side absorption the inverse.

use std::collections::VecDeque;
use uuid::Uuid;

use crate::config::AbsorptionConfig;
use crate::detectors::Detector;
use crate::events::{DetectorEvent, SignalCandidate, SignalKind, SignalMetadata};
use crate::ticks::TickGrid;
use crate::types::{EnrichedTradeEvent, Side};
use crate::zones::ZoneSnapshot;

pub struct AbsorptionDetector {
    id: String,
    config: AbsorptionConfig,
    grid: TickGrid,
    /// (time, price_ticks) history for the windowed price range
    prices: VecDeque<(i64, i64)>,
}

impl AbsorptionDetector {
    pub fn new(id: impl Into<String>, config: AbsorptionConfig, grid: TickGrid) -> Self {
        Self {
            id: id.into(),
            config,
            grid,
            prices: VecDeque::new(),
        }
    }

    fn windowed_price_range_ticks(&mut self, now: i64, price_ticks: i64) -> i64 {
        let cutoff = now - self.config.time_window_ms;
        while let Some((time, _)) = self.prices.front() {
            if *time >= cutoff {
                break;
            }
            self.prices.pop_front();
        }
        self.prices.push_back((now, price_ticks));

        let mut min = i64::MAX;
        let mut max = i64::MIN;
        for (_, ticks) in &self.prices {
            min = min.min(*ticks);
            max = max.max(*ticks);
        }
        max - min
    }

    fn zone_confirms(&self, zone: &ZoneSnapshot) -> bool {
        if zone.aggressive_volume <= 0.0 {
            return false;
        }
        let total = zone.aggressive_volume + zone.passive_volume;
        if total <= 0.0 {
            return false;
        }
        let ratio = zone.aggressive_volume / total;
        let multiplier = zone.passive_volume / zone.aggressive_volume;
        ratio <= self.config.max_absorption_ratio
            && multiplier >= self.config.min_passive_multiplier
    }

    fn confluent_zone_count(&self, event: &EnrichedTradeEvent) -> usize {
        event
            .zone_data
            .all()
            .filter(|zone| {
                (zone.center_ticks - event.price_ticks).abs()
                    <= self.config.confluence_max_distance_ticks
                    && self.zone_confirms(zone)
            })
            .count()
    }
}

impl Detector for AbsorptionDetector {
    fn id(&self) -> &str {
        &self.id
    }

    fn handle(&mut self, event: &EnrichedTradeEvent) -> Vec<DetectorEvent> {
        let range_ticks = self.windowed_price_range_ticks(event.event_time, event.price_ticks);

        let Some(zone) = event
            .zone_data
            .nearest(self.config.zone_resolution, event.price_ticks)
        else {
            return Vec::new();
        };
        if event.event_time - zone.last_update > self.config.time_window_ms {
            return Vec::new();
        }

        let aggressive = zone.aggressive_volume;
        if aggressive < self.config.min_agg_volume {
            return Vec::new();
        }

        let passive = zone.passive_volume;
        let total = aggressive + passive;
        if total <= 0.0 {
            return Vec::new();
        }
        let absorption_ratio = aggressive / total;
        if absorption_ratio > self.config.max_absorption_ratio {
            return Vec::new();
        }

        let passive_multiplier = passive / aggressive;
        if passive_multiplier < self.config.min_passive_multiplier {
            return Vec::new();
        }

        // Observed movement in ticks vs the movement this much aggressive
        // volume is expected to produce.
        let expected_movement_ticks = aggressive * self.config.expected_movement_scaling_factor;
        if expected_movement_ticks <= 0.0 {
            return Vec::new();
        }
        let price_efficiency = range_ticks as f64 / expected_movement_ticks;
        if price_efficiency > self.config.price_efficiency_threshold {
            return Vec::new();
        }

        // The absorbing side must actually dominate the passive book.
        let sell_dominant = zone.aggressive_sell_volume > zone.aggressive_buy_volume;
        let side = if sell_dominant && zone.passive_bid_volume >= zone.passive_ask_volume {
            Side::Buy
        } else if !sell_dominant && zone.passive_ask_volume >= zone.passive_bid_volume {
            Side::Sell
        } else {
            return Vec::new();
        };

        let ratio_component = 1.0 - absorption_ratio / self.config.max_absorption_ratio;
        let passive_component = (passive_multiplier / self.config.min_passive_multiplier).min(1.0);
        let efficiency_component =
            1.0 - (price_efficiency / self.config.price_efficiency_threshold).min(1.0);
        let volume_component = (aggressive / (2.0 * self.config.min_agg_volume)).min(1.0);

        let score = 0.30 * ratio_component
            + 0.25 * passive_component
            + 0.30 * efficiency_component
            + 0.15 * volume_component;
        if score < self.config.min_absorption_score {
            return Vec::new();
        }

        let confluent_zones = self.confluent_zone_count(event);
        let boost = if confluent_zones >= self.config.confluence_min_zones {
            self.config.confluence_confidence_boost
        } else {
            0.0
        };
        let confidence = (score * self.config.confidence_scale + boost).min(1.0);

        vec![DetectorEvent::SignalCandidate(SignalCandidate {
            id: Uuid::new_v4(),
            detector_id: self.id.clone(),
            kind: SignalKind::Absorption,
            side,
            price: self.grid.to_price(event.price_ticks),
            price_ticks: event.price_ticks,
            time: event.event_time,
            confidence,
            metadata: SignalMetadata::Absorption {
                aggressive_volume: aggressive,
                passive_volume: passive,
                absorption_ratio,
                passive_multiplier,
                price_efficiency,
                confluent_zones,
                score,
            },
        })]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DepthView;
    use crate::zones::{StandardZoneData, ZoneBoundaries};
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use std::sync::Arc;

    fn grid() -> TickGrid {
        TickGrid::new(Decimal::from_str("0.01").unwrap(), 2).unwrap()
    }

    fn zone(
        resolution: i64,
        center_ticks: i64,
        agg_buy: f64,
        agg_sell: f64,
        passive_bid: f64,
        passive_ask: f64,
        last_update: i64,
    ) -> ZoneSnapshot {
        let grid = grid();
        let bucket = center_ticks / resolution;
        ZoneSnapshot {
            zone_id: format!("{resolution}t:{bucket}"),
            price_level: grid.bucket_center(bucket, resolution),
            tick_size: grid.tick_size(),
            boundaries: ZoneBoundaries {
                min: grid.to_price(bucket * resolution),
                max: grid.to_price((bucket + 1) * resolution),
            },
            resolution,
            bucket,
            center_ticks,
            aggressive_buy_volume: agg_buy,
            aggressive_sell_volume: agg_sell,
            aggressive_volume: agg_buy + agg_sell,
            passive_bid_volume: passive_bid,
            passive_ask_volume: passive_ask,
            passive_volume: passive_bid + passive_ask,
            trade_count: 10,
            timespan_ms: 4000,
            volume_weighted_price: 65.0,
            last_update,
        }
    }

    fn event_with_zones(time: i64, price_ticks: i64, zones: StandardZoneData) -> EnrichedTradeEvent {
        EnrichedTradeEvent {
            trade_id: time as u64,
            event_time: time,
            price: grid().to_price(price_ticks),
            price_ticks,
            quantity: 10.0,
            buyer_is_maker: true,
            passive_bid_volume: 700.0,
            passive_ask_volume: 0.0,
            zone_passive_bid_volume: 700.0,
            zone_passive_ask_volume: 0.0,
            best_bid: Some(grid().to_price(price_ticks)),
            best_ask: Some(grid().to_price(price_ticks + 1)),
            best_bid_ticks: Some(price_ticks),
            best_ask_ticks: Some(price_ticks + 1),
            spread: Some(Decimal::from_str("0.01").unwrap()),
            mid_price: None,
            depth_snapshot: Arc::new(DepthView {
                captured_at: time,
                center_ticks: price_ticks,
                levels: Vec::new(),
            }),
            zone_data: zones,
        }
    }

    fn s1_zones(agg_sell: f64, time: i64) -> StandardZoneData {
        StandardZoneData {
            zones_5_tick: vec![zone(5, 6502, 0.0, agg_sell, 700.0, 0.0, time)],
            zones_10_tick: vec![zone(10, 6505, 0.0, agg_sell, 700.0, 0.0, time)],
            zones_20_tick: vec![zone(20, 6510, 0.0, agg_sell, 700.0, 0.0, time)],
        }
    }

    fn detector() -> AbsorptionDetector {
        AbsorptionDetector::new("absorption", AbsorptionConfig::default(), grid())
    }

    #[test]
    fn test_buy_absorption_fires_with_high_confidence() {
        let mut detector = detector();
        let events = detector.handle(&event_with_zones(4000, 6500, s1_zones(300.0, 4000)));
        assert_eq!(events.len(), 1);
        let candidate = events[0].as_candidate().unwrap();
        assert_eq!(candidate.kind, SignalKind::Absorption);
        assert_eq!(candidate.side, Side::Buy);
        assert!(candidate.confidence >= 0.8, "{}", candidate.confidence);
    }

    #[test]
    fn test_volume_gate_is_inclusive_at_the_threshold() {
        let min = AbsorptionConfig::default().min_agg_volume;
        let mut detector = detector();
        // Exactly at the gate: passes.
        assert_eq!(
            detector
                .handle(&event_with_zones(1000, 6500, s1_zones(min, 1000)))
                .len(),
            1
        );

        // Strictly below: does not.
        let mut detector = super::AbsorptionDetector::new(
            "absorption",
            AbsorptionConfig::default(),
            grid(),
        );
        assert!(detector
            .handle(&event_with_zones(1000, 6500, s1_zones(min - 0.001, 1000)))
            .is_empty());
    }

    #[test]
    fn test_price_movement_defeats_absorption() {
        let mut detector = detector();
        // Walk the price far enough that efficiency exceeds the gate.
        detector.handle(&event_with_zones(1000, 6500, s1_zones(50.0, 1000)));
        let events = detector.handle(&event_with_zones(2000, 6530, s1_zones(300.0, 2000)));
        assert!(events.is_empty());
    }

    #[test]
    fn test_thin_passive_side_fails_multiplier_gate() {
        let mut detector = detector();
        let zones = StandardZoneData {
            zones_10_tick: vec![zone(10, 6505, 0.0, 300.0, 100.0, 0.0, 1000)],
            ..Default::default()
        };
        assert!(detector.handle(&event_with_zones(1000, 6500, zones)).is_empty());
    }
}
