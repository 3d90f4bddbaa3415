//! Exhaustion detection
//!
//! One-sided depletion of resting liquidity: when the passive side a taker
//! keeps hitting drains without replenishment, further aggressive flow must
//! move price. Ask exhaustion predicts an upside break, bid exhaustion the
//! downside.

use std::collections::VecDeque;
use uuid::Uuid;

use crate::config::ExhaustionConfig;
use crate::detectors::Detector;
use crate::events::{DetectorEvent, SignalCandidate, SignalKind, SignalMetadata};
use crate::ticks::TickGrid;
use crate::types::{EnrichedTradeEvent, Side};

#[derive(Debug, Clone, Copy)]
struct Sample {
    time: i64,
    price_ticks: i64,
    passive_bid: f64,
    passive_ask: f64,
    quantity: f64,
    buyer_is_maker: bool,
}

pub struct ExhaustionDetector {
    id: String,
    config: ExhaustionConfig,
    grid: TickGrid,
    samples: VecDeque<Sample>,
}

impl ExhaustionDetector {
    pub fn new(id: impl Into<String>, config: ExhaustionConfig, grid: TickGrid) -> Self {
        Self {
            id: id.into(),
            config,
            grid,
            samples: VecDeque::new(),
        }
    }

    fn evict(&mut self, now: i64) {
        let cutoff = now - self.config.window_ms;
        while let Some(front) = self.samples.front() {
            if front.time >= cutoff {
                break;
            }
            self.samples.pop_front();
        }
    }
}

impl Detector for ExhaustionDetector {
    fn id(&self) -> &str {
        &self.id
    }

    fn handle(&mut self, event: &EnrichedTradeEvent) -> Vec<DetectorEvent> {
        self.evict(event.event_time);
        self.samples.push_back(Sample {
            time: event.event_time,
            price_ticks: event.price_ticks,
            passive_bid: event.passive_bid_volume,
            passive_ask: event.passive_ask_volume,
            quantity: event.quantity,
            buyer_is_maker: event.buyer_is_maker,
        });

        // Which passive side this taker consumes.
        let bid_exhaustion = event.buyer_is_maker;

        let at_tick: Vec<&Sample> = self
            .samples
            .iter()
            .filter(|sample| sample.price_ticks == event.price_ticks)
            .collect();
        if at_tick.len() < self.config.min_window_trades {
            return Vec::new();
        }

        let initial = at_tick
            .first()
            .map(|sample| {
                if bid_exhaustion {
                    sample.passive_bid
                } else {
                    sample.passive_ask
                }
            })
            .unwrap_or(0.0);
        if initial <= 0.0 {
            return Vec::new();
        }

        let pre = if bid_exhaustion {
            event.passive_bid_volume
        } else {
            event.passive_ask_volume
        };
        let remaining = (pre - event.quantity).max(0.0);
        let exhaustion_ratio = 1.0 - remaining / initial;
        if exhaustion_ratio < self.config.exhaustion_threshold {
            return Vec::new();
        }

        // Aggressive volume that hit the exhausted side at this tick.
        let aggressive: f64 = at_tick
            .iter()
            .filter(|sample| sample.buyer_is_maker == bid_exhaustion)
            .map(|sample| sample.quantity)
            .sum();
        if aggressive < self.config.min_agg_volume {
            return Vec::new();
        }

        let depletion_ratio = (initial - remaining) / initial;
        if self.config.enable_depletion_analysis {
            if aggressive < self.config.depletion_volume_threshold {
                return Vec::new();
            }
            if depletion_ratio < self.config.depletion_ratio_threshold {
                return Vec::new();
            }
        }

        // Passive balance across the zone; imbalance away from the
        // exhausted side confirms the break, balance near center dampens.
        let zone_total = event.zone_passive_bid_volume + event.zone_passive_ask_volume;
        let balance = if zone_total > 0.0 {
            event.zone_passive_bid_volume / zone_total
        } else {
            self.config.ratio_balance_center_point
        };
        let center = self.config.ratio_balance_center_point;
        let imbalance_component = if bid_exhaustion {
            ((center - balance) / center).clamp(0.0, 1.0)
        } else {
            ((balance - center) / (1.0 - center)).clamp(0.0, 1.0)
        };

        let depletion_component = (aggressive / self.config.depletion_volume_threshold).min(1.0);
        let score =
            0.5 * exhaustion_ratio + 0.2 * depletion_component + 0.3 * imbalance_component;
        if score < self.config.min_enhanced_confidence_threshold {
            return Vec::new();
        }

        let side = if bid_exhaustion { Side::Sell } else { Side::Buy };
        vec![DetectorEvent::SignalCandidate(SignalCandidate {
            id: Uuid::new_v4(),
            detector_id: self.id.clone(),
            kind: SignalKind::Exhaustion,
            side,
            price: self.grid.to_price(event.price_ticks),
            price_ticks: event.price_ticks,
            time: event.event_time,
            confidence: score.min(1.0),
            metadata: SignalMetadata::Exhaustion {
                initial_passive: initial,
                remaining_passive: remaining,
                exhaustion_ratio,
                aggressive_volume: aggressive,
                passive_ratio_balance: balance,
            },
        })]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DepthView;
    use crate::zones::StandardZoneData;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use std::sync::Arc;

    fn grid() -> TickGrid {
        TickGrid::new(Decimal::from_str("0.01").unwrap(), 2).unwrap()
    }

    fn sell_into_bid(
        time: i64,
        price_ticks: i64,
        quantity: f64,
        passive_bid: f64,
        zone_bid: f64,
        zone_ask: f64,
    ) -> EnrichedTradeEvent {
        EnrichedTradeEvent {
            trade_id: time as u64,
            event_time: time,
            price: grid().to_price(price_ticks),
            price_ticks,
            quantity,
            buyer_is_maker: true,
            passive_bid_volume: passive_bid,
            passive_ask_volume: 0.0,
            zone_passive_bid_volume: zone_bid,
            zone_passive_ask_volume: zone_ask,
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
            zone_data: StandardZoneData::default(),
        }
    }

    fn config() -> ExhaustionConfig {
        ExhaustionConfig {
            min_agg_volume: 500.0,
            exhaustion_threshold: 0.5,
            depletion_volume_threshold: 750.0,
            depletion_ratio_threshold: 0.2,
            ..Default::default()
        }
    }

    #[test]
    fn test_bid_exhaustion_emits_sell() {
        let mut detector = ExhaustionDetector::new("exhaustion", config(), grid());

        // Bid at 65.00 starts at 1000; aggressive sells consume 800 over 10s
        // without replenishment.
        let mut remaining = 1000.0;
        let mut events = Vec::new();
        for step in 0..8 {
            let time = 1000 + step * 1250;
            events = detector.handle(&sell_into_bid(time, 6500, 100.0, remaining, remaining, 400.0));
            remaining -= 100.0;
        }

        assert_eq!(events.len(), 1);
        let candidate = events[0].as_candidate().unwrap();
        assert_eq!(candidate.kind, SignalKind::Exhaustion);
        assert_eq!(candidate.side, Side::Sell);
        assert_eq!(candidate.price, Decimal::from_str("65.00").unwrap());
        match &candidate.metadata {
            SignalMetadata::Exhaustion {
                exhaustion_ratio, ..
            } => assert!((exhaustion_ratio - 0.8).abs() < 1e-9),
            other => panic!("unexpected metadata {other:?}"),
        }
    }

    #[test]
    fn test_replenished_bid_does_not_exhaust() {
        let mut detector = ExhaustionDetector::new("exhaustion", config(), grid());
        // The bid refills between prints, so remaining/initial stays high.
        for step in 0..8 {
            let time = 1000 + step * 1000;
            let events = detector.handle(&sell_into_bid(time, 6500, 100.0, 1000.0, 1000.0, 0.0));
            assert!(events.is_empty(), "step {step}");
        }
    }

    #[test]
    fn test_depletion_volume_gate_blocks_small_flow() {
        let mut config = config();
        config.min_agg_volume = 100.0;
        let mut detector = ExhaustionDetector::new("exhaustion", config, grid());

        // Heavy ratio depletion but only 300 total aggressive volume, below
        // the 750 depletion gate.
        let mut remaining = 400.0;
        for step in 0..3 {
            let time = 1000 + step * 1000;
            let events = detector.handle(&sell_into_bid(time, 6500, 100.0, remaining, remaining, 0.0));
            assert!(events.is_empty(), "step {step}");
            remaining -= 100.0;
        }
    }
}
