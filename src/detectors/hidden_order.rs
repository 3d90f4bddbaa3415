//! Hidden order detection
//!
//! An execution larger than the passive quantity that was visible on the
//! taken side implies undisclosed resting interest at that price. The
//! comparison uses the per-trade depth view, bounded by a staleness
//! ceiling, and folds in neighboring ticks within the price tolerance.

use uuid::Uuid;

use crate::config::HiddenOrderConfig;
use crate::detectors::Detector;
use crate::events::{AnomalyEvent, DetectorEvent, SignalCandidate, SignalKind, SignalMetadata};
use crate::ticks::TickGrid;
use crate::types::{BookSide, EnrichedTradeEvent, Side};

pub struct HiddenOrderDetector {
    id: String,
    config: HiddenOrderConfig,
    grid: TickGrid,
}

impl HiddenOrderDetector {
    pub fn new(id: impl Into<String>, config: HiddenOrderConfig, grid: TickGrid) -> Self {
        Self {
            id: id.into(),
            config,
            grid,
        }
    }
}

impl Detector for HiddenOrderDetector {
    fn id(&self) -> &str {
        &self.id
    }

    fn handle(&mut self, event: &EnrichedTradeEvent) -> Vec<DetectorEvent> {
        if event.quantity < self.config.min_trade_size {
            return Vec::new();
        }
        if event.depth_snapshot.age_ms(event.event_time) > self.config.max_depth_age_ms {
            return Vec::new();
        }

        // A buy takes the ask side, a sell the bid side.
        let taken_side = if event.buyer_is_maker {
            BookSide::Bid
        } else {
            BookSide::Ask
        };
        let visible = event.depth_snapshot.visible_near(
            taken_side,
            event.price_ticks,
            self.config.price_tolerance_ticks,
        );

        let executed = event.quantity;
        let hidden = executed - visible;
        if hidden < self.config.min_hidden_volume {
            return Vec::new();
        }
        let hidden_percentage = hidden / executed;

        let confidence = (0.4
            + 0.3 * (hidden / (2.0 * self.config.min_hidden_volume)).min(1.0)
            + 0.3 * hidden_percentage)
            .min(1.0);

        let side = event.aggressor();
        let metadata = SignalMetadata::HiddenLiquidity {
            executed_volume: executed,
            visible_volume: visible,
            hidden_volume: hidden,
            hidden_percentage,
        };

        vec![
            DetectorEvent::SignalCandidate(SignalCandidate {
                id: Uuid::new_v4(),
                detector_id: self.id.clone(),
                kind: SignalKind::HiddenLiquidity,
                side,
                price: self.grid.to_price(event.price_ticks),
                price_ticks: event.price_ticks,
                time: event.event_time,
                confidence,
                metadata: metadata.clone(),
            }),
            DetectorEvent::Anomaly(AnomalyEvent {
                id: Uuid::new_v4(),
                kind: "hidden_liquidity".to_string(),
                side,
                price: self.grid.to_price(event.price_ticks),
                time: event.event_time,
                confidence,
                details: metadata,
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DepthLevelView, DepthView};
    use crate::zones::StandardZoneData;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use std::sync::Arc;

    fn grid() -> TickGrid {
        TickGrid::new(Decimal::from_str("0.01").unwrap(), 2).unwrap()
    }

    fn buy_with_visible_ask(
        time: i64,
        captured_at: i64,
        quantity: f64,
        visible_ask: f64,
    ) -> EnrichedTradeEvent {
        EnrichedTradeEvent {
            trade_id: time as u64,
            event_time: time,
            price: Decimal::from_str("100.00").unwrap(),
            price_ticks: 10_000,
            quantity,
            buyer_is_maker: false,
            passive_bid_volume: 0.0,
            passive_ask_volume: visible_ask,
            zone_passive_bid_volume: 0.0,
            zone_passive_ask_volume: visible_ask,
            best_bid: Some(Decimal::from_str("99.99").unwrap()),
            best_ask: Some(Decimal::from_str("100.00").unwrap()),
            best_bid_ticks: Some(9_999),
            best_ask_ticks: Some(10_000),
            spread: Some(Decimal::from_str("0.01").unwrap()),
            mid_price: None,
            depth_snapshot: Arc::new(DepthView {
                captured_at,
                center_ticks: 10_000,
                levels: vec![DepthLevelView {
                    price: Decimal::from_str("100.00").unwrap(),
                    price_ticks: 10_000,
                    bid: 0.0,
                    ask: visible_ask,
                }],
            }),
            zone_data: StandardZoneData::default(),
        }
    }

    fn detector() -> HiddenOrderDetector {
        HiddenOrderDetector::new("hidden_order", HiddenOrderConfig::default(), grid())
    }

    #[test]
    fn test_execution_beyond_visible_depth() {
        let mut detector = detector();
        let events = detector.handle(&buy_with_visible_ask(1000, 1000, 50.0, 15.0));

        let candidate = events
            .iter()
            .find_map(|event| event.as_candidate())
            .expect("hidden liquidity candidate");
        assert_eq!(candidate.kind, SignalKind::HiddenLiquidity);
        assert_eq!(candidate.side, Side::Buy);
        match &candidate.metadata {
            SignalMetadata::HiddenLiquidity {
                executed_volume,
                visible_volume,
                hidden_volume,
                hidden_percentage,
            } => {
                assert_eq!(*executed_volume, 50.0);
                assert_eq!(*visible_volume, 15.0);
                assert_eq!(*hidden_volume, 35.0);
                assert!((hidden_percentage - 0.7).abs() < 1e-9);
            }
            other => panic!("unexpected metadata {other:?}"),
        }
        assert!(events
            .iter()
            .any(|event| matches!(event, DetectorEvent::Anomaly(_))));
    }

    #[test]
    fn test_stale_depth_snapshot_is_ignored() {
        let mut detector = detector();
        let stale = HiddenOrderConfig::default().max_depth_age_ms + 1;
        let events = detector.handle(&buy_with_visible_ask(1000 + stale, 1000, 50.0, 15.0));
        assert!(events.is_empty());
    }

    #[test]
    fn test_fully_visible_execution_stays_silent() {
        let mut detector = detector();
        let events = detector.handle(&buy_with_visible_ask(1000, 1000, 50.0, 60.0));
        assert!(events.is_empty());
    }

    #[test]
    fn test_small_trades_never_compared() {
        let mut detector = detector();
        let small = HiddenOrderConfig::default().min_trade_size - 0.001;
        let events = detector.handle(&buy_with_visible_ask(1000, 1000, small, 0.0));
        assert!(events.is_empty());
    }
}
