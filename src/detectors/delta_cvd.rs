//! CVD divergence detection
//!
//! A pre-sized circular buffer of per-second buckets carries signed volume
//! (buy − sell) and trade counts; no allocation happens in the hot path.
//! Divergence fires when the regression slopes of cumulative delta and
//! price disagree in sign with both magnitudes above the configured floor.

use uuid::Uuid;

use crate::config::DeltaCvdConfig;
use crate::detectors::Detector;
use crate::events::{DetectorEvent, SignalCandidate, SignalKind, SignalMetadata};
use crate::ticks::TickGrid;
use crate::types::{EnrichedTradeEvent, Side};

#[derive(Debug, Clone, Copy, Default)]
struct SecondBucket {
    sec: i64,
    delta: f64,
    volume: f64,
    trades: u32,
    last_price_ticks: i64,
}

pub struct DeltaCvdDetector {
    id: String,
    config: DeltaCvdConfig,
    grid: TickGrid,
    buckets: Vec<SecondBucket>,
}

impl DeltaCvdDetector {
    pub fn new(id: impl Into<String>, config: DeltaCvdConfig, grid: TickGrid) -> Self {
        let buckets = vec![SecondBucket::default(); config.window_sec];
        Self {
            id: id.into(),
            config,
            grid,
            buckets,
        }
    }

    fn record(&mut self, event: &EnrichedTradeEvent) {
        let sec = event.event_time.div_euclid(1000);
        let idx = sec.rem_euclid(self.config.window_sec as i64) as usize;
        let bucket = &mut self.buckets[idx];
        if bucket.sec != sec {
            *bucket = SecondBucket {
                sec,
                ..SecondBucket::default()
            };
        }
        let signed = if event.buyer_is_maker {
            -event.quantity
        } else {
            event.quantity
        };
        bucket.delta += signed;
        bucket.volume += event.quantity;
        bucket.trades += 1;
        bucket.last_price_ticks = event.price_ticks;
    }

    /// Buckets inside the window, oldest first
    fn window(&self, now_sec: i64) -> Vec<SecondBucket> {
        let cutoff = now_sec - self.config.window_sec as i64;
        let mut samples: Vec<SecondBucket> = self
            .buckets
            .iter()
            .filter(|bucket| bucket.trades > 0 && bucket.sec > cutoff && bucket.sec <= now_sec)
            .copied()
            .collect();
        samples.sort_by_key(|bucket| bucket.sec);
        samples
    }
}

/// Least-squares slope of `y` against `x`
fn regression_slope(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        num += (xi - mean_x) * (yi - mean_y);
        den += (xi - mean_x) * (xi - mean_x);
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

impl Detector for DeltaCvdDetector {
    fn id(&self) -> &str {
        &self.id
    }

    fn handle(&mut self, event: &EnrichedTradeEvent) -> Vec<DetectorEvent> {
        self.record(event);

        let now_sec = event.event_time.div_euclid(1000);
        let samples = self.window(now_sec);
        if samples.len() < self.config.min_samples {
            return Vec::new();
        }

        let trades_total: u32 = samples.iter().map(|bucket| bucket.trades).sum();
        let volume_total: f64 = samples.iter().map(|bucket| bucket.volume).sum();
        let window = self.config.window_sec as f64;
        if (trades_total as f64) / window < self.config.min_trades_per_sec {
            return Vec::new();
        }
        if volume_total / window < self.config.min_vol_per_sec {
            return Vec::new();
        }

        let first_sec = samples[0].sec;
        let x: Vec<f64> = samples.iter().map(|b| (b.sec - first_sec) as f64).collect();
        let mut cumulative = 0.0;
        let cvd: Vec<f64> = samples
            .iter()
            .map(|b| {
                cumulative += b.delta;
                cumulative
            })
            .collect();
        let prices: Vec<f64> = samples
            .iter()
            .map(|b| self.grid.to_price_f64(b.last_price_ticks))
            .collect();

        let mean_price = prices.iter().sum::<f64>() / prices.len() as f64;
        if mean_price <= 0.0 {
            return Vec::new();
        }
        let price_slope = regression_slope(&x, &prices) / mean_price;

        let mean_bucket_volume = volume_total / samples.len() as f64;
        if mean_bucket_volume <= 0.0 {
            return Vec::new();
        }
        let cvd_slope = regression_slope(&x, &cvd) / mean_bucket_volume;

        if price_slope.abs() <= self.config.slope_threshold
            || cvd_slope.abs() <= self.config.slope_threshold
        {
            return Vec::new();
        }
        // Divergence needs opposite signs.
        if price_slope.signum() == cvd_slope.signum() {
            return Vec::new();
        }

        let net_delta: f64 = samples.iter().map(|b| b.delta).sum();
        let imbalance = net_delta.abs() / volume_total;
        if imbalance <= self.config.cvd_imbalance_threshold {
            return Vec::new();
        }

        // Bearish: price up, CVD down. Bullish: price down, CVD up.
        let side = if price_slope > 0.0 { Side::Sell } else { Side::Buy };
        let confidence = (0.6 + 0.4 * imbalance).min(1.0);

        vec![DetectorEvent::SignalCandidate(SignalCandidate {
            id: Uuid::new_v4(),
            detector_id: self.id.clone(),
            kind: SignalKind::CvdDivergence,
            side,
            price: self.grid.to_price(event.price_ticks),
            price_ticks: event.price_ticks,
            time: event.event_time,
            confidence,
            metadata: SignalMetadata::CvdDivergence {
                price_slope,
                cvd_slope,
                net_delta,
                total_volume: volume_total,
                window_sec: self.config.window_sec,
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

    fn trade(time: i64, price_ticks: i64, quantity: f64, buyer_is_maker: bool) -> EnrichedTradeEvent {
        EnrichedTradeEvent {
            trade_id: time as u64,
            event_time: time,
            price: grid().to_price(price_ticks),
            price_ticks,
            quantity,
            buyer_is_maker,
            passive_bid_volume: 0.0,
            passive_ask_volume: 0.0,
            zone_passive_bid_volume: 0.0,
            zone_passive_ask_volume: 0.0,
            best_bid: None,
            best_ask: None,
            best_bid_ticks: None,
            best_ask_ticks: None,
            spread: None,
            mid_price: None,
            depth_snapshot: Arc::new(DepthView {
                captured_at: time,
                center_ticks: price_ticks,
                levels: Vec::new(),
            }),
            zone_data: StandardZoneData::default(),
        }
    }

    fn config() -> DeltaCvdConfig {
        DeltaCvdConfig {
            window_sec: 900,
            min_trades_per_sec: 0.01,
            min_vol_per_sec: 0.01,
            slope_threshold: 1e-7,
            cvd_imbalance_threshold: 0.15,
            min_samples: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_bearish_divergence_price_up_cvd_down() {
        let mut detector = DeltaCvdDetector::new("cvd", config(), grid());

        // 30 samples at 30s intervals; price 89.00 → 89.30 while every
        // print is an aggressive sell, so CVD declines monotonically.
        let mut last = Vec::new();
        for i in 0..30i64 {
            let time = i * 30_000;
            let price_ticks = 8900 + i; // +0.01 per step
            last = detector.handle(&trade(time, price_ticks, 10.0, true));
        }

        assert_eq!(last.len(), 1);
        let candidate = last[0].as_candidate().unwrap();
        assert_eq!(candidate.kind, SignalKind::CvdDivergence);
        assert_eq!(candidate.side, Side::Sell);
    }

    #[test]
    fn test_bullish_divergence_price_down_cvd_up() {
        let mut detector = DeltaCvdDetector::new("cvd", config(), grid());
        let mut last = Vec::new();
        for i in 0..30i64 {
            let time = i * 30_000;
            let price_ticks = 8930 - i;
            last = detector.handle(&trade(time, price_ticks, 10.0, false));
        }
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].as_candidate().unwrap().side, Side::Buy);
    }

    #[test]
    fn test_aligned_slopes_do_not_diverge() {
        let mut detector = DeltaCvdDetector::new("cvd", config(), grid());
        // Price up on aggressive buying: CVD and price rise together.
        for i in 0..30i64 {
            let time = i * 30_000;
            let events = detector.handle(&trade(time, 8900 + i, 10.0, false));
            assert!(events.is_empty(), "step {i}");
        }
    }

    #[test]
    fn test_balanced_flow_fails_imbalance_gate() {
        let mut detector = DeltaCvdDetector::new("cvd", config(), grid());
        // Alternate buy/sell so net delta stays near zero.
        for i in 0..30i64 {
            let time = i * 30_000;
            let events = detector.handle(&trade(time, 8900 + i, 10.0, i % 2 == 0));
            assert!(events.is_empty(), "step {i}");
        }
    }

    #[test]
    fn test_too_few_samples_stay_silent() {
        let mut detector = DeltaCvdDetector::new("cvd", config(), grid());
        for i in 0..5i64 {
            let events = detector.handle(&trade(i * 30_000, 8900 + i, 10.0, true));
            assert!(events.is_empty());
        }
    }
}
