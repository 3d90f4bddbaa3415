//! Accumulation / distribution zone tracking
//!
//! Symmetric detectors sharing one engine: candidate zones form at tight
//! price buckets, promote to confirmed zones once duration, volume, trade
//! count, price containment, and the directional ratio all hold, then live
//! through a strengthen/weaken/invalidate lifecycle. Accumulation reads the
//! ratio against aggressive buys, distribution against aggressive sells.

use std::collections::HashMap;
use uuid::Uuid;

use crate::config::AccumulationConfig;
use crate::detectors::Detector;
use crate::events::{
    DetectorEvent, ExpectedDirection, LevelKind, SignalCandidate, SignalKind, SignalMetadata,
    SupportResistanceLevel, TrackedZone, Urgency, ZoneSignalEvent, ZoneUpdateEvent, ZoneUpdateKind,
};
use crate::ticks::TickGrid;
use crate::types::{EnrichedTradeEvent, Side};

/// Which side of the flow the tracker watches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneDirection {
    Accumulation,
    Distribution,
}

impl ZoneDirection {
    fn kind(&self) -> SignalKind {
        match self {
            ZoneDirection::Accumulation => SignalKind::Accumulation,
            ZoneDirection::Distribution => SignalKind::Distribution,
        }
    }

    fn signal_side(&self) -> Side {
        match self {
            ZoneDirection::Accumulation => Side::Buy,
            ZoneDirection::Distribution => Side::Sell,
        }
    }

    fn expected_direction(&self) -> ExpectedDirection {
        match self {
            ZoneDirection::Accumulation => ExpectedDirection::Up,
            ZoneDirection::Distribution => ExpectedDirection::Down,
        }
    }

    fn level_kind(&self) -> LevelKind {
        match self {
            ZoneDirection::Accumulation => LevelKind::Support,
            ZoneDirection::Distribution => LevelKind::Resistance,
        }
    }

    fn directional(&self, buy: f64, sell: f64) -> f64 {
        match self {
            ZoneDirection::Accumulation => buy,
            ZoneDirection::Distribution => sell,
        }
    }
}

#[derive(Debug, Clone)]
struct ZoneStats {
    started_at: i64,
    last_update: i64,
    aggressive_buy: f64,
    aggressive_sell: f64,
    trade_count: u64,
    min_tick: i64,
    max_tick: i64,
}

impl ZoneStats {
    fn open(event: &EnrichedTradeEvent) -> Self {
        let mut stats = Self {
            started_at: event.event_time,
            last_update: event.event_time,
            aggressive_buy: 0.0,
            aggressive_sell: 0.0,
            trade_count: 0,
            min_tick: event.price_ticks,
            max_tick: event.price_ticks,
        };
        stats.absorb(event);
        stats
    }

    fn absorb(&mut self, event: &EnrichedTradeEvent) {
        if event.buyer_is_maker {
            self.aggressive_sell += event.quantity;
        } else {
            self.aggressive_buy += event.quantity;
        }
        self.trade_count += 1;
        self.min_tick = self.min_tick.min(event.price_ticks);
        self.max_tick = self.max_tick.max(event.price_ticks);
        self.last_update = event.event_time;
    }

    fn total(&self) -> f64 {
        self.aggressive_buy + self.aggressive_sell
    }

    fn ratio(&self, direction: ZoneDirection) -> f64 {
        let total = self.total();
        if total > 0.0 {
            direction.directional(self.aggressive_buy, self.aggressive_sell) / total
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone)]
struct ConfirmedZone {
    zone_id: String,
    stats: ZoneStats,
    volume_at_last_emit: f64,
}

pub struct ZoneTrackerDetector {
    id: String,
    config: AccumulationConfig,
    grid: TickGrid,
    direction: ZoneDirection,
    candidates: HashMap<i64, ZoneStats>,
    zones: HashMap<i64, ConfirmedZone>,
}

impl ZoneTrackerDetector {
    pub fn new(
        id: impl Into<String>,
        config: AccumulationConfig,
        grid: TickGrid,
        direction: ZoneDirection,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            grid,
            direction,
            candidates: HashMap::new(),
            zones: HashMap::new(),
        }
    }

    fn bucket_center_ticks(&self, bucket: i64) -> i64 {
        self.grid.bucket_min_ticks(bucket, self.config.zone_resolution)
            + self.config.zone_resolution / 2
    }

    fn tracked_zone(&self, bucket: i64, zone_id: &str, stats: &ZoneStats) -> TrackedZone {
        TrackedZone {
            zone_id: zone_id.to_string(),
            kind: self.direction.kind(),
            center: self
                .grid
                .bucket_center(bucket, self.config.zone_resolution),
            price_range_min: self
                .grid
                .to_price(self.grid.bucket_min_ticks(bucket, self.config.zone_resolution)),
            price_range_max: self
                .grid
                .to_price(self.grid.bucket_max_ticks(bucket, self.config.zone_resolution)),
            volume: stats.total(),
            directional_ratio: stats.ratio(self.direction),
            trade_count: stats.trade_count,
            started_at: stats.started_at,
            last_update: stats.last_update,
        }
    }

    /// Proportional deviation of the candidate's price span from its center
    fn price_deviation(&self, stats: &ZoneStats, bucket: i64) -> f64 {
        let center = self.grid.to_price_f64(self.bucket_center_ticks(bucket));
        if center <= 0.0 {
            return f64::INFINITY;
        }
        let span = (stats.max_tick - stats.min_tick) as f64 * self.grid.tick_size_f64();
        span / center
    }

    /// Resolutions whose nearest zone shows the same directional bias
    fn aligned_timeframes(&self, event: &EnrichedTradeEvent) -> usize {
        [5i64, 10, 20]
            .iter()
            .filter(|resolution| {
                event
                    .zone_data
                    .nearest(**resolution, event.price_ticks)
                    .map(|zone| {
                        let ratio = match self.direction {
                            ZoneDirection::Accumulation => zone.buy_ratio(),
                            ZoneDirection::Distribution => 1.0 - zone.buy_ratio(),
                        };
                        ratio >= self.config.ratio_threshold
                    })
                    .unwrap_or(false)
            })
            .count()
    }

    fn confidence(&self, stats: &ZoneStats, aligned: usize) -> f64 {
        let boost = if aligned >= 2 {
            self.config.cross_timeframe_boost
        } else {
            0.0
        };
        (stats.ratio(self.direction) + boost).min(1.0)
    }

    fn significance(&self, stats: &ZoneStats) -> f64 {
        (stats.total() / (self.config.min_zone_volume * 2.0)).min(1.0)
    }

    fn zone_signal(
        &self,
        zone: &TrackedZone,
        action: ZoneUpdateKind,
        confidence: f64,
    ) -> DetectorEvent {
        DetectorEvent::ZoneSignal(ZoneSignalEvent {
            signal_type: self.direction.kind(),
            zone: zone.clone(),
            action_type: action,
            confidence,
            urgency: Urgency::from_confidence(confidence),
            expected_direction: match action {
                ZoneUpdateKind::ZoneInvalidated => ExpectedDirection::Neutral,
                _ => self.direction.expected_direction(),
            },
        })
    }

    fn candidate_signal(
        &self,
        event: &EnrichedTradeEvent,
        bucket: i64,
        zone_id: &str,
        stats: &ZoneStats,
        aligned: usize,
        confidence: f64,
    ) -> DetectorEvent {
        DetectorEvent::SignalCandidate(SignalCandidate {
            id: Uuid::new_v4(),
            detector_id: self.id.clone(),
            kind: self.direction.kind(),
            side: self.direction.signal_side(),
            price: self
                .grid
                .bucket_center(bucket, self.config.zone_resolution),
            price_ticks: self.bucket_center_ticks(bucket),
            time: event.event_time,
            confidence,
            metadata: SignalMetadata::AccumulationZone {
                zone_id: zone_id.to_string(),
                directional_ratio: stats.ratio(self.direction),
                zone_volume: stats.total(),
                trade_count: stats.trade_count,
                aligned_timeframes: aligned,
            },
        })
    }

    fn mark_emitted(&mut self, bucket: i64) {
        if let Some(zone) = self.zones.get_mut(&bucket) {
            zone.volume_at_last_emit = zone.stats.total();
        }
    }

    fn sweep_idle(&mut self, now: i64, out: &mut Vec<DetectorEvent>) {
        let candidate_ttl = self.config.min_candidate_duration_ms * 3;
        self.candidates
            .retain(|_, stats| now - stats.last_update <= candidate_ttl);

        let zone_ttl = self.config.min_candidate_duration_ms * 2;
        let completed: Vec<i64> = self
            .zones
            .iter()
            .filter(|(_, zone)| now - zone.stats.last_update > zone_ttl)
            .map(|(bucket, _)| *bucket)
            .collect();
        for bucket in completed {
            let zone = self.zones.remove(&bucket).expect("bucket listed");
            let tracked = self.tracked_zone(bucket, &zone.zone_id, &zone.stats);
            out.push(DetectorEvent::ZoneUpdate(ZoneUpdateEvent {
                update_type: ZoneUpdateKind::ZoneCompleted,
                zone: tracked,
                significance: self.significance(&zone.stats),
            }));
        }
    }

    fn invalidation_sweep(&mut self, event: &EnrichedTradeEvent, out: &mut Vec<DetectorEvent>) {
        let breach = self.config.max_price_deviation * 2.0;
        let price = self.grid.to_price_f64(event.price_ticks);
        let breached: Vec<i64> = self
            .zones
            .iter()
            .filter(|(bucket, _)| {
                let center = self.grid.to_price_f64(self.bucket_center_ticks(**bucket));
                center > 0.0 && ((price - center).abs() / center) >= breach
            })
            .map(|(bucket, _)| *bucket)
            .collect();
        for bucket in breached {
            let zone = self.zones.remove(&bucket).expect("bucket listed");
            let tracked = self.tracked_zone(bucket, &zone.zone_id, &zone.stats);
            out.push(DetectorEvent::ZoneUpdate(ZoneUpdateEvent {
                update_type: ZoneUpdateKind::ZoneInvalidated,
                zone: tracked.clone(),
                significance: self.significance(&zone.stats),
            }));
            out.push(self.zone_signal(&tracked, ZoneUpdateKind::ZoneInvalidated, 0.0));
        }
    }
}

impl Detector for ZoneTrackerDetector {
    fn id(&self) -> &str {
        &self.id
    }

    fn handle(&mut self, event: &EnrichedTradeEvent) -> Vec<DetectorEvent> {
        let mut out = Vec::new();
        self.sweep_idle(event.event_time, &mut out);
        self.invalidation_sweep(event, &mut out);

        let bucket = self
            .grid
            .bucket(event.price_ticks, self.config.zone_resolution);

        if self.zones.contains_key(&bucket) {
            let (zone_id, stats, grown) = {
                let zone = self.zones.get_mut(&bucket).expect("bucket present");
                zone.stats.absorb(event);
                let grown = zone.stats.total() - zone.volume_at_last_emit;
                (zone.zone_id.clone(), zone.stats.clone(), grown)
            };
            let ratio = stats.ratio(self.direction);
            let tracked = self.tracked_zone(bucket, &zone_id, &stats);
            let significance = self.significance(&stats);

            if ratio < self.config.ratio_threshold {
                self.mark_emitted(bucket);
                out.push(DetectorEvent::ZoneUpdate(ZoneUpdateEvent {
                    update_type: ZoneUpdateKind::ZoneWeakened,
                    zone: tracked,
                    significance,
                }));
            } else if grown >= self.config.strengthen_volume_step {
                self.mark_emitted(bucket);
                let aligned = self.aligned_timeframes(event);
                let confidence = self.confidence(&stats, aligned);
                out.push(DetectorEvent::ZoneUpdate(ZoneUpdateEvent {
                    update_type: ZoneUpdateKind::ZoneStrengthened,
                    zone: tracked.clone(),
                    significance,
                }));
                if confidence >= self.config.min_signal_confidence {
                    out.push(self.zone_signal(&tracked, ZoneUpdateKind::ZoneStrengthened, confidence));
                }
            } else {
                out.push(DetectorEvent::ZoneUpdate(ZoneUpdateEvent {
                    update_type: ZoneUpdateKind::ZoneUpdated,
                    zone: tracked,
                    significance,
                }));
            }
            return out;
        }

        // Candidate path.
        let stats = {
            let entry = self
                .candidates
                .entry(bucket)
                .and_modify(|stats| stats.absorb(event))
                .or_insert_with(|| ZoneStats::open(event));
            entry.clone()
        };

        if self.price_deviation(&stats, bucket) > self.config.max_price_deviation {
            // Containment broke; the forming zone restarts from this trade.
            self.candidates.insert(bucket, ZoneStats::open(event));
            return out;
        }

        let duration = stats.last_update - stats.started_at;
        let promotable = duration >= self.config.min_candidate_duration_ms
            && stats.total() >= self.config.min_zone_volume
            && stats.trade_count >= self.config.min_trade_count as u64
            && stats.ratio(self.direction) >= self.config.ratio_threshold;
        if !promotable {
            return out;
        }

        self.candidates.remove(&bucket);
        let zone_id = format!(
            "{}:{}t:{}",
            self.id, self.config.zone_resolution, bucket
        );
        let aligned = self.aligned_timeframes(event);
        let confidence = self.confidence(&stats, aligned);
        let tracked = self.tracked_zone(bucket, &zone_id, &stats);

        out.push(DetectorEvent::ZoneUpdate(ZoneUpdateEvent {
            update_type: ZoneUpdateKind::ZoneCreated,
            zone: tracked.clone(),
            significance: self.significance(&stats),
        }));
        out.push(DetectorEvent::SupportResistance(SupportResistanceLevel {
            price: tracked.center,
            kind: self.direction.level_kind(),
            strength: confidence,
            detected_at: event.event_time,
        }));
        if confidence >= self.config.min_signal_confidence {
            out.push(self.zone_signal(&tracked, ZoneUpdateKind::ZoneCreated, confidence));
            out.push(self.candidate_signal(event, bucket, &zone_id, &stats, aligned, confidence));
        }

        self.zones.insert(
            bucket,
            ConfirmedZone {
                zone_id,
                volume_at_last_emit: stats.total(),
                stats,
            },
        );

        out
    }
}
