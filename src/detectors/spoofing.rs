//! Spoofing detection
//!
//! Tracks passive walls per price band and flags rapid-cancel patterns:
//! fake walls, ghost liquidity that never trades, layering across adjacent
//! bands, and repeating algorithmic placements. Band ids derive from
//! integer ticks, so mathematically equal prices always share a band.

use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use crate::config::SpoofingConfig;
use crate::detectors::Detector;
use crate::events::{
    AnomalyEvent, DetectorEvent, SignalCandidate, SignalKind, SignalMetadata, SpoofType,
};
use crate::ticks::TickGrid;
use crate::types::{BookSide, DepthDelta, EnrichedTradeEvent, Side};

#[derive(Debug, Clone, Copy)]
struct WallTrack {
    appeared_at: i64,
    peak: f64,
    executed: f64,
}

#[derive(Debug, Clone, Copy)]
struct FiredWall {
    at: i64,
    size: f64,
}

pub struct SpoofingDetector {
    id: String,
    config: SpoofingConfig,
    grid: TickGrid,
    /// Current passive quantity per (band, side)
    band_qty: HashMap<(i64, BookSide), f64>,
    /// Active wall observations per (band, side)
    tracks: HashMap<(i64, BookSide), WallTrack>,
    /// Recently fired walls per (band, side), for layering adjacency
    fired_at: HashMap<(i64, BookSide), i64>,
    /// Fired-wall history per side, for the repeating-pattern check
    history_bid: VecDeque<FiredWall>,
    history_ask: VecDeque<FiredWall>,
}

impl SpoofingDetector {
    pub fn new(id: impl Into<String>, config: SpoofingConfig, grid: TickGrid) -> Self {
        Self {
            id: id.into(),
            config,
            grid,
            band_qty: HashMap::new(),
            tracks: HashMap::new(),
            fired_at: HashMap::new(),
            history_bid: VecDeque::new(),
            history_ask: VecDeque::new(),
        }
    }

    fn history(&mut self, side: BookSide) -> &mut VecDeque<FiredWall> {
        match side {
            BookSide::Bid => &mut self.history_bid,
            BookSide::Ask => &mut self.history_ask,
        }
    }

    fn signal_side(side: BookSide) -> Side {
        match side {
            BookSide::Bid => Side::Buy,
            BookSide::Ask => Side::Sell,
        }
    }

    fn drop_stale_tracks(&mut self, now: i64) {
        let window = self.config.rapid_cancellation_ms;
        self.tracks.retain(|_, track| now - track.appeared_at <= window);
        let layering_window = window * 4;
        self.fired_at.retain(|_, at| now - *at <= layering_window);
    }

    /// Adjacent fired walls on the same side, the layering fingerprint
    fn layered_bands(&self, band: i64, side: BookSide) -> usize {
        let span = self.config.layering_detection_levels as i64;
        (band - span..=band + span)
            .filter(|candidate| self.fired_at.contains_key(&(*candidate, side)))
            .count()
    }

    /// Similarity of the newest fired wall to the side's history, via the
    /// z-score of its size against the historical distribution: 1.0 means
    /// dead-center of the pattern.
    fn pattern_similarity(&self, side: BookSide, size: f64) -> Option<f64> {
        let history = match side {
            BookSide::Bid => &self.history_bid,
            BookSide::Ask => &self.history_ask,
        };
        if history.len() < 4 {
            return None;
        }
        let n = history.len() as f64;
        let mean = history.iter().map(|w| w.size).sum::<f64>() / n;
        let var = history
            .iter()
            .map(|w| (w.size - mean) * (w.size - mean))
            .sum::<f64>()
            / n;
        let std = var.sqrt();
        if std <= f64::EPSILON {
            // Identical sizes every time is the strongest pattern.
            return Some(if (size - mean).abs() < f64::EPSILON {
                1.0
            } else {
                0.0
            });
        }
        let z = (size - mean) / std;
        let normal = Normal::new(0.0, 1.0).ok()?;
        Some(1.0 - (2.0 * normal.cdf(z) - 1.0).abs())
    }

    fn fire(
        &mut self,
        band: i64,
        side: BookSide,
        track: WallTrack,
        cancellation_ratio: f64,
        now: i64,
    ) -> Vec<DetectorEvent> {
        let mut out = Vec::new();
        let band_center = self.grid.band_center(band, self.config.wall_ticks);
        let exec_fraction = track.executed / track.peak;

        let spoof_type = if track.executed == 0.0 {
            SpoofType::GhostLiquidity
        } else {
            SpoofType::FakeWall
        };

        self.fired_at.insert((band, side), now);
        let layered = self.layered_bands(band, side);
        let similarity = self.pattern_similarity(side, track.peak);
        self.history(side).push_back(FiredWall {
            at: now,
            size: track.peak,
        });
        let cap = self.config.pattern_history;
        while self.history(side).len() > cap {
            self.history(side).pop_front();
        }

        let confidence = (0.5 * cancellation_ratio
            + 0.3 * (1.0 - exec_fraction)
            + 0.2 * (track.peak / (2.0 * self.config.min_wall_size)).min(1.0))
        .min(1.0);

        let metadata = SignalMetadata::Spoofing {
            spoof_type,
            wall_size: track.peak,
            cancellation_ratio,
            executed_volume: track.executed,
            band_center,
        };
        let signal_side = Self::signal_side(side);

        out.push(DetectorEvent::SignalCandidate(SignalCandidate {
            id: Uuid::new_v4(),
            detector_id: self.id.clone(),
            kind: SignalKind::Spoofing,
            side: signal_side,
            price: band_center,
            price_ticks: band * self.config.wall_ticks,
            time: now,
            confidence,
            metadata: metadata.clone(),
        }));
        out.push(DetectorEvent::Anomaly(AnomalyEvent {
            id: Uuid::new_v4(),
            kind: "spoofing".to_string(),
            side: signal_side,
            price: band_center,
            time: now,
            confidence,
            details: metadata,
        }));

        if layered >= self.config.layering_detection_levels {
            out.push(DetectorEvent::Anomaly(AnomalyEvent {
                id: Uuid::new_v4(),
                kind: "spoofing".to_string(),
                side: signal_side,
                price: band_center,
                time: now,
                confidence,
                details: SignalMetadata::Spoofing {
                    spoof_type: SpoofType::Layering,
                    wall_size: track.peak,
                    cancellation_ratio,
                    executed_volume: track.executed,
                    band_center,
                },
            }));
        }

        if let Some(similarity) = similarity {
            if similarity >= self.config.algorithmic_pattern_threshold {
                out.push(DetectorEvent::Anomaly(AnomalyEvent {
                    id: Uuid::new_v4(),
                    kind: "spoofing".to_string(),
                    side: signal_side,
                    price: band_center,
                    time: now,
                    confidence: similarity.min(confidence.max(0.5)),
                    details: SignalMetadata::Spoofing {
                        spoof_type: SpoofType::Algorithmic,
                        wall_size: track.peak,
                        cancellation_ratio,
                        executed_volume: track.executed,
                        band_center,
                    },
                }));
            }
        }

        out
    }
}

impl Detector for SpoofingDetector {
    fn id(&self) -> &str {
        &self.id
    }

    fn handle(&mut self, event: &EnrichedTradeEvent) -> Vec<DetectorEvent> {
        // Executions against an active wall: a buy consumes the ask side.
        let band = self.grid.band(event.price_ticks, self.config.wall_ticks);
        let wall_side = if event.buyer_is_maker {
            BookSide::Bid
        } else {
            BookSide::Ask
        };
        if let Some(track) = self.tracks.get_mut(&(band, wall_side)) {
            track.executed += event.quantity;
        }
        Vec::new()
    }

    fn on_depth(&mut self, delta: &DepthDelta) -> Vec<DetectorEvent> {
        self.drop_stale_tracks(delta.time);

        let band = self.grid.band(delta.price_ticks, self.config.wall_ticks);
        let key = (band, delta.side);
        let qty = {
            let entry = self.band_qty.entry(key).or_insert(0.0);
            *entry = (*entry + delta.new_qty - delta.prev_qty).max(0.0);
            *entry
        };

        if delta.new_qty > delta.prev_qty {
            // Growth: open or extend a wall observation.
            match self.tracks.get_mut(&key) {
                Some(track) => track.peak = track.peak.max(qty),
                None => {
                    if qty >= self.config.min_wall_size {
                        self.tracks.insert(
                            key,
                            WallTrack {
                                appeared_at: delta.time,
                                peak: qty,
                                executed: 0.0,
                            },
                        );
                    }
                }
            }
            return Vec::new();
        }

        // Shrink: candidate cancellation.
        let Some(track) = self.tracks.get(&key).copied() else {
            return Vec::new();
        };
        if delta.time - track.appeared_at > self.config.rapid_cancellation_ms {
            self.tracks.remove(&key);
            return Vec::new();
        }
        if track.peak <= 0.0 {
            self.tracks.remove(&key);
            return Vec::new();
        }

        let cancellation_ratio = (track.peak - qty) / track.peak;
        if cancellation_ratio < self.config.max_cancellation_ratio {
            return Vec::new();
        }
        if track.executed > self.config.max_execution_fraction * track.peak {
            // The wall actually traded; genuine liquidity, not spoof.
            self.tracks.remove(&key);
            return Vec::new();
        }

        self.tracks.remove(&key);
        self.fire(band, delta.side, track, cancellation_ratio, delta.time)
    }
}
