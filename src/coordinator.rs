//! Signal coordination
//!
//! Consumes candidates from every detector, folds near-duplicates, applies
//! the optional confirmation hold, enforces the global per-side cooldown,
//! and forwards finalized signals. A coordinated signal moves
//! `pending → confirmed | invalidated | expired`; terminal states emit
//! exactly once and drop their state.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

use crate::config::CoordinatorConfig;
use crate::events::{Signal, SignalCandidate, SignalKind, SignalMetadata, SignalStatus};
use crate::metrics::PipelineMetrics;
use crate::ticks::TickGrid;
use crate::types::Side;

#[derive(Debug, Clone, Copy)]
struct RecentEmission {
    side: Side,
    price_ticks: i64,
    time: i64,
}

#[derive(Debug, Clone)]
struct PendingSignal {
    candidate: SignalCandidate,
    deadline: i64,
    reference_ticks: i64,
}

pub struct SignalCoordinator {
    config: CoordinatorConfig,
    grid: TickGrid,
    confirm_kinds: HashSet<SignalKind>,
    recent: VecDeque<RecentEmission>,
    pending: Vec<PendingSignal>,
    last_side_emission: HashMap<Side, i64>,
    metrics: Arc<PipelineMetrics>,
}

impl SignalCoordinator {
    pub fn new(config: CoordinatorConfig, grid: TickGrid, metrics: Arc<PipelineMetrics>) -> Self {
        let confirm_kinds = config
            .confirm_kinds
            .iter()
            .filter_map(|name| match name.as_str() {
                "absorption" => Some(SignalKind::Absorption),
                "exhaustion" => Some(SignalKind::Exhaustion),
                "accumulation" => Some(SignalKind::Accumulation),
                "distribution" => Some(SignalKind::Distribution),
                "cvd_divergence" => Some(SignalKind::CvdDivergence),
                "spoofing" => Some(SignalKind::Spoofing),
                "hidden_liquidity" => Some(SignalKind::HiddenLiquidity),
                _ => None,
            })
            .collect();
        Self {
            config,
            grid,
            confirm_kinds,
            recent: VecDeque::new(),
            pending: Vec::new(),
            last_side_emission: HashMap::new(),
            metrics,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn within_tolerance(&self, a_ticks: i64, b_ticks: i64) -> bool {
        let reference = self.grid.to_price_f64(b_ticks);
        if reference <= 0.0 {
            return a_ticks == b_ticks;
        }
        let distance = (a_ticks - b_ticks).abs() as f64 * self.grid.tick_size_f64();
        distance < self.config.dedup_tolerance * reference
    }

    fn evict_recent(&mut self, now: i64) {
        let cutoff = now - self.config.dedup_window_ms;
        while let Some(front) = self.recent.front() {
            if front.time >= cutoff {
                break;
            }
            self.recent.pop_front();
        }
    }

    /// Offer one detector candidate; returns any signals finalized by it
    pub fn offer(&mut self, candidate: SignalCandidate) -> Vec<Signal> {
        self.metrics.record_candidate_offered();
        let now = candidate.time;
        self.evict_recent(now);

        // Fold near-duplicates of recent emissions.
        let shadowed = self
            .recent
            .iter()
            .any(|recent| {
                recent.side == candidate.side
                    && self.within_tolerance(candidate.price_ticks, recent.price_ticks)
            });
        if shadowed {
            self.metrics.record_candidate_deduplicated();
            debug!(
                detector = %candidate.detector_id,
                side = candidate.side.as_str(),
                price = %candidate.price,
                "Candidate folded into a recent emission"
            );
            return Vec::new();
        }

        // Fold into an already-pending near-duplicate; highest confidence wins.
        let tick_size = self.grid.tick_size_f64();
        let tolerance = self.config.dedup_tolerance;
        if let Some(pending) = self.pending.iter_mut().find(|pending| {
            pending.candidate.side == candidate.side && {
                let reference = pending.candidate.price_ticks as f64 * tick_size;
                let distance =
                    (candidate.price_ticks - pending.candidate.price_ticks).abs() as f64 * tick_size;
                reference > 0.0 && distance < tolerance * reference
            }
        }) {
            self.metrics.record_candidate_deduplicated();
            if candidate.confidence > pending.candidate.confidence {
                pending.candidate = candidate;
            }
            return Vec::new();
        }

        if self.confirm_kinds.contains(&candidate.kind) {
            let deadline = now + self.config.confirmation_window_ms;
            let reference_ticks = candidate.price_ticks;
            self.pending.push(PendingSignal {
                candidate,
                deadline,
                reference_ticks,
            });
            return Vec::new();
        }

        self.finalize(candidate, SignalStatus::Unconfirmed, now)
            .into_iter()
            .collect()
    }

    /// Observe a traded price; drives pending confirmations and expiry
    pub fn on_price(&mut self, price_ticks: i64, now: i64) -> Vec<Signal> {
        let threshold = self.config.confirm_threshold;
        let tick_size = self.grid.tick_size_f64();
        let mut finalized = Vec::new();
        let mut keep = Vec::new();

        for pending in std::mem::take(&mut self.pending) {
            let reference = self.grid.to_price_f64(pending.reference_ticks);
            if reference <= 0.0 {
                continue;
            }
            let signed_move = (price_ticks - pending.reference_ticks) as f64 * tick_size / reference;
            // Positive means "moved in the predicted direction".
            let directional = match pending.candidate.side {
                Side::Buy => signed_move,
                Side::Sell => -signed_move,
            };

            if directional >= threshold {
                finalized.push((pending, SignalStatus::Confirmed, directional));
            } else if directional <= -threshold {
                finalized.push((pending, SignalStatus::Invalidated, directional));
            } else if now >= pending.deadline {
                finalized.push((pending, SignalStatus::Expired, directional));
            } else {
                keep.push(pending);
            }
        }
        self.pending = keep;

        let mut out = Vec::new();
        for (pending, status, observed_move) in finalized {
            let mut candidate = pending.candidate;
            if status == SignalStatus::Confirmed {
                candidate = SignalCandidate {
                    metadata: SignalMetadata::Coordinated {
                        origin_kind: candidate.kind,
                        origin_id: candidate.id,
                        observed_move,
                    },
                    kind: SignalKind::Confirmed,
                    ..candidate
                };
            }
            out.extend(self.finalize(candidate, status, now));
        }
        out
    }

    /// Expire overdue pending signals without a fresh price observation
    pub fn tick(&mut self, now: i64) -> Vec<Signal> {
        let overdue: Vec<PendingSignal> = {
            let (expired, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
                .into_iter()
                .partition(|pending| now >= pending.deadline);
            self.pending = keep;
            expired
        };
        overdue
            .into_iter()
            .flat_map(|pending| self.finalize(pending.candidate, SignalStatus::Expired, now))
            .collect()
    }

    fn finalize(
        &mut self,
        candidate: SignalCandidate,
        status: SignalStatus,
        now: i64,
    ) -> Option<Signal> {
        // Global per-side cooldown against signal floods.
        if let Some(last) = self.last_side_emission.get(&candidate.side) {
            if now - last < self.config.global_cooldown_ms {
                self.metrics.record_signal_suppressed();
                debug!(
                    side = candidate.side.as_str(),
                    "Signal suppressed by global cooldown"
                );
                return None;
            }
        }
        self.last_side_emission.insert(candidate.side, now);
        self.recent.push_back(RecentEmission {
            side: candidate.side,
            price_ticks: candidate.price_ticks,
            time: now,
        });
        self.metrics.record_signal_emitted();

        Some(Signal {
            id: candidate.id,
            kind: candidate.kind,
            status,
            side: candidate.side,
            price: candidate.price,
            time: now,
            confidence: candidate.confidence,
            take_profit: None,
            stop_loss: None,
            metadata: candidate.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use uuid::Uuid;

    fn grid() -> TickGrid {
        TickGrid::new(Decimal::from_str("0.01").unwrap(), 2).unwrap()
    }

    fn candidate(time: i64, side: Side, price_ticks: i64, confidence: f64) -> SignalCandidate {
        SignalCandidate {
            id: Uuid::new_v4(),
            detector_id: "absorption".to_string(),
            kind: SignalKind::Absorption,
            side,
            price: grid().to_price(price_ticks),
            price_ticks,
            time,
            confidence,
            metadata: SignalMetadata::Absorption {
                aggressive_volume: 300.0,
                passive_volume: 700.0,
                absorption_ratio: 0.3,
                passive_multiplier: 2.3,
                price_efficiency: 0.0,
                confluent_zones: 3,
                score: confidence,
            },
        }
    }

    fn coordinator(config: CoordinatorConfig) -> SignalCoordinator {
        SignalCoordinator::new(config, grid(), Arc::new(PipelineMetrics::new()))
    }

    #[test]
    fn test_unconfirmed_passthrough_is_default() {
        let mut coordinator = coordinator(CoordinatorConfig::default());
        let signals = coordinator.offer(candidate(1000, Side::Buy, 6500, 0.9));
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].status, SignalStatus::Unconfirmed);
        assert_eq!(signals[0].kind, SignalKind::Absorption);
    }

    #[test]
    fn test_near_duplicates_fold_into_one() {
        let mut coordinator = coordinator(CoordinatorConfig {
            global_cooldown_ms: 0,
            ..Default::default()
        });
        assert_eq!(coordinator.offer(candidate(1000, Side::Buy, 6500, 0.9)).len(), 1);
        // 1 tick away on 65.00 is well inside the 5 bps tolerance.
        assert!(coordinator.offer(candidate(1500, Side::Buy, 6501, 0.8)).is_empty());
        // Opposite side is never folded.
        assert_eq!(coordinator.offer(candidate(1600, Side::Sell, 6500, 0.8)).len(), 1);
    }

    #[test]
    fn test_confirmation_requires_directional_move() {
        let config = CoordinatorConfig {
            confirm_kinds: vec!["absorption".to_string()],
            confirm_threshold: 0.001,
            ..Default::default()
        };
        let mut coordinator = coordinator(config);

        assert!(coordinator.offer(candidate(1000, Side::Buy, 6500, 0.9)).is_empty());
        assert_eq!(coordinator.pending_count(), 1);

        // +0.05% is below the 0.1% threshold: still pending.
        assert!(coordinator.on_price(6503, 2000).is_empty());
        // +0.12% confirms.
        let signals = coordinator.on_price(6508, 3000);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].status, SignalStatus::Confirmed);
        assert_eq!(signals[0].kind, SignalKind::Confirmed);
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[test]
    fn test_adverse_move_invalidates() {
        let config = CoordinatorConfig {
            confirm_kinds: vec!["absorption".to_string()],
            confirm_threshold: 0.001,
            ..Default::default()
        };
        let mut coordinator = coordinator(config);
        coordinator.offer(candidate(1000, Side::Buy, 6500, 0.9));

        let signals = coordinator.on_price(6492, 2000);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].status, SignalStatus::Invalidated);
        assert_eq!(signals[0].kind, SignalKind::Absorption);
    }

    #[test]
    fn test_pending_expires_at_deadline() {
        let config = CoordinatorConfig {
            confirm_kinds: vec!["absorption".to_string()],
            confirmation_window_ms: 5000,
            ..Default::default()
        };
        let mut coordinator = coordinator(config);
        coordinator.offer(candidate(1000, Side::Buy, 6500, 0.9));

        let signals = coordinator.tick(7000);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].status, SignalStatus::Expired);
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[test]
    fn test_global_cooldown_suppresses_floods() {
        let metrics = Arc::new(PipelineMetrics::new());
        let mut coordinator = SignalCoordinator::new(
            CoordinatorConfig {
                global_cooldown_ms: 10_000,
                dedup_tolerance: 1e-9,
                ..Default::default()
            },
            grid(),
            Arc::clone(&metrics),
        );

        assert_eq!(coordinator.offer(candidate(1000, Side::Buy, 6500, 0.9)).len(), 1);
        // Far enough not to dedup, but inside the cooldown.
        assert!(coordinator.offer(candidate(2000, Side::Buy, 7000, 0.9)).is_empty());
        assert_eq!(metrics.snapshot().signals_suppressed_cooldown, 1);
        // Other side has its own cooldown.
        assert_eq!(coordinator.offer(candidate(2500, Side::Sell, 6500, 0.9)).len(), 1);
    }
}
