//! Detector framework
//!
//! Detectors are pure-synchronous transformations of an enriched trade (and,
//! for the book-watching detectors, depth deltas) into zero or more events.
//! The host wraps every detector with the shared concerns: per-side emission
//! cooldown, panic containment with degraded marking, and failure counters.
//! Nothing a detector does can propagate into the pipeline.

mod absorption;
mod accumulation;
mod delta_cvd;
mod exhaustion;
mod hidden_order;
mod spoofing;

pub use absorption::AbsorptionDetector;
pub use accumulation::{ZoneDirection, ZoneTrackerDetector};
pub use delta_cvd::DeltaCvdDetector;
pub use exhaustion::ExhaustionDetector;
pub use hidden_order::HiddenOrderDetector;
pub use spoofing::SpoofingDetector;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, warn};

use crate::events::DetectorEvent;
use crate::metrics::PipelineMetrics;
use crate::types::{DepthDelta, EnrichedTradeEvent, Side};

/// Consecutive failures before a detector is marked degraded
const DEGRADE_AFTER_FAILURES: u32 = 5;

/// A microstructure pattern detector
pub trait Detector: Send {
    fn id(&self) -> &str;

    /// Process one enriched trade
    fn handle(&mut self, event: &EnrichedTradeEvent) -> Vec<DetectorEvent>;

    /// Observe a per-price book change (wall tracking); default no-op
    fn on_depth(&mut self, _delta: &DepthDelta) -> Vec<DetectorEvent> {
        Vec::new()
    }
}

/// Wraps a detector with cooldowns, metrics, and exception safety
pub struct DetectorHost {
    inner: Box<dyn Detector>,
    event_cooldown_ms: i64,
    last_emission: HashMap<Side, i64>,
    consecutive_failures: u32,
    degraded: bool,
    metrics: Arc<PipelineMetrics>,
}

impl DetectorHost {
    pub fn new(
        inner: Box<dyn Detector>,
        event_cooldown_ms: i64,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            inner,
            event_cooldown_ms,
            last_emission: HashMap::new(),
            consecutive_failures: 0,
            degraded: false,
            metrics,
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Clear the degraded state after operator intervention
    pub fn reset(&mut self) {
        self.degraded = false;
        self.consecutive_failures = 0;
    }

    /// Run the detector on a trade; never lets a failure escape
    pub fn process_trade(&mut self, event: &EnrichedTradeEvent) -> Vec<DetectorEvent> {
        let now = event.event_time;
        let outcome = catch_unwind(AssertUnwindSafe(|| self.inner.handle(event)));
        self.finish(outcome, now)
    }

    /// Run the detector on a depth delta; same containment as trades
    pub fn process_depth(&mut self, delta: &DepthDelta) -> Vec<DetectorEvent> {
        let now = delta.time;
        let outcome = catch_unwind(AssertUnwindSafe(|| self.inner.on_depth(delta)));
        self.finish(outcome, now)
    }

    fn finish(
        &mut self,
        outcome: std::thread::Result<Vec<DetectorEvent>>,
        now: i64,
    ) -> Vec<DetectorEvent> {
        match outcome {
            Ok(events) => {
                self.consecutive_failures = 0;
                if self.degraded {
                    // Degraded detectors still consume events, never emit.
                    return Vec::new();
                }
                self.apply_cooldown(events, now)
            }
            Err(_) => {
                self.consecutive_failures += 1;
                self.metrics.record_detector_failure();
                error!(
                    detector = self.inner.id(),
                    consecutive = self.consecutive_failures,
                    "Detector failed; event discarded"
                );
                if !self.degraded && self.consecutive_failures >= DEGRADE_AFTER_FAILURES {
                    self.degraded = true;
                    warn!(
                        detector = self.inner.id(),
                        "Detector marked degraded until explicitly reset"
                    );
                }
                Vec::new()
            }
        }
    }

    /// Suppress same-(detector, side) candidates inside the cooldown window
    fn apply_cooldown(&mut self, events: Vec<DetectorEvent>, now: i64) -> Vec<DetectorEvent> {
        events
            .into_iter()
            .filter(|event| match event {
                DetectorEvent::SignalCandidate(candidate) => {
                    match self.last_emission.get(&candidate.side) {
                        Some(last) if now - last < self.event_cooldown_ms => false,
                        _ => {
                            self.last_emission.insert(candidate.side, now);
                            true
                        }
                    }
                }
                _ => true,
            })
            .collect()
    }
}
