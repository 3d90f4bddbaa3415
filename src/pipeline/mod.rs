//! Processing pipeline
//!
//! One logical processing task per symbol consumes the bounded ingress
//! queue, runs the preprocessor, fans each enriched trade through the
//! detector hosts, coordinates candidates, and emits typed payloads onto
//! the broadcast bus. Suspension points exist only at queue dequeues and
//! bus emissions; everything in between is synchronous.

pub mod ingress;
pub mod preprocessor;

pub use ingress::{IngressEvent, IngressQueue};
pub use preprocessor::OrderFlowPreprocessor;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::book::OrderBookState;
use crate::config::EngineConfig;
use crate::coordinator::SignalCoordinator;
use crate::detectors::{
    AbsorptionDetector, DeltaCvdDetector, DetectorHost, ExhaustionDetector, HiddenOrderDetector,
    SpoofingDetector, ZoneDirection, ZoneTrackerDetector,
};
use crate::error::Result;
use crate::events::{DetectorEvent, Signal};
use crate::metrics::PipelineMetrics;
use crate::server::{ErrorUi, OrderBookUi, Payload, PriceLevelUi, TradeUi};
use crate::ticks::TickGrid;
use crate::types::EnrichedTradeEvent;

/// The synchronous heart of the pipeline
pub struct Engine {
    preprocessor: OrderFlowPreprocessor,
    hosts: Vec<DetectorHost>,
    coordinator: SignalCoordinator,
    metrics: Arc<PipelineMetrics>,
    last_trade_at: Arc<AtomicI64>,
    degraded: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(config: &EngineConfig, metrics: Arc<PipelineMetrics>) -> Result<Self> {
        config.validate()?;
        let grid = TickGrid::new(config.global.tick_size, config.global.price_precision)?;

        let book = OrderBookState::new(
            grid.clone(),
            config.orderbook.clone(),
            Arc::clone(&metrics),
        );
        let degraded = Arc::new(AtomicBool::new(false));
        let preprocessor = OrderFlowPreprocessor::new(
            grid.clone(),
            config.pipeline.clone(),
            config.zones.clone(),
            book,
            Arc::clone(&metrics),
            Arc::clone(&degraded),
        );
        let coordinator = SignalCoordinator::new(
            config.coordinator.clone(),
            grid.clone(),
            Arc::clone(&metrics),
        );
        let hosts = build_detectors(config, &grid, &metrics);

        Ok(Self {
            preprocessor,
            hosts,
            coordinator,
            metrics,
            last_trade_at: Arc::new(AtomicI64::new(0)),
            degraded,
        })
    }

    /// Shared degraded flag, set by the watchdog and cleared on resync
    pub fn degraded_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.degraded)
    }

    pub fn book(&self) -> &OrderBookState {
        self.preprocessor.book()
    }

    pub fn pending_signals(&self) -> usize {
        self.coordinator.pending_count()
    }

    pub fn last_trade_at(&self) -> Arc<AtomicI64> {
        Arc::clone(&self.last_trade_at)
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Process one ingress event into zero or more egress payloads
    pub fn process(&mut self, event: IngressEvent) -> Vec<Payload> {
        match event {
            IngressEvent::Trade(raw) => {
                self.last_trade_at.store(raw.event_time, Ordering::Relaxed);
                match self.preprocessor.handle_trade(&raw) {
                    Ok(Some(enriched)) => self.process_enriched(enriched),
                    Ok(None) => Vec::new(),
                    Err(error) => {
                        // Class-1 drops are counted in the preprocessor.
                        debug!(error = %error, "Trade dropped");
                        Vec::new()
                    }
                }
            }
            IngressEvent::Depth(update) => {
                let deltas = self.preprocessor.handle_depth(&update);
                let mut detector_events = Vec::new();
                for delta in &deltas {
                    for host in &mut self.hosts {
                        detector_events.extend(host.process_depth(delta));
                    }
                }
                let mut signals = Vec::new();
                let mut out = Vec::new();
                for event in detector_events {
                    self.route(event, &mut out, &mut signals);
                }
                push_signals(&mut out, signals);
                out
            }
            IngressEvent::Snapshot(snapshot) => {
                self.preprocessor.handle_snapshot(&snapshot);
                Vec::new()
            }
        }
    }

    fn process_enriched(&mut self, enriched: EnrichedTradeEvent) -> Vec<Payload> {
        let mut out = vec![Payload::Trade(TradeUi::from(&enriched))];
        let mut signals: Vec<Signal> = Vec::new();

        // Pending confirmations react to the observed price first.
        signals.extend(
            self.coordinator
                .on_price(enriched.price_ticks, enriched.event_time),
        );

        let mut detector_events = Vec::new();
        for host in &mut self.hosts {
            detector_events.extend(host.process_trade(&enriched));
        }
        for event in detector_events {
            self.route(event, &mut out, &mut signals);
        }

        push_signals(&mut out, signals);
        out
    }

    fn route(&mut self, event: DetectorEvent, out: &mut Vec<Payload>, signals: &mut Vec<Signal>) {
        match event {
            DetectorEvent::SignalCandidate(candidate) => {
                signals.extend(self.coordinator.offer(candidate));
            }
            DetectorEvent::ZoneUpdate(update) => out.push(Payload::ZoneUpdate(update)),
            DetectorEvent::ZoneSignal(signal) => out.push(Payload::ZoneSignal(signal)),
            DetectorEvent::Anomaly(anomaly) => out.push(Payload::Anomaly(anomaly)),
            DetectorEvent::SupportResistance(level) => {
                out.push(Payload::SupportResistanceLevel(level))
            }
        }
    }

    /// Compact book snapshot for the periodic `orderbook` message
    pub fn orderbook_payload(&self, half_width_ticks: i64) -> Option<Payload> {
        let book = self.preprocessor.book();
        let center = match (book.best_bid_ticks(), book.best_ask_ticks()) {
            (Some(bid), Some(ask)) => (bid + ask) / 2,
            (Some(bid), None) => bid,
            (None, Some(ask)) => ask,
            (None, None) => return None,
        };
        let view = book.snapshot_near(center, half_width_ticks, self.last_trade_at.load(Ordering::Relaxed));
        let price_levels = view
            .levels
            .iter()
            .map(|level| PriceLevelUi {
                price: level.price,
                bid: level.bid,
                ask: level.ask,
            })
            .collect();
        Some(Payload::Orderbook(OrderBookUi { price_levels }))
    }

    /// Expire overdue pending confirmations during quiet tape
    pub fn sweep_pending(&mut self, now: i64) -> Vec<Payload> {
        let mut out = Vec::new();
        push_signals(&mut out, self.coordinator.tick(now));
        out
    }

    /// Periodic class-3 check; a violation surfaces as a short `error`
    /// message with a correlation id, details stay in the logs
    pub fn verify_invariants(&mut self) -> Option<Payload> {
        match self.preprocessor.book_mut().check_disjointness() {
            Ok(()) => None,
            Err(error) => {
                let correlation_id = uuid::Uuid::new_v4();
                tracing::error!(
                    correlation_id = %correlation_id,
                    error = %error,
                    "Invariant violation repaired"
                );
                Some(Payload::Error(ErrorUi {
                    correlation_id,
                    message: "internal invariant violation; state repaired".to_string(),
                }))
            }
        }
    }
}

fn push_signals(out: &mut Vec<Payload>, signals: Vec<Signal>) {
    match signals.len() {
        0 => {}
        1 => out.push(Payload::Signal(signals.into_iter().next().expect("len checked"))),
        // Near-simultaneous signals travel grouped for display.
        _ => out.push(Payload::SignalBundle(signals)),
    }
}

fn build_detectors(
    config: &EngineConfig,
    grid: &TickGrid,
    metrics: &Arc<PipelineMetrics>,
) -> Vec<DetectorHost> {
    vec![
        DetectorHost::new(
            Box::new(AbsorptionDetector::new(
                "absorption",
                config.absorption.clone(),
                grid.clone(),
            )),
            config.absorption.event_cooldown_ms,
            Arc::clone(metrics),
        ),
        DetectorHost::new(
            Box::new(ExhaustionDetector::new(
                "exhaustion",
                config.exhaustion.clone(),
                grid.clone(),
            )),
            config.exhaustion.event_cooldown_ms,
            Arc::clone(metrics),
        ),
        DetectorHost::new(
            Box::new(ZoneTrackerDetector::new(
                "accumulation",
                config.accumulation.clone(),
                grid.clone(),
                ZoneDirection::Accumulation,
            )),
            config.accumulation.event_cooldown_ms,
            Arc::clone(metrics),
        ),
        DetectorHost::new(
            Box::new(ZoneTrackerDetector::new(
                "distribution",
                config.distribution.clone(),
                grid.clone(),
                ZoneDirection::Distribution,
            )),
            config.distribution.event_cooldown_ms,
            Arc::clone(metrics),
        ),
        DetectorHost::new(
            Box::new(DeltaCvdDetector::new(
                "delta_cvd",
                config.delta_cvd.clone(),
                grid.clone(),
            )),
            config.delta_cvd.event_cooldown_ms,
            Arc::clone(metrics),
        ),
        DetectorHost::new(
            Box::new(SpoofingDetector::new(
                "spoofing",
                config.spoofing.clone(),
                grid.clone(),
            )),
            config.spoofing.event_cooldown_ms,
            Arc::clone(metrics),
        ),
        DetectorHost::new(
            Box::new(HiddenOrderDetector::new(
                "hidden_order",
                config.hidden_order.clone(),
                grid.clone(),
            )),
            config.hidden_order.event_cooldown_ms,
            Arc::clone(metrics),
        ),
    ]
}

/// Drive the engine from the ingress queue until the queue producers stop
///
/// The periodic branch emits `stats` and `orderbook` messages and expires
/// overdue confirmations; the watchdog marks the pipeline degraded after
/// upstream silence.
pub async fn run(
    mut engine: Engine,
    queue: Arc<IngressQueue>,
    bus: broadcast::Sender<Payload>,
    config: EngineConfig,
    degraded: Arc<AtomicBool>,
    storage_tx: Option<tokio::sync::mpsc::UnboundedSender<crate::storage::StorageEvent>>,
) {
    let stats_interval =
        tokio::time::Duration::from_millis(config.pipeline.stats_interval_ms as u64);
    let mut ticker = tokio::time::interval(stats_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let last_trade_at = engine.last_trade_at();

    info!(symbol = %config.global.symbol, "Processing pipeline started");
    loop {
        tokio::select! {
            event = queue.pop() => {
                if let (Some(tx), IngressEvent::Trade(raw)) = (&storage_tx, &event) {
                    let _ = tx.send(crate::storage::StorageEvent::Trade(raw.into()));
                }
                for payload in engine.process(event) {
                    if let Some(tx) = &storage_tx {
                        persist_signals(tx, &payload);
                    }
                    let _ = bus.send(payload);
                }
            }
            _ = ticker.tick() => {
                let now = chrono::Utc::now().timestamp_millis();

                // Watchdog: upstream silence degrades the pipeline until a
                // fresh snapshot arrives. External reconnection logic is
                // signalled by the adapter; state is preserved here.
                let last = last_trade_at.load(Ordering::Relaxed);
                if last > 0
                    && now - last > config.pipeline.trade_timeout_ms
                    && !degraded.swap(true, Ordering::Relaxed)
                {
                    warn!(
                        silent_ms = now - last,
                        "No trades within the timeout; pipeline degraded until resync"
                    );
                }

                let _ = bus.send(Payload::Stats(engine.metrics().snapshot()));
                if let Some(orderbook) = engine.orderbook_payload(config.pipeline.depth_snapshot_half_width_ticks) {
                    let _ = bus.send(orderbook);
                }
                if let Some(error) = engine.verify_invariants() {
                    let _ = bus.send(error);
                }
                for payload in engine.sweep_pending(now) {
                    if let Some(tx) = &storage_tx {
                        persist_signals(tx, &payload);
                    }
                    let _ = bus.send(payload);
                }
            }
        }
    }
}

fn persist_signals(
    tx: &tokio::sync::mpsc::UnboundedSender<crate::storage::StorageEvent>,
    payload: &Payload,
) {
    let signals: Vec<&Signal> = match payload {
        Payload::Signal(signal) => vec![signal],
        Payload::SignalBundle(signals) => signals.iter().collect(),
        _ => return,
    };
    for signal in signals {
        match crate::storage::SignalRecord::from_signal(signal) {
            Ok(record) => {
                let _ = tx.send(crate::storage::StorageEvent::Signal(record));
            }
            Err(error) => warn!(error = %error, "Failed to encode signal for persistence"),
        }
    }
}
