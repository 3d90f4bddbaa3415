//! End-to-end pipeline scenarios
//!
//! Drives the full engine (preprocessor, detectors, coordinator) through
//! raw ingress events and asserts on the egress payloads.

use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

use orderflow_engine::config::EngineConfig;
use orderflow_engine::events::{
    ExpectedDirection, Signal, SignalKind, SignalMetadata, SpoofType, ZoneUpdateKind,
};
use orderflow_engine::metrics::PipelineMetrics;
use orderflow_engine::pipeline::{Engine, IngressEvent};
use orderflow_engine::server::Payload;
use orderflow_engine::types::{DepthEntry, DepthUpdate, RawTrade, Side};

fn engine(config: EngineConfig) -> (Engine, Arc<PipelineMetrics>) {
    let metrics = Arc::new(PipelineMetrics::new());
    let engine = Engine::new(&config, Arc::clone(&metrics)).expect("valid config");
    (engine, metrics)
}

fn trade(id: u64, time: i64, price: &str, quantity: f64, buyer_is_maker: bool) -> IngressEvent {
    IngressEvent::Trade(RawTrade {
        trade_id: id,
        event_time: time,
        price: Decimal::from_str(price).unwrap(),
        quantity,
        buyer_is_maker,
    })
}

fn depth(time: i64, bids: Vec<(&str, f64)>, asks: Vec<(&str, f64)>) -> IngressEvent {
    IngressEvent::Depth(DepthUpdate {
        event_time: time,
        bids: bids
            .into_iter()
            .map(|(price, quantity)| DepthEntry {
                price: Decimal::from_str(price).unwrap(),
                quantity,
            })
            .collect(),
        asks: asks
            .into_iter()
            .map(|(price, quantity)| DepthEntry {
                price: Decimal::from_str(price).unwrap(),
                quantity,
            })
            .collect(),
    })
}

fn signals_of(payloads: &[Payload]) -> Vec<Signal> {
    payloads
        .iter()
        .flat_map(|payload| match payload {
            Payload::Signal(signal) => vec![signal.clone()],
            Payload::SignalBundle(signals) => signals.clone(),
            _ => Vec::new(),
        })
        .collect()
}

/// Detector sections not under test get gates no feed can reach.
fn quiet_other_detectors(config: &mut EngineConfig, keep: SignalKind) {
    if keep != SignalKind::Absorption {
        config.absorption.min_agg_volume = 1e12;
    }
    if keep != SignalKind::Exhaustion {
        config.exhaustion.min_agg_volume = 1e12;
    }
    if keep != SignalKind::HiddenLiquidity {
        config.hidden_order.min_hidden_volume = 1e12;
    }
    if keep != SignalKind::Spoofing {
        config.spoofing.min_wall_size = 1e12;
    }
    if keep != SignalKind::CvdDivergence {
        config.delta_cvd.min_vol_per_sec = 1e12;
    }
}

// ---------------------------------------------------------------------------
// S1 — buy absorption
// ---------------------------------------------------------------------------

#[test]
fn s1_buy_absorption() {
    let mut config = EngineConfig::default();
    config.absorption.min_agg_volume = 200.0;
    config.absorption.max_absorption_ratio = 0.9;
    config.absorption.min_passive_multiplier = 2.2;
    config.absorption.price_efficiency_threshold = 0.0047;
    config.absorption.event_cooldown_ms = 60_000;
    quiet_other_detectors(&mut config, SignalKind::Absorption);
    let (mut engine, metrics) = engine(config);

    let mut payloads = Vec::new();
    payloads.extend(engine.process(depth(0, vec![("65.00", 700.0)], vec![("65.10", 50.0)])));

    // 300 units of aggressive sell at 65.00 over 4 seconds while the bid
    // holds at 700 (replenished after each consumption).
    for i in 0..10i64 {
        let t = 100 + i * 400;
        payloads.extend(engine.process(trade(i as u64 + 1, t, "65.00", 30.0, true)));
        payloads.extend(engine.process(depth(t + 50, vec![("65.00", 700.0)], vec![])));
    }

    let signals = signals_of(&payloads);
    let absorption: Vec<&Signal> = signals
        .iter()
        .filter(|signal| signal.kind == SignalKind::Absorption)
        .collect();
    assert_eq!(absorption.len(), 1, "exactly one absorption signal");
    let signal = absorption[0];
    assert_eq!(signal.side, Side::Buy);
    assert_eq!(signal.price, Decimal::from_str("65.00").unwrap());
    assert!(signal.confidence >= 0.8, "confidence {}", signal.confidence);

    // Every offered candidate is attributable in the coordinator.
    let snap = metrics.snapshot();
    assert_eq!(
        snap.candidates_offered,
        snap.signals_emitted + snap.candidates_deduplicated + snap.signals_suppressed_cooldown
    );
}

// ---------------------------------------------------------------------------
// S2 — bid exhaustion
// ---------------------------------------------------------------------------

#[test]
fn s2_bid_exhaustion() {
    let mut config = EngineConfig::default();
    config.exhaustion.exhaustion_threshold = 0.5;
    config.exhaustion.depletion_volume_threshold = 750.0;
    config.exhaustion.depletion_ratio_threshold = 0.2;
    config.exhaustion.min_agg_volume = 500.0;
    quiet_other_detectors(&mut config, SignalKind::Exhaustion);
    let (mut engine, _) = engine(config);

    let mut payloads = Vec::new();
    payloads.extend(engine.process(depth(
        0,
        vec![("65.00", 1000.0)],
        vec![("65.01", 400.0)],
    )));

    // Aggressive sells consume 800 over 10s without replenishment.
    for i in 0..8i64 {
        let t = 1000 + i * 1250;
        payloads.extend(engine.process(trade(i as u64 + 1, t, "65.00", 100.0, true)));
    }

    let signals = signals_of(&payloads);
    let exhaustion: Vec<&Signal> = signals
        .iter()
        .filter(|signal| signal.kind == SignalKind::Exhaustion)
        .collect();
    assert_eq!(exhaustion.len(), 1);
    assert_eq!(exhaustion[0].side, Side::Sell);
    assert_eq!(exhaustion[0].price, Decimal::from_str("65.00").unwrap());
}

// ---------------------------------------------------------------------------
// S3 — accumulation zone
// ---------------------------------------------------------------------------

#[test]
fn s3_accumulation_zone() {
    let mut config = EngineConfig::default();
    config.accumulation.ratio_threshold = 0.55;
    config.accumulation.min_zone_volume = 100.0;
    config.accumulation.min_candidate_duration_ms = 60_000;
    quiet_other_detectors(&mut config, SignalKind::Accumulation);
    let (mut engine, _) = engine(config);

    let mut payloads = Vec::new();
    payloads.extend(engine.process(depth(0, vec![("84.95", 50.0)], vec![("85.06", 50.0)])));

    // 100 trades in [85.00, 85.04] over ~61s, 70% aggressive buys.
    for i in 0..100i64 {
        let t = 1000 + i * 610;
        let price = format!("85.0{}", i % 5);
        let buyer_is_maker = i % 10 >= 7;
        payloads.extend(engine.process(trade(i as u64 + 1, t, &price, 2.0, buyer_is_maker)));
    }

    let created = payloads
        .iter()
        .find_map(|payload| match payload {
            Payload::ZoneUpdate(update) if update.update_type == ZoneUpdateKind::ZoneCreated => {
                Some(update)
            }
            _ => None,
        })
        .expect("zone_created update");
    assert_eq!(created.zone.kind, SignalKind::Accumulation);
    // Bucket center of [85.00, 85.05).
    assert_eq!(created.zone.center, Decimal::from_str("85.025").unwrap());

    // Keep buying: the zone strengthens and emits an actionable signal.
    for i in 0..40i64 {
        let t = 70_000 + i * 500;
        payloads.extend(engine.process(trade(200 + i as u64, t, "85.02", 2.0, false)));
    }

    let zone_signal = payloads
        .iter()
        .find_map(|payload| match payload {
            Payload::ZoneSignal(signal) => Some(signal),
            _ => None,
        })
        .expect("actionable zone signal");
    assert_eq!(zone_signal.expected_direction, ExpectedDirection::Up);
    assert!(
        zone_signal.confidence >= 0.7,
        "confidence {}",
        zone_signal.confidence
    );

    // A support level accompanies the promotion.
    assert!(payloads
        .iter()
        .any(|payload| matches!(payload, Payload::SupportResistanceLevel(_))));
}

// ---------------------------------------------------------------------------
// S4 — CVD bearish divergence
// ---------------------------------------------------------------------------

#[test]
fn s4_cvd_bearish_divergence() {
    let mut config = EngineConfig::default();
    config.delta_cvd.min_trades_per_sec = 0.01;
    config.delta_cvd.min_vol_per_sec = 0.01;
    config.delta_cvd.slope_threshold = 1e-7;
    quiet_other_detectors(&mut config, SignalKind::CvdDivergence);
    let (mut engine, _) = engine(config);

    // 30 samples at 30s intervals; price rises 89.00 → 89.29 while every
    // print is an aggressive sell, so CVD declines monotonically.
    let mut payloads = Vec::new();
    for i in 0..30i64 {
        let t = i * 30_000;
        let price = Decimal::from_str("89.00").unwrap() + Decimal::new(i, 2);
        payloads.extend(engine.process(trade(
            i as u64 + 1,
            t,
            &price.to_string(),
            10.0,
            true,
        )));
    }

    let signals = signals_of(&payloads);
    let divergences: Vec<&Signal> = signals
        .iter()
        .filter(|signal| signal.kind == SignalKind::CvdDivergence)
        .collect();
    assert!(!divergences.is_empty(), "expected a divergence signal");
    assert!(divergences.iter().all(|signal| signal.side == Side::Sell));
}

// ---------------------------------------------------------------------------
// S5 — fake wall spoofing
// ---------------------------------------------------------------------------

#[test]
fn s5_fake_wall_spoofing() {
    let mut config = EngineConfig::default();
    config.spoofing.wall_ticks = 1;
    config.spoofing.min_wall_size = 10.0;
    config.spoofing.rapid_cancellation_ms = 500;
    config.spoofing.max_cancellation_ratio = 0.8;
    quiet_other_detectors(&mut config, SignalKind::Spoofing);
    let (mut engine, _) = engine(config);

    let mut payloads = Vec::new();
    // t=0: an ask wall of 50 appears at 100.00.
    payloads.extend(engine.process(depth(0, vec![], vec![("100.00", 50.0)])));
    // Aggressive executions against it total 2.
    payloads.extend(engine.process(trade(1, 20, "100.00", 2.0, false)));
    // t=100ms: it shrinks to 5.
    payloads.extend(engine.process(depth(100, vec![], vec![("100.00", 5.0)])));

    let signals = signals_of(&payloads);
    let spoof = signals
        .iter()
        .find(|signal| signal.kind == SignalKind::Spoofing)
        .expect("spoofing signal");
    assert_eq!(spoof.side, Side::Sell);
    assert!(spoof.confidence > 0.8, "confidence {}", spoof.confidence);
    assert_eq!(spoof.price, Decimal::from_str("100.00").unwrap());
    match &spoof.metadata {
        SignalMetadata::Spoofing {
            spoof_type,
            band_center,
            ..
        } => {
            assert_eq!(*spoof_type, SpoofType::FakeWall);
            assert_eq!(*band_center, Decimal::from_str("100.00").unwrap());
        }
        other => panic!("unexpected metadata {other:?}"),
    }

    // The anomaly channel carries it too.
    assert!(payloads
        .iter()
        .any(|payload| matches!(payload, Payload::Anomaly(_))));
}

// ---------------------------------------------------------------------------
// S6 — hidden order
// ---------------------------------------------------------------------------

#[test]
fn s6_hidden_order() {
    let mut config = EngineConfig::default();
    quiet_other_detectors(&mut config, SignalKind::HiddenLiquidity);
    let (mut engine, _) = engine(config);

    let mut payloads = Vec::new();
    // Visible ask at 100.00 is 15.
    payloads.extend(engine.process(depth(0, vec![], vec![("100.00", 15.0)])));
    // A market buy of 50 executes at 100.00.
    payloads.extend(engine.process(trade(1, 100, "100.00", 50.0, false)));

    let signals = signals_of(&payloads);
    let hidden = signals
        .iter()
        .find(|signal| signal.kind == SignalKind::HiddenLiquidity)
        .expect("hidden liquidity signal");
    assert_eq!(hidden.side, Side::Buy);
    match &hidden.metadata {
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
}

// ---------------------------------------------------------------------------
// Cross-cutting invariants
// ---------------------------------------------------------------------------

#[test]
fn emitted_trades_are_ordered_and_book_stays_disjoint() {
    let (mut engine, _) = engine(EngineConfig::default());

    let mut emitted_times = Vec::new();
    let mut collect = |payloads: Vec<Payload>| {
        for payload in payloads {
            if let Payload::Trade(trade) = payload {
                emitted_times.push(trade.time);
            }
        }
    };

    collect(engine.process(depth(
        0,
        vec![("65.00", 100.0), ("64.99", 50.0)],
        vec![("65.01", 80.0)],
    )));
    // Same price on both sides inside one batch.
    collect(engine.process(depth(
        10,
        vec![("65.01", 25.0)],
        vec![("65.01", 30.0)],
    )));
    collect(engine.process(trade(1, 1000, "65.00", 5.0, true)));
    // Upstream regression: an older timestamp after a newer one.
    collect(engine.process(trade(2, 900, "65.00", 5.0, true)));
    collect(engine.process(trade(3, 1500, "65.01", 5.0, false)));

    assert!(emitted_times.windows(2).all(|pair| pair[0] <= pair[1]));

    let book = engine.book();
    for ticks in [6499i64, 6500, 6501] {
        let (bid, ask) = book.passive_at(ticks);
        assert!(bid == 0.0 || ask == 0.0, "both sides nonzero at {ticks}");
    }
}

#[test]
fn degraded_pipeline_stops_emitting_until_snapshot() {
    let config = EngineConfig::default();
    let (mut engine, _) = engine(config);
    engine.process(depth(0, vec![("65.00", 100.0)], vec![("65.01", 80.0)]));

    engine
        .degraded_flag()
        .store(true, std::sync::atomic::Ordering::Relaxed);
    let payloads = engine.process(trade(1, 1000, "65.00", 5.0, true));
    assert!(payloads.is_empty(), "degraded pipeline must not emit");

    // A fresh snapshot reconciles and re-enables emission.
    engine.process(IngressEvent::Snapshot(orderflow_engine::types::DepthSnapshot {
        event_time: 2000,
        last_update_id: 7,
        bids: vec![DepthEntry {
            price: Decimal::from_str("65.00").unwrap(),
            quantity: 100.0,
        }],
        asks: vec![DepthEntry {
            price: Decimal::from_str("65.01").unwrap(),
            quantity: 80.0,
        }],
    }));
    let payloads = engine.process(trade(2, 3000, "65.00", 5.0, true));
    assert!(payloads
        .iter()
        .any(|payload| matches!(payload, Payload::Trade(_))));
}

#[test]
fn malformed_ingress_never_reaches_detectors() {
    let (mut engine, metrics) = engine(EngineConfig::default());

    // Off-grid price and NaN quantity.
    assert!(engine.process(trade(1, 100, "65.001", 5.0, false)).is_empty());
    assert!(engine
        .process(trade(2, 200, "65.00", f64::NAN, false))
        .is_empty());

    let snap = metrics.snapshot();
    assert_eq!(snap.malformed_off_grid_price, 1);
    assert_eq!(snap.malformed_bad_quantity, 1);
    assert_eq!(snap.trades_ingested, 0);
}

#[test]
fn confirmation_path_holds_candidates_until_follow_through() {
    let mut config = EngineConfig::default();
    config.absorption.min_agg_volume = 200.0;
    config.absorption.event_cooldown_ms = 600_000;
    config.coordinator.confirm_kinds = vec!["absorption".to_string()];
    config.coordinator.confirm_threshold = 0.001;
    quiet_other_detectors(&mut config, SignalKind::Absorption);
    let (mut engine, _) = engine(config);

    let mut payloads = Vec::new();
    payloads.extend(engine.process(depth(0, vec![("65.00", 700.0)], vec![])));
    for i in 0..10i64 {
        let t = 100 + i * 400;
        payloads.extend(engine.process(trade(i as u64 + 1, t, "65.00", 30.0, true)));
        payloads.extend(engine.process(depth(t + 50, vec![("65.00", 700.0)], vec![])));
    }

    // The candidate is pending, not emitted.
    assert!(signals_of(&payloads).is_empty());
    assert_eq!(engine.pending_signals(), 1);

    // Price follows through upward by more than 0.1%.
    let confirm = engine.process(trade(99, 10_000, "65.10", 1.0, false));
    let signals = signals_of(&confirm);
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].kind, SignalKind::Confirmed);
    assert_eq!(engine.pending_signals(), 0);
}
