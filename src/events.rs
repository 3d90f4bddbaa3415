//! Signal and zone event types
//!
//! Detector-specific metadata is an explicit tagged variant per detector
//! kind; the coordinator consumes the union, never a free-form map. The
//! detector output surface is a small enumeration routed over one typed
//! stream.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Side;

/// Final signal classification on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Absorption,
    Exhaustion,
    Accumulation,
    Distribution,
    CvdDivergence,
    Spoofing,
    HiddenLiquidity,
    /// Coordinator-confirmed follow-through of an earlier candidate
    Confirmed,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Absorption => "absorption",
            SignalKind::Exhaustion => "exhaustion",
            SignalKind::Accumulation => "accumulation",
            SignalKind::Distribution => "distribution",
            SignalKind::CvdDivergence => "cvd_divergence",
            SignalKind::Spoofing => "spoofing",
            SignalKind::HiddenLiquidity => "hidden_liquidity",
            SignalKind::Confirmed => "confirmed",
        }
    }
}

/// Spoofing pattern classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpoofType {
    FakeWall,
    GhostLiquidity,
    Layering,
    Algorithmic,
}

/// Per-detector metadata attached to a candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "detector", rename_all = "snake_case")]
pub enum SignalMetadata {
    Absorption {
        aggressive_volume: f64,
        passive_volume: f64,
        absorption_ratio: f64,
        passive_multiplier: f64,
        price_efficiency: f64,
        confluent_zones: usize,
        score: f64,
    },
    Exhaustion {
        initial_passive: f64,
        remaining_passive: f64,
        exhaustion_ratio: f64,
        aggressive_volume: f64,
        passive_ratio_balance: f64,
    },
    AccumulationZone {
        zone_id: String,
        directional_ratio: f64,
        zone_volume: f64,
        trade_count: u64,
        aligned_timeframes: usize,
    },
    CvdDivergence {
        price_slope: f64,
        cvd_slope: f64,
        net_delta: f64,
        total_volume: f64,
        window_sec: usize,
    },
    Spoofing {
        spoof_type: SpoofType,
        wall_size: f64,
        cancellation_ratio: f64,
        executed_volume: f64,
        band_center: Decimal,
    },
    HiddenLiquidity {
        executed_volume: f64,
        visible_volume: f64,
        hidden_volume: f64,
        hidden_percentage: f64,
    },
    /// Attached by the coordinator to confirmed/invalidated emissions
    Coordinated {
        origin_kind: SignalKind,
        origin_id: Uuid,
        observed_move: f64,
    },
}

/// Detector output before coordination
#[derive(Debug, Clone, Serialize)]
pub struct SignalCandidate {
    pub id: Uuid,
    pub detector_id: String,
    pub kind: SignalKind,
    pub side: Side,
    pub price: Decimal,
    #[serde(skip)]
    pub price_ticks: i64,
    pub time: i64,
    pub confidence: f64,
    pub metadata: SignalMetadata,
}

/// Terminal lifecycle outcome of a coordinated signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Unconfirmed,
    Confirmed,
    Invalidated,
    Expired,
}

/// Finalized signal forwarded to external consumers
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub id: Uuid,
    pub kind: SignalKind,
    pub status: SignalStatus,
    pub side: Side,
    pub price: Decimal,
    pub time: i64,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    pub metadata: SignalMetadata,
}

/// Zone lifecycle transitions on the dashboard stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneUpdateKind {
    ZoneCreated,
    ZoneUpdated,
    ZoneStrengthened,
    ZoneWeakened,
    ZoneCompleted,
    ZoneInvalidated,
}

/// Accumulation/distribution zone description carried by zone events
#[derive(Debug, Clone, Serialize)]
pub struct TrackedZone {
    pub zone_id: String,
    pub kind: SignalKind,
    pub center: Decimal,
    pub price_range_min: Decimal,
    pub price_range_max: Decimal,
    pub volume: f64,
    pub directional_ratio: f64,
    pub trade_count: u64,
    pub started_at: i64,
    pub last_update: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneUpdateEvent {
    #[serde(rename = "updateType")]
    pub update_type: ZoneUpdateKind,
    pub zone: TrackedZone,
    /// Relative importance for display ordering, 0..1
    pub significance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedDirection {
    Up,
    Down,
    Neutral,
}

/// Actionable zone promotion/invalidation event
#[derive(Debug, Clone, Serialize)]
pub struct ZoneSignalEvent {
    #[serde(rename = "signalType")]
    pub signal_type: SignalKind,
    pub zone: TrackedZone,
    #[serde(rename = "actionType")]
    pub action_type: ZoneUpdateKind,
    pub confidence: f64,
    pub urgency: Urgency,
    #[serde(rename = "expectedDirection")]
    pub expected_direction: ExpectedDirection,
}

/// Book-level anomaly surfaced to the dashboard
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyEvent {
    pub id: Uuid,
    pub kind: String,
    pub side: Side,
    pub price: Decimal,
    pub time: i64,
    pub confidence: f64,
    pub details: SignalMetadata,
}

/// Support/resistance level derived from a promoted zone
#[derive(Debug, Clone, Serialize)]
pub struct SupportResistanceLevel {
    pub price: Decimal,
    pub kind: LevelKind,
    pub strength: f64,
    pub detected_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelKind {
    Support,
    Resistance,
}

/// The complete detector output surface
///
/// Exactly the three spec channels plus the anomaly stream that rides the
/// same typed pipe; routing to consumers happens downstream.
#[derive(Debug, Clone)]
pub enum DetectorEvent {
    SignalCandidate(SignalCandidate),
    ZoneUpdate(ZoneUpdateEvent),
    ZoneSignal(ZoneSignalEvent),
    Anomaly(AnomalyEvent),
    SupportResistance(SupportResistanceLevel),
}

impl DetectorEvent {
    pub fn as_candidate(&self) -> Option<&SignalCandidate> {
        match self {
            DetectorEvent::SignalCandidate(candidate) => Some(candidate),
            _ => None,
        }
    }
}

impl Urgency {
    /// Map confidence onto display urgency
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.85 {
            Urgency::High
        } else if confidence >= 0.65 {
            Urgency::Medium
        } else {
            Urgency::Low
        }
    }
}
