//! Engine configuration
//!
//! Every numeric constant used in a detector comparison is a configured
//! value; there are no implicit defaults at use sites. The aggregate is
//! deserialized from TOML and validated once at startup; the pipeline
//! refuses to start on any violation. Runtime re-application goes through
//! the same `validate` and keeps the old value on failure.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{EngineError, Result};

/// Top-level configuration aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub global: GlobalConfig,
    pub orderbook: OrderBookConfig,
    pub zones: ZoneConfig,
    pub pipeline: PipelineConfig,
    pub absorption: AbsorptionConfig,
    pub exhaustion: ExhaustionConfig,
    pub accumulation: AccumulationConfig,
    pub distribution: AccumulationConfig,
    pub delta_cvd: DeltaCvdConfig,
    pub spoofing: SpoofingConfig,
    pub hidden_order: HiddenOrderConfig,
    pub coordinator: CoordinatorConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            orderbook: OrderBookConfig::default(),
            zones: ZoneConfig::default(),
            pipeline: PipelineConfig::default(),
            absorption: AbsorptionConfig::default(),
            exhaustion: ExhaustionConfig::default(),
            // Same surface for both; the detectors read the directional
            // ratio against opposite sides.
            accumulation: AccumulationConfig::default(),
            distribution: AccumulationConfig::default(),
            delta_cvd: DeltaCvdConfig::default(),
            spoofing: SpoofingConfig::default(),
            hidden_order: HiddenOrderConfig::default(),
            coordinator: CoordinatorConfig::default(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML configuration document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text)
            .map_err(|e| EngineError::Configuration(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the full surface; any violation refuses startup
    pub fn validate(&self) -> Result<()> {
        self.global.validate()?;
        self.orderbook.validate()?;
        self.zones.validate()?;
        self.pipeline.validate()?;
        self.absorption.validate()?;
        self.exhaustion.validate()?;
        self.accumulation.validate("accumulation")?;
        self.distribution.validate("distribution")?;
        self.delta_cvd.validate()?;
        self.spoofing.validate()?;
        self.hidden_order.validate()?;
        self.coordinator.validate()?;
        self.server.validate()?;
        Ok(())
    }
}

fn require(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(EngineError::Configuration(message.to_string()))
    }
}

fn ratio_in_unit(value: f64, name: &str) -> Result<()> {
    require(
        value.is_finite() && (0.0..=1.0).contains(&value),
        &format!("{name} must be within [0, 1], got {value}"),
    )
}

fn positive(value: f64, name: &str) -> Result<()> {
    require(
        value.is_finite() && value > 0.0,
        &format!("{name} must be positive, got {value}"),
    )
}

// ----------------------------------------------------------------------------
// Global / book / zones / pipeline
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Trading pair symbol (uppercase, e.g. "BTCUSDT")
    pub symbol: String,
    /// Smallest price increment permitted by the venue
    pub tick_size: Decimal,
    /// Decimal places used when rendering prices on egress
    pub price_precision: u32,
    /// Upper bound on any retained per-event history
    pub max_storage_time_ms: i64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            tick_size: Decimal::from_str("0.01").expect("literal tick size"),
            price_precision: 2,
            max_storage_time_ms: 90 * 60 * 1000,
        }
    }
}

impl GlobalConfig {
    fn validate(&self) -> Result<()> {
        require(!self.symbol.is_empty(), "global.symbol must not be empty")?;
        require(
            self.symbol.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()),
            "global.symbol must be uppercase alphanumeric",
        )?;
        require(
            self.tick_size > Decimal::ZERO,
            "global.tick_size must be positive",
        )?;
        require(
            self.max_storage_time_ms > 0,
            "global.max_storage_time_ms must be positive",
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderBookConfig {
    /// Depth levels requested in the bootstrap snapshot
    pub max_levels: usize,
    /// Inline compaction runs every N-th applied update
    pub prune_interval_updates: u64,
    /// Zero levels older than this are retired
    pub max_age_ms: i64,
    /// Levels farther than this many ticks from mid are evicted
    pub max_distance_ticks: i64,
}

impl Default for OrderBookConfig {
    fn default() -> Self {
        Self {
            max_levels: 1000,
            prune_interval_updates: 256,
            max_age_ms: 10 * 60 * 1000,
            max_distance_ticks: 5000,
        }
    }
}

impl OrderBookConfig {
    fn validate(&self) -> Result<()> {
        require(self.max_levels > 0, "orderbook.max_levels must be positive")?;
        require(
            self.prune_interval_updates > 0,
            "orderbook.prune_interval_updates must be positive",
        )?;
        require(self.max_age_ms > 0, "orderbook.max_age_ms must be positive")?;
        require(
            self.max_distance_ticks > 0,
            "orderbook.max_distance_ticks must be positive",
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    /// Rolling aggregation window per zone
    pub zone_time_window_ms: i64,
    /// Zone widths in ticks; the standard snapshot carries all three
    pub resolutions: Vec<i64>,
    /// Neighborhood half-width for `zones_near` and the standard snapshot
    pub half_width_ticks: i64,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            zone_time_window_ms: 90 * 1000,
            resolutions: vec![5, 10, 20],
            half_width_ticks: 50,
        }
    }
}

impl ZoneConfig {
    fn validate(&self) -> Result<()> {
        require(
            self.zone_time_window_ms > 0,
            "zones.zone_time_window_ms must be positive",
        )?;
        require(
            !self.resolutions.is_empty(),
            "zones.resolutions must not be empty",
        )?;
        require(
            self.resolutions.iter().all(|r| *r > 0),
            "zones.resolutions must all be positive",
        )?;
        require(
            self.half_width_ticks > 0,
            "zones.half_width_ticks must be positive",
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bounded ingress queue capacity
    pub queue_capacity: usize,
    /// Silence on the trade stream before the pipeline degrades
    pub trade_timeout_ms: i64,
    /// Replay protection by aggregate trade id (explicit opt-in)
    pub enable_trade_id_dedup: bool,
    /// Half-width of the per-trade depth snapshot window
    pub depth_snapshot_half_width_ticks: i64,
    /// Cadence of the periodic `stats` egress message
    pub stats_interval_ms: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8192,
            trade_timeout_ms: 30 * 1000,
            enable_trade_id_dedup: false,
            depth_snapshot_half_width_ticks: 25,
            stats_interval_ms: 10 * 1000,
        }
    }
}

impl PipelineConfig {
    fn validate(&self) -> Result<()> {
        require(
            self.queue_capacity > 0,
            "pipeline.queue_capacity must be positive",
        )?;
        require(
            self.trade_timeout_ms > 0,
            "pipeline.trade_timeout_ms must be positive",
        )?;
        require(
            self.depth_snapshot_half_width_ticks > 0,
            "pipeline.depth_snapshot_half_width_ticks must be positive",
        )?;
        require(
            self.stats_interval_ms > 0,
            "pipeline.stats_interval_ms must be positive",
        )
    }
}

// ----------------------------------------------------------------------------
// Detectors
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AbsorptionConfig {
    /// Minimum aggressive volume in the zone before the detector engages
    pub min_agg_volume: f64,
    /// Zone activity must be at least this recent
    pub time_window_ms: i64,
    /// Zone resolution (ticks) the detector evaluates
    pub zone_resolution: i64,
    /// aggressive / (aggressive + passive) must stay at or below this
    pub max_absorption_ratio: f64,
    /// passive / aggressive must be at least this
    pub min_passive_multiplier: f64,
    /// Expected movement per unit of aggressive volume, in ticks
    pub expected_movement_scaling_factor: f64,
    /// Observed / expected movement must stay at or below this
    pub price_efficiency_threshold: f64,
    /// Confluence: confirming zones required for the boost
    pub confluence_min_zones: usize,
    /// Confluence: max distance (ticks) from the trade price
    pub confluence_max_distance_ticks: i64,
    /// Confidence added when confluence confirms
    pub confluence_confidence_boost: f64,
    /// Composite score gate
    pub min_absorption_score: f64,
    /// Scale from score to emitted confidence
    pub confidence_scale: f64,
    pub event_cooldown_ms: i64,
}

impl Default for AbsorptionConfig {
    fn default() -> Self {
        Self {
            min_agg_volume: 200.0,
            time_window_ms: 60 * 1000,
            zone_resolution: 10,
            max_absorption_ratio: 0.9,
            min_passive_multiplier: 2.2,
            expected_movement_scaling_factor: 0.02,
            price_efficiency_threshold: 0.0047,
            confluence_min_zones: 2,
            confluence_max_distance_ticks: 30,
            confluence_confidence_boost: 0.08,
            min_absorption_score: 0.6,
            confidence_scale: 1.0,
            event_cooldown_ms: 15 * 1000,
        }
    }
}

impl AbsorptionConfig {
    fn validate(&self) -> Result<()> {
        positive(self.min_agg_volume, "absorption.min_agg_volume")?;
        require(
            self.time_window_ms > 0,
            "absorption.time_window_ms must be positive",
        )?;
        require(
            self.zone_resolution > 0,
            "absorption.zone_resolution must be positive",
        )?;
        ratio_in_unit(self.max_absorption_ratio, "absorption.max_absorption_ratio")?;
        positive(self.min_passive_multiplier, "absorption.min_passive_multiplier")?;
        positive(
            self.expected_movement_scaling_factor,
            "absorption.expected_movement_scaling_factor",
        )?;
        positive(
            self.price_efficiency_threshold,
            "absorption.price_efficiency_threshold",
        )?;
        require(
            self.confluence_min_zones >= 1,
            "absorption.confluence_min_zones must be at least 1",
        )?;
        require(
            self.confluence_max_distance_ticks > 0,
            "absorption.confluence_max_distance_ticks must be positive",
        )?;
        ratio_in_unit(
            self.confluence_confidence_boost,
            "absorption.confluence_confidence_boost",
        )?;
        ratio_in_unit(self.min_absorption_score, "absorption.min_absorption_score")?;
        positive(self.confidence_scale, "absorption.confidence_scale")?;
        require(
            self.event_cooldown_ms >= 0,
            "absorption.event_cooldown_ms must not be negative",
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExhaustionConfig {
    /// Aggressive volume consumed on the exhausted side within the window
    pub min_agg_volume: f64,
    /// Observation window for initial vs remaining passive
    pub window_ms: i64,
    /// Trades required inside the window before the detector engages
    pub min_window_trades: usize,
    /// 1 - remaining/initial must reach this
    pub exhaustion_threshold: f64,
    pub enable_depletion_analysis: bool,
    /// Aggressive volume floor for the depletion branch
    pub depletion_volume_threshold: f64,
    /// Per-tick depleted/initial floor for the depletion branch
    pub depletion_ratio_threshold: f64,
    /// Neutral point of passive bid/(bid+ask) balance
    pub ratio_balance_center_point: f64,
    /// Composite score gate
    pub min_enhanced_confidence_threshold: f64,
    pub event_cooldown_ms: i64,
}

impl Default for ExhaustionConfig {
    fn default() -> Self {
        Self {
            min_agg_volume: 500.0,
            window_ms: 30 * 1000,
            min_window_trades: 3,
            exhaustion_threshold: 0.5,
            enable_depletion_analysis: true,
            depletion_volume_threshold: 750.0,
            depletion_ratio_threshold: 0.2,
            ratio_balance_center_point: 0.5,
            min_enhanced_confidence_threshold: 0.4,
            event_cooldown_ms: 15 * 1000,
        }
    }
}

impl ExhaustionConfig {
    fn validate(&self) -> Result<()> {
        positive(self.min_agg_volume, "exhaustion.min_agg_volume")?;
        require(self.window_ms > 0, "exhaustion.window_ms must be positive")?;
        require(
            self.min_window_trades >= 1,
            "exhaustion.min_window_trades must be at least 1",
        )?;
        ratio_in_unit(self.exhaustion_threshold, "exhaustion.exhaustion_threshold")?;
        positive(
            self.depletion_volume_threshold,
            "exhaustion.depletion_volume_threshold",
        )?;
        ratio_in_unit(
            self.depletion_ratio_threshold,
            "exhaustion.depletion_ratio_threshold",
        )?;
        require(
            self.ratio_balance_center_point > 0.0 && self.ratio_balance_center_point < 1.0,
            "exhaustion.ratio_balance_center_point must be strictly inside (0, 1)",
        )?;
        ratio_in_unit(
            self.min_enhanced_confidence_threshold,
            "exhaustion.min_enhanced_confidence_threshold",
        )?;
        require(
            self.event_cooldown_ms >= 0,
            "exhaustion.event_cooldown_ms must not be negative",
        )
    }
}

/// Shared by the accumulation and distribution detectors; the directional
/// ratio is read against aggressive buys for accumulation and aggressive
/// sells for distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulationConfig {
    /// Candidate age before promotion is considered
    pub min_candidate_duration_ms: i64,
    /// Aggregated volume floor for promotion
    pub min_zone_volume: f64,
    /// Trade count floor for promotion
    pub min_trade_count: usize,
    /// Proportional price deviation ceiling inside a candidate
    pub max_price_deviation: f64,
    /// Directional aggressive share floor (buys for accumulation)
    pub ratio_threshold: f64,
    /// Zone bucket width in ticks for candidate tracking
    pub zone_resolution: i64,
    /// Volume added after promotion before a strengthen event fires
    pub strengthen_volume_step: f64,
    /// Confidence added when 5/10/20-tick zones align directionally
    pub cross_timeframe_boost: f64,
    /// Confidence floor for the actionable zone signal
    pub min_signal_confidence: f64,
    pub event_cooldown_ms: i64,
}

impl Default for AccumulationConfig {
    fn default() -> Self {
        Self {
            min_candidate_duration_ms: 60 * 1000,
            min_zone_volume: 100.0,
            min_trade_count: 20,
            max_price_deviation: 0.002,
            ratio_threshold: 0.55,
            zone_resolution: 5,
            strengthen_volume_step: 50.0,
            cross_timeframe_boost: 0.1,
            min_signal_confidence: 0.6,
            event_cooldown_ms: 30 * 1000,
        }
    }
}

impl AccumulationConfig {
    fn validate(&self, section: &str) -> Result<()> {
        require(
            self.min_candidate_duration_ms > 0,
            &format!("{section}.min_candidate_duration_ms must be positive"),
        )?;
        positive(self.min_zone_volume, &format!("{section}.min_zone_volume"))?;
        require(
            self.min_trade_count >= 1,
            &format!("{section}.min_trade_count must be at least 1"),
        )?;
        positive(
            self.max_price_deviation,
            &format!("{section}.max_price_deviation"),
        )?;
        require(
            self.ratio_threshold > 0.5 && self.ratio_threshold <= 1.0,
            &format!("{section}.ratio_threshold must be within (0.5, 1]"),
        )?;
        require(
            self.zone_resolution > 0,
            &format!("{section}.zone_resolution must be positive"),
        )?;
        positive(
            self.strengthen_volume_step,
            &format!("{section}.strengthen_volume_step"),
        )?;
        ratio_in_unit(
            self.cross_timeframe_boost,
            &format!("{section}.cross_timeframe_boost"),
        )?;
        ratio_in_unit(
            self.min_signal_confidence,
            &format!("{section}.min_signal_confidence"),
        )?;
        require(
            self.event_cooldown_ms >= 0,
            &format!("{section}.event_cooldown_ms must not be negative"),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaCvdConfig {
    /// Sliding window length in seconds (pre-sized circular buffer)
    pub window_sec: usize,
    /// Trade rate floor over the window
    pub min_trades_per_sec: f64,
    /// Volume rate floor over the window
    pub min_vol_per_sec: f64,
    /// Magnitude floor for both normalized slopes
    pub slope_threshold: f64,
    /// |net delta| / total volume floor
    pub cvd_imbalance_threshold: f64,
    /// Populated buckets required before a regression is attempted
    pub min_samples: usize,
    pub event_cooldown_ms: i64,
}

impl Default for DeltaCvdConfig {
    fn default() -> Self {
        Self {
            window_sec: 900,
            min_trades_per_sec: 0.5,
            min_vol_per_sec: 1.0,
            slope_threshold: 1e-6,
            cvd_imbalance_threshold: 0.15,
            min_samples: 10,
            event_cooldown_ms: 60 * 1000,
        }
    }
}

impl DeltaCvdConfig {
    fn validate(&self) -> Result<()> {
        require(self.window_sec > 0, "delta_cvd.window_sec must be positive")?;
        positive(self.min_trades_per_sec, "delta_cvd.min_trades_per_sec")?;
        positive(self.min_vol_per_sec, "delta_cvd.min_vol_per_sec")?;
        positive(self.slope_threshold, "delta_cvd.slope_threshold")?;
        ratio_in_unit(
            self.cvd_imbalance_threshold,
            "delta_cvd.cvd_imbalance_threshold",
        )?;
        require(
            self.min_samples >= 3,
            "delta_cvd.min_samples must be at least 3 for a regression",
        )?;
        require(
            self.event_cooldown_ms >= 0,
            "delta_cvd.event_cooldown_ms must not be negative",
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoofingConfig {
    /// Band width in ticks for wall tracking
    pub wall_ticks: i64,
    /// Passive size a band must reach to count as a wall
    pub min_wall_size: f64,
    /// Appearance-to-cancellation window for the rapid-cancel pattern
    pub rapid_cancellation_ms: i64,
    /// Cancelled share of the peak that triggers detection
    pub max_cancellation_ratio: f64,
    /// Executed share of the peak that still counts as "barely traded"
    pub max_execution_fraction: f64,
    /// Adjacent fake walls on one side for a layering event
    pub layering_detection_levels: usize,
    /// Similarity floor for the repeating-pattern classification
    pub algorithmic_pattern_threshold: f64,
    /// Fired-wall history retained per side for pattern analysis
    pub pattern_history: usize,
    pub event_cooldown_ms: i64,
}

impl Default for SpoofingConfig {
    fn default() -> Self {
        Self {
            wall_ticks: 1,
            min_wall_size: 10.0,
            rapid_cancellation_ms: 500,
            max_cancellation_ratio: 0.8,
            max_execution_fraction: 0.1,
            layering_detection_levels: 3,
            algorithmic_pattern_threshold: 0.9,
            pattern_history: 16,
            event_cooldown_ms: 10 * 1000,
        }
    }
}

impl SpoofingConfig {
    fn validate(&self) -> Result<()> {
        require(self.wall_ticks > 0, "spoofing.wall_ticks must be positive")?;
        positive(self.min_wall_size, "spoofing.min_wall_size")?;
        require(
            self.rapid_cancellation_ms > 0,
            "spoofing.rapid_cancellation_ms must be positive",
        )?;
        ratio_in_unit(self.max_cancellation_ratio, "spoofing.max_cancellation_ratio")?;
        ratio_in_unit(self.max_execution_fraction, "spoofing.max_execution_fraction")?;
        require(
            self.layering_detection_levels >= 2,
            "spoofing.layering_detection_levels must be at least 2",
        )?;
        ratio_in_unit(
            self.algorithmic_pattern_threshold,
            "spoofing.algorithmic_pattern_threshold",
        )?;
        require(
            self.pattern_history >= 4,
            "spoofing.pattern_history must be at least 4",
        )?;
        require(
            self.event_cooldown_ms >= 0,
            "spoofing.event_cooldown_ms must not be negative",
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HiddenOrderConfig {
    /// executed - visible must reach this
    pub min_hidden_volume: f64,
    /// Trade size floor before the comparison runs
    pub min_trade_size: f64,
    /// Neighboring ticks folded into "visible at the price"
    pub price_tolerance_ticks: i64,
    /// Depth snapshot staleness ceiling
    pub max_depth_age_ms: i64,
    pub event_cooldown_ms: i64,
}

impl Default for HiddenOrderConfig {
    fn default() -> Self {
        Self {
            min_hidden_volume: 10.0,
            min_trade_size: 5.0,
            price_tolerance_ticks: 1,
            max_depth_age_ms: 1000,
            event_cooldown_ms: 5 * 1000,
        }
    }
}

impl HiddenOrderConfig {
    fn validate(&self) -> Result<()> {
        positive(self.min_hidden_volume, "hidden_order.min_hidden_volume")?;
        positive(self.min_trade_size, "hidden_order.min_trade_size")?;
        require(
            self.price_tolerance_ticks >= 0,
            "hidden_order.price_tolerance_ticks must not be negative",
        )?;
        require(
            self.max_depth_age_ms > 0,
            "hidden_order.max_depth_age_ms must be positive",
        )?;
        require(
            self.event_cooldown_ms >= 0,
            "hidden_order.event_cooldown_ms must not be negative",
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Proportional price tolerance for folding near-duplicates
    pub dedup_tolerance: f64,
    /// How long a forwarded signal shadows near-duplicates
    pub dedup_window_ms: i64,
    /// Hold time for the optional confirmation path
    pub confirmation_window_ms: i64,
    /// Proportional move in the predicted direction that confirms
    pub confirm_threshold: f64,
    /// Signal kinds routed through confirmation (unconfirmed is the default)
    pub confirm_kinds: Vec<String>,
    /// Global per-side emission cooldown
    pub global_cooldown_ms: i64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            dedup_tolerance: 0.0005,
            dedup_window_ms: 10 * 1000,
            confirmation_window_ms: 60 * 1000,
            confirm_threshold: 0.001,
            confirm_kinds: Vec::new(),
            global_cooldown_ms: 2 * 1000,
        }
    }
}

impl CoordinatorConfig {
    fn validate(&self) -> Result<()> {
        positive(self.dedup_tolerance, "coordinator.dedup_tolerance")?;
        require(
            self.dedup_window_ms > 0,
            "coordinator.dedup_window_ms must be positive",
        )?;
        require(
            self.confirmation_window_ms > 0,
            "coordinator.confirmation_window_ms must be positive",
        )?;
        positive(self.confirm_threshold, "coordinator.confirm_threshold")?;
        for kind in &self.confirm_kinds {
            require(
                matches!(
                    kind.as_str(),
                    "absorption"
                        | "exhaustion"
                        | "accumulation"
                        | "distribution"
                        | "cvd_divergence"
                        | "spoofing"
                        | "hidden_liquidity"
                ),
                &format!("coordinator.confirm_kinds contains unknown kind '{kind}'"),
            )?;
        }
        require(
            self.global_cooldown_ms >= 0,
            "coordinator.global_cooldown_ms must not be negative",
        )
    }
}

// ----------------------------------------------------------------------------
// Boundaries
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Outbound messages per second allowed per connected client
    pub client_messages_per_sec: u32,
    /// Broadcast channel capacity; lagging clients observe drops
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8720,
            client_messages_per_sec: 200,
            broadcast_capacity: 4096,
        }
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<()> {
        require(
            !self.bind_address.is_empty(),
            "server.bind_address must not be empty",
        )?;
        require(
            self.client_messages_per_sec > 0,
            "server.client_messages_per_sec must be positive",
        )?;
        require(
            self.broadcast_capacity > 0,
            "server.broadcast_capacity must be positive",
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub enabled: bool,
    pub path: String,
    /// Records older than this are removed by the cleanup pass
    pub retention_ms: i64,
    /// Trades buffered before a batch write
    pub trade_batch_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "./data/orderflow".to_string(),
            retention_ms: 7 * 24 * 3600 * 1000,
            trade_batch_size: 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_out_of_range_threshold_refuses_startup() {
        let mut config = EngineConfig::default();
        config.absorption.max_absorption_ratio = 1.5;
        assert!(matches!(
            config.validate(),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn test_unknown_confirm_kind_rejected() {
        let mut config = EngineConfig::default();
        config.coordinator.confirm_kinds = vec!["momentum".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_overrides() {
        let text = r#"
            [global]
            symbol = "LTCUSDT"
            tick_size = "0.01"

            [absorption]
            min_agg_volume = 200.0
            event_cooldown_ms = 60000
        "#;
        let config = EngineConfig::from_toml(text).unwrap();
        assert_eq!(config.global.symbol, "LTCUSDT");
        assert_eq!(config.absorption.event_cooldown_ms, 60_000);
        // Untouched sections keep their defaults.
        assert_eq!(config.spoofing.wall_ticks, 1);
    }

    #[test]
    fn test_ratio_threshold_must_exceed_half() {
        let mut config = EngineConfig::default();
        config.accumulation.ratio_threshold = 0.4;
        assert!(config.validate().is_err());
    }
}
