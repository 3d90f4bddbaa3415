//! Egress message surface
//!
//! Every dashboard message is `{type, data, now}` JSON. The payload is a
//! single tagged enumeration; per-channel routing is a consumer concern.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::events::{
    AnomalyEvent, Signal, SupportResistanceLevel, ZoneSignalEvent, ZoneUpdateEvent,
};
use crate::metrics::MetricsSnapshot;
use crate::types::{EnrichedTradeEvent, Side};

/// Enriched trade subset forwarded to the dashboard
#[derive(Debug, Clone, Serialize)]
pub struct TradeUi {
    pub price: Decimal,
    pub quantity: f64,
    pub side: Side,
    pub time: i64,
    #[serde(rename = "passiveBidVolume")]
    pub passive_bid_volume: f64,
    #[serde(rename = "passiveAskVolume")]
    pub passive_ask_volume: f64,
}

impl From<&EnrichedTradeEvent> for TradeUi {
    fn from(event: &EnrichedTradeEvent) -> Self {
        Self {
            price: event.price,
            quantity: event.quantity,
            side: event.aggressor(),
            time: event.event_time,
            passive_bid_volume: event.passive_bid_volume,
            passive_ask_volume: event.passive_ask_volume,
        }
    }
}

/// Compact order book snapshot for display
#[derive(Debug, Clone, Serialize)]
pub struct OrderBookUi {
    #[serde(rename = "priceLevels")]
    pub price_levels: Vec<PriceLevelUi>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceLevelUi {
    pub price: Decimal,
    pub bid: f64,
    pub ask: f64,
}

/// Short, non-sensitive error surface; details stay in structured logs
#[derive(Debug, Clone, Serialize)]
pub struct ErrorUi {
    #[serde(rename = "correlationId")]
    pub correlation_id: Uuid,
    pub message: String,
}

/// One dashboard payload; serialized with `type` and `data` fields
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    #[serde(rename = "trade")]
    Trade(TradeUi),
    #[serde(rename = "orderbook")]
    Orderbook(OrderBookUi),
    #[serde(rename = "signal")]
    Signal(Signal),
    #[serde(rename = "signal_bundle")]
    SignalBundle(Vec<Signal>),
    #[serde(rename = "zoneUpdate")]
    ZoneUpdate(ZoneUpdateEvent),
    #[serde(rename = "zoneSignal")]
    ZoneSignal(ZoneSignalEvent),
    #[serde(rename = "supportResistanceLevel")]
    SupportResistanceLevel(SupportResistanceLevel),
    #[serde(rename = "anomaly")]
    Anomaly(AnomalyEvent),
    #[serde(rename = "stats")]
    Stats(MetricsSnapshot),
    #[serde(rename = "error")]
    Error(ErrorUi),
    #[serde(rename = "runtimeConfig")]
    RuntimeConfig(Box<EngineConfig>),
}

/// The `{type, data, now}` wire envelope
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub payload: Payload,
    pub now: i64,
}

impl Envelope {
    pub fn new(payload: Payload, now: i64) -> Self {
        Self { payload, now }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{SignalKind, SignalMetadata, SignalStatus};
    use std::str::FromStr;

    #[test]
    fn test_envelope_shape() {
        let payload = Payload::Trade(TradeUi {
            price: Decimal::from_str("65.00").unwrap(),
            quantity: 2.0,
            side: Side::Buy,
            time: 1000,
            passive_bid_volume: 10.0,
            passive_ask_volume: 5.0,
        });
        let json = serde_json::to_value(Envelope::new(payload, 2000)).unwrap();
        assert_eq!(json["type"], "trade");
        assert_eq!(json["now"], 2000);
        assert_eq!(json["data"]["quantity"], 2.0);
    }

    #[test]
    fn test_wire_type_names() {
        let signal = Signal {
            id: Uuid::new_v4(),
            kind: SignalKind::Absorption,
            status: SignalStatus::Unconfirmed,
            side: Side::Buy,
            price: Decimal::from_str("65.00").unwrap(),
            time: 1000,
            confidence: 0.9,
            take_profit: None,
            stop_loss: None,
            metadata: SignalMetadata::Absorption {
                aggressive_volume: 300.0,
                passive_volume: 700.0,
                absorption_ratio: 0.3,
                passive_multiplier: 2.3,
                price_efficiency: 0.0,
                confluent_zones: 3,
                score: 0.86,
            },
        };

        let single = serde_json::to_value(Payload::Signal(signal.clone())).unwrap();
        assert_eq!(single["type"], "signal");
        assert_eq!(single["data"]["kind"], "absorption");
        assert_eq!(single["data"]["side"], "buy");

        let bundle = serde_json::to_value(Payload::SignalBundle(vec![signal])).unwrap();
        assert_eq!(bundle["type"], "signal_bundle");

        let stats = serde_json::to_value(Payload::Stats(
            crate::metrics::PipelineMetrics::new().snapshot(),
        ))
        .unwrap();
        assert_eq!(stats["type"], "stats");

        let config = serde_json::to_value(Payload::RuntimeConfig(Box::default())).unwrap();
        assert_eq!(config["type"], "runtimeConfig");
    }
}
