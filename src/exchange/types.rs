//! Exchange wire types
//!
//! Binance-shaped JSON with single-letter field names and decimal-string
//! numerics. Conversion into core types happens here and nowhere else;
//! unparseable values surface as class-1 input errors.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{EngineError, InputErrorKind, Result};
use crate::types::{DepthEntry, DepthSnapshot, DepthUpdate, RawTrade};

/// Aggregated trade event from the `@aggTrade` stream
///
/// Example JSON:
/// ```json
/// {"e":"aggTrade","E":1672531200000,"s":"BTCUSDT","a":12345,
///  "p":"16800.50","q":"1.25","f":100,"l":105,"T":1672531199999,
///  "m":true,"M":true}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireAggTrade {
    #[serde(rename = "e")]
    pub event_type: String,

    #[serde(rename = "E")]
    pub event_time: i64,

    #[serde(rename = "s")]
    pub symbol: String,

    #[serde(rename = "a")]
    pub agg_trade_id: u64,

    /// Price (string to preserve precision)
    #[serde(rename = "p")]
    pub price: String,

    /// Quantity (string to preserve precision)
    #[serde(rename = "q")]
    pub quantity: String,

    #[serde(rename = "f")]
    pub first_trade_id: u64,

    #[serde(rename = "l")]
    pub last_trade_id: u64,

    #[serde(rename = "T")]
    pub trade_time: i64,

    /// Is the buyer the maker? true = aggressive sell
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,

    #[serde(rename = "M", default)]
    pub is_best_match: bool,
}

impl WireAggTrade {
    pub fn to_raw(&self) -> Result<RawTrade> {
        let price = Decimal::from_str(&self.price).map_err(|_| EngineError::MalformedInput {
            kind: InputErrorKind::Unparseable,
            detail: format!("aggTrade price '{}'", self.price),
        })?;
        let quantity: f64 =
            self.quantity
                .parse()
                .map_err(|_| EngineError::MalformedInput {
                    kind: InputErrorKind::Unparseable,
                    detail: format!("aggTrade quantity '{}'", self.quantity),
                })?;
        Ok(RawTrade {
            trade_id: self.agg_trade_id,
            event_time: self.event_time,
            price,
            quantity,
            buyer_is_maker: self.is_buyer_maker,
        })
    }
}

/// Incremental depth event from the `@depth@100ms` stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireDepthUpdate {
    #[serde(rename = "e")]
    pub event_type: String,

    #[serde(rename = "E")]
    pub event_time: i64,

    #[serde(rename = "s")]
    pub symbol: String,

    #[serde(rename = "U")]
    pub first_update_id: i64,

    #[serde(rename = "u")]
    pub final_update_id: i64,

    /// [price, qty] pairs; qty "0" removes the level
    #[serde(rename = "b")]
    pub bids: Vec<[String; 2]>,

    #[serde(rename = "a")]
    pub asks: Vec<[String; 2]>,
}

fn parse_entries(pairs: &[[String; 2]]) -> Result<Vec<DepthEntry>> {
    pairs
        .iter()
        .map(|[price, quantity]| {
            let price = Decimal::from_str(price).map_err(|_| EngineError::MalformedInput {
                kind: InputErrorKind::Unparseable,
                detail: format!("depth price '{price}'"),
            })?;
            let quantity: f64 = quantity.parse().map_err(|_| EngineError::MalformedInput {
                kind: InputErrorKind::Unparseable,
                detail: format!("depth quantity '{quantity}'"),
            })?;
            Ok(DepthEntry { price, quantity })
        })
        .collect()
}

impl WireDepthUpdate {
    pub fn to_update(&self) -> Result<DepthUpdate> {
        Ok(DepthUpdate {
            event_time: self.event_time,
            bids: parse_entries(&self.bids)?,
            asks: parse_entries(&self.asks)?,
        })
    }
}

/// REST depth snapshot, fetched on connect/reconnect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireDepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: i64,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

impl WireDepthSnapshot {
    pub fn to_snapshot(&self, event_time: i64) -> Result<DepthSnapshot> {
        Ok(DepthSnapshot {
            event_time,
            last_update_id: self.last_update_id,
            bids: parse_entries(&self.bids)?,
            asks: parse_entries(&self.asks)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agg_trade_deserialization() {
        let json = r#"{
            "e": "aggTrade",
            "E": 1672531200000,
            "s": "BTCUSDT",
            "a": 12345,
            "p": "16800.50",
            "q": "1.25",
            "f": 100,
            "l": 105,
            "T": 1672531199999,
            "m": true,
            "M": true
        }"#;

        let wire: WireAggTrade = serde_json::from_str(json).unwrap();
        assert_eq!(wire.symbol, "BTCUSDT");
        let raw = wire.to_raw().unwrap();
        assert_eq!(raw.trade_id, 12345);
        assert_eq!(raw.price, Decimal::from_str("16800.50").unwrap());
        assert_eq!(raw.quantity, 1.25);
        assert!(raw.buyer_is_maker);
    }

    #[test]
    fn test_depth_update_deserialization() {
        let json = r#"{
            "e": "depthUpdate",
            "E": 1699999999123,
            "s": "BTCUSDT",
            "U": 1000,
            "u": 1005,
            "b": [["67650.00", "1.234"], ["67649.50", "0"]],
            "a": [["67651.00", "0.987"]]
        }"#;

        let wire: WireDepthUpdate = serde_json::from_str(json).unwrap();
        let update = wire.to_update().unwrap();
        assert_eq!(update.bids.len(), 2);
        assert_eq!(update.bids[1].quantity, 0.0);
        assert_eq!(update.asks.len(), 1);
    }

    #[test]
    fn test_unparseable_price_is_a_class_one_error() {
        let wire = WireAggTrade {
            event_type: "aggTrade".to_string(),
            event_time: 0,
            symbol: "BTCUSDT".to_string(),
            agg_trade_id: 1,
            price: "not-a-price".to_string(),
            quantity: "1.0".to_string(),
            first_trade_id: 1,
            last_trade_id: 1,
            trade_time: 0,
            is_buyer_maker: false,
            is_best_match: false,
        };
        assert!(matches!(
            wire.to_raw(),
            Err(EngineError::MalformedInput { .. })
        ));
    }
}
