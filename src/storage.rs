//! Append-only trade and signal persistence
//!
//! RocksDB with MessagePack values. Key formats:
//! `trades:{symbol}:{batch_timestamp_ms}` for trade batches and
//! `signals:{symbol}:{time_ms}:{id}` for individual signals. A periodic
//! cleanup pass enforces the retention window. The core runs fully
//! in-memory; this layer only ever appends.

use rocksdb::{WriteBatch, DB};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::events::{Signal, SignalKind};
use crate::types::{RawTrade, Side};

const TRADES_KEY_PREFIX: &str = "trades:";
const SIGNALS_KEY_PREFIX: &str = "signals:";

/// Minimal persisted trade row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: u64,
    pub event_time: i64,
    pub price: String,
    pub quantity: f64,
    pub side: Side,
}

impl From<&RawTrade> for TradeRecord {
    fn from(trade: &RawTrade) -> Self {
        Self {
            trade_id: trade.trade_id,
            event_time: trade.event_time,
            price: trade.price.to_string(),
            quantity: trade.quantity,
            side: trade.aggressor(),
        }
    }
}

/// Minimal persisted signal row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    pub id: String,
    pub time: i64,
    pub price: String,
    pub kind: SignalKind,
    pub side: Side,
    pub confidence: f64,
    pub metadata: String,
}

impl SignalRecord {
    pub fn from_signal(signal: &Signal) -> Result<Self> {
        Ok(Self {
            id: signal.id.to_string(),
            time: signal.time,
            price: signal.price.to_string(),
            kind: signal.kind,
            side: signal.side,
            confidence: signal.confidence,
            metadata: serde_json::to_string(&signal.metadata)?,
        })
    }

    pub fn price_decimal(&self) -> Option<Decimal> {
        self.price.parse().ok()
    }
}

pub struct FlowStorage {
    db: Arc<DB>,
    symbol: String,
}

impl FlowStorage {
    pub fn open(path: &str, symbol: &str) -> Result<Self> {
        let db = DB::open_default(path)
            .map_err(|error| EngineError::Storage(format!("open {path}: {error}")))?;
        Ok(Self {
            db: Arc::new(db),
            symbol: symbol.to_uppercase(),
        })
    }

    pub fn with_db(db: Arc<DB>, symbol: &str) -> Self {
        Self {
            db,
            symbol: symbol.to_uppercase(),
        }
    }

    /// Append a batch of trades keyed by the batch timestamp
    pub fn store_trade_batch(&self, batch_timestamp: i64, trades: &[TradeRecord]) -> Result<()> {
        if trades.is_empty() {
            return Ok(());
        }
        let key = format!("{}{}:{}", TRADES_KEY_PREFIX, self.symbol, batch_timestamp);
        let value = rmp_serde::to_vec(trades)
            .map_err(|error| EngineError::Storage(format!("encode trade batch: {error}")))?;
        self.db
            .put(key.as_bytes(), value)
            .map_err(|error| EngineError::Storage(format!("write trade batch: {error}")))?;
        debug!(count = trades.len(), batch_timestamp, "Stored trade batch");
        Ok(())
    }

    /// Append one finalized signal
    pub fn store_signal(&self, record: &SignalRecord) -> Result<()> {
        let key = format!(
            "{}{}:{}:{}",
            SIGNALS_KEY_PREFIX, self.symbol, record.time, record.id
        );
        let value = rmp_serde::to_vec(record)
            .map_err(|error| EngineError::Storage(format!("encode signal: {error}")))?;
        self.db
            .put(key.as_bytes(), value)
            .map_err(|error| EngineError::Storage(format!("write signal: {error}")))?;
        Ok(())
    }

    /// All trades with `start_time <= event batch <= end_time`
    pub fn query_trades(&self, start_time: i64, end_time: i64) -> Result<Vec<TradeRecord>> {
        if end_time < start_time {
            return Err(EngineError::Storage(
                "end_time must be >= start_time".to_string(),
            ));
        }
        let prefix = format!("{}{}:", TRADES_KEY_PREFIX, self.symbol);
        let mut trades = Vec::new();
        for item in self.db.prefix_iterator(prefix.as_bytes()) {
            let (key, value) =
                item.map_err(|error| EngineError::Storage(format!("iterate trades: {error}")))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let Some(timestamp) = parse_trailing_timestamp(&key) else {
                continue;
            };
            if timestamp > end_time {
                break;
            }
            if timestamp >= start_time {
                let batch: Vec<TradeRecord> = rmp_serde::from_slice(&value)
                    .map_err(|error| EngineError::Storage(format!("decode trades: {error}")))?;
                trades.extend(batch);
            }
        }
        Ok(trades)
    }

    /// All signals in `[start_time, end_time]`
    pub fn query_signals(&self, start_time: i64, end_time: i64) -> Result<Vec<SignalRecord>> {
        let prefix = format!("{}{}:", SIGNALS_KEY_PREFIX, self.symbol);
        let mut signals = Vec::new();
        for item in self.db.prefix_iterator(prefix.as_bytes()) {
            let (key, value) =
                item.map_err(|error| EngineError::Storage(format!("iterate signals: {error}")))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let record: SignalRecord = rmp_serde::from_slice(&value)
                .map_err(|error| EngineError::Storage(format!("decode signal: {error}")))?;
            if record.time >= start_time && record.time <= end_time {
                signals.push(record);
            }
        }
        Ok(signals)
    }

    /// Remove records older than the cutoff; idempotent
    pub fn cleanup_older_than(&self, cutoff_timestamp: i64) -> Result<usize> {
        let mut batch = WriteBatch::default();
        let mut deleted = 0usize;

        for item in self.db.iterator(rocksdb::IteratorMode::Start) {
            let (key, _) =
                item.map_err(|error| EngineError::Storage(format!("iterate: {error}")))?;
            let in_scope = key.starts_with(TRADES_KEY_PREFIX.as_bytes())
                || key.starts_with(SIGNALS_KEY_PREFIX.as_bytes());
            if !in_scope {
                continue;
            }
            if let Some(timestamp) = parse_timestamp_component(&key) {
                if timestamp < cutoff_timestamp {
                    batch.delete(&key);
                    deleted += 1;
                }
            }
        }

        if deleted > 0 {
            self.db
                .write(batch)
                .map_err(|error| EngineError::Storage(format!("cleanup: {error}")))?;
            info!(deleted, cutoff_timestamp, "Storage retention cleanup");
        }
        Ok(deleted)
    }
}

/// One item on the persistence channel
#[derive(Debug, Clone)]
pub enum StorageEvent {
    Trade(TradeRecord),
    Signal(SignalRecord),
}

/// Drain the persistence channel on a dedicated task
///
/// Trades are buffered and written as batches keyed by flush time; signals
/// are appended immediately. A retention cleanup runs periodically.
pub async fn run_storage(
    storage: FlowStorage,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<StorageEvent>,
    batch_size: usize,
    retention_ms: i64,
) {
    let mut pending_trades: Vec<TradeRecord> = Vec::with_capacity(batch_size);
    let mut flush_ticker = tokio::time::interval(tokio::time::Duration::from_secs(5));
    let mut cleanup_ticker = tokio::time::interval(tokio::time::Duration::from_secs(3600));
    flush_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    cleanup_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(StorageEvent::Trade(record)) => {
                        pending_trades.push(record);
                        if pending_trades.len() >= batch_size {
                            flush_trades(&storage, &mut pending_trades);
                        }
                    }
                    Some(StorageEvent::Signal(record)) => {
                        if let Err(error) = storage.store_signal(&record) {
                            tracing::error!(error = %error, "Failed to persist signal");
                        }
                    }
                    None => {
                        flush_trades(&storage, &mut pending_trades);
                        info!("Storage channel closed; persistence task exiting");
                        return;
                    }
                }
            }
            _ = flush_ticker.tick() => {
                flush_trades(&storage, &mut pending_trades);
            }
            _ = cleanup_ticker.tick() => {
                let cutoff = chrono::Utc::now().timestamp_millis() - retention_ms;
                if let Err(error) = storage.cleanup_older_than(cutoff) {
                    tracing::error!(error = %error, "Storage cleanup failed");
                }
            }
        }
    }
}

fn flush_trades(storage: &FlowStorage, pending: &mut Vec<TradeRecord>) {
    if pending.is_empty() {
        return;
    }
    let batch_timestamp = chrono::Utc::now().timestamp_millis();
    if let Err(error) = storage.store_trade_batch(batch_timestamp, pending) {
        tracing::error!(error = %error, "Failed to persist trade batch");
    }
    pending.clear();
}

/// `trades:SYMBOL:TIMESTAMP` → TIMESTAMP
fn parse_trailing_timestamp(key: &[u8]) -> Option<i64> {
    let key = std::str::from_utf8(key).ok()?;
    key.rsplit(':').next()?.parse().ok()
}

/// Timestamp component for either key layout
fn parse_timestamp_component(key: &[u8]) -> Option<i64> {
    let key = std::str::from_utf8(key).ok()?;
    let parts: Vec<&str> = key.split(':').collect();
    match parts.as_slice() {
        ["trades", _, timestamp] => timestamp.parse().ok(),
        ["signals", _, timestamp, _] => timestamp.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{SignalMetadata, SignalStatus};
    use std::str::FromStr;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn storage(dir: &tempfile::TempDir) -> FlowStorage {
        FlowStorage::open(dir.path().to_str().unwrap(), "BTCUSDT").unwrap()
    }

    fn record(id: u64, time: i64) -> TradeRecord {
        TradeRecord {
            trade_id: id,
            event_time: time,
            price: "65.00".to_string(),
            quantity: 1.5,
            side: Side::Buy,
        }
    }

    #[test]
    fn test_trade_batches_roundtrip_by_window() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir);
        let base = 1_760_000_000_000i64;

        storage
            .store_trade_batch(base, &[record(1, base), record(2, base + 10)])
            .unwrap();
        storage
            .store_trade_batch(base + 60_000, &[record(3, base + 60_000)])
            .unwrap();

        let all = storage.query_trades(base, base + 120_000).unwrap();
        assert_eq!(all.len(), 3);
        let first_only = storage.query_trades(base, base + 30_000).unwrap();
        assert_eq!(first_only.len(), 2);
    }

    #[test]
    fn test_signal_roundtrip_preserves_metadata() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir);
        let signal = Signal {
            id: Uuid::new_v4(),
            kind: SignalKind::HiddenLiquidity,
            status: SignalStatus::Unconfirmed,
            side: Side::Buy,
            price: Decimal::from_str("100.00").unwrap(),
            time: 1_760_000_000_000,
            confidence: 0.91,
            take_profit: None,
            stop_loss: None,
            metadata: SignalMetadata::HiddenLiquidity {
                executed_volume: 50.0,
                visible_volume: 15.0,
                hidden_volume: 35.0,
                hidden_percentage: 0.7,
            },
        };

        let record = SignalRecord::from_signal(&signal).unwrap();
        storage.store_signal(&record).unwrap();

        let found = storage
            .query_signals(signal.time - 1, signal.time + 1)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, SignalKind::HiddenLiquidity);
        assert_eq!(found[0].price_decimal(), Some(signal.price));
        assert!(found[0].metadata.contains("hidden_volume"));
    }

    #[test]
    fn test_retention_cleanup_is_idempotent() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir);
        let base = 1_760_000_000_000i64;
        storage.store_trade_batch(base, &[record(1, base)]).unwrap();
        storage
            .store_trade_batch(base + 100_000, &[record(2, base + 100_000)])
            .unwrap();

        assert_eq!(storage.cleanup_older_than(base + 50_000).unwrap(), 1);
        assert_eq!(storage.cleanup_older_than(base + 50_000).unwrap(), 0);
        let remaining = storage.query_trades(base, base + 200_000).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].trade_id, 2);
    }
}
