//! Depth WebSocket client with snapshot bootstrap
//!
//! On every (re)connect a REST depth snapshot is fetched and enqueued
//! before incremental updates flow, so the book reconciles after any gap.
//! Updates older than the snapshot are discarded by sequence id, matching
//! the venue's published synchronization procedure.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::error::InputErrorKind;
use crate::exchange::types::{WireDepthSnapshot, WireDepthUpdate};
use crate::exchange::{MAX_RECONNECT_DELAY_SECS, REST_BASE_URL, WS_BASE_URL};
use crate::metrics::PipelineMetrics;
use crate::pipeline::{IngressEvent, IngressQueue};

pub struct DepthStreamClient {
    symbol: String,
    ws_url: String,
    rest_url: String,
    snapshot_levels: usize,
    http: reqwest::Client,
    queue: Arc<IngressQueue>,
    metrics: Arc<PipelineMetrics>,
}

impl DepthStreamClient {
    pub fn new(
        symbol: &str,
        snapshot_levels: usize,
        queue: Arc<IngressQueue>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let ws_url = format!("{}/{}@depth@100ms", WS_BASE_URL, symbol.to_lowercase());
        let rest_url = format!(
            "{}/api/v3/depth?symbol={}&limit={}",
            REST_BASE_URL,
            symbol.to_uppercase(),
            snapshot_levels
        );
        Self {
            symbol: symbol.to_uppercase(),
            ws_url,
            rest_url,
            snapshot_levels,
            http: reqwest::Client::new(),
            queue,
            metrics,
        }
    }

    pub async fn run(self) {
        let mut retry_delay = Duration::from_secs(1);
        let max_delay = Duration::from_secs(MAX_RECONNECT_DELAY_SECS);

        loop {
            match self.connect_once().await {
                Ok(()) => {
                    info!(symbol = %self.symbol, "Depth stream closed, reconnecting");
                    retry_delay = Duration::from_secs(1);
                }
                Err(error) => {
                    error!(
                        symbol = %self.symbol,
                        error = %error,
                        retry_delay_secs = retry_delay.as_secs(),
                        "Depth stream failed, retrying"
                    );
                }
            }

            sleep(retry_delay).await;
            retry_delay = std::cmp::min(retry_delay * 2, max_delay);
        }
    }

    /// Fetch the bootstrap snapshot from the REST API
    async fn fetch_snapshot(&self) -> anyhow::Result<i64> {
        debug!(
            symbol = %self.symbol,
            levels = self.snapshot_levels,
            "Fetching depth snapshot"
        );
        let wire: WireDepthSnapshot = self
            .http
            .get(&self.rest_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let now = chrono::Utc::now().timestamp_millis();
        let snapshot = wire.to_snapshot(now)?;
        let last_update_id = snapshot.last_update_id;
        info!(
            symbol = %self.symbol,
            last_update_id,
            bid_levels = snapshot.bids.len(),
            ask_levels = snapshot.asks.len(),
            "Depth snapshot fetched"
        );
        self.queue.push(IngressEvent::Snapshot(snapshot));
        Ok(last_update_id)
    }

    async fn connect_once(&self) -> anyhow::Result<()> {
        info!(symbol = %self.symbol, url = %self.ws_url, "Connecting to depth stream");
        let (ws_stream, _) = connect_async(&self.ws_url).await?;
        info!(symbol = %self.symbol, "Depth stream connected");

        // Snapshot after the stream opens so no delta falls in the gap.
        let snapshot_id = self.fetch_snapshot().await?;

        let (mut write, mut read) = ws_stream.split();

        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<WireDepthUpdate>(&text) {
                    Ok(wire) => {
                        // Events fully covered by the snapshot are stale.
                        if wire.final_update_id <= snapshot_id {
                            debug!(
                                symbol = %self.symbol,
                                final_update_id = wire.final_update_id,
                                snapshot_id,
                                "Ignoring stale depth update"
                            );
                            continue;
                        }
                        match wire.to_update() {
                            Ok(update) => {
                                self.queue.push(IngressEvent::Depth(update));
                            }
                            Err(error) => {
                                self.metrics.record_malformed(InputErrorKind::Unparseable);
                                warn!(error = %error, "Dropping unparseable depth numerics");
                            }
                        }
                    }
                    Err(error) => {
                        self.metrics.record_malformed(InputErrorKind::Unparseable);
                        warn!(error = %error, "Failed to parse depth event");
                    }
                },
                Ok(Message::Ping(data)) => {
                    if write.send(Message::Pong(data)).await.is_err() {
                        warn!(symbol = %self.symbol, "Failed to answer ping");
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    info!(symbol = %self.symbol, frame = ?frame, "Depth stream close frame");
                    break;
                }
                Ok(_) => {}
                Err(error) => {
                    error!(symbol = %self.symbol, error = %error, "Depth stream error");
                    return Err(error.into());
                }
            }
        }

        Ok(())
    }
}
