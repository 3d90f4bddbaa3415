//! Aggregated-trade WebSocket client
//!
//! Connects to `<symbol>@aggTrade` and feeds raw trades into the ingress
//! queue. Reconnects with exponential backoff (1s doubling, capped).

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::error::InputErrorKind;
use crate::exchange::types::WireAggTrade;
use crate::exchange::{MAX_RECONNECT_DELAY_SECS, WS_BASE_URL};
use crate::metrics::PipelineMetrics;
use crate::pipeline::{IngressEvent, IngressQueue};

pub struct TradeStreamClient {
    symbol: String,
    url: String,
    queue: Arc<IngressQueue>,
    metrics: Arc<PipelineMetrics>,
}

impl TradeStreamClient {
    pub fn new(symbol: &str, queue: Arc<IngressQueue>, metrics: Arc<PipelineMetrics>) -> Self {
        let url = format!("{}/{}@aggTrade", WS_BASE_URL, symbol.to_lowercase());
        Self {
            symbol: symbol.to_uppercase(),
            url,
            queue,
            metrics,
        }
    }

    /// Run until task cancellation, reconnecting on every failure
    pub async fn run(self) {
        let mut retry_delay = Duration::from_secs(1);
        let max_delay = Duration::from_secs(MAX_RECONNECT_DELAY_SECS);

        loop {
            match self.connect_once().await {
                Ok(()) => {
                    info!(symbol = %self.symbol, "Trade stream closed, reconnecting");
                    retry_delay = Duration::from_secs(1);
                }
                Err(error) => {
                    error!(
                        symbol = %self.symbol,
                        error = %error,
                        retry_delay_secs = retry_delay.as_secs(),
                        "Trade stream failed, retrying"
                    );
                }
            }

            sleep(retry_delay).await;
            retry_delay = std::cmp::min(retry_delay * 2, max_delay);
        }
    }

    async fn connect_once(&self) -> anyhow::Result<()> {
        info!(symbol = %self.symbol, url = %self.url, "Connecting to aggTrade stream");
        let (ws_stream, _) = connect_async(&self.url).await?;
        info!(symbol = %self.symbol, "Trade stream connected");

        let (mut write, mut read) = ws_stream.split();

        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<WireAggTrade>(&text) {
                    Ok(wire) => match wire.to_raw() {
                        Ok(raw) => {
                            debug!(
                                symbol = %self.symbol,
                                trade_id = raw.trade_id,
                                price = %raw.price,
                                "Received aggTrade"
                            );
                            self.queue.push(IngressEvent::Trade(raw));
                        }
                        Err(error) => {
                            self.metrics.record_malformed(InputErrorKind::Unparseable);
                            warn!(error = %error, "Dropping unparseable trade numerics");
                        }
                    },
                    Err(error) => {
                        self.metrics.record_malformed(InputErrorKind::Unparseable);
                        warn!(error = %error, "Failed to parse aggTrade event");
                    }
                },
                Ok(Message::Ping(data)) => {
                    if write.send(Message::Pong(data)).await.is_err() {
                        warn!(symbol = %self.symbol, "Failed to answer ping");
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    info!(symbol = %self.symbol, frame = ?frame, "Trade stream close frame");
                    break;
                }
                Ok(_) => {}
                Err(error) => {
                    error!(symbol = %self.symbol, error = %error, "Trade stream error");
                    return Err(error.into());
                }
            }
        }

        Ok(())
    }
}
