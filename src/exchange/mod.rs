//! Exchange adapter boundary
//!
//! WebSocket clients for the aggregated-trade and depth streams plus the
//! REST snapshot bootstrap. The adapter owns its connections and feeds the
//! bounded ingress queue; the pipeline never touches a socket.

mod depth_stream;
mod trade_stream;
pub mod types;

pub use depth_stream::DepthStreamClient;
pub use trade_stream::TradeStreamClient;

/// Binance WebSocket base URL for streams
pub const WS_BASE_URL: &str = "wss://stream.binance.com:9443/ws";

/// Binance REST base URL for the snapshot bootstrap
pub const REST_BASE_URL: &str = "https://api.binance.com";

/// Maximum reconnection backoff
pub const MAX_RECONNECT_DELAY_SECS: u64 = 60;
