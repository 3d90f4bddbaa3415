//! Tick-accurate order book state
//!
//! Maintains per-price passive quantities with add/consume counters,
//! enforces bid/ask disjointness, and lends bounded immutable views to the
//! enrichment stage.

mod state;

pub use state::{OrderBookState, PassiveLevel};
