//! Multi-resolution standardized zones
//!
//! Rolling orderflow statistics over price bands of 5, 10, and 20 ticks,
//! with time-window eviction and book-backed passive sums.

mod aggregator;
mod types;

pub use aggregator::ZoneAggregator;
pub use types::{StandardZoneData, ZoneBoundaries, ZoneSnapshot};
