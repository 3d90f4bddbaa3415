//! Integer tick-grid price arithmetic
//!
//! Every price comparison, bucket id, and band id in the engine derives from
//! an `i64` tick index. `Decimal` appears only at the serde boundary; binary
//! floating point is never used for price equality decisions.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{EngineError, InputErrorKind};

/// Conversion between decimal prices and integer tick indices
///
/// A price is on the grid iff `price / tick_size` is an exact integer.
/// Off-grid prices are a class-1 input error and never enter the core.
#[derive(Debug, Clone)]
pub struct TickGrid {
    tick_size: Decimal,
    price_precision: u32,
}

impl TickGrid {
    pub fn new(tick_size: Decimal, price_precision: u32) -> Result<Self, EngineError> {
        if tick_size <= Decimal::ZERO {
            return Err(EngineError::Configuration(format!(
                "tick_size must be positive, got {tick_size}"
            )));
        }
        Ok(Self {
            tick_size,
            price_precision,
        })
    }

    pub fn tick_size(&self) -> Decimal {
        self.tick_size
    }

    pub fn price_precision(&self) -> u32 {
        self.price_precision
    }

    /// Tick size as `f64`, for magnitude (never equality) computations
    pub fn tick_size_f64(&self) -> f64 {
        self.tick_size.to_f64().unwrap_or(0.0)
    }

    /// Convert a decimal price to its tick index
    ///
    /// Rejects prices that do not sit exactly on the tick grid.
    pub fn to_ticks(&self, price: Decimal) -> Result<i64, EngineError> {
        let ratio = price / self.tick_size;
        if !ratio.fract().is_zero() {
            return Err(EngineError::MalformedInput {
                kind: InputErrorKind::OffGridPrice,
                detail: format!("price {price} is not aligned to tick size {}", self.tick_size),
            });
        }
        ratio.trunc().to_i64().ok_or_else(|| EngineError::MalformedInput {
            kind: InputErrorKind::OffGridPrice,
            detail: format!("price {price} overflows the tick index range"),
        })
    }

    /// Convert a tick index back to a decimal price
    pub fn to_price(&self, ticks: i64) -> Decimal {
        (Decimal::from(ticks) * self.tick_size).round_dp(self.price_precision)
    }

    /// Price of `ticks` as `f64`, for aggregate math only
    pub fn to_price_f64(&self, ticks: i64) -> f64 {
        ticks as f64 * self.tick_size_f64()
    }

    /// Zone bucket id for a resolution of `resolution` ticks
    pub fn bucket(&self, ticks: i64, resolution: i64) -> i64 {
        ticks.div_euclid(resolution)
    }

    /// Lower boundary (inclusive) of a bucket, in ticks
    pub fn bucket_min_ticks(&self, bucket: i64, resolution: i64) -> i64 {
        bucket * resolution
    }

    /// Upper boundary (exclusive) of a bucket, in ticks
    pub fn bucket_max_ticks(&self, bucket: i64, resolution: i64) -> i64 {
        (bucket + 1) * resolution
    }

    /// Center price of a bucket
    ///
    /// Strictly between the bucket boundaries for every resolution ≥ 1.
    pub fn bucket_center(&self, bucket: i64, resolution: i64) -> Decimal {
        let min = Decimal::from(self.bucket_min_ticks(bucket, resolution)) * self.tick_size;
        let max = Decimal::from(self.bucket_max_ticks(bucket, resolution)) * self.tick_size;
        ((min + max) / Decimal::TWO).round_dp(self.price_precision + 1)
    }

    /// Spoofing band id for a band width of `wall_ticks`
    ///
    /// Derived from integer ticks so that two mathematically equal prices can
    /// never land in different bands.
    pub fn band(&self, ticks: i64, wall_ticks: i64) -> i64 {
        ticks.div_euclid(wall_ticks)
    }

    /// Center price of a spoofing band
    pub fn band_center(&self, band: i64, wall_ticks: i64) -> Decimal {
        if wall_ticks == 1 {
            return self.to_price(band);
        }
        let min = Decimal::from(band * wall_ticks) * self.tick_size;
        let max = Decimal::from((band + 1) * wall_ticks) * self.tick_size;
        ((min + max) / Decimal::TWO).round_dp(self.price_precision + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn grid() -> TickGrid {
        TickGrid::new(Decimal::from_str("0.01").unwrap(), 2).unwrap()
    }

    #[test]
    fn test_on_grid_price_converts_exactly() {
        let grid = grid();
        let price = Decimal::from_str("65.00").unwrap();
        assert_eq!(grid.to_ticks(price).unwrap(), 6500);
        assert_eq!(grid.to_price(6500), price);
    }

    #[test]
    fn test_off_grid_price_is_rejected() {
        let grid = grid();
        let price = Decimal::from_str("65.001").unwrap();
        assert!(matches!(
            grid.to_ticks(price),
            Err(EngineError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_mathematically_equal_prices_share_a_band() {
        let grid = grid();
        let ta = grid.to_ticks(Decimal::from_str("100.00").unwrap()).unwrap();
        let tb = grid.to_ticks(Decimal::from_str("100.0000").unwrap()).unwrap();
        assert_eq!(grid.band(ta, 1), grid.band(tb, 1));
        assert_eq!(
            grid.band_center(grid.band(ta, 1), 1),
            Decimal::from_str("100.00").unwrap()
        );
    }

    #[test]
    fn test_bucket_center_strictly_inside_boundaries() {
        let grid = grid();
        for resolution in [5i64, 10, 20] {
            let bucket = grid.bucket(8502, resolution);
            let min = grid.to_price(grid.bucket_min_ticks(bucket, resolution));
            let max = grid.to_price(grid.bucket_max_ticks(bucket, resolution));
            let center = grid.bucket_center(bucket, resolution);
            assert!(min < center, "resolution {resolution}");
            assert!(center < max, "resolution {resolution}");
        }
    }

    #[test]
    fn test_zero_tick_size_rejected() {
        assert!(TickGrid::new(Decimal::ZERO, 2).is_err());
    }
}
