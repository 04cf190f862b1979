//! Canonical market-data stream types.

use serde::{Deserialize, Serialize};

use crate::errors::TickError;

/// A single trade event: the unit of every stream in this crate.
///
/// Timestamps are epoch milliseconds, monotonic per symbol but not
/// required to be monotonic across symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTick {
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    pub timestamp_ms: i64,
}

impl MarketTick {
    pub fn new(symbol: impl Into<String>, price: f64, volume: f64, timestamp_ms: i64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            volume,
            timestamp_ms,
        }
    }

    /// Validates the tick for ingestion. Invalid ticks must be dropped
    /// without touching analyzer state.
    pub fn validate(&self) -> Result<(), TickError> {
        if !self.price.is_finite() {
            return Err(TickError::NonFinitePrice);
        }
        if self.price <= 0.0 {
            return Err(TickError::NonPositivePrice(self.price));
        }
        if !self.volume.is_finite() {
            return Err(TickError::NonFiniteVolume);
        }
        if self.volume < 0.0 {
            return Err(TickError::NegativeVolume(self.volume));
        }
        if self.timestamp_ms < 0 {
            return Err(TickError::NegativeTimestamp(self.timestamp_ms));
        }
        Ok(())
    }
}

/// Time-bucketed OHLCV summary.
///
/// Invariants: `low <= open, close <= high`, `volume >= 0`,
/// `start_ms <= end_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Inferred aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
    Unknown,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
            TradeSide::Unknown => "UNKNOWN",
        }
    }
}

/// A trade tagged with its inferred side. `signed_volume` carries the
/// trade volume with the side's sign; an unknown side contributes zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeClassification {
    pub side: TradeSide,
    pub signed_volume: f64,
}

impl TradeClassification {
    pub fn new(side: TradeSide, volume: f64) -> Self {
        let signed_volume = match side {
            TradeSide::Buy => volume,
            TradeSide::Sell => -volume,
            TradeSide::Unknown => 0.0,
        };
        Self {
            side,
            signed_volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_tick() {
        let tick = MarketTick::new("BTCUSDT", 50_000.0, 0.25, 1_700_000_000_000);
        assert!(tick.validate().is_ok());
    }

    #[test]
    fn rejects_bad_prices() {
        let mut tick = MarketTick::new("X", 0.0, 1.0, 0);
        assert_eq!(tick.validate(), Err(TickError::NonPositivePrice(0.0)));
        tick.price = -3.0;
        assert_eq!(tick.validate(), Err(TickError::NonPositivePrice(-3.0)));
        tick.price = f64::NAN;
        assert_eq!(tick.validate(), Err(TickError::NonFinitePrice));
        tick.price = f64::INFINITY;
        assert_eq!(tick.validate(), Err(TickError::NonFinitePrice));
    }

    #[test]
    fn rejects_bad_volume_and_timestamp() {
        let mut tick = MarketTick::new("X", 1.0, -0.5, 0);
        assert_eq!(tick.validate(), Err(TickError::NegativeVolume(-0.5)));
        tick.volume = 1.0;
        tick.timestamp_ms = -1;
        assert_eq!(tick.validate(), Err(TickError::NegativeTimestamp(-1)));
    }

    #[test]
    fn unknown_side_carries_zero_signed_volume() {
        assert_eq!(
            TradeClassification::new(TradeSide::Buy, 5.0).signed_volume,
            5.0
        );
        assert_eq!(
            TradeClassification::new(TradeSide::Sell, 5.0).signed_volume,
            -5.0
        );
        assert_eq!(
            TradeClassification::new(TradeSide::Unknown, 5.0).signed_volume,
            0.0
        );
    }
}
