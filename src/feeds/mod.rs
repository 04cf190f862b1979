//! Market-data ingestion.
//!
//! A feed delivers [`MarketTick`]s to a caller-supplied callback. Callbacks
//! run on the feed's worker; a callback that routes into composers must do
//! its own symbol-keyed dispatch so that each composer stays single-threaded.

pub mod aggregator;
mod binance;
mod replay;

pub use aggregator::CandleAggregator;
pub use binance::BinanceFeed;
pub use replay::ReplayFeed;

use std::sync::Arc;

use crate::errors::FeedError;
use crate::types::MarketTick;

/// Tick delivery callback invoked once per decoded trade.
pub type TickCallback = Arc<dyn Fn(MarketTick) + Send + Sync>;

/// Lifecycle contract shared by every tick producer.
pub trait MarketFeed {
    /// Begins delivery. Non-blocking for live feeds (a background worker is
    /// spawned); replay feeds deliver synchronously and return when done.
    fn start(&mut self) -> Result<(), FeedError>;

    /// Stops delivery. Idempotent.
    fn stop(&mut self);
}
