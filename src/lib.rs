//! Streaming alpha-signal core of a multi-exchange market-data analytics
//! engine.
//!
//! Per-trade ticks flow through a per-symbol [`engine::Composer`] which
//! computes, in a single bounded-memory pass: momentum and mean-reversion
//! scores, VPIN flow toxicity, Kyle-lambda price impact, the Roll spread,
//! order-flow imbalance, a market-regime classification with adaptive
//! signal weights, VWAP deviation bands and a Bollinger overlay. Records
//! are merged into a [`engine::SignalRecord`] and optionally emitted to a
//! line-protocol [`storage::SignalSink`].
//!
//! The [`backtest`] module replays the same tick streams through a
//! caller-supplied signal generator, simulating slippage and commission and
//! reporting Sharpe/Sortino/drawdown-style performance metrics.
//!
//! ```no_run
//! use alpha_engine::engine::{Composer, ComposerConfig};
//! use alpha_engine::types::MarketTick;
//!
//! let mut composer = Composer::new("BTCUSDT", ComposerConfig::default(), None);
//! let tick = MarketTick::new("BTCUSDT", 50_000.0, 0.25, 1_700_000_000_000);
//! if let Some(record) = composer.on_tick(&tick) {
//!     println!("{:?} score={:.4}", record.recommendation, record.combined_score);
//! }
//! ```

pub mod backtest;
pub mod engine;
pub mod errors;
pub mod feeds;
pub mod storage;
pub mod types;

pub use backtest::{BacktestConfig, BacktestResult, Backtester};
pub use engine::{Composer, ComposerConfig, Recommendation, SignalRecord};
pub use errors::{FeedError, SinkError, TickError};
pub use feeds::{BinanceFeed, CandleAggregator, MarketFeed, ReplayFeed, TickCallback};
pub use storage::{InfluxConfig, InfluxWriter, SignalSink};
pub use types::{Candle, MarketTick, TradeClassification, TradeSide};
