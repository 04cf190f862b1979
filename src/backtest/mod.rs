//! Historical replay simulation and performance analytics.

pub mod backtester;
pub mod metrics;
pub mod pnl;

pub use backtester::{BacktestConfig, BacktestResult, Backtester, Signal, Trade, TradeReason};
pub use metrics::{compute_all_metrics, PerformanceMetrics};
pub use pnl::{CostMethod, PnLTracker, PortfolioMetrics, Position};
