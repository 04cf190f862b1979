//! Deterministic historical replay with slippage and commission modeling.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backtest::metrics::{self, PERIODS_PER_YEAR};
use crate::backtest::pnl::{CostMethod, PnLTracker};
use crate::types::MarketTick;

/// Tolerance for floating-point rounding at the sizing boundary.
const SIZING_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    /// Commission as a fraction of notional per fill.
    pub commission_rate: f64,
    /// Adverse price move per fill, in basis points.
    pub slippage_bps: f64,
    /// Fraction of capital deployable per position, in (0, 1].
    pub max_position_size: f64,
    pub enable_short_selling: bool,
    pub enable_margin_trading: bool,
    /// Margin fraction required when margin trading is enabled.
    pub margin_requirement: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            commission_rate: 0.001,
            slippage_bps: 2.0,
            max_position_size: 0.5,
            enable_short_selling: true,
            enable_margin_trading: false,
            margin_requirement: 0.5,
        }
    }
}

/// Why a position was opened or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeReason {
    SignalBuy,
    SignalSell,
    EndOfBacktest,
}

impl TradeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeReason::SignalBuy => "SIGNAL_BUY",
            TradeReason::SignalSell => "SIGNAL_SELL",
            TradeReason::EndOfBacktest => "END_OF_BACKTEST",
        }
    }
}

/// One round trip. Prices include slippage; pnl is gross of commission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub timestamp_ms: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub is_long: bool,
    pub pnl: f64,
    pub commission: f64,
    pub slippage: f64,
    pub entry_reason: TradeReason,
    pub exit_reason: TradeReason,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BacktestResult {
    pub trades: Vec<Trade>,
    pub total_pnl: f64,
    /// Percent of initial capital.
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub num_trades: usize,
    pub num_winning_trades: usize,
    pub num_losing_trades: usize,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    /// Mean trade PnL.
    pub expectancy: f64,
    pub equity_curve: Vec<f64>,
    pub timestamps: Vec<i64>,
}

/// Signal values: +1 enter long / exit short, -1 exit long / enter short,
/// 0 hold.
pub type Signal = i32;

/// Single-position replay simulator.
pub struct Backtester {
    config: BacktestConfig,
    pnl_tracker: PnLTracker,

    position: f64,
    avg_entry_price: f64,
    entry_reason: TradeReason,
    cash: f64,
}

impl Backtester {
    pub fn new(config: BacktestConfig) -> Self {
        let cash = config.initial_capital;
        Self {
            pnl_tracker: PnLTracker::new(config.initial_capital, CostMethod::Average),
            position: 0.0,
            avg_entry_price: 0.0,
            entry_reason: TradeReason::SignalBuy,
            cash,
            config,
        }
    }

    /// Replays `data` through `signal`, simulating execution. Empty data or
    /// a signal that never fires yields a zero-trade result with neutral
    /// metrics.
    pub fn run<F>(&mut self, data: &[MarketTick], mut signal: F) -> BacktestResult
    where
        F: FnMut(&MarketTick) -> Signal,
    {
        self.position = 0.0;
        self.avg_entry_price = 0.0;
        self.cash = self.config.initial_capital;
        self.pnl_tracker.reset();

        let mut trades = Vec::new();
        let mut equity_curve = Vec::with_capacity(data.len());
        let mut timestamps = Vec::with_capacity(data.len());

        for tick in data {
            match signal(tick) {
                1 if self.position <= 0.0 => {
                    if self.position < 0.0 {
                        if let Some(trade) = self.exit_position(tick, TradeReason::SignalBuy) {
                            trades.push(trade);
                        }
                    }
                    self.try_enter(tick, true, TradeReason::SignalBuy);
                }
                -1 if self.position >= 0.0 => {
                    if self.position > 0.0 {
                        if let Some(trade) = self.exit_position(tick, TradeReason::SignalSell) {
                            trades.push(trade);
                        }
                    }
                    if self.config.enable_short_selling {
                        self.try_enter(tick, false, TradeReason::SignalSell);
                    }
                }
                _ => {}
            }

            equity_curve.push(self.cash + self.position * tick.price);
            timestamps.push(tick.timestamp_ms);
            self.pnl_tracker.update_price(&tick.symbol, tick.price);
        }

        // Flatten whatever is left; this close is not booked as a trade.
        if self.position != 0.0 {
            if let Some(last) = data.last() {
                self.close_without_booking(last, TradeReason::EndOfBacktest);
                if let Some(equity) = equity_curve.last_mut() {
                    *equity = self.cash;
                }
            }
        }

        self.compute_results(trades, equity_curve, timestamps)
    }

    /// Walk-forward analysis: repeatedly backtests the `test_period` slice
    /// that follows each `train_period` window, advancing by `test_period`.
    pub fn walk_forward<F>(
        &mut self,
        data: &[MarketTick],
        mut signal: F,
        train_period: usize,
        test_period: usize,
    ) -> Vec<BacktestResult>
    where
        F: FnMut(&MarketTick) -> Signal,
    {
        let mut results = Vec::new();

        let mut i = 0;
        while i + train_period + test_period < data.len() {
            let test = &data[i + train_period..i + train_period + test_period];
            let result = self.run(test, &mut signal);
            info!(
                period = i / test_period + 1,
                pnl = result.total_pnl,
                sharpe = result.sharpe_ratio,
                trades = result.num_trades,
                "walk-forward step"
            );
            results.push(result);
            i += test_period;
        }

        results
    }

    /// Monte Carlo bootstrap: reshuffles the tick vector with a seeded PRNG
    /// and reruns the backtest `num_simulations` times.
    pub fn monte_carlo<F>(
        &mut self,
        data: &[MarketTick],
        mut signal: F,
        num_simulations: usize,
        seed: u64,
    ) -> Vec<BacktestResult>
    where
        F: FnMut(&MarketTick) -> Signal,
    {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut results = Vec::with_capacity(num_simulations);

        for sim in 0..num_simulations {
            let mut shuffled = data.to_vec();
            shuffled.shuffle(&mut rng);
            results.push(self.run(&shuffled, &mut signal));

            if (sim + 1) % 100 == 0 {
                info!(completed = sim + 1, total = num_simulations, "monte carlo progress");
            }
        }

        results
    }

    fn apply_slippage(&self, price: f64, is_buy: bool) -> f64 {
        let direction = if is_buy { 1.0 } else { -1.0 };
        price * (1.0 + direction * self.config.slippage_bps / 10_000.0)
    }

    fn commission(&self, notional: f64) -> f64 {
        notional * self.config.commission_rate
    }

    fn can_enter(&self, exec_price: f64, quantity: f64) -> bool {
        let notional = exec_price * quantity.abs();
        let margin_factor = if self.config.enable_margin_trading {
            self.config.margin_requirement
        } else {
            1.0
        };
        let required = notional * margin_factor;
        let limit = self.cash * self.config.max_position_size;
        required <= limit * (1.0 + SIZING_EPSILON)
    }

    fn try_enter(&mut self, tick: &MarketTick, is_long: bool, reason: TradeReason) {
        let exec_price = self.apply_slippage(tick.price, is_long);
        let quantity = self.cash * self.config.max_position_size / exec_price;
        let quantity = if is_long { quantity } else { -quantity };

        if !self.can_enter(exec_price, quantity) {
            return;
        }

        let notional = exec_price * quantity.abs();
        let commission = self.commission(notional);

        self.position = quantity;
        self.avg_entry_price = exec_price;
        self.entry_reason = reason;
        self.cash -= quantity * exec_price + commission;

        self.pnl_tracker
            .add_position(&tick.symbol, quantity, exec_price);

        debug!(
            side = if is_long { "LONG" } else { "SHORT" },
            price = exec_price,
            quantity,
            reason = reason.as_str(),
            "entry"
        );
    }

    /// Closes the open position and books the round trip.
    fn exit_position(&mut self, tick: &MarketTick, reason: TradeReason) -> Option<Trade> {
        if self.position == 0.0 {
            return None;
        }

        let is_long = self.position > 0.0;
        let quantity = self.position;
        let entry_price = self.avg_entry_price;

        let exec_price = self.apply_slippage(tick.price, !is_long);
        let notional = exec_price * quantity.abs();
        let commission = self.commission(notional);

        let pnl = if is_long {
            (exec_price - entry_price) * quantity
        } else {
            (entry_price - exec_price) * quantity.abs()
        };

        self.cash += quantity * exec_price - commission;
        self.pnl_tracker.close_position(&tick.symbol, exec_price);

        debug!(
            side = if is_long { "LONG" } else { "SHORT" },
            price = exec_price,
            pnl,
            reason = reason.as_str(),
            "exit"
        );

        let trade = Trade {
            symbol: tick.symbol.clone(),
            timestamp_ms: tick.timestamp_ms,
            entry_price,
            exit_price: exec_price,
            quantity,
            is_long,
            pnl,
            commission,
            slippage: exec_price - tick.price,
            entry_reason: self.entry_reason,
            exit_reason: reason,
        };

        self.position = 0.0;
        self.avg_entry_price = 0.0;
        Some(trade)
    }

    /// End-of-data flatten: cash and position settle, no trade is recorded.
    fn close_without_booking(&mut self, tick: &MarketTick, reason: TradeReason) {
        let _ = self.exit_position(tick, reason);
    }

    fn compute_results(
        &self,
        trades: Vec<Trade>,
        equity_curve: Vec<f64>,
        timestamps: Vec<i64>,
    ) -> BacktestResult {
        let num_trades = trades.len();
        if num_trades == 0 {
            return BacktestResult {
                equity_curve,
                timestamps,
                ..Default::default()
            };
        }

        let mut total_pnl = 0.0;
        let mut total_win = 0.0;
        let mut total_loss = 0.0;
        let mut num_winning = 0;
        let mut num_losing = 0;
        for trade in &trades {
            total_pnl += trade.pnl;
            if trade.pnl > 0.0 {
                total_win += trade.pnl;
                num_winning += 1;
            } else if trade.pnl < 0.0 {
                total_loss += trade.pnl.abs();
                num_losing += 1;
            }
        }

        let returns: Vec<f64> = trades
            .iter()
            .map(|t| t.pnl / self.config.initial_capital)
            .collect();

        BacktestResult {
            total_pnl,
            total_return: total_pnl / self.config.initial_capital * 100.0,
            sharpe_ratio: metrics::sharpe_ratio(&returns, 0.0, PERIODS_PER_YEAR),
            max_drawdown: metrics::max_drawdown(&equity_curve),
            win_rate: num_winning as f64 / num_trades as f64,
            num_trades,
            num_winning_trades: num_winning,
            num_losing_trades: num_losing,
            avg_win: if num_winning > 0 {
                total_win / num_winning as f64
            } else {
                0.0
            },
            avg_loss: if num_losing > 0 {
                total_loss / num_losing as f64
            } else {
                0.0
            },
            profit_factor: metrics::profit_factor(&returns),
            expectancy: total_pnl / num_trades as f64,
            equity_curve,
            timestamps,
            trades,
        }
    }
}
