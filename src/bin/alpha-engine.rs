//! Multi-exchange alpha engine host process.
//!
//! ```bash
//! # Live Binance trade streams through per-symbol composers
//! alpha-engine live
//! alpha-engine binance --symbols BTCUSDT,ETHUSDT
//!
//! # Synthetic-data backtest with the Bollinger demo strategy
//! alpha-engine backtest
//! ```
//!
//! Sink emission is enabled when `INFLUX_ORG`, `INFLUX_BUCKET`,
//! `INFLUX_TOKEN` and `INFLUX_URL` are all set.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use alpha_engine::backtest::{BacktestConfig, Backtester};
use alpha_engine::engine::indicators::{bollinger, percent_b};
use alpha_engine::engine::{Composer, ComposerConfig};
use alpha_engine::feeds::{BinanceFeed, MarketFeed};
use alpha_engine::storage::{InfluxWriter, SignalSink};
use alpha_engine::types::MarketTick;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// All configured exchanges (currently the Binance connector).
    Live,
    /// Binance trade streams only.
    Binance,
    /// Synthetic-data backtest demo.
    Backtest,
}

#[derive(Parser)]
#[command(
    name = "alpha-engine",
    about = "Streaming alpha signals: VPIN | Kyle lambda | OFI | Regime | VWAP"
)]
struct Cli {
    /// Run mode.
    #[arg(value_enum, default_value = "live")]
    mode: Mode,

    /// Comma-separated symbols for the live feeds.
    #[arg(long, value_delimiter = ',', default_value = "BTCUSDT,ETHUSDT,BNBUSDT")]
    symbols: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.mode {
        Mode::Backtest => run_backtest_demo(),
        Mode::Live | Mode::Binance => run_live(cli.symbols).await,
    }
}

/// Wires the Binance feed into one composer per symbol and runs until
/// interrupted.
async fn run_live(symbols: Vec<String>) -> anyhow::Result<()> {
    info!(?symbols, "starting live alpha engine");

    let sink: Option<Arc<dyn SignalSink>> = match InfluxWriter::from_env() {
        Some(writer) => {
            info!("influx sink enabled");
            Some(Arc::new(writer))
        }
        None => {
            info!("influx environment not set, sink disabled");
            None
        }
    };

    // Symbol-keyed routing: one composer per symbol, each behind its own
    // lock so ticks for a symbol serialize while symbols stay independent.
    let composers: Arc<HashMap<String, Mutex<Composer>>> = Arc::new(
        symbols
            .iter()
            .map(|symbol| {
                (
                    symbol.clone(),
                    Mutex::new(Composer::new(
                        symbol.clone(),
                        ComposerConfig::default(),
                        sink.clone(),
                    )),
                )
            })
            .collect(),
    );

    let router = Arc::clone(&composers);
    let mut feed = BinanceFeed::new(symbols);
    feed.set_tick_callback(Arc::new(move |tick: MarketTick| {
        match router.get(&tick.symbol) {
            Some(composer) => {
                let mut composer = composer.lock().expect("composer lock poisoned");
                composer.on_tick(&tick);
            }
            None => warn!(symbol = %tick.symbol, "tick for unrouted symbol"),
        }
    }));
    feed.start().context("starting binance feed")?;

    info!("all systems operational, ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;

    info!("shutting down");
    feed.stop();
    Ok(())
}

/// Synthetic-tick backtest with a Bollinger %B + momentum strategy,
/// mirroring the live pipeline's indicator stack.
fn run_backtest_demo() -> anyhow::Result<()> {
    info!("generating 1000 synthetic ticks");

    let mut rng = StdRng::seed_from_u64(42);
    let mut price = 280.0;
    let mut data = Vec::with_capacity(1000);
    for i in 0..1000i64 {
        let change = (rng.gen_range(0..200) - 95) as f64 / 10_000.0;
        price *= 1.0 + change;
        data.push(MarketTick::new(
            "AAPL",
            price,
            1000.0 + rng.gen_range(0..500) as f64,
            i * 1000,
        ));
    }

    let config = BacktestConfig {
        initial_capital: 100_000.0,
        commission_rate: 0.001,
        slippage_bps: 2.0,
        ..Default::default()
    };
    let mut backtester = Backtester::new(config);

    let mut prices: VecDeque<f64> = VecDeque::new();
    let mut tick_count = 0u64;
    let result = backtester.run(&data, move |tick| {
        tick_count += 1;
        prices.push_back(tick.price);
        if prices.len() > 20 {
            prices.pop_front();
        }
        if prices.len() < 20 {
            return 0;
        }

        let window: Vec<f64> = prices.iter().copied().collect();
        let (_, upper, lower) = bollinger(&window, 20, 2.0);
        let momentum = window[window.len() - 1] / window[0] - 1.0;
        let pb = percent_b(tick.price, lower, upper);

        if pb < 0.2 && momentum > 0.005 && tick_count % 50 == 0 {
            1
        } else if pb > 0.8 && momentum < -0.005 && tick_count % 50 == 25 {
            -1
        } else {
            0
        }
    });

    info!(
        total_return_pct = result.total_return,
        trades = result.num_trades,
        win_rate = result.win_rate,
        sharpe = result.sharpe_ratio,
        max_drawdown = result.max_drawdown,
        profit_factor = result.profit_factor,
        "backtest complete"
    );

    Ok(())
}
