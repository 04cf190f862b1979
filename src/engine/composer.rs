//! Per-symbol signal pipeline.
//!
//! One composer owns every analyzer for its symbol and processes ticks
//! strictly in arrival order. Distinct symbols get distinct composers;
//! nothing here is shared across threads.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::alpha::AlphaEngine;
use crate::engine::bollinger::{BollingerMetrics, BollingerSignal, BollingerTracker};
use crate::engine::microstructure::MicrostructureAnalyzer;
use crate::engine::orderflow::{FlowDirection, OrderFlowEngine};
use crate::engine::regime::{MarketRegime, RegimeDetector};
use crate::engine::vwap::VwapCalculator;
use crate::feeds::aggregator::CandleAggregator;
use crate::storage::SignalSink;
use crate::types::MarketTick;

/// Discrete trade recommendation, first matching rule wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    StrongBuy,
    StrongSell,
    Buy,
    Sell,
    WaitToxic,
    WaitSqueeze,
    Neutral,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::StrongBuy => "STRONG_BUY",
            Recommendation::StrongSell => "STRONG_SELL",
            Recommendation::Buy => "BUY",
            Recommendation::Sell => "SELL",
            Recommendation::WaitToxic => "WAIT_TOXIC",
            Recommendation::WaitSqueeze => "WAIT_SQUEEZE",
            Recommendation::Neutral => "NEUTRAL",
        }
    }
}

/// Merged per-tick output of the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub symbol: String,
    pub timestamp_ms: i64,

    pub momentum: f64,
    pub mean_rev_z: f64,

    pub vpin: f64,
    pub toxicity: f64,
    pub lambda: f64,
    pub spread: f64,

    pub ofi: f64,
    pub bid_pressure: f64,
    pub ask_pressure: f64,
    pub volume_delta: f64,
    pub flow_direction: FlowDirection,

    pub regime: MarketRegime,
    pub hurst_exponent: f64,
    pub volatility: f64,
    pub trend_strength: f64,

    pub vwap: f64,
    pub vwap_deviation: f64,

    pub bollinger: Option<BollingerMetrics>,

    pub combined_score: f64,
    pub recommendation: Recommendation,
}

/// Pipeline tuning knobs; defaults mirror the production wiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposerConfig {
    pub alpha_window: usize,
    pub timeframe: String,
    pub candle_interval_secs: i64,
    pub micro_bucket_size: f64,
    pub micro_vpin_window: usize,
    pub micro_impact_window: usize,
    pub regime_window: usize,
    pub regime_hurst_lag: usize,
    pub regime_vol_window: usize,
    pub vwap_band_multiplier: f64,
    /// 0 selects session VWAP; N > 0 a rolling N-tick VWAP.
    pub vwap_rolling_window: usize,
    pub bollinger_period: usize,
    pub bollinger_mult: f64,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            alpha_window: 20,
            timeframe: "1m".to_string(),
            candle_interval_secs: 60,
            micro_bucket_size: 50.0,
            micro_vpin_window: 50,
            micro_impact_window: 100,
            regime_window: 100,
            regime_hurst_lag: 20,
            regime_vol_window: 50,
            vwap_band_multiplier: 2.0,
            vwap_rolling_window: 0,
            bollinger_period: 10,
            bollinger_mult: 2.0,
        }
    }
}

/// Per-symbol pipeline binding all analyzers into one signal output.
pub struct Composer {
    symbol: String,
    config: ComposerConfig,
    sink: Option<Arc<dyn SignalSink>>,

    aggregator: CandleAggregator,
    alpha: AlphaEngine,
    microstructure: MicrostructureAnalyzer,
    orderflow: OrderFlowEngine,
    regime: RegimeDetector,
    vwap: VwapCalculator,
    bollinger: BollingerTracker,

    last_price: f64,
    rejected_ticks: u64,
}

impl Composer {
    pub fn new(
        symbol: impl Into<String>,
        config: ComposerConfig,
        sink: Option<Arc<dyn SignalSink>>,
    ) -> Self {
        let symbol = symbol.into();
        Self {
            aggregator: CandleAggregator::new(config.candle_interval_secs),
            alpha: AlphaEngine::new(
                symbol.clone(),
                config.alpha_window,
                config.timeframe.clone(),
                sink.clone(),
            ),
            microstructure: MicrostructureAnalyzer::new(
                config.micro_bucket_size,
                config.micro_vpin_window,
                config.micro_impact_window,
            ),
            orderflow: OrderFlowEngine::new(),
            regime: RegimeDetector::new(
                config.regime_window,
                config.regime_hurst_lag,
                config.regime_vol_window,
            ),
            vwap: VwapCalculator::new(config.vwap_band_multiplier, config.vwap_rolling_window),
            bollinger: BollingerTracker::new(config.bollinger_period, config.bollinger_mult),
            last_price: 0.0,
            rejected_ticks: 0,
            symbol,
            config,
            sink,
        }
    }

    /// Processes one tick through every analyzer and merges the outputs.
    /// Invalid ticks are dropped and counted; state is untouched.
    pub fn on_tick(&mut self, tick: &MarketTick) -> Option<SignalRecord> {
        if let Err(error) = tick.validate() {
            self.rejected_ticks += 1;
            warn!(symbol = %tick.symbol, %error, "dropping invalid tick");
            return None;
        }

        if let Some(candle) = self
            .aggregator
            .on_tick(tick.price, tick.volume, tick.timestamp_ms)
        {
            if let Some(sink) = &self.sink {
                sink.write_candle(&self.symbol, &candle);
            }
            self.alpha.on_candle(&candle);
        }

        let alpha_signal = self.alpha.on_tick(tick);

        self.microstructure.on_tick(tick);
        let vpin = self.microstructure.vpin_metrics();
        let impact = self.microstructure.kyle_impact();
        let spread = self.microstructure.effective_spread();

        let is_buy = tick.price > self.last_price;
        let flow = self.orderflow.on_tick(tick, is_buy);

        self.regime.on_tick(tick);
        let regime_metrics = self.regime.metrics();

        self.vwap.on_tick(tick);
        let vwap_metrics = self.vwap.metrics();

        let bollinger = self.bollinger.on_price(tick.price);

        let (momentum, mean_rev_z) = alpha_signal
            .as_ref()
            .map(|s| (s.momentum, s.mean_rev_z))
            .unwrap_or((0.0, 0.0));

        let weights = self.regime.signal_weights();
        let combined_score =
            weights.momentum_weight * momentum + weights.mean_rev_weight * mean_rev_z;

        let recommendation = recommend(
            bollinger.as_ref().map(|b| b.signal),
            bollinger.as_ref().map(|b| b.is_squeezing).unwrap_or(false),
            combined_score,
            vpin.toxicity,
        );

        let record = SignalRecord {
            symbol: self.symbol.clone(),
            timestamp_ms: tick.timestamp_ms,
            momentum,
            mean_rev_z,
            vpin: vpin.vpin,
            toxicity: vpin.toxicity,
            lambda: impact.lambda,
            spread,
            ofi: flow.as_ref().map(|f| f.ofi).unwrap_or(0.0),
            bid_pressure: flow.as_ref().map(|f| f.bid_pressure).unwrap_or(0.5),
            ask_pressure: flow.as_ref().map(|f| f.ask_pressure).unwrap_or(0.5),
            volume_delta: flow.as_ref().map(|f| f.volume_delta).unwrap_or(0.0),
            flow_direction: flow
                .as_ref()
                .map(|f| f.flow_direction)
                .unwrap_or(FlowDirection::Neutral),
            regime: regime_metrics.regime,
            hurst_exponent: regime_metrics.hurst_exponent,
            volatility: regime_metrics.volatility,
            trend_strength: regime_metrics.trend_strength,
            vwap: vwap_metrics.vwap,
            vwap_deviation: vwap_metrics.deviation,
            bollinger,
            combined_score,
            recommendation,
        };

        if let Some(sink) = &self.sink {
            sink.write_microstructure(
                &self.symbol,
                record.vpin,
                record.toxicity,
                record.lambda,
                record.spread,
                tick.timestamp_ms,
            );
            sink.write_order_flow(
                &self.symbol,
                record.ofi,
                record.bid_pressure,
                record.ask_pressure,
                record.volume_delta,
                tick.timestamp_ms,
            );
            sink.write_regime(
                &self.symbol,
                record.regime.as_str(),
                record.hurst_exponent,
                record.volatility,
                record.trend_strength,
                tick.timestamp_ms,
            );
            sink.write_vwap(
                &self.symbol,
                record.vwap,
                record.vwap_deviation,
                tick.timestamp_ms,
            );
            sink.write_tick(tick);
        }

        self.last_price = tick.price;
        Some(record)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Invalid ticks dropped since construction or reset.
    pub fn rejected_ticks(&self) -> u64 {
        self.rejected_ticks
    }

    /// Restores construction state: replaying the same tick sequence after
    /// a reset yields an identical record stream.
    pub fn reset(&mut self) {
        self.aggregator.reset();
        self.alpha.reset();
        self.microstructure.reset();
        self.orderflow = OrderFlowEngine::new();
        self.regime.reset();
        self.vwap.reset();
        self.bollinger.reset();
        self.last_price = 0.0;
        self.rejected_ticks = 0;
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }
}

/// First-match recommendation table.
fn recommend(
    bollinger: Option<BollingerSignal>,
    is_squeezing: bool,
    combined_score: f64,
    toxicity: f64,
) -> Recommendation {
    let calm = toxicity < 0.5;

    if bollinger == Some(BollingerSignal::Buy) && combined_score > 0.01 && calm {
        Recommendation::StrongBuy
    } else if bollinger == Some(BollingerSignal::Sell) && combined_score < -0.01 && calm {
        Recommendation::StrongSell
    } else if combined_score > 0.01 && calm {
        Recommendation::Buy
    } else if combined_score < -0.01 && calm {
        Recommendation::Sell
    } else if toxicity > 0.7 {
        Recommendation::WaitToxic
    } else if is_squeezing {
        Recommendation::WaitSqueeze
    } else {
        Recommendation::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(price: f64, volume: f64, ts: i64) -> MarketTick {
        MarketTick::new("TEST", price, volume, ts)
    }

    fn walk_ticks(n: usize) -> Vec<MarketTick> {
        let mut state: u64 = 0x51A1;
        let mut price = 100.0;
        let mut ticks = Vec::with_capacity(n);
        for i in 0..n {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let step = ((state >> 33) % 200) as f64 / 10_000.0 - 0.0095;
            price = (price * (1.0 + step)).max(1.0);
            let volume = ((state >> 20) % 40) as f64 / 10.0 + 0.5;
            ticks.push(tick(price, volume, i as i64 * 750));
        }
        ticks
    }

    #[test]
    fn replay_after_reset_is_deterministic() {
        let ticks = walk_ticks(500);

        let mut composer = Composer::new("TEST", ComposerConfig::default(), None);
        let first: Vec<_> = ticks.iter().filter_map(|t| composer.on_tick(t)).collect();

        composer.reset();
        let second: Vec<_> = ticks.iter().filter_map(|t| composer.on_tick(t)).collect();

        assert_eq!(first.len(), second.len());
        assert_eq!(first, second);
    }

    #[test]
    fn two_composers_agree_on_the_same_stream() {
        let ticks = walk_ticks(300);
        let mut a = Composer::new("TEST", ComposerConfig::default(), None);
        let mut b = Composer::new("TEST", ComposerConfig::default(), None);
        for t in &ticks {
            assert_eq!(a.on_tick(t), b.on_tick(t));
        }
    }

    #[test]
    fn invalid_ticks_are_counted_and_skipped() {
        let mut composer = Composer::new("TEST", ComposerConfig::default(), None);
        assert!(composer.on_tick(&tick(-1.0, 1.0, 0)).is_none());
        assert!(composer.on_tick(&tick(f64::NAN, 1.0, 1)).is_none());
        assert_eq!(composer.rejected_ticks(), 2);

        // A rejected tick must not perturb subsequent output.
        let ticks = walk_ticks(100);
        let mut clean = Composer::new("TEST", ComposerConfig::default(), None);
        let mut dirty = Composer::new("TEST", ComposerConfig::default(), None);
        dirty.on_tick(&tick(0.0, 1.0, 0));
        for t in &ticks {
            assert_eq!(clean.on_tick(t), dirty.on_tick(t));
        }
    }

    #[test]
    fn records_carry_bounded_metrics() {
        let ticks = walk_ticks(400);
        let mut composer = Composer::new("TEST", ComposerConfig::default(), None);
        for t in &ticks {
            let record = composer.on_tick(t).unwrap();
            assert!((0.0..=1.0).contains(&record.vpin));
            assert!((0.0..=1.0).contains(&record.toxicity));
            assert!((-1.0..=1.0).contains(&record.ofi));
            assert!((record.bid_pressure + record.ask_pressure - 1.0).abs() < 1e-9);
            assert!((0.0..=1.0).contains(&record.hurst_exponent));
        }
    }

    #[test]
    fn recommendation_table_first_match_wins() {
        // Strong signals require a band signal, a clear score and calm flow.
        assert_eq!(
            recommend(Some(BollingerSignal::Buy), false, 0.02, 0.1),
            Recommendation::StrongBuy
        );
        assert_eq!(
            recommend(Some(BollingerSignal::Sell), false, -0.02, 0.1),
            Recommendation::StrongSell
        );
        // Score alone trades without band confirmation.
        assert_eq!(
            recommend(Some(BollingerSignal::Neutral), false, 0.02, 0.1),
            Recommendation::Buy
        );
        assert_eq!(recommend(None, false, -0.02, 0.1), Recommendation::Sell);
        // Toxic flow vetoes the trade branches.
        assert_eq!(recommend(None, false, 0.02, 0.8), Recommendation::WaitToxic);
        assert_eq!(
            recommend(Some(BollingerSignal::Buy), true, 0.02, 0.8),
            Recommendation::WaitToxic
        );
        // Squeeze only matters when nothing stronger fired.
        assert_eq!(recommend(None, true, 0.0, 0.1), Recommendation::WaitSqueeze);
        assert_eq!(recommend(None, false, 0.0, 0.1), Recommendation::Neutral);
        // Mid-band toxicity (0.5..0.7) blocks trades but is not WAIT_TOXIC.
        assert_eq!(recommend(None, false, 0.02, 0.6), Recommendation::Neutral);
    }

    #[test]
    fn symbol_rides_through_records() {
        let mut composer = Composer::new("ETH-USD", ComposerConfig::default(), None);
        let record = composer
            .on_tick(&MarketTick::new("ETH-USD", 2000.0, 1.0, 0))
            .unwrap();
        assert_eq!(record.symbol, "ETH-USD");
        assert_eq!(composer.symbol(), "ETH-USD");
    }
}
