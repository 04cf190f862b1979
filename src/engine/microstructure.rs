//! Trade-level microstructure: Lee–Ready classification, volume-bucketed
//! VPIN, a Kyle-lambda price-impact regression and the Roll spread.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::engine::indicators::roll_spread;
use crate::types::{MarketTick, TradeClassification, TradeSide};

/// Trade / classification history retention.
const HISTORY_CAP: usize = 1000;
/// Trades considered for the recent buy/sell imbalance split.
const RECENT_TRADES: usize = 50;
/// Minimum observations for the impact regression.
const MIN_IMPACT_SAMPLES: usize = 10;

/// Flow-toxicity snapshot derived from volume buckets.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VpinMetrics {
    /// Volume-synchronized probability of informed trading, in [0, 1].
    pub vpin: f64,
    /// vpin scaled by the recent buy/sell imbalance, in [0, 1].
    pub toxicity: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    /// |buy - sell| / total over recent trades, in [0, 1].
    pub imbalance: f64,
}

/// Price-impact decomposition from the Kyle-lambda regression.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct KyleImpact {
    /// Price change per unit of signed volume.
    pub lambda: f64,
    pub permanent_impact: f64,
    pub transient_impact: f64,
    pub adverse_selection: f64,
}

/// Streaming per-symbol microstructure state. Single-threaded; owned by one
/// composer.
pub struct MicrostructureAnalyzer {
    bucket_size: f64,
    vpin_window: usize,
    impact_window: usize,

    trade_history: VecDeque<MarketTick>,
    classified_trades: VecDeque<TradeClassification>,
    volume_buckets: VecDeque<f64>,
    price_changes: VecDeque<f64>,
    signed_volumes: VecDeque<f64>,

    current_bucket_volume: f64,
    current_bucket_buy_volume: f64,
    last_price: f64,

    cumulative_volume: f64,
    cumulative_buy_volume: f64,
    cumulative_sell_volume: f64,
}

impl MicrostructureAnalyzer {
    pub fn new(bucket_size: f64, vpin_window: usize, impact_window: usize) -> Self {
        Self {
            bucket_size,
            vpin_window,
            impact_window,
            trade_history: VecDeque::new(),
            classified_trades: VecDeque::new(),
            volume_buckets: VecDeque::new(),
            price_changes: VecDeque::new(),
            signed_volumes: VecDeque::new(),
            current_bucket_volume: 0.0,
            current_bucket_buy_volume: 0.0,
            last_price: 0.0,
            cumulative_volume: 0.0,
            cumulative_buy_volume: 0.0,
            cumulative_sell_volume: 0.0,
        }
    }

    pub fn on_tick(&mut self, tick: &MarketTick) {
        let classification = self.classify_trade(tick.price, tick.volume, 0.0, 0.0);

        self.trade_history.push_back(tick.clone());
        if self.trade_history.len() > HISTORY_CAP {
            self.trade_history.pop_front();
        }

        self.classified_trades.push_back(classification);
        if self.classified_trades.len() > HISTORY_CAP {
            self.classified_trades.pop_front();
        }

        self.cumulative_volume += tick.volume;
        match classification.side {
            TradeSide::Buy => self.cumulative_buy_volume += tick.volume,
            TradeSide::Sell => self.cumulative_sell_volume += tick.volume,
            TradeSide::Unknown => {}
        }

        self.update_vpin_buckets(&classification);

        if self.last_price > 0.0 {
            let price_change = tick.price - self.last_price;
            self.update_price_impact(price_change, classification.signed_volume);
        }

        self.last_price = tick.price;
    }

    /// Lee–Ready-style side inference: quote rule against the midpoint when
    /// quotes are available, tick rule otherwise (and at the midpoint).
    pub fn classify_trade(
        &self,
        price: f64,
        volume: f64,
        bid_price: f64,
        ask_price: f64,
    ) -> TradeClassification {
        if bid_price > 0.0 && ask_price > 0.0 {
            let mid = (bid_price + ask_price) / 2.0;
            if price > mid {
                return TradeClassification::new(TradeSide::Buy, volume);
            }
            if price < mid {
                return TradeClassification::new(TradeSide::Sell, volume);
            }
        }
        TradeClassification::new(self.infer_trade_side(price), volume)
    }

    pub fn vpin_metrics(&self) -> VpinMetrics {
        let vpin = self.compute_vpin();

        let mut recent_buy = 0.0;
        let mut recent_sell = 0.0;
        let window = self.classified_trades.len().min(RECENT_TRADES);
        for trade in self.classified_trades.iter().rev().take(window) {
            match trade.side {
                TradeSide::Buy => recent_buy += trade.signed_volume,
                TradeSide::Sell => recent_sell += trade.signed_volume.abs(),
                TradeSide::Unknown => {}
            }
        }

        let total = recent_buy + recent_sell;
        let imbalance = if total > 0.0 {
            (recent_buy - recent_sell).abs() / total
        } else {
            0.0
        };

        VpinMetrics {
            vpin,
            toxicity: vpin * imbalance,
            buy_volume: recent_buy,
            sell_volume: recent_sell,
            imbalance,
        }
    }

    /// Kyle lambda via OLS of price changes on signed volumes over the
    /// impact window. Neutral zeros with fewer than ten observations or a
    /// degenerate volume variance.
    pub fn kyle_impact(&self) -> KyleImpact {
        if self.price_changes.len() < MIN_IMPACT_SAMPLES
            || self.signed_volumes.len() < MIN_IMPACT_SAMPLES
        {
            return KyleImpact::default();
        }

        let n = self.price_changes.len() as f64;
        let mean_dp = self.price_changes.iter().sum::<f64>() / n;
        let mean_q = self.signed_volumes.iter().sum::<f64>() / n;

        let mut covariance = 0.0;
        let mut variance = 0.0;
        for (dp, q) in self.price_changes.iter().zip(&self.signed_volumes) {
            let dp_dev = dp - mean_dp;
            let q_dev = q - mean_q;
            covariance += dp_dev * q_dev;
            variance += q_dev * q_dev;
        }

        let lambda = if variance > 1e-10 {
            covariance / variance
        } else {
            0.0
        };

        KyleImpact {
            lambda,
            permanent_impact: 0.8 * lambda,
            transient_impact: 0.2 * lambda,
            adverse_selection: lambda.abs(),
        }
    }

    /// Roll effective spread over the retained price changes.
    pub fn effective_spread(&self) -> f64 {
        if self.price_changes.len() < 2 {
            return 0.0;
        }
        let changes: Vec<f64> = self.price_changes.iter().copied().collect();
        roll_spread(&changes)
    }

    /// Net signed-volume imbalance over the last `window` classified trades.
    pub fn order_flow_imbalance(&self, window: usize) -> f64 {
        if self.classified_trades.is_empty() {
            return 0.0;
        }

        let n = window.min(self.classified_trades.len());
        let mut buy = 0.0;
        let mut sell = 0.0;
        for trade in self.classified_trades.iter().rev().take(n) {
            match trade.side {
                TradeSide::Buy => buy += trade.signed_volume,
                TradeSide::Sell => sell += trade.signed_volume.abs(),
                TradeSide::Unknown => {}
            }
        }

        let total = buy + sell;
        if total > 0.0 {
            (buy - sell) / total
        } else {
            0.0
        }
    }

    pub fn cumulative_volume(&self) -> f64 {
        self.cumulative_volume
    }

    pub fn cumulative_buy_volume(&self) -> f64 {
        self.cumulative_buy_volume
    }

    pub fn cumulative_sell_volume(&self) -> f64 {
        self.cumulative_sell_volume
    }

    pub fn reset(&mut self) {
        self.trade_history.clear();
        self.classified_trades.clear();
        self.volume_buckets.clear();
        self.price_changes.clear();
        self.signed_volumes.clear();
        self.current_bucket_volume = 0.0;
        self.current_bucket_buy_volume = 0.0;
        self.last_price = 0.0;
        self.cumulative_volume = 0.0;
        self.cumulative_buy_volume = 0.0;
        self.cumulative_sell_volume = 0.0;
    }

    fn update_vpin_buckets(&mut self, trade: &TradeClassification) {
        let volume = trade.signed_volume.abs();
        self.current_bucket_volume += volume;
        if trade.side == TradeSide::Buy {
            self.current_bucket_buy_volume += volume;
        }

        if self.current_bucket_volume >= self.bucket_size {
            let bucket_imbalance =
                (2.0 * self.current_bucket_buy_volume - self.current_bucket_volume).abs();
            self.volume_buckets.push_back(bucket_imbalance);
            if self.volume_buckets.len() > self.vpin_window {
                self.volume_buckets.pop_front();
            }

            self.current_bucket_volume = 0.0;
            self.current_bucket_buy_volume = 0.0;
        }
    }

    fn update_price_impact(&mut self, price_change: f64, signed_volume: f64) {
        self.price_changes.push_back(price_change);
        self.signed_volumes.push_back(signed_volume);

        if self.price_changes.len() > self.impact_window {
            self.price_changes.pop_front();
            self.signed_volumes.pop_front();
        }
    }

    fn compute_vpin(&self) -> f64 {
        if self.volume_buckets.len() < 2 {
            return 0.0;
        }
        let avg_imbalance =
            self.volume_buckets.iter().sum::<f64>() / self.volume_buckets.len() as f64;
        (avg_imbalance / self.bucket_size).clamp(0.0, 1.0)
    }

    fn infer_trade_side(&self, price: f64) -> TradeSide {
        if self.last_price <= 0.0 {
            return TradeSide::Unknown;
        }
        if price > self.last_price {
            TradeSide::Buy
        } else if price < self.last_price {
            TradeSide::Sell
        } else {
            // Zero tick: inherit the previous classification's side.
            self.classified_trades
                .back()
                .map(|t| t.side)
                .unwrap_or(TradeSide::Unknown)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(price: f64, volume: f64, ts: i64) -> MarketTick {
        MarketTick::new("TEST", price, volume, ts)
    }

    #[test]
    fn first_trade_is_unclassified() {
        let mut analyzer = MicrostructureAnalyzer::new(100.0, 10, 100);
        analyzer.on_tick(&tick(100.0, 1.0, 0));
        assert_eq!(analyzer.classified_trades[0].side, TradeSide::Unknown);
        assert_eq!(analyzer.classified_trades[0].signed_volume, 0.0);
    }

    #[test]
    fn tick_rule_follows_price_direction() {
        let mut analyzer = MicrostructureAnalyzer::new(100.0, 10, 100);
        analyzer.on_tick(&tick(100.0, 1.0, 0));
        analyzer.on_tick(&tick(100.5, 1.0, 1));
        analyzer.on_tick(&tick(100.2, 1.0, 2));
        // Zero tick inherits the previous side.
        analyzer.on_tick(&tick(100.2, 1.0, 3));
        let sides: Vec<TradeSide> = analyzer.classified_trades.iter().map(|t| t.side).collect();
        assert_eq!(
            sides,
            vec![
                TradeSide::Unknown,
                TradeSide::Buy,
                TradeSide::Sell,
                TradeSide::Sell
            ]
        );
    }

    #[test]
    fn quote_rule_beats_tick_rule_when_quotes_present() {
        let analyzer = MicrostructureAnalyzer::new(100.0, 10, 100);
        let buy = analyzer.classify_trade(100.6, 2.0, 100.0, 101.0);
        assert_eq!(buy.side, TradeSide::Buy);
        assert_eq!(buy.signed_volume, 2.0);

        let sell = analyzer.classify_trade(100.4, 2.0, 100.0, 101.0);
        assert_eq!(sell.side, TradeSide::Sell);
        assert_eq!(sell.signed_volume, -2.0);
    }

    #[test]
    fn vpin_needs_two_buckets_then_saturates_on_one_sided_flow() {
        let mut analyzer = MicrostructureAnalyzer::new(100.0, 10, 100);

        // Prime the tick rule so every following trade classifies as a buy.
        analyzer.on_tick(&tick(100.0, 1.0, 0));

        // First full bucket: 100 units of pure buy volume.
        for i in 0..100 {
            analyzer.on_tick(&tick(100.0 + (i + 1) as f64 * 0.01, 1.0, i + 1));
        }
        assert_eq!(analyzer.volume_buckets.len(), 1);
        assert_eq!(analyzer.volume_buckets[0], 100.0);
        assert_eq!(analyzer.vpin_metrics().vpin, 0.0, "one bucket is not enough");

        // Second identical bucket: VPIN = (100 + 100) / 2 / 100 = 1.0.
        for i in 100..200 {
            analyzer.on_tick(&tick(100.0 + (i + 1) as f64 * 0.01, 1.0, i + 1));
        }
        assert_eq!(analyzer.volume_buckets.len(), 2);
        assert!((analyzer.vpin_metrics().vpin - 1.0).abs() < 1e-12);
    }

    #[test]
    fn vpin_and_toxicity_stay_in_unit_interval() {
        let mut analyzer = MicrostructureAnalyzer::new(10.0, 5, 50);
        // Pseudo-random walk via a fixed multiplicative generator.
        let mut state: u64 = 0x9E3779B97F4A7C15;
        let mut price = 100.0;
        for i in 0..2000 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let step = ((state >> 33) % 200) as f64 / 100.0 - 1.0;
            price = (price + step).max(1.0);
            let volume = ((state >> 20) % 50) as f64 / 10.0 + 0.1;
            analyzer.on_tick(&tick(price, volume, i));

            let metrics = analyzer.vpin_metrics();
            assert!((0.0..=1.0).contains(&metrics.vpin), "vpin = {}", metrics.vpin);
            assert!(
                (0.0..=1.0).contains(&metrics.toxicity),
                "toxicity = {}",
                metrics.toxicity
            );
            assert!((0.0..=1.0).contains(&metrics.imbalance));
        }
    }

    #[test]
    fn kyle_lambda_recovers_linear_impact() {
        let mut analyzer = MicrostructureAnalyzer::new(1.0e9, 10, 100);
        // Construct trades whose price change is exactly 0.001 per unit of
        // signed volume under the tick rule.
        let lambda = 0.001;
        let volumes = [10.0, 25.0, 5.0, 40.0, 15.0, 30.0, 8.0, 22.0, 12.0, 35.0, 18.0, 27.0];
        let mut price = 100.0;
        analyzer.on_tick(&tick(price, 1.0, 0));
        for (i, v) in volumes.iter().enumerate() {
            let signed = if i % 3 == 2 { -v } else { *v };
            price += lambda * signed;
            analyzer.on_tick(&tick(price, *v, i as i64 + 1));
        }

        let impact = analyzer.kyle_impact();
        assert!(
            (impact.lambda - lambda).abs() < 1e-9,
            "lambda = {}",
            impact.lambda
        );
        assert!((impact.permanent_impact - 0.8 * lambda).abs() < 1e-9);
        assert!((impact.transient_impact - 0.2 * lambda).abs() < 1e-9);
        assert!((impact.adverse_selection - lambda).abs() < 1e-9);
    }

    #[test]
    fn kyle_impact_neutral_with_few_samples() {
        let mut analyzer = MicrostructureAnalyzer::new(100.0, 10, 100);
        for i in 0..5 {
            analyzer.on_tick(&tick(100.0 + i as f64, 1.0, i));
        }
        assert_eq!(analyzer.kyle_impact(), KyleImpact::default());
    }

    #[test]
    fn effective_spread_positive_on_bouncing_prices() {
        let mut analyzer = MicrostructureAnalyzer::new(1.0e9, 10, 100);
        analyzer.on_tick(&tick(100.0, 1.0, 0));
        for i in 0..20 {
            let price = if i % 2 == 0 { 101.0 } else { 100.0 };
            analyzer.on_tick(&tick(price, 1.0, i + 1));
        }
        assert!(analyzer.effective_spread() > 0.0);
    }

    #[test]
    fn histories_are_capped() {
        let mut analyzer = MicrostructureAnalyzer::new(1.0e9, 10, 50);
        for i in 0..1500 {
            analyzer.on_tick(&tick(100.0 + (i % 3) as f64, 1.0, i));
        }
        assert_eq!(analyzer.trade_history.len(), HISTORY_CAP);
        assert_eq!(analyzer.classified_trades.len(), HISTORY_CAP);
        assert_eq!(analyzer.price_changes.len(), 50);
        assert_eq!(analyzer.signed_volumes.len(), 50);
    }

    #[test]
    fn reset_restores_construction_state() {
        let mut analyzer = MicrostructureAnalyzer::new(10.0, 5, 50);
        for i in 0..100 {
            analyzer.on_tick(&tick(100.0 + i as f64, 2.0, i));
        }
        analyzer.reset();
        assert_eq!(analyzer.cumulative_volume(), 0.0);
        assert_eq!(analyzer.vpin_metrics(), VpinMetrics::default());
        assert_eq!(analyzer.effective_spread(), 0.0);
    }
}
