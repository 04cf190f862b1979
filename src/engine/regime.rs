//! Market-regime detection: R/S Hurst estimation, return autocorrelation,
//! realized volatility and trend slope, mapped to a coarse regime class and
//! per-regime signal weights.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::{Candle, MarketTick};

/// Regime history retention.
const REGIME_HISTORY_CAP: usize = 50;
/// History entries compared for the confidence score.
const CONFIDENCE_LOOKBACK: usize = 5;

/// Coarse market state combining persistence and volatility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegime {
    TrendingHighVol,
    TrendingLowVol,
    MeanRevertingHighVol,
    MeanRevertingLowVol,
    Transitioning,
    Unknown,
}

impl MarketRegime {
    /// Sink-boundary label.
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::TrendingHighVol => "TRENDING_HIGH_VOL",
            MarketRegime::TrendingLowVol => "TRENDING_LOW_VOL",
            MarketRegime::MeanRevertingHighVol => "MEAN_REV_HIGH_VOL",
            MarketRegime::MeanRevertingLowVol => "MEAN_REV_LOW_VOL",
            MarketRegime::Transitioning => "TRANSITIONING",
            MarketRegime::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeMetrics {
    pub regime: MarketRegime,
    /// Clamped to [0, 1]; 0.5 means no persistence signal.
    pub hurst_exponent: f64,
    /// Lag-1 return autocorrelation in [-1, 1].
    pub autocorrelation: f64,
    /// Annualized realized volatility, >= 0.
    pub volatility: f64,
    /// Normalized volatility level in [0, 1].
    pub vol_regime: f64,
    /// Regression-slope trend strength in [0, 1].
    pub trend_strength: f64,
    /// Stability of the current regime over recent history, in [0, 1].
    pub confidence: f64,
}

/// Signal weights adapted to the detected regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeSignalWeights {
    pub momentum_weight: f64,
    pub mean_rev_weight: f64,
    pub breakout_weight: f64,
    pub volatility_adjust: f64,
}

/// Per-symbol regime detector. Single-threaded; owned by one composer.
pub struct RegimeDetector {
    window: usize,
    hurst_lag: usize,
    vol_window: usize,

    prices: VecDeque<f64>,
    returns: VecDeque<f64>,
    volumes: VecDeque<f64>,
    regime_history: VecDeque<MarketRegime>,

    current_regime: MarketRegime,
    hurst_exponent: f64,
    autocorrelation: f64,
    volatility: f64,
    trend_strength: f64,
}

impl RegimeDetector {
    pub fn new(window: usize, hurst_lag: usize, vol_window: usize) -> Self {
        Self {
            window,
            hurst_lag,
            vol_window,
            prices: VecDeque::new(),
            returns: VecDeque::new(),
            volumes: VecDeque::new(),
            regime_history: VecDeque::new(),
            current_regime: MarketRegime::Unknown,
            hurst_exponent: 0.5,
            autocorrelation: 0.0,
            volatility: 0.0,
            trend_strength: 0.0,
        }
    }

    pub fn on_tick(&mut self, tick: &MarketTick) {
        self.push_observation(tick.price, tick.volume);

        if self.prices.len() >= self.hurst_lag * 2 {
            self.update_metrics();

            let new_regime = self.classify_regime();
            if new_regime != self.current_regime {
                self.current_regime = new_regime;
                self.push_regime(new_regime);
            }
        }
    }

    /// Candle-driven updates record every evaluation in the regime history,
    /// not only changes.
    pub fn on_candle(&mut self, candle: &Candle) {
        self.push_observation(candle.close, candle.volume);

        if self.prices.len() >= self.hurst_lag * 2 {
            self.update_metrics();
            self.current_regime = self.classify_regime();
            self.push_regime(self.current_regime);
        }
    }

    pub fn metrics(&self) -> RegimeMetrics {
        let confidence = if self.regime_history.len() < CONFIDENCE_LOOKBACK {
            0.3
        } else {
            let matches = self
                .regime_history
                .iter()
                .rev()
                .take(CONFIDENCE_LOOKBACK)
                .filter(|r| **r == self.current_regime)
                .count();
            matches as f64 / CONFIDENCE_LOOKBACK as f64
        };

        RegimeMetrics {
            regime: self.current_regime,
            hurst_exponent: self.hurst_exponent,
            autocorrelation: self.autocorrelation,
            volatility: self.volatility,
            vol_regime: self.volatility_regime(),
            trend_strength: self.trend_strength,
            confidence,
        }
    }

    pub fn signal_weights(&self) -> RegimeSignalWeights {
        signal_weights_for(self.current_regime)
    }

    pub fn has_regime_changed(&self, lookback: usize) -> bool {
        if self.regime_history.len() < lookback + 1 {
            return false;
        }
        let recent = self.regime_history.back().expect("non-empty by length check");
        let older = self.regime_history[self.regime_history.len() - lookback - 1];
        *recent != older
    }

    /// Probability of a regime change per period, from the last 10 entries.
    pub fn transition_probability(&self) -> f64 {
        if self.regime_history.len() < 10 {
            return 0.5;
        }
        let start = self.regime_history.len() - 10;
        let mut changes = 0;
        for i in start..self.regime_history.len() - 1 {
            if self.regime_history[i] != self.regime_history[i + 1] {
                changes += 1;
            }
        }
        changes as f64 / 9.0
    }

    pub fn reset(&mut self) {
        self.prices.clear();
        self.returns.clear();
        self.volumes.clear();
        self.regime_history.clear();
        self.current_regime = MarketRegime::Unknown;
        self.hurst_exponent = 0.5;
        self.autocorrelation = 0.0;
        self.volatility = 0.0;
        self.trend_strength = 0.0;
    }

    fn push_observation(&mut self, price: f64, volume: f64) {
        self.prices.push_back(price);
        self.volumes.push_back(volume);
        if self.prices.len() > self.window {
            self.prices.pop_front();
            self.volumes.pop_front();
        }

        if self.prices.len() >= 2 {
            let prev = self.prices[self.prices.len() - 2];
            let last = self.prices[self.prices.len() - 1];
            self.returns.push_back((last / prev).ln());
            if self.returns.len() > self.window {
                self.returns.pop_front();
            }
        }
    }

    fn push_regime(&mut self, regime: MarketRegime) {
        self.regime_history.push_back(regime);
        if self.regime_history.len() > REGIME_HISTORY_CAP {
            self.regime_history.pop_front();
        }
    }

    fn update_metrics(&mut self) {
        self.hurst_exponent = self.compute_hurst();
        self.autocorrelation = self.compute_autocorrelation(1);
        self.volatility = self.compute_realized_volatility();
        self.trend_strength = self.compute_trend_strength();
    }

    fn classify_regime(&self) -> MarketRegime {
        let high_vol = self.volatility_regime() > 0.6;
        let trending = self.hurst_exponent > 0.55 || self.trend_strength > 0.6;

        match (trending, high_vol) {
            (true, true) => MarketRegime::TrendingHighVol,
            (true, false) => MarketRegime::TrendingLowVol,
            (false, true) => MarketRegime::MeanRevertingHighVol,
            (false, false) => MarketRegime::MeanRevertingLowVol,
        }
    }

    fn compute_hurst(&self) -> f64 {
        if self.prices.len() < self.hurst_lag * 2 {
            return 0.5;
        }
        let prices: Vec<f64> = self.prices.iter().copied().collect();
        hurst_exponent(&prices, self.hurst_lag)
    }

    fn compute_autocorrelation(&self, lag: usize) -> f64 {
        if self.returns.len() < lag + 10 {
            return 0.0;
        }
        let returns: Vec<f64> = self.returns.iter().copied().collect();
        autocorrelation(&returns, lag)
    }

    fn compute_realized_volatility(&self) -> f64 {
        if self.returns.len() < 10 {
            return 0.0;
        }

        let start = self.returns.len().saturating_sub(self.vol_window);
        let mut sum_sq = 0.0;
        let mut n = 0;
        for r in self.returns.iter().skip(start) {
            sum_sq += r * r;
            n += 1;
        }

        let variance = if n > 0 { sum_sq / n as f64 } else { 0.0 };
        (variance * 252.0).sqrt()
    }

    fn compute_trend_strength(&self) -> f64 {
        if self.prices.len() < 20 {
            return 0.0;
        }

        let n = self.prices.len().min(50);
        let start = self.prices.len() - n;

        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut sum_xy = 0.0;
        let mut sum_x2 = 0.0;
        for i in 0..n {
            let x = i as f64;
            let y = self.prices[start + i];
            sum_x += x;
            sum_y += y;
            sum_xy += x * y;
            sum_x2 += x * x;
        }

        let n_f = n as f64;
        let slope = (n_f * sum_xy - sum_x * sum_y) / (n_f * sum_x2 - sum_x * sum_x);
        let avg_price = sum_y / n_f;

        let trend_pct = if avg_price > 0.0 {
            (slope / avg_price).abs() * 100.0
        } else {
            0.0
        };

        // 5% per step saturates the scale.
        (trend_pct / 5.0).min(1.0)
    }

    fn volatility_regime(&self) -> f64 {
        if self.volatility <= 0.0 {
            return 0.5;
        }
        // 100% annualized volatility reads as fully "high".
        (self.volatility / 1.0).min(1.0)
    }
}

/// Weight table keyed by regime.
pub fn signal_weights_for(regime: MarketRegime) -> RegimeSignalWeights {
    match regime {
        MarketRegime::TrendingHighVol => RegimeSignalWeights {
            momentum_weight: 0.7,
            mean_rev_weight: 0.2,
            breakout_weight: 0.5,
            volatility_adjust: 1.5,
        },
        MarketRegime::TrendingLowVol => RegimeSignalWeights {
            momentum_weight: 0.8,
            mean_rev_weight: 0.1,
            breakout_weight: 0.6,
            volatility_adjust: 1.0,
        },
        MarketRegime::MeanRevertingHighVol => RegimeSignalWeights {
            momentum_weight: 0.2,
            mean_rev_weight: 0.7,
            breakout_weight: 0.3,
            volatility_adjust: 1.2,
        },
        MarketRegime::MeanRevertingLowVol => RegimeSignalWeights {
            momentum_weight: 0.3,
            mean_rev_weight: 0.8,
            breakout_weight: 0.4,
            volatility_adjust: 0.8,
        },
        MarketRegime::Transitioning | MarketRegime::Unknown => RegimeSignalWeights {
            momentum_weight: 0.5,
            mean_rev_weight: 0.5,
            breakout_weight: 0.5,
            volatility_adjust: 1.0,
        },
    }
}

/// Hurst exponent via rescaled-range analysis on log returns.
///
/// For each lag n in 2..=max_lag (bounded by half the return count), the
/// returns split into disjoint segments of length n; each segment yields
/// R/S = (max - min of cumulative deviations) / sqrt(variance / n). The
/// slope of log(R/S) on log(n) is H, clamped to [0, 1]. Needs at least
/// three valid lags, else 0.5.
pub fn hurst_exponent(prices: &[f64], max_lag: usize) -> f64 {
    if prices.len() < max_lag * 2 {
        return 0.5;
    }

    let mut log_returns = Vec::with_capacity(prices.len() - 1);
    for pair in prices.windows(2) {
        if pair[0] > 0.0 && pair[1] > 0.0 {
            log_returns.push((pair[1] / pair[0]).ln());
        }
    }

    if log_returns.len() < max_lag {
        return 0.5;
    }

    let mut log_lags = Vec::new();
    let mut log_rs = Vec::new();

    for lag in 2..=max_lag.min(log_returns.len() / 2) {
        let num_segments = log_returns.len() / lag;
        let mut avg_rs = 0.0;

        for seg in 0..num_segments {
            let segment = &log_returns[seg * lag..(seg + 1) * lag];
            let mean = segment.iter().sum::<f64>() / lag as f64;

            let mut cum_sum = 0.0;
            let mut max_dev = f64::MIN;
            let mut min_dev = f64::MAX;
            for x in segment {
                cum_sum += x - mean;
                max_dev = max_dev.max(cum_sum);
                min_dev = min_dev.min(cum_sum);
            }
            let range = max_dev - min_dev;

            let variance: f64 = segment.iter().map(|x| (x - mean) * (x - mean)).sum();
            let s = (variance / lag as f64).sqrt();

            if s > 1e-10 {
                avg_rs += range / s;
            }
        }

        if num_segments > 0 {
            avg_rs /= num_segments as f64;
            if avg_rs > 0.0 {
                log_lags.push((lag as f64).ln());
                log_rs.push(avg_rs.ln());
            }
        }
    }

    if log_lags.len() < 3 {
        return 0.5;
    }

    let n = log_lags.len() as f64;
    let sum_x: f64 = log_lags.iter().sum();
    let sum_y: f64 = log_rs.iter().sum();
    let sum_xy: f64 = log_lags.iter().zip(&log_rs).map(|(x, y)| x * y).sum();
    let sum_x2: f64 = log_lags.iter().map(|x| x * x).sum();

    let h = (n * sum_xy - sum_x * sum_y) / (n * sum_x2 - sum_x * sum_x);
    h.clamp(0.0, 1.0)
}

/// Pearson autocorrelation of returns at the given lag; 0 with fewer than
/// lag + 10 samples or a degenerate variance.
pub fn autocorrelation(returns: &[f64], lag: usize) -> f64 {
    if returns.len() < lag + 10 {
        return 0.0;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;

    let mut numerator = 0.0;
    for i in 0..returns.len() - lag {
        numerator += (returns[i] - mean) * (returns[i + lag] - mean);
    }

    let denominator: f64 = returns.iter().map(|r| (r - mean) * (r - mean)).sum();
    if denominator > 1e-10 {
        numerator / denominator
    } else {
        0.0
    }
}

/// CUSUM mean-shift test on returns.
pub fn detect_regime_change(returns: &[f64], threshold: f64) -> bool {
    if returns.len() < 20 {
        return false;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;

    let mut cusum = 0.0;
    let mut max_cusum: f64 = 0.0;
    for r in returns {
        cusum += r - mean;
        max_cusum = max_cusum.max(cusum.abs());
    }

    let variance: f64 =
        returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / returns.len() as f64;
    let std_dev = variance.sqrt();

    std_dev > 1e-10 && max_cusum / std_dev > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Strictly rising price path whose log returns vary on a slow wave:
    /// persistent, so R/S analysis should read it as trending.
    fn trending_prices(n: usize) -> Vec<f64> {
        let mut prices = Vec::with_capacity(n);
        let mut price: f64 = 100.0;
        for i in 0..n {
            let ret = 0.002 * (1.0 + 0.8 * (i as f64 / 25.0).sin());
            price *= ret.exp();
            prices.push(price);
        }
        prices
    }

    fn tick(price: f64, ts: i64) -> MarketTick {
        MarketTick::new("TEST", price, 1.0, ts)
    }

    #[test]
    fn hurst_stays_in_unit_interval() {
        let prices = trending_prices(200);
        let h = hurst_exponent(&prices, 20);
        assert!((0.0..=1.0).contains(&h), "h = {h}");
    }

    #[test]
    fn hurst_reads_persistent_series_as_trending() {
        let prices = trending_prices(200);
        let h = hurst_exponent(&prices, 20);
        assert!(h > 0.55, "h = {h}");
    }

    #[test]
    fn hurst_reads_alternating_series_as_anti_persistent() {
        let mut prices = Vec::new();
        let mut price: f64 = 100.0;
        for i in 0..200 {
            let ret: f64 = if i % 2 == 0 { 0.01 } else { -0.01 };
            price *= ret.exp();
            prices.push(price);
        }
        let h = hurst_exponent(&prices, 20);
        assert!(h < 0.5, "h = {h}");
    }

    #[test]
    fn hurst_neutral_with_insufficient_data() {
        assert_eq!(hurst_exponent(&[100.0, 101.0, 102.0], 20), 0.5);
    }

    #[test]
    fn hurst_neutral_on_degenerate_constant_returns() {
        // Exactly constant returns make every segment's deviation zero, so
        // no lag is valid and the estimator falls back to 0.5.
        let prices: Vec<f64> = (0..200).map(|i| 100.0 * 1.001f64.powi(i)).collect();
        let h = hurst_exponent(&prices, 20);
        assert_eq!(h, 0.5);
    }

    #[test]
    fn autocorrelation_bounds_and_sign() {
        // Slow-wave returns are strongly positively autocorrelated at lag 1.
        let returns: Vec<f64> = (0..200).map(|i| (i as f64 / 20.0).sin()).collect();
        let ac = autocorrelation(&returns, 1);
        assert!((-1.0..=1.0).contains(&ac));
        assert!(ac > 0.5, "ac = {ac}");

        let alternating: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!(autocorrelation(&alternating, 1) < -0.5);
    }

    #[test]
    fn autocorrelation_neutral_when_short() {
        assert_eq!(autocorrelation(&[0.1; 5], 1), 0.0);
    }

    #[test]
    fn detector_classifies_persistent_uptrend_as_trending() {
        let mut detector = RegimeDetector::new(100, 20, 50);
        for (i, price) in trending_prices(200).into_iter().enumerate() {
            detector.on_tick(&tick(price, i as i64));
        }

        let metrics = detector.metrics();
        assert!(metrics.hurst_exponent > 0.55, "h = {}", metrics.hurst_exponent);
        assert!(
            matches!(
                metrics.regime,
                MarketRegime::TrendingHighVol | MarketRegime::TrendingLowVol
            ),
            "regime = {:?}",
            metrics.regime
        );
        assert!(detector.signal_weights().momentum_weight >= 0.7);
    }

    #[test]
    fn metrics_respect_documented_ranges() {
        let mut detector = RegimeDetector::new(100, 20, 50);
        let mut state: u64 = 7;
        let mut price = 100.0;
        for i in 0..500 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let step = ((state >> 33) % 100) as f64 / 1000.0 - 0.05;
            price = (price * (1.0 + step)).max(1.0);
            detector.on_tick(&tick(price, i));

            let metrics = detector.metrics();
            assert!((0.0..=1.0).contains(&metrics.hurst_exponent));
            assert!((-1.0..=1.0).contains(&metrics.autocorrelation));
            assert!(metrics.volatility >= 0.0);
            assert!((0.0..=1.0).contains(&metrics.trend_strength));
            assert!((0.0..=1.0).contains(&metrics.confidence));
        }
    }

    #[test]
    fn confidence_is_low_with_short_history() {
        let detector = RegimeDetector::new(100, 20, 50);
        assert_eq!(detector.metrics().confidence, 0.3);
    }

    #[test]
    fn trend_strength_saturates_at_five_percent_per_step() {
        let mut detector = RegimeDetector::new(100, 20, 50);
        // 6% growth per observation is past the saturation point.
        let mut price = 100.0;
        for i in 0..60 {
            price *= 1.06;
            detector.on_tick(&tick(price, i));
        }
        let metrics = detector.metrics();
        assert!(metrics.trend_strength > 0.9, "trend = {}", metrics.trend_strength);
    }

    #[test]
    fn regime_history_is_bounded() {
        let mut detector = RegimeDetector::new(60, 10, 30);
        // Candle updates push history every evaluation.
        for i in 0..200 {
            let close = 100.0 + (i as f64 / 3.0).sin() * 5.0;
            detector.on_candle(&Candle {
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
                start_ms: i * 60_000,
                end_ms: (i + 1) * 60_000,
            });
        }
        assert!(detector.regime_history.len() <= REGIME_HISTORY_CAP);
    }

    #[test]
    fn weight_table_matches_regimes() {
        let w = signal_weights_for(MarketRegime::TrendingHighVol);
        assert_eq!((w.momentum_weight, w.mean_rev_weight), (0.7, 0.2));
        let w = signal_weights_for(MarketRegime::MeanRevertingLowVol);
        assert_eq!((w.momentum_weight, w.mean_rev_weight), (0.3, 0.8));
        let w = signal_weights_for(MarketRegime::Unknown);
        assert_eq!((w.momentum_weight, w.mean_rev_weight), (0.5, 0.5));
        assert_eq!(w.volatility_adjust, 1.0);
    }

    #[test]
    fn cusum_flags_mean_shift() {
        let mut returns = vec![0.0001; 30];
        returns.extend(vec![0.05; 30]);
        assert!(detect_regime_change(&returns, 3.0));
        assert!(!detect_regime_change(&[0.001; 25], 100.0));
    }
}
