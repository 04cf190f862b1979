//! Streaming Bollinger tracker: a capped price window evaluated into bands,
//! %B, bandwidth, squeeze state and a discrete band signal.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::engine::indicators::{bandwidth, bollinger, percent_b};

/// Squeeze threshold on bandwidth.
const SQUEEZE_BANDWIDTH: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BollingerSignal {
    Buy,
    Sell,
    BreakoutUp,
    BreakoutDown,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerMetrics {
    pub middle_band: f64,
    pub upper_band: f64,
    pub lower_band: f64,
    pub bandwidth: f64,
    pub percent_b: f64,
    pub is_squeezing: bool,
    pub signal: BollingerSignal,
}

/// Per-symbol tracker. Yields metrics once `period` prices have arrived.
pub struct BollingerTracker {
    period: usize,
    mult: f64,
    prices: VecDeque<f64>,
}

impl BollingerTracker {
    pub fn new(period: usize, mult: f64) -> Self {
        Self {
            period,
            mult,
            prices: VecDeque::with_capacity(period + 1),
        }
    }

    pub fn on_price(&mut self, price: f64) -> Option<BollingerMetrics> {
        self.prices.push_back(price);
        if self.prices.len() > self.period {
            self.prices.pop_front();
        }
        if self.prices.len() < self.period {
            return None;
        }

        let closes: Vec<f64> = self.prices.iter().copied().collect();
        let (middle, upper, lower) = bollinger(&closes, self.period, self.mult);

        let bw = if middle > 0.0 {
            bandwidth(upper, lower, middle)
        } else {
            0.0
        };
        let pb = percent_b(price, lower, upper);
        let is_squeezing = bw < SQUEEZE_BANDWIDTH;

        let signal = if price < lower && pb < 0.1 {
            BollingerSignal::Buy
        } else if price > upper && pb > 0.9 {
            BollingerSignal::Sell
        } else if is_squeezing && pb > 0.5 {
            BollingerSignal::BreakoutUp
        } else if is_squeezing && pb < 0.5 {
            BollingerSignal::BreakoutDown
        } else {
            BollingerSignal::Neutral
        };

        Some(BollingerMetrics {
            middle_band: middle,
            upper_band: upper,
            lower_band: lower,
            bandwidth: bw,
            percent_b: pb,
            is_squeezing,
            signal,
        })
    }

    pub fn reset(&mut self) {
        self.prices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_until_period_fills() {
        let mut tracker = BollingerTracker::new(10, 2.0);
        for i in 0..9 {
            assert!(tracker.on_price(100.0 + i as f64).is_none());
        }
        assert!(tracker.on_price(109.0).is_some());
    }

    #[test]
    fn flat_prices_squeeze_with_neutral_signal() {
        let mut tracker = BollingerTracker::new(10, 2.0);
        let mut last = None;
        for _ in 0..10 {
            last = tracker.on_price(50.0);
        }
        let metrics = last.unwrap();
        assert_eq!(metrics.middle_band, 50.0);
        assert_eq!(metrics.upper_band, 50.0);
        assert_eq!(metrics.lower_band, 50.0);
        assert_eq!(metrics.bandwidth, 0.0);
        assert_eq!(metrics.percent_b, 0.5);
        assert!(metrics.is_squeezing);
        assert_eq!(metrics.signal, BollingerSignal::Neutral);
    }

    #[test]
    fn crash_below_band_signals_buy() {
        let mut tracker = BollingerTracker::new(10, 2.0);
        for i in 0..9 {
            tracker.on_price(100.0 + (i % 2) as f64);
        }
        let metrics = tracker.on_price(80.0).unwrap();
        assert!(metrics.percent_b < 0.1);
        assert_eq!(metrics.signal, BollingerSignal::Buy);
    }

    #[test]
    fn spike_above_band_signals_sell() {
        let mut tracker = BollingerTracker::new(10, 2.0);
        for i in 0..9 {
            tracker.on_price(100.0 + (i % 2) as f64);
        }
        let metrics = tracker.on_price(120.0).unwrap();
        assert!(metrics.percent_b > 0.9);
        assert_eq!(metrics.signal, BollingerSignal::Sell);
    }

    #[test]
    fn mild_drift_in_squeeze_signals_breakout_direction() {
        let mut tracker = BollingerTracker::new(10, 2.0);
        let mut last = None;
        for i in 0..10 {
            // Tiny upward drift keeps bandwidth under the squeeze threshold.
            last = tracker.on_price(100.0 + i as f64 * 0.01);
        }
        let metrics = last.unwrap();
        assert!(metrics.is_squeezing);
        assert_eq!(metrics.signal, BollingerSignal::BreakoutUp);
    }
}
