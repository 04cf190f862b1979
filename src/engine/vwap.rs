//! Session and rolling VWAP with volume-weighted deviation bands.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::MarketTick;

/// Recent prices retained for the mean-reversion check.
const RECENT_PRICE_CAP: usize = 10;

/// Price location relative to VWAP, by percent deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VwapZone {
    StrongAbove,
    Above,
    Neutral,
    Below,
    StrongBelow,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VwapMetrics {
    pub vwap: f64,
    pub upper_band: f64,
    pub lower_band: f64,
    /// Percent deviation of the latest price from VWAP.
    pub deviation: f64,
    /// Total volume behind the current VWAP value.
    pub volume: f64,
    pub price_to_vwap_ratio: f64,
    pub price_above_vwap: bool,
}

/// VWAP calculator; `rolling_window == 0` selects session mode
/// (cumulative since construction, reset or anchor), otherwise the VWAP
/// covers only the last `rolling_window` ticks.
pub struct VwapCalculator {
    band_multiplier: f64,
    rolling_window: usize,

    vwap: f64,
    cumulative_pv: f64,
    cumulative_volume: f64,
    cumulative_pv2: f64,

    tick_window: VecDeque<MarketTick>,
    recent_prices: VecDeque<f64>,
}

impl VwapCalculator {
    pub fn new(band_multiplier: f64, rolling_window: usize) -> Self {
        Self {
            band_multiplier,
            rolling_window,
            vwap: 0.0,
            cumulative_pv: 0.0,
            cumulative_volume: 0.0,
            cumulative_pv2: 0.0,
            tick_window: VecDeque::new(),
            recent_prices: VecDeque::new(),
        }
    }

    pub fn on_tick(&mut self, tick: &MarketTick) {
        if self.rolling_window > 0 {
            self.tick_window.push_back(tick.clone());
            if self.tick_window.len() > self.rolling_window {
                self.tick_window.pop_front();
            }
            self.update_rolling();
        } else {
            self.update_session(tick);
        }

        self.recent_prices.push_back(tick.price);
        if self.recent_prices.len() > RECENT_PRICE_CAP {
            self.recent_prices.pop_front();
        }
    }

    pub fn metrics(&self) -> VwapMetrics {
        let std_dev = self.volume_weighted_std_dev();
        let current_price = self.recent_prices.back().copied().unwrap_or(0.0);

        VwapMetrics {
            vwap: self.vwap,
            upper_band: self.vwap + self.band_multiplier * std_dev,
            lower_band: self.vwap - self.band_multiplier * std_dev,
            deviation: self.deviation_percent(current_price),
            volume: self.cumulative_volume,
            price_to_vwap_ratio: if self.vwap > 0.0 {
                current_price / self.vwap
            } else {
                1.0
            },
            price_above_vwap: current_price > self.vwap,
        }
    }

    /// `(lower, upper)` deviation bands.
    pub fn bands(&self) -> (f64, f64) {
        let std_dev = self.volume_weighted_std_dev();
        (
            self.vwap - self.band_multiplier * std_dev,
            self.vwap + self.band_multiplier * std_dev,
        )
    }

    pub fn zone(&self, current_price: f64) -> VwapZone {
        if self.vwap <= 0.0 {
            return VwapZone::Neutral;
        }

        let dev = self.deviation_percent(current_price);
        if dev > 2.0 {
            VwapZone::StrongAbove
        } else if dev > 0.5 {
            VwapZone::Above
        } else if dev < -2.0 {
            VwapZone::StrongBelow
        } else if dev < -0.5 {
            VwapZone::Below
        } else {
            VwapZone::Neutral
        }
    }

    pub fn deviation_percent(&self, current_price: f64) -> f64 {
        if self.vwap <= 0.0 {
            return 0.0;
        }
        (current_price - self.vwap) / self.vwap * 100.0
    }

    /// Whether price is converging back toward VWAP: the latest absolute
    /// deviation is under 80% of the oldest one in the recent buffer.
    pub fn is_mean_reverting(&self) -> bool {
        if self.recent_prices.len() < 5 {
            return false;
        }
        let first_dev = (self.recent_prices[0] - self.vwap).abs();
        let last_dev = (self.recent_prices[self.recent_prices.len() - 1] - self.vwap).abs();
        last_dev < first_dev * 0.8
    }

    /// Re-anchors a session VWAP: clears the cumulative accumulators so the
    /// session restarts at the next tick. Rolling mode is unaffected.
    pub fn anchor(&mut self) {
        self.cumulative_pv = 0.0;
        self.cumulative_volume = 0.0;
        self.cumulative_pv2 = 0.0;
    }

    pub fn reset(&mut self) {
        self.vwap = 0.0;
        self.cumulative_pv = 0.0;
        self.cumulative_volume = 0.0;
        self.cumulative_pv2 = 0.0;
        self.tick_window.clear();
        self.recent_prices.clear();
    }

    fn update_rolling(&mut self) {
        if self.tick_window.is_empty() {
            self.vwap = 0.0;
            return;
        }

        let mut sum_pv = 0.0;
        let mut sum_v = 0.0;
        let mut sum_pv2 = 0.0;
        for tick in &self.tick_window {
            sum_pv += tick.price * tick.volume;
            sum_v += tick.volume;
            sum_pv2 += tick.price * tick.price * tick.volume;
        }

        self.vwap = if sum_v > 0.0 { sum_pv / sum_v } else { 0.0 };
        self.cumulative_pv = sum_pv;
        self.cumulative_volume = sum_v;
        self.cumulative_pv2 = sum_pv2;
    }

    fn update_session(&mut self, tick: &MarketTick) {
        self.cumulative_pv += tick.price * tick.volume;
        self.cumulative_volume += tick.volume;
        self.cumulative_pv2 += tick.price * tick.price * tick.volume;

        self.vwap = if self.cumulative_volume > 0.0 {
            self.cumulative_pv / self.cumulative_volume
        } else {
            0.0
        };
    }

    fn volume_weighted_std_dev(&self) -> f64 {
        if self.cumulative_volume <= 0.0 {
            return 0.0;
        }
        let mean_price_squared = self.cumulative_pv2 / self.cumulative_volume;
        let variance = (mean_price_squared - self.vwap * self.vwap).max(0.0);
        variance.sqrt()
    }
}

/// VWAP over an arbitrary tick slice.
pub fn vwap_of(ticks: &[MarketTick]) -> f64 {
    let mut sum_pv = 0.0;
    let mut sum_v = 0.0;
    for tick in ticks {
        sum_pv += tick.price * tick.volume;
        sum_v += tick.volume;
    }
    if sum_v > 0.0 {
        sum_pv / sum_v
    } else {
        0.0
    }
}

/// VWAP over ticks inside `[start_ms, end_ms]`.
pub fn vwap_in_period(ticks: &[MarketTick], start_ms: i64, end_ms: i64) -> f64 {
    let mut sum_pv = 0.0;
    let mut sum_v = 0.0;
    for tick in ticks {
        if tick.timestamp_ms >= start_ms && tick.timestamp_ms <= end_ms {
            sum_pv += tick.price * tick.volume;
            sum_v += tick.volume;
        }
    }
    if sum_v > 0.0 {
        sum_pv / sum_v
    } else {
        0.0
    }
}

/// Volume split around a VWAP level (0.1% tolerance band counts as "at").
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VolumeProfile {
    pub volume_above: f64,
    pub volume_below: f64,
    pub volume_at: f64,
}

pub fn volume_profile(ticks: &[MarketTick], vwap: f64) -> VolumeProfile {
    let mut profile = VolumeProfile::default();
    if vwap <= 0.0 {
        return profile;
    }

    let tolerance = vwap * 0.001;
    for tick in ticks {
        if tick.price > vwap + tolerance {
            profile.volume_above += tick.volume;
        } else if tick.price < vwap - tolerance {
            profile.volume_below += tick.volume;
        } else {
            profile.volume_at += tick.volume;
        }
    }
    profile
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(price: f64, volume: f64, ts: i64) -> MarketTick {
        MarketTick::new("TEST", price, volume, ts)
    }

    #[test]
    fn session_vwap_weights_by_volume() {
        let mut vwap = VwapCalculator::new(2.0, 0);
        vwap.on_tick(&tick(10.0, 1.0, 0));
        vwap.on_tick(&tick(20.0, 3.0, 1));
        assert!((vwap.metrics().vwap - 17.5).abs() < 1e-12);
    }

    #[test]
    fn session_volume_is_conserved() {
        let mut vwap = VwapCalculator::new(2.0, 0);
        let mut total = 0.0;
        for i in 0..100 {
            let volume = 1.0 + (i % 7) as f64;
            total += volume;
            vwap.on_tick(&tick(100.0 + (i % 5) as f64, volume, i));
        }
        assert!((vwap.metrics().volume - total).abs() < 1e-9);
    }

    #[test]
    fn rolling_vwap_covers_only_the_window() {
        let mut vwap = VwapCalculator::new(2.0, 2);
        vwap.on_tick(&tick(10.0, 1.0, 0));
        vwap.on_tick(&tick(20.0, 1.0, 1));
        vwap.on_tick(&tick(30.0, 1.0, 2));
        // Only the last two ticks count.
        assert!((vwap.metrics().vwap - 25.0).abs() < 1e-12);
    }

    #[test]
    fn constant_price_collapses_bands() {
        let mut vwap = VwapCalculator::new(2.0, 0);
        for i in 0..50 {
            vwap.on_tick(&tick(100.0, 2.0, i));
        }
        let metrics = vwap.metrics();
        assert!((metrics.upper_band - 100.0).abs() < 1e-6);
        assert!((metrics.lower_band - 100.0).abs() < 1e-6);
    }

    #[test]
    fn zone_thresholds() {
        let mut vwap = VwapCalculator::new(2.0, 0);
        vwap.on_tick(&tick(100.0, 1.0, 0));
        assert_eq!(vwap.zone(103.0), VwapZone::StrongAbove);
        assert_eq!(vwap.zone(101.0), VwapZone::Above);
        assert_eq!(vwap.zone(100.2), VwapZone::Neutral);
        assert_eq!(vwap.zone(99.0), VwapZone::Below);
        assert_eq!(vwap.zone(97.0), VwapZone::StrongBelow);
    }

    #[test]
    fn zone_neutral_before_any_volume() {
        let vwap = VwapCalculator::new(2.0, 0);
        assert_eq!(vwap.zone(100.0), VwapZone::Neutral);
        assert_eq!(vwap.deviation_percent(100.0), 0.0);
    }

    #[test]
    fn mean_reversion_flag_needs_convergence() {
        let mut vwap = VwapCalculator::new(2.0, 0);
        // Establish VWAP near 100, then walk price away and back.
        for i in 0..20 {
            vwap.on_tick(&tick(100.0, 10.0, i));
        }
        for i in 0..10i64 {
            // 110 down to 101: the recent buffer holds only this approach.
            vwap.on_tick(&tick(110.0 - i as f64, 0.001, 20 + i));
        }
        assert!(vwap.is_mean_reverting());

        let mut diverging = VwapCalculator::new(2.0, 0);
        for i in 0..20 {
            diverging.on_tick(&tick(100.0, 10.0, i));
        }
        for i in 0..10i64 {
            diverging.on_tick(&tick(101.0 + i as f64, 0.001, 20 + i));
        }
        assert!(!diverging.is_mean_reverting());
    }

    #[test]
    fn anchor_restarts_the_session() {
        let mut vwap = VwapCalculator::new(2.0, 0);
        for i in 0..10 {
            vwap.on_tick(&tick(50.0, 1.0, i));
        }
        vwap.anchor();
        vwap.on_tick(&tick(200.0, 1.0, 10));
        // Pre-anchor volume no longer weighs in.
        assert!((vwap.metrics().vwap - 200.0).abs() < 1e-12);
        assert!((vwap.metrics().volume - 1.0).abs() < 1e-12);
    }

    #[test]
    fn free_function_vwap_and_profile() {
        let ticks = vec![
            tick(99.0, 1.0, 0),
            tick(100.0, 2.0, 1),
            tick(101.0, 1.0, 2),
        ];
        let value = vwap_of(&ticks);
        assert!((value - 100.0).abs() < 1e-12);

        let profile = volume_profile(&ticks, value);
        assert_eq!(profile.volume_above, 1.0);
        assert_eq!(profile.volume_below, 1.0);
        assert_eq!(profile.volume_at, 2.0);

        assert!((vwap_in_period(&ticks, 1, 2) - 100.5).abs() < 1e-9);
        assert_eq!(vwap_of(&[]), 0.0);
    }
}
