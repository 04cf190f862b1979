//! Order-flow analytics: imbalance, bid/ask pressure, trade aggression,
//! cumulative volume delta and a composite flow-toxicity score.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::MarketTick;

/// Trades summed by the recent volume-delta window.
const RECENT_DELTA_WINDOW: usize = 50;

/// Net direction of recent flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowDirection {
    BuyDominant,
    SellDominant,
    Neutral,
}

impl FlowDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowDirection::BuyDominant => "BUY_DOMINANT",
            FlowDirection::SellDominant => "SELL_DOMINANT",
            FlowDirection::Neutral => "NEUTRAL",
        }
    }
}

/// Order-flow imbalance metrics over the rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OfiMetrics {
    /// (buy - sell) / total, in [-1, 1].
    pub imbalance: f64,
    /// Buy share of total volume; 0.5 when the window is volume-free.
    pub bid_pressure: f64,
    /// Sell share of total volume; 0.5 when the window is volume-free.
    pub ask_pressure: f64,
    /// Fraction of trades larger than 1.5x the median size.
    pub aggression: f64,
    /// Recent-half imbalance minus old-half imbalance.
    pub momentum: f64,
    pub timestamp_ms: i64,
}

/// Rolling buy/sell volume imbalance.
///
/// Window enforcement evicts one entry from each non-empty side until the
/// combined size fits, so the effective window can undershoot the nominal
/// cap when both sides hold data.
pub struct OrderFlowImbalance {
    window: usize,
    buy_volumes: VecDeque<f64>,
    sell_volumes: VecDeque<f64>,
    timestamps: VecDeque<i64>,
}

impl OrderFlowImbalance {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            buy_volumes: VecDeque::new(),
            sell_volumes: VecDeque::new(),
            timestamps: VecDeque::new(),
        }
    }

    pub fn on_trade(&mut self, volume: f64, is_buy: bool, timestamp_ms: i64) {
        if is_buy {
            self.buy_volumes.push_back(volume);
        } else {
            self.sell_volumes.push_back(volume);
        }
        self.timestamps.push_back(timestamp_ms);

        while self.buy_volumes.len() + self.sell_volumes.len() > self.window {
            if !self.buy_volumes.is_empty() {
                self.buy_volumes.pop_front();
            }
            if !self.sell_volumes.is_empty() {
                self.sell_volumes.pop_front();
            }
            if !self.timestamps.is_empty() {
                self.timestamps.pop_front();
            }
        }
    }

    pub fn metrics(&self) -> Option<OfiMetrics> {
        if self.buy_volumes.is_empty() && self.sell_volumes.is_empty() {
            return None;
        }

        let buy: f64 = self.buy_volumes.iter().sum();
        let sell: f64 = self.sell_volumes.iter().sum();
        let total = buy + sell;

        let (bid_pressure, ask_pressure) = if total > 0.0 {
            (buy / total, sell / total)
        } else {
            (0.5, 0.5)
        };

        Some(OfiMetrics {
            imbalance: self.imbalance(),
            bid_pressure,
            ask_pressure,
            aggression: self.aggression(),
            momentum: self.momentum(),
            timestamp_ms: self.timestamps.back().copied().unwrap_or(0),
        })
    }

    pub fn is_extreme_imbalance(&self, threshold: f64) -> bool {
        self.imbalance().abs() > threshold
    }

    fn imbalance(&self) -> f64 {
        let buy: f64 = self.buy_volumes.iter().sum();
        let sell: f64 = self.sell_volumes.iter().sum();
        let total = buy + sell;
        if total < 1e-10 {
            return 0.0;
        }
        (buy - sell) / total
    }

    fn aggression(&self) -> f64 {
        let mut volumes: Vec<f64> = self
            .buy_volumes
            .iter()
            .chain(self.sell_volumes.iter())
            .copied()
            .collect();
        if volumes.is_empty() {
            return 0.0;
        }

        volumes.sort_by(|a, b| a.partial_cmp(b).expect("finite volumes"));
        let median = volumes[volumes.len() / 2];
        let threshold = median * 1.5;
        let large = volumes.iter().filter(|v| **v > threshold).count();
        large as f64 / volumes.len() as f64
    }

    fn momentum(&self) -> f64 {
        if self.timestamps.len() < 2 {
            return 0.0;
        }

        let half_window = self.window / 2;
        let mut recent_buy = 0.0;
        let mut recent_sell = 0.0;
        let mut old_buy = 0.0;
        let mut old_sell = 0.0;

        let mut buy_idx = 0;
        let mut sell_idx = 0;
        for i in 0..self.timestamps.len() {
            let is_recent = i >= half_window;
            if buy_idx < self.buy_volumes.len() {
                if is_recent {
                    recent_buy += self.buy_volumes[buy_idx];
                } else {
                    old_buy += self.buy_volumes[buy_idx];
                }
                buy_idx += 1;
            }
            if sell_idx < self.sell_volumes.len() {
                if is_recent {
                    recent_sell += self.sell_volumes[sell_idx];
                } else {
                    old_sell += self.sell_volumes[sell_idx];
                }
                sell_idx += 1;
            }
        }

        let recent_total = recent_buy + recent_sell;
        let recent_imbalance = if recent_total > 0.0 {
            (recent_buy - recent_sell) / recent_total
        } else {
            0.0
        };
        let old_total = old_buy + old_sell;
        let old_imbalance = if old_total > 0.0 {
            (old_buy - old_sell) / old_total
        } else {
            0.0
        };

        recent_imbalance - old_imbalance
    }
}

/// Bid vs ask pressure snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureMetrics {
    pub bid_volume: f64,
    pub ask_volume: f64,
    /// (bid - ask) / total, in [-1, 1].
    pub imbalance_ratio: f64,
    /// +1 bid dominant, -1 ask dominant, 0 balanced (0.1 band).
    pub dominant_side: f64,
}

/// Independently capped buy/sell volume windows.
pub struct BidAskPressure {
    window: usize,
    bid_volumes: VecDeque<f64>,
    ask_volumes: VecDeque<f64>,
}

impl BidAskPressure {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            bid_volumes: VecDeque::new(),
            ask_volumes: VecDeque::new(),
        }
    }

    pub fn on_trade(&mut self, is_buy: bool, volume: f64) {
        if is_buy {
            self.bid_volumes.push_back(volume);
        } else {
            self.ask_volumes.push_back(volume);
        }
        while self.bid_volumes.len() > self.window {
            self.bid_volumes.pop_front();
        }
        while self.ask_volumes.len() > self.window {
            self.ask_volumes.pop_front();
        }
    }

    pub fn pressure(&self) -> PressureMetrics {
        let bid: f64 = self.bid_volumes.iter().sum();
        let ask: f64 = self.ask_volumes.iter().sum();
        let total = bid + ask;

        let ratio = if total > 0.0 { (bid - ask) / total } else { 0.0 };
        let dominant = if ratio > 0.1 {
            1.0
        } else if ratio < -0.1 {
            -1.0
        } else {
            0.0
        };

        PressureMetrics {
            bid_volume: bid,
            ask_volume: ask,
            imbalance_ratio: ratio,
            dominant_side: dominant,
        }
    }
}

/// Rolling mean of signed size-vs-average aggression scores.
pub struct TradeAggression {
    window: usize,
    scores: VecDeque<f64>,
}

impl TradeAggression {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            scores: VecDeque::new(),
        }
    }

    pub fn on_trade(&mut self, volume: f64, avg_volume: f64, is_buy: bool) {
        let score = if avg_volume > 0.0 {
            volume / avg_volume - 1.0
        } else {
            0.0
        };
        let score = if is_buy { score } else { -score };

        self.scores.push_back(score);
        if self.scores.len() > self.window {
            self.scores.pop_front();
        }
    }

    pub fn aggression(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.iter().sum::<f64>() / self.scores.len() as f64
    }
}

/// Cumulative and recent signed volume.
#[derive(Default)]
pub struct VolumeDelta {
    cumulative: f64,
    recent: VecDeque<f64>,
}

impl VolumeDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_trade(&mut self, volume: f64, is_buy: bool) {
        let delta = if is_buy { volume } else { -volume };
        self.cumulative += delta;
        self.recent.push_back(delta);
        if self.recent.len() > RECENT_DELTA_WINDOW {
            self.recent.pop_front();
        }
    }

    pub fn cumulative_delta(&self) -> f64 {
        self.cumulative
    }

    pub fn recent_delta(&self) -> f64 {
        self.recent.iter().sum()
    }

    pub fn reset(&mut self) {
        self.cumulative = 0.0;
        self.recent.clear();
    }
}

/// Composite toxicity contribution breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToxicityScore {
    /// Overall toxicity in [0, 1].
    pub toxicity: f64,
    pub ofi_component: f64,
    pub pressure_component: f64,
    pub aggression_component: f64,
    pub is_toxic: bool,
}

/// Weighted combination of |OFI|, |pressure| and |aggression|.
pub struct FlowToxicity {
    threshold: f64,
    toxicity: f64,
    ofi_weight: f64,
    pressure_weight: f64,
    aggression_weight: f64,
}

impl FlowToxicity {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            toxicity: 0.0,
            ofi_weight: 0.4,
            pressure_weight: 0.3,
            aggression_weight: 0.3,
        }
    }

    pub fn update(&mut self, ofi: f64, pressure: f64, aggression: f64) {
        let ofi_norm = (ofi.abs() + 1.0) / 2.0;
        let pressure_norm = (pressure.abs() + 1.0) / 2.0;
        let aggression_norm = aggression.abs().min(1.0);

        self.toxicity = self.ofi_weight * ofi_norm
            + self.pressure_weight * pressure_norm
            + self.aggression_weight * aggression_norm;
    }

    pub fn score(&self) -> ToxicityScore {
        ToxicityScore {
            toxicity: self.toxicity,
            ofi_component: self.ofi_weight * self.toxicity,
            pressure_component: self.pressure_weight * self.toxicity,
            aggression_component: self.aggression_weight * self.toxicity,
            is_toxic: self.toxicity > self.threshold,
        }
    }
}

/// Merged per-tick order-flow output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFlowSignal {
    pub ofi: f64,
    pub bid_pressure: f64,
    pub ask_pressure: f64,
    pub aggression: f64,
    /// Cumulative signed volume since construction or reset.
    pub volume_delta: f64,
    pub toxicity: f64,
    pub is_toxic_flow: bool,
    pub flow_direction: FlowDirection,
    pub timestamp_ms: i64,
}

/// Per-symbol order-flow pipeline. Single-threaded; owned by one composer.
pub struct OrderFlowEngine {
    ofi: OrderFlowImbalance,
    pressure: BidAskPressure,
    aggression: TradeAggression,
    volume_delta: VolumeDelta,
    toxicity: FlowToxicity,
    avg_volume: f64,
    tick_count: u64,
}

impl Default for OrderFlowEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderFlowEngine {
    pub fn new() -> Self {
        Self::with_windows(100, 50, 30)
    }

    pub fn with_windows(ofi_window: usize, pressure_window: usize, aggression_window: usize) -> Self {
        Self {
            ofi: OrderFlowImbalance::new(ofi_window),
            pressure: BidAskPressure::new(pressure_window),
            aggression: TradeAggression::new(aggression_window),
            volume_delta: VolumeDelta::new(),
            toxicity: FlowToxicity::new(0.7),
            avg_volume: 0.0,
            tick_count: 0,
        }
    }

    pub fn on_tick(&mut self, tick: &MarketTick, is_buy: bool) -> Option<OrderFlowSignal> {
        self.tick_count += 1;
        self.avg_volume =
            ((self.tick_count - 1) as f64 * self.avg_volume + tick.volume) / self.tick_count as f64;

        self.ofi.on_trade(tick.volume, is_buy, tick.timestamp_ms);
        self.pressure.on_trade(is_buy, tick.volume);
        self.aggression.on_trade(tick.volume, self.avg_volume, is_buy);
        self.volume_delta.on_trade(tick.volume, is_buy);

        let ofi = self.ofi.metrics()?;
        let pressure = self.pressure.pressure();
        let aggression = self.aggression.aggression();

        self.toxicity
            .update(ofi.imbalance, pressure.imbalance_ratio, aggression);
        let toxicity = self.toxicity.score();

        Some(OrderFlowSignal {
            ofi: ofi.imbalance,
            bid_pressure: ofi.bid_pressure,
            ask_pressure: ofi.ask_pressure,
            aggression,
            volume_delta: self.volume_delta.cumulative_delta(),
            toxicity: toxicity.toxicity,
            is_toxic_flow: toxicity.is_toxic,
            flow_direction: flow_direction(ofi.imbalance, pressure.imbalance_ratio),
            timestamp_ms: tick.timestamp_ms,
        })
    }

    pub fn reset(&mut self) {
        self.volume_delta.reset();
        self.avg_volume = 0.0;
        self.tick_count = 0;
    }
}

fn flow_direction(ofi: f64, pressure: f64) -> FlowDirection {
    let combined = (ofi + pressure) / 2.0;
    if combined > 0.2 {
        FlowDirection::BuyDominant
    } else if combined < -0.2 {
        FlowDirection::SellDominant
    } else {
        FlowDirection::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(volume: f64, ts: i64) -> MarketTick {
        MarketTick::new("TEST", 100.0, volume, ts)
    }

    #[test]
    fn pressures_sum_to_one_with_volume() {
        let mut ofi = OrderFlowImbalance::new(10);
        ofi.on_trade(3.0, true, 0);
        ofi.on_trade(1.0, false, 1);
        let metrics = ofi.metrics().unwrap();
        assert!((metrics.bid_pressure + metrics.ask_pressure - 1.0).abs() < 1e-12);
        assert!((metrics.bid_pressure - 0.75).abs() < 1e-12);
    }

    #[test]
    fn empty_window_yields_no_metrics() {
        let ofi = OrderFlowImbalance::new(10);
        assert!(ofi.metrics().is_none());
    }

    #[test]
    fn zero_volume_trades_split_pressure_evenly() {
        let mut ofi = OrderFlowImbalance::new(10);
        ofi.on_trade(0.0, true, 0);
        let metrics = ofi.metrics().unwrap();
        assert_eq!(metrics.bid_pressure, 0.5);
        assert_eq!(metrics.ask_pressure, 0.5);
        assert_eq!(metrics.imbalance, 0.0);
    }

    #[test]
    fn one_sided_flow_saturates_imbalance() {
        let mut ofi = OrderFlowImbalance::new(10);
        for i in 0..5 {
            ofi.on_trade(2.0, true, i);
        }
        let metrics = ofi.metrics().unwrap();
        assert!((metrics.imbalance - 1.0).abs() < 1e-12);
        assert!(ofi.is_extreme_imbalance(0.9));
    }

    #[test]
    fn window_eviction_can_undershoot_nominal_cap() {
        let mut ofi = OrderFlowImbalance::new(4);
        ofi.on_trade(1.0, true, 0);
        ofi.on_trade(1.0, true, 1);
        ofi.on_trade(1.0, false, 2);
        ofi.on_trade(1.0, false, 3);
        // Fifth trade trips eviction on both sides at once.
        ofi.on_trade(1.0, true, 4);
        assert!(ofi.buy_volumes.len() + ofi.sell_volumes.len() <= 4);
        assert_eq!(ofi.buy_volumes.len() + ofi.sell_volumes.len(), 3);
    }

    #[test]
    fn aggression_counts_outsized_trades() {
        let mut ofi = OrderFlowImbalance::new(20);
        for i in 0..9 {
            ofi.on_trade(1.0, true, i);
        }
        ofi.on_trade(10.0, true, 9);
        let metrics = ofi.metrics().unwrap();
        assert!((metrics.aggression - 0.1).abs() < 1e-12);
    }

    #[test]
    fn bid_ask_pressure_flags_dominant_side() {
        let mut pressure = BidAskPressure::new(10);
        for _ in 0..8 {
            pressure.on_trade(true, 1.0);
        }
        pressure.on_trade(false, 1.0);
        let metrics = pressure.pressure();
        assert_eq!(metrics.dominant_side, 1.0);
        assert!(metrics.imbalance_ratio > 0.1);

        let mut pressure = BidAskPressure::new(10);
        pressure.on_trade(true, 1.0);
        pressure.on_trade(false, 1.0);
        assert_eq!(pressure.pressure().dominant_side, 0.0);
    }

    #[test]
    fn aggression_scores_signed_by_side() {
        let mut aggression = TradeAggression::new(10);
        aggression.on_trade(2.0, 1.0, true);
        assert!((aggression.aggression() - 1.0).abs() < 1e-12);
        aggression.on_trade(2.0, 1.0, false);
        assert!((aggression.aggression() - 0.0).abs() < 1e-12);
    }

    #[test]
    fn volume_delta_tracks_cumulative_and_recent() {
        let mut delta = VolumeDelta::new();
        for _ in 0..60 {
            delta.on_trade(1.0, true);
        }
        delta.on_trade(10.0, false);
        assert!((delta.cumulative_delta() - 50.0).abs() < 1e-12);
        // Recent window holds the last 50 deltas: 49 buys and one -10 sell.
        assert!((delta.recent_delta() - 39.0).abs() < 1e-12);
        delta.reset();
        assert_eq!(delta.cumulative_delta(), 0.0);
        assert_eq!(delta.recent_delta(), 0.0);
    }

    #[test]
    fn toxicity_stays_in_unit_interval() {
        let mut toxicity = FlowToxicity::new(0.7);
        for (ofi, pressure, aggression) in
            [(1.0, 1.0, 5.0), (-1.0, -1.0, -5.0), (0.0, 0.0, 0.0), (0.5, -0.3, 0.2)]
        {
            toxicity.update(ofi, pressure, aggression);
            let score = toxicity.score();
            assert!((0.0..=1.0).contains(&score.toxicity), "toxicity = {}", score.toxicity);
        }
    }

    #[test]
    fn saturated_flow_is_toxic() {
        let mut toxicity = FlowToxicity::new(0.7);
        toxicity.update(1.0, 1.0, 2.0);
        let score = toxicity.score();
        assert!((score.toxicity - 1.0).abs() < 1e-12);
        assert!(score.is_toxic);
    }

    #[test]
    fn balanced_flow_is_not_toxic() {
        let mut toxicity = FlowToxicity::new(0.7);
        toxicity.update(0.0, 0.0, 0.0);
        let score = toxicity.score();
        assert!((score.toxicity - 0.35).abs() < 1e-12);
        assert!(!score.is_toxic);
    }

    #[test]
    fn engine_reports_buy_dominant_flow() {
        let mut engine = OrderFlowEngine::new();
        let mut signal = None;
        for i in 0..20 {
            signal = engine.on_tick(&tick(1.0, i), true);
        }
        let signal = signal.unwrap();
        assert_eq!(signal.flow_direction, FlowDirection::BuyDominant);
        assert!((signal.ofi - 1.0).abs() < 1e-12);
        assert!((signal.volume_delta - 20.0).abs() < 1e-12);
    }

    #[test]
    fn engine_neutral_on_balanced_flow() {
        let mut engine = OrderFlowEngine::new();
        let mut signal = None;
        for i in 0..20 {
            signal = engine.on_tick(&tick(1.0, i), i % 2 == 0);
        }
        let signal = signal.unwrap();
        assert_eq!(signal.flow_direction, FlowDirection::Neutral);
        assert!(signal.ofi.abs() < 0.2);
    }

    #[test]
    fn flow_direction_thresholds() {
        assert_eq!(flow_direction(0.5, 0.0), FlowDirection::BuyDominant);
        assert_eq!(flow_direction(-0.5, 0.0), FlowDirection::SellDominant);
        assert_eq!(flow_direction(0.1, 0.1), FlowDirection::Neutral);
    }
}
