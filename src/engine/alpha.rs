//! Tick- and candle-driven alpha signals.
//!
//! The tick path keeps a rolling window of the last `window_size` trades and
//! derives momentum (price vs oldest) and a mean-reversion z-score. The
//! candle path accumulates closed candles and evaluates a Bollinger + RSI +
//! volume-ratio composite.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::indicators::{bollinger, rsi, volume_ratio};
use crate::storage::SignalSink;
use crate::types::{Candle, MarketTick};

/// Closed-candle history retained by the candle branch.
const CANDLE_HISTORY_CAP: usize = 512;

/// What an alpha evaluation concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlphaLabel {
    /// Tick-path emission; carries no trade direction by itself.
    Tick,
    Buy,
    Sell,
    None,
}

impl AlphaLabel {
    /// Sink-boundary tag, e.g. `TICK_1m`, `BUY_1m`, `NONE_5m`.
    pub fn tag(&self, timeframe: &str) -> String {
        match self {
            AlphaLabel::Tick => format!("TICK_{timeframe}"),
            AlphaLabel::Buy => format!("BUY_{timeframe}"),
            AlphaLabel::Sell => format!("SELL_{timeframe}"),
            AlphaLabel::None => format!("NONE_{timeframe}"),
        }
    }
}

/// One alpha evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlphaSignal {
    pub symbol: String,
    pub timestamp_ms: i64,
    pub momentum: f64,
    pub mean_rev_z: f64,
    pub rsi: f64,
    pub volume_ratio: f64,
    pub label: AlphaLabel,
}

/// Rolling mean/variance with add/remove updates.
///
/// Avoids the catastrophic cancellation of the sum-of-squares formulation
/// on large price levels. Variance is the population variance (divide by n),
/// matching the published output contract.
#[derive(Debug, Clone, Default)]
struct RollingMoments {
    count: usize,
    mean: f64,
    m2: f64,
}

impl RollingMoments {
    fn add(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn remove(&mut self, x: f64) {
        debug_assert!(self.count > 0, "remove from empty window");
        if self.count == 1 {
            *self = Self::default();
            return;
        }
        let count_after = self.count - 1;
        let delta = x - self.mean;
        self.mean -= delta / count_after as f64;
        self.m2 -= delta * (x - self.mean);
        self.count = count_after;
    }

    fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.m2 / self.count as f64).max(0.0)
    }
}

/// Per-symbol alpha engine. Single-threaded; owned by one composer.
pub struct AlphaEngine {
    symbol: String,
    window_size: usize,
    timeframe: String,
    window: VecDeque<MarketTick>,
    moments: RollingMoments,
    closes: VecDeque<f64>,
    highs: VecDeque<f64>,
    lows: VecDeque<f64>,
    volumes: VecDeque<f64>,
    sink: Option<Arc<dyn SignalSink>>,
}

impl AlphaEngine {
    pub fn new(
        symbol: impl Into<String>,
        window_size: usize,
        timeframe: impl Into<String>,
        sink: Option<Arc<dyn SignalSink>>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            window_size,
            timeframe: timeframe.into(),
            window: VecDeque::with_capacity(window_size + 1),
            moments: RollingMoments::default(),
            closes: VecDeque::new(),
            highs: VecDeque::new(),
            lows: VecDeque::new(),
            volumes: VecDeque::new(),
            sink,
        }
    }

    /// Rolling-window tick evaluation. `None` until the window fills.
    pub fn on_tick(&mut self, tick: &MarketTick) -> Option<AlphaSignal> {
        self.window.push_back(tick.clone());
        self.moments.add(tick.price);

        if self.window.len() > self.window_size {
            let old = self.window.pop_front().expect("window non-empty");
            self.moments.remove(old.price);
        }

        if self.window.len() < self.window_size {
            return None;
        }

        let sma = self.moments.mean;
        let vol = self.moments.variance().sqrt();

        let oldest = self.window.front().expect("window non-empty");
        let momentum = tick.price / oldest.price - 1.0;
        let mean_rev_z = if vol > 1e-8 {
            (tick.price - sma) / vol
        } else {
            0.0
        };

        let label = AlphaLabel::Tick;
        if let Some(sink) = &self.sink {
            sink.write_alpha_signal(
                &self.symbol,
                momentum,
                mean_rev_z,
                0.0,
                0.0,
                &label.tag(&self.timeframe),
            );
        }

        Some(AlphaSignal {
            symbol: tick.symbol.clone(),
            timestamp_ms: tick.timestamp_ms,
            momentum,
            mean_rev_z,
            rsi: 0.0,
            volume_ratio: 0.0,
            label,
        })
    }

    /// Candle-path evaluation on a closed candle. `None` until enough
    /// candles have accumulated.
    pub fn on_candle(&mut self, candle: &Candle) -> Option<AlphaSignal> {
        push_capped(&mut self.closes, candle.close);
        push_capped(&mut self.highs, candle.high);
        push_capped(&mut self.lows, candle.low);
        push_capped(&mut self.volumes, candle.volume);

        if self.closes.len() < self.window_size {
            return None;
        }

        let closes = self.closes.make_contiguous().to_vec();
        let (_, upper, lower) = bollinger(&closes, 20, 2.0);
        let rsi_value = rsi(&closes, 14);

        let mut up_vol = Vec::new();
        let mut down_vol = Vec::new();
        for i in 1..closes.len() {
            if closes[i] > closes[i - 1] {
                up_vol.push(self.volumes[i]);
            } else {
                down_vol.push(self.volumes[i]);
            }
        }
        let vbr = volume_ratio(&up_vol, &down_vol);
        let price = *closes.last().expect("non-empty by length check");

        let label = if price < lower && rsi_value < 30.0 && vbr < 0.7 {
            info!(
                timeframe = %self.timeframe,
                price,
                rsi = rsi_value,
                vbr,
                lower_band = lower,
                "candle BUY signal"
            );
            AlphaLabel::Buy
        } else if price > upper && rsi_value > 70.0 && vbr > 1.3 {
            info!(
                timeframe = %self.timeframe,
                price,
                rsi = rsi_value,
                vbr,
                upper_band = upper,
                "candle SELL signal"
            );
            AlphaLabel::Sell
        } else {
            AlphaLabel::None
        };

        if let Some(sink) = &self.sink {
            sink.write_alpha_signal(
                &self.symbol,
                0.0,
                0.0,
                rsi_value,
                vbr,
                &label.tag(&self.timeframe),
            );
        }

        Some(AlphaSignal {
            symbol: self.symbol.clone(),
            timestamp_ms: candle.end_ms,
            momentum: 0.0,
            mean_rev_z: 0.0,
            rsi: rsi_value,
            volume_ratio: vbr,
            label,
        })
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.moments = RollingMoments::default();
        self.closes.clear();
        self.highs.clear();
        self.lows.clear();
        self.volumes.clear();
    }
}

fn push_capped(deque: &mut VecDeque<f64>, value: f64) {
    deque.push_back(value);
    if deque.len() > CANDLE_HISTORY_CAP {
        deque.pop_front();
    }
}
