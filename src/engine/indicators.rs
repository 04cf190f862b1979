//! Stateless indicator math over flat close/high/low/volume slices.
//!
//! Everything here is a pure function: callers own the windows. Indicators
//! fall back to neutral values (0, 50 for RSI, 1.0 for the volume ratio)
//! when fed fewer samples than they need.

/// Arithmetic mean; 0 for an empty slice.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Sample standard deviation (n - 1 denominator); 0 with fewer than two samples.
pub fn std_dev(data: &[f64], mean: f64) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let variance: f64 = data.iter().map(|v| (v - mean) * (v - mean)).sum();
    (variance / (data.len() - 1) as f64).sqrt()
}

/// Bollinger Bands over the last `period` closes.
///
/// Returns `(middle, upper, lower)`, or all zeros with insufficient data.
pub fn bollinger(closes: &[f64], period: usize, mult: f64) -> (f64, f64, f64) {
    if closes.len() < period {
        return (0.0, 0.0, 0.0);
    }
    let window = &closes[closes.len() - period..];
    let middle = mean(window);
    let sd = std_dev(window, middle);
    (middle, middle + mult * sd, middle - mult * sd)
}

/// %B: position of `price` within the bands (0 = lower, 1 = upper).
/// Degenerate bands (`upper == lower`) map to 0.5.
pub fn percent_b(price: f64, lower: f64, upper: f64) -> f64 {
    if upper == lower {
        return 0.5;
    }
    (price - lower) / (upper - lower)
}

/// Band width relative to the middle band; 0 when the middle is 0.
pub fn bandwidth(upper: f64, lower: f64, middle: f64) -> f64 {
    if middle == 0.0 {
        return 0.0;
    }
    (upper - lower) / middle
}

/// Squeeze: bandwidth below `threshold` (volatility compression).
pub fn is_bollinger_squeeze(closes: &[f64], period: usize, mult: f64, threshold: f64) -> bool {
    if closes.len() < period {
        return false;
    }
    let (middle, upper, lower) = bollinger(closes, period, mult);
    bandwidth(upper, lower, middle) < threshold
}

/// Direction of a Bollinger band breakout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BbBreakout {
    None,
    BullishBreakout,
    BearishBreakout,
    SqueezeBullish,
    SqueezeBearish,
}

pub fn detect_bollinger_breakout(closes: &[f64], period: usize, mult: f64) -> BbBreakout {
    if closes.len() < period + 1 {
        return BbBreakout::None;
    }

    let (middle, upper, lower) = bollinger(closes, period, mult);
    let current = *closes.last().expect("non-empty by length check");
    let is_squeeze = bandwidth(upper, lower, middle) < 0.05;

    if current > upper {
        BbBreakout::BullishBreakout
    } else if current < lower {
        BbBreakout::BearishBreakout
    } else if is_squeeze && closes.len() >= 5 {
        // During a squeeze, short-horizon momentum picks the bias.
        let momentum = closes[closes.len() - 1] / closes[closes.len() - 5] - 1.0;
        if momentum > 0.001 {
            BbBreakout::SqueezeBullish
        } else if momentum < -0.001 {
            BbBreakout::SqueezeBearish
        } else {
            BbBreakout::None
        }
    } else {
        BbBreakout::None
    }
}

/// Bollinger snapshot with an expansion flag (bands widening vs 5 closes ago).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AdaptiveBollinger {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub bandwidth: f64,
    pub is_expanding: bool,
}

pub fn adaptive_bollinger(closes: &[f64], period: usize, mult: f64) -> AdaptiveBollinger {
    if closes.len() < period + 10 {
        return AdaptiveBollinger::default();
    }

    let (middle, upper, lower) = bollinger(closes, period, mult);
    let current_bw = bandwidth(upper, lower, middle);

    let previous = &closes[..closes.len() - 5];
    let (pm, pu, pl) = bollinger(previous, period, mult);
    let previous_bw = bandwidth(pu, pl, pm);

    AdaptiveBollinger {
        upper,
        middle,
        lower,
        bandwidth: current_bw,
        is_expanding: current_bw > previous_bw,
    }
}

/// RSI over the last `period` successive close changes.
///
/// 50 with insufficient data; 100 when there are no losses in the window.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if closes.len() <= period {
        return 50.0;
    }

    let mut gain = 0.0;
    let mut loss = 0.0;
    for pair in closes[closes.len() - period..].windows(2) {
        let diff = pair[1] - pair[0];
        if diff > 0.0 {
            gain += diff;
        } else {
            loss -= diff;
        }
    }

    if loss == 0.0 {
        return 100.0;
    }

    let rs = gain / loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Up-volume over down-volume; 1.0 when there is no down-volume.
pub fn volume_ratio(up_volume: &[f64], down_volume: &[f64]) -> f64 {
    let sum_up: f64 = up_volume.iter().sum();
    let sum_down: f64 = down_volume.iter().sum();
    if sum_down == 0.0 {
        return 1.0;
    }
    sum_up / sum_down
}

/// EMA with alpha = 2 / (period + 1), seeded with the first sample and
/// applied across the whole slice.
pub fn ema(data: &[f64], period: usize) -> f64 {
    if data.is_empty() || period == 0 {
        return 0.0;
    }
    if data.len() == 1 {
        return data[0];
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut value = data[0];
    for x in &data[1..] {
        value = alpha * x + (1.0 - alpha) * value;
    }
    value
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MacdResult {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD = EMA(fast) - EMA(slow).
///
/// Known deviation kept for output compatibility: the signal line is
/// 0.9 * macd rather than a 3-period SMA of the MACD series.
pub fn macd(closes: &[f64], fast_period: usize, slow_period: usize, signal_period: usize) -> MacdResult {
    if closes.len() < slow_period + signal_period {
        return MacdResult::default();
    }

    let macd = ema(closes, fast_period) - ema(closes, slow_period);
    let signal = macd * 0.9;
    MacdResult {
        macd,
        signal,
        histogram: macd - signal,
    }
}

/// ATR: true ranges max(H-L, |H-prevC|, |L-prevC|) averaged over the last
/// `period` entries. 0 with insufficient data.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> f64 {
    if highs.len() < period + 1 || lows.len() < period + 1 || closes.len() < period + 1 {
        return 0.0;
    }

    let mut true_ranges = Vec::with_capacity(closes.len() - 1);
    for i in 1..closes.len() {
        let tr = (highs[i] - lows[i])
            .max((highs[i] - closes[i - 1]).abs())
            .max((lows[i] - closes[i - 1]).abs());
        true_ranges.push(tr);
    }

    if true_ranges.len() < period {
        return 0.0;
    }
    let tail = &true_ranges[true_ranges.len() - period..];
    tail.iter().sum::<f64>() / period as f64
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochasticResult {
    pub k: f64,
    pub d: f64,
}

/// Stochastic oscillator over the last `period` bars.
///
/// Known deviation kept for output compatibility: %D is 0.9 * %K rather
/// than a 3-period SMA.
pub fn stochastic(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> StochasticResult {
    let neutral = StochasticResult { k: 50.0, d: 50.0 };
    if closes.len() < period {
        return neutral;
    }

    let start = closes.len() - period;
    let highest = highs[start..].iter().cloned().fold(f64::MIN, f64::max);
    let lowest = lows[start..].iter().cloned().fold(f64::MAX, f64::min);
    if highest == lowest {
        return neutral;
    }

    let k = 100.0 * (closes[closes.len() - 1] - lowest) / (highest - lowest);
    StochasticResult { k, d: k * 0.9 }
}

/// Roll (1984) effective spread: 2 * sqrt(-cov(dP_t, dP_{t-1})) when the
/// serial covariance is negative, else 0.
pub fn roll_spread(price_changes: &[f64]) -> f64 {
    if price_changes.len() < 2 {
        return 0.0;
    }

    let n = price_changes.len() - 1;
    let sum_product: f64 = price_changes
        .windows(2)
        .map(|pair| pair[0] * pair[1])
        .sum();
    let covariance = sum_product / n as f64;

    if covariance < 0.0 {
        2.0 * (-covariance).sqrt()
    } else {
        0.0
    }
}

/// Plain volume-weighted average price over parallel price/volume slices.
pub fn simple_vwap(prices: &[f64], volumes: &[f64]) -> f64 {
    if prices.len() != volumes.len() || prices.is_empty() {
        return 0.0;
    }

    let mut sum_pv = 0.0;
    let mut sum_v = 0.0;
    for (p, v) in prices.iter().zip(volumes) {
        sum_pv += p * v;
        sum_v += v;
    }

    if sum_v > 0.0 {
        sum_pv / sum_v
    } else {
        0.0
    }
}
