//! Performance statistics over return series and equity curves.

use serde::{Deserialize, Serialize};

/// Trading periods per year used for annualization.
pub const PERIODS_PER_YEAR: f64 = 252.0;

fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    let variance: f64 = data.iter().map(|v| (v - m) * (v - m)).sum();
    (variance / (data.len() - 1) as f64).sqrt()
}

fn downside_deviation(returns: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0;
    for r in returns {
        if *r < 0.0 {
            sum += r * r;
            count += 1;
        }
    }
    if count > 0 {
        (sum / count as f64).sqrt()
    } else {
        0.0
    }
}

/// Annualized Sharpe ratio; 0 with fewer than two returns or a degenerate
/// standard deviation.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64, periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let sd = std_dev(returns);
    if sd < 1e-10 {
        return 0.0;
    }
    let excess = mean(returns) - risk_free_rate / periods_per_year;
    excess / sd * periods_per_year.sqrt()
}

/// Sortino ratio: Sharpe numerator over the downside deviation.
pub fn sortino_ratio(returns: &[f64], risk_free_rate: f64, periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let downside = downside_deviation(returns);
    if downside < 1e-10 {
        return 0.0;
    }
    let excess = mean(returns) - risk_free_rate / periods_per_year;
    excess / downside * periods_per_year.sqrt()
}

/// Calmar ratio: annualized mean return over the max drawdown.
pub fn calmar_ratio(returns: &[f64], max_drawdown: f64) -> f64 {
    if returns.is_empty() || max_drawdown < 1e-10 {
        return 0.0;
    }
    let annualized = returns.iter().sum::<f64>() / returns.len() as f64 * PERIODS_PER_YEAR;
    annualized / max_drawdown
}

/// Largest absolute peak-to-trough decline of the equity curve.
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let mut peak = match equity_curve.first() {
        Some(first) => *first,
        None => return 0.0,
    };
    let mut max_dd: f64 = 0.0;
    for equity in equity_curve {
        peak = peak.max(*equity);
        max_dd = max_dd.max(peak - equity);
    }
    max_dd
}

/// Largest percentage peak-to-trough decline, in [0, 100].
pub fn max_drawdown_percent(equity_curve: &[f64]) -> f64 {
    let mut peak = match equity_curve.first() {
        Some(first) => *first,
        None => return 0.0,
    };
    let mut max_dd: f64 = 0.0;
    for equity in equity_curve {
        peak = peak.max(*equity);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - equity) / peak);
        }
    }
    max_dd * 100.0
}

/// Historical value-at-risk at `confidence` (e.g. 0.95), reported positive.
pub fn value_at_risk(returns: &[f64], confidence: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite returns"));

    let idx = (((1.0 - confidence) * sorted.len() as f64) as usize).min(sorted.len() - 1);
    -sorted[idx]
}

/// Conditional VaR: mean loss beyond the VaR threshold, reported positive.
pub fn conditional_value_at_risk(returns: &[f64], confidence: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite returns"));

    let idx = (((1.0 - confidence) * sorted.len() as f64) as usize).min(sorted.len() - 1);
    let tail_sum: f64 = sorted[..=idx].iter().sum();
    -(tail_sum / (idx + 1) as f64)
}

/// Fraction of strictly positive returns.
pub fn win_rate(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let wins = returns.iter().filter(|r| **r > 0.0).count();
    wins as f64 / returns.len() as f64
}

/// Gross wins over gross losses; 0 with no losses.
pub fn profit_factor(returns: &[f64]) -> f64 {
    let mut wins = 0.0;
    let mut losses = 0.0;
    for r in returns {
        if *r > 0.0 {
            wins += r;
        } else {
            losses += r.abs();
        }
    }
    if losses > 0.0 {
        wins / losses
    } else {
        0.0
    }
}

/// Mean excess return over the benchmark per unit of tracking error.
pub fn information_ratio(portfolio_returns: &[f64], benchmark_returns: &[f64]) -> f64 {
    if portfolio_returns.len() != benchmark_returns.len() || portfolio_returns.len() < 2 {
        return 0.0;
    }

    let excess: Vec<f64> = portfolio_returns
        .iter()
        .zip(benchmark_returns)
        .map(|(p, b)| p - b)
        .collect();

    let tracking_error = std_dev(&excess);
    if tracking_error < 1e-10 {
        return 0.0;
    }
    mean(&excess) / tracking_error
}

/// Sharpe ratio over each trailing `window` of returns.
pub fn rolling_sharpe(returns: &[f64], window: usize, risk_free_rate: f64) -> Vec<f64> {
    if returns.len() < window {
        return Vec::new();
    }
    (window..=returns.len())
        .map(|end| sharpe_ratio(&returns[end - window..end], risk_free_rate, PERIODS_PER_YEAR))
        .collect()
}

/// Fractional drawdown at each equity point.
pub fn drawdown_series(equity_curve: &[f64]) -> Vec<f64> {
    let mut series = Vec::with_capacity(equity_curve.len());
    let Some(first) = equity_curve.first() else {
        return series;
    };
    let mut peak = *first;
    for equity in equity_curve {
        peak = peak.max(*equity);
        series.push(if peak > 0.0 { (peak - equity) / peak } else { 0.0 });
    }
    series
}

/// Everything at once, for reports.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_percent: f64,
    pub var_95: f64,
    pub cvar_95: f64,
    pub volatility: f64,
    pub average_return: f64,
    pub total_return: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
}

pub fn compute_all_metrics(
    returns: &[f64],
    equity_curve: &[f64],
    risk_free_rate: f64,
) -> PerformanceMetrics {
    if returns.is_empty() {
        return PerformanceMetrics::default();
    }

    let max_dd = max_drawdown(equity_curve);
    PerformanceMetrics {
        sharpe_ratio: sharpe_ratio(returns, risk_free_rate, PERIODS_PER_YEAR),
        sortino_ratio: sortino_ratio(returns, risk_free_rate, PERIODS_PER_YEAR),
        calmar_ratio: calmar_ratio(returns, max_dd),
        max_drawdown: max_dd,
        max_drawdown_percent: max_drawdown_percent(equity_curve),
        var_95: value_at_risk(returns, 0.95),
        cvar_95: conditional_value_at_risk(returns, 0.95),
        volatility: std_dev(returns) * PERIODS_PER_YEAR.sqrt(),
        average_return: mean(returns),
        total_return: returns.iter().sum(),
        win_rate: win_rate(returns),
        profit_factor: profit_factor(returns),
    }
}
