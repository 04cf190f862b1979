//! Signal emission boundary.
//!
//! Analyzers observe a sink through the narrow [`SignalSink`] interface,
//! injected at construction. String labels for signals and regimes are
//! produced here and nowhere else.

mod influx;

pub use influx::{HttpTransport, InfluxConfig, InfluxWriter, WriteTransport};

use crate::types::{Candle, MarketTick};

/// Narrow emission interface for the time-series sink.
///
/// Implementations must be non-blocking: a call enqueues one serialized
/// record and returns. Producers never wait on sink I/O.
pub trait SignalSink: Send + Sync {
    fn write_alpha_signal(
        &self,
        symbol: &str,
        momentum: f64,
        mean_rev_z: f64,
        rsi: f64,
        volume_ratio: f64,
        signal_type: &str,
    );

    fn write_microstructure(
        &self,
        symbol: &str,
        vpin: f64,
        toxicity: f64,
        lambda: f64,
        spread: f64,
        timestamp_ms: i64,
    );

    fn write_order_flow(
        &self,
        symbol: &str,
        ofi: f64,
        bid_pressure: f64,
        ask_pressure: f64,
        volume_delta: f64,
        timestamp_ms: i64,
    );

    fn write_regime(
        &self,
        symbol: &str,
        regime: &str,
        hurst: f64,
        volatility: f64,
        trend_strength: f64,
        timestamp_ms: i64,
    );

    fn write_vwap(&self, symbol: &str, vwap: f64, deviation: f64, timestamp_ms: i64);

    fn write_candle(&self, symbol: &str, candle: &Candle);

    fn write_tick(&self, tick: &MarketTick);
}
