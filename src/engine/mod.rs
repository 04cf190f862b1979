//! Streaming alpha-signal analyzers.
//!
//! Every analyzer is incremental and bounded-memory: state lives in capped
//! deques sized at construction, and each tick costs bounded work. One
//! composer per symbol owns one instance of each analyzer and applies ticks
//! strictly in arrival order.
//!
//! # Module structure
//!
//! - `indicators`: stateless math over close/high/low/volume windows
//! - `alpha`: rolling tick window momentum / mean-reversion + candle composite
//! - `microstructure`: trade classification, VPIN, Kyle lambda, Roll spread
//! - `orderflow`: OFI, pressure, aggression, volume delta, flow toxicity
//! - `regime`: Hurst, autocorrelation, realized vol, trend slope, weights
//! - `vwap`: session/rolling VWAP with deviation bands
//! - `bollinger`: streaming Bollinger tracker
//! - `composer`: the per-symbol pipeline binding everything together

pub mod alpha;
pub mod bollinger;
pub mod composer;
pub mod indicators;
pub mod microstructure;
pub mod orderflow;
pub mod regime;
pub mod vwap;

pub use alpha::{AlphaEngine, AlphaLabel, AlphaSignal};
pub use bollinger::{BollingerMetrics, BollingerSignal, BollingerTracker};
pub use composer::{Composer, ComposerConfig, Recommendation, SignalRecord};
pub use microstructure::{KyleImpact, MicrostructureAnalyzer, VpinMetrics};
pub use orderflow::{
    FlowDirection, OfiMetrics, OrderFlowEngine, OrderFlowSignal, PressureMetrics, ToxicityScore,
};
pub use regime::{MarketRegime, RegimeDetector, RegimeMetrics, RegimeSignalWeights};
pub use vwap::{VolumeProfile, VwapCalculator, VwapMetrics, VwapZone};
