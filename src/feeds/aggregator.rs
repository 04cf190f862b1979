//! Time-bucketed OHLCV aggregation of a tick stream.

use tracing::debug;

use crate::types::Candle;

/// Builds candles over fixed `interval_secs` windows.
///
/// The aggregator has a single owner which receives each closed candle as
/// the return value of `on_tick`. A tick whose age from the open reaches
/// the interval closes the window *without* being folded in; it opens the
/// next candle at its price with the volume reset to zero.
pub struct CandleAggregator {
    interval_secs: i64,
    current: Option<Candle>,
}

impl CandleAggregator {
    pub fn new(interval_secs: i64) -> Self {
        Self {
            interval_secs,
            current: None,
        }
    }

    pub fn on_tick(&mut self, price: f64, volume: f64, timestamp_ms: i64) -> Option<Candle> {
        if self.current.is_none() {
            self.current = Some(Candle {
                open: price,
                high: price,
                low: price,
                close: price,
                volume,
                start_ms: timestamp_ms,
                end_ms: timestamp_ms,
            });
            return None;
        }

        let start_ms = self.current.as_ref().expect("current candle exists").start_ms;
        let elapsed_secs = (timestamp_ms - start_ms) / 1000;
        if elapsed_secs >= self.interval_secs {
            let closed = self.current.take().expect("current candle exists");
            debug!(
                open = closed.open,
                high = closed.high,
                low = closed.low,
                close = closed.close,
                volume = closed.volume,
                "candle closed"
            );

            self.current = Some(Candle {
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 0.0,
                start_ms: timestamp_ms,
                end_ms: timestamp_ms,
            });
            return Some(closed);
        }

        let current = self.current.as_mut().expect("current candle exists");
        current.high = current.high.max(price);
        current.low = current.low.min(price);
        current.close = price;
        current.volume += volume;
        current.end_ms = timestamp_ms;
        None
    }

    /// The candle currently being built, if any.
    pub fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}
