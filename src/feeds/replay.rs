//! Synchronous in-memory feed for backtests, demos and tests.

use tracing::info;

use crate::errors::FeedError;
use crate::types::MarketTick;

use super::{MarketFeed, TickCallback};

/// Drives a pre-loaded tick vector through the callback in order.
pub struct ReplayFeed {
    ticks: Vec<MarketTick>,
    callback: Option<TickCallback>,
    stopped: bool,
}

impl ReplayFeed {
    pub fn new(ticks: Vec<MarketTick>) -> Self {
        Self {
            ticks,
            callback: None,
            stopped: false,
        }
    }

    pub fn set_tick_callback(&mut self, callback: TickCallback) {
        self.callback = Some(callback);
    }
}

impl MarketFeed for ReplayFeed {
    fn start(&mut self) -> Result<(), FeedError> {
        let callback = self.callback.as_ref().ok_or(FeedError::MissingCallback)?;

        info!(ticks = self.ticks.len(), "replay feed starting");
        for tick in &self.ticks {
            if self.stopped {
                break;
            }
            callback(tick.clone());
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
