//! Binance combined trade-stream connector.
//!
//! Subscribes to `<symbol>@trade` streams over a single WebSocket and
//! decodes each message into a [`MarketTick`]. One background worker owns
//! the connection and reconnects with a fixed backoff until stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::errors::FeedError;
use crate::types::MarketTick;

use super::{MarketFeed, TickCallback};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    #[serde(default)]
    data: Option<TradeEvent>,
}

#[derive(Debug, Deserialize)]
struct TradeEvent {
    #[serde(rename = "s", default)]
    symbol: String,
    #[serde(rename = "p", default)]
    price: String,
    #[serde(rename = "q", default)]
    quantity: String,
    #[serde(rename = "T", default)]
    timestamp_ms: i64,
}

/// Live Binance trade feed. `start` spawns the worker and returns; `stop`
/// flags shutdown and aborts the connection.
pub struct BinanceFeed {
    symbols: Vec<String>,
    endpoint: String,
    callback: Option<TickCallback>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl BinanceFeed {
    pub fn new(symbols: Vec<String>) -> Self {
        Self {
            symbols,
            endpoint: "wss://stream.binance.com:9443".to_string(),
            callback: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Overrides the WebSocket endpoint (testnets, regional hosts).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn set_tick_callback(&mut self, callback: TickCallback) {
        self.callback = Some(callback);
    }

    fn stream_url(&self) -> String {
        let streams: Vec<String> = self
            .symbols
            .iter()
            .map(|s| format!("{}@trade", s.to_lowercase()))
            .collect();
        format!("{}/stream?streams={}", self.endpoint, streams.join("/"))
    }
}

impl MarketFeed for BinanceFeed {
    fn start(&mut self) -> Result<(), FeedError> {
        let callback = self
            .callback
            .clone()
            .ok_or(FeedError::MissingCallback)?;
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(FeedError::AlreadyRunning);
        }

        let url = self.stream_url();
        let running = Arc::clone(&self.running);
        self.worker = Some(tokio::spawn(async move {
            run_connection_loop(url, callback, running).await;
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

impl Drop for BinanceFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_connection_loop(url: String, callback: TickCallback, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        info!(%url, "connecting to binance trade stream");
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                let (_, mut read) = stream.split();
                while let Some(message) = read.next().await {
                    if !running.load(Ordering::SeqCst) {
                        return;
                    }
                    match message {
                        Ok(Message::Text(text)) => {
                            if let Some(tick) = parse_trade_message(&text) {
                                callback(tick);
                            }
                        }
                        Ok(_) => {}
                        Err(error) => {
                            warn!(%error, "binance stream error");
                            break;
                        }
                    }
                }
                warn!("binance stream closed");
            }
            Err(error) => {
                warn!(%error, "binance connection failed");
            }
        }

        if running.load(Ordering::SeqCst) {
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }
}

/// Decodes one combined-stream message; `None` for anything that is not a
/// well-formed trade (subscription acks, empty symbols, zero prices).
fn parse_trade_message(text: &str) -> Option<MarketTick> {
    let envelope: StreamEnvelope = serde_json::from_str(text).ok()?;
    let data = envelope.data?;

    if data.symbol.is_empty() {
        return None;
    }
    let price: f64 = data.price.parse().ok()?;
    let volume: f64 = data.quantity.parse().ok()?;
    if price <= 0.0 {
        return None;
    }

    Some(MarketTick::new(
        data.symbol,
        price,
        volume,
        data.timestamp_ms,
    ))
}
