//! InfluxDB line-protocol writer with an offloaded worker.
//!
//! Producers enqueue serialized lines under a short critical section (one
//! mutex, one push); a single background thread drains the FIFO and performs
//! the network writes. `flush` blocks until the queue is empty and no write
//! is in flight. Dropping the writer signals shutdown, lets the worker drain
//! what remains, and joins it.

use std::collections::VecDeque;
use std::env;
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::errors::SinkError;
use crate::types::{Candle, MarketTick};

use super::SignalSink;

/// Connection parameters for an InfluxDB v2 write endpoint.
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub org: String,
    pub bucket: String,
    pub token: String,
    pub url: String,
}

impl InfluxConfig {
    /// Reads `INFLUX_ORG`, `INFLUX_BUCKET`, `INFLUX_TOKEN`, `INFLUX_URL`.
    /// Any missing variable disables emission.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            org: env::var("INFLUX_ORG").ok()?,
            bucket: env::var("INFLUX_BUCKET").ok()?,
            token: env::var("INFLUX_TOKEN").ok()?,
            url: env::var("INFLUX_URL").ok()?,
        })
    }
}

/// One network write of a line-protocol record. Runs on the worker thread,
/// so a blocking implementation is fine.
pub trait WriteTransport: Send + 'static {
    fn write(&self, line: &str) -> Result<(), SinkError>;
}

/// Blocking HTTP POST to the InfluxDB v2 `/api/v2/write` endpoint.
///
/// The client is built lazily on first use so it always lives on the sink
/// worker thread, never inside an async runtime.
pub struct HttpTransport {
    client: OnceLock<reqwest::blocking::Client>,
    write_url: String,
    token: String,
}

impl HttpTransport {
    pub fn new(config: &InfluxConfig) -> Self {
        let write_url = format!(
            "{}/api/v2/write?org={}&bucket={}&precision=ns",
            config.url, config.org, config.bucket
        );
        Self {
            client: OnceLock::new(),
            write_url,
            token: config.token.clone(),
        }
    }
}

impl WriteTransport for HttpTransport {
    fn write(&self, line: &str) -> Result<(), SinkError> {
        let client = self.client.get_or_init(reqwest::blocking::Client::new);
        let response = client
            .post(&self.write_url)
            .header("Authorization", format!("Token {}", self.token))
            .body(line.to_owned())
            .send()
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::Status {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            })
        }
    }
}

struct QueueState {
    items: VecDeque<String>,
    in_flight: bool,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    cv: Condvar,
}

/// Queued line-protocol writer. See the module docs for the threading model.
pub struct InfluxWriter {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl InfluxWriter {
    pub fn new(config: InfluxConfig) -> Self {
        let transport = HttpTransport::new(&config);
        info!(url = %config.url, bucket = %config.bucket, "influx writer attached");
        Self::with_transport(transport)
    }

    /// Builds a writer from the environment; `None` disables emission.
    pub fn from_env() -> Option<Self> {
        InfluxConfig::from_env().map(Self::new)
    }

    /// Builds a writer over any transport. Tests inject an in-memory one.
    pub fn with_transport<T: WriteTransport>(transport: T) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                items: VecDeque::new(),
                in_flight: false,
                shutdown: false,
            }),
            cv: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::spawn(move || worker_loop(worker_shared, transport));

        Self {
            shared,
            worker: Some(worker),
        }
    }

    fn enqueue(&self, line: String) {
        let mut queue = self.shared.queue.lock().expect("sink queue poisoned");
        queue.items.push_back(line);
        drop(queue);
        self.shared.cv.notify_all();
    }

    /// Blocks until every queued record has been handed to the transport.
    pub fn flush(&self) {
        let mut queue = self.shared.queue.lock().expect("sink queue poisoned");
        while !queue.items.is_empty() || queue.in_flight {
            queue = self.shared.cv.wait(queue).expect("sink queue poisoned");
        }
    }

    /// Number of records waiting for the worker.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().expect("sink queue poisoned").items.len()
    }
}

impl Drop for InfluxWriter {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock().expect("sink queue poisoned");
            queue.shutdown = true;
        }
        self.shared.cv.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop<T: WriteTransport>(shared: Arc<Shared>, transport: T) {
    loop {
        let line = {
            let mut queue = shared.queue.lock().expect("sink queue poisoned");
            loop {
                if let Some(line) = queue.items.pop_front() {
                    queue.in_flight = true;
                    break line;
                }
                if queue.shutdown {
                    return;
                }
                queue = shared.cv.wait(queue).expect("sink queue poisoned");
            }
        };

        if let Err(error) = transport.write(&line) {
            warn!(%error, line = %truncate(&line, 60), "sink write failed, record dropped");
        } else {
            debug!(line = %truncate(&line, 60), "sink write ok");
        }

        let mut queue = shared.queue.lock().expect("sink queue poisoned");
        queue.in_flight = false;
        drop(queue);
        shared.cv.notify_all();
    }
}

fn truncate(s: &str, max: usize) -> &str {
    &s[..s.len().min(max)]
}

fn ts_ns(timestamp_ms: i64) -> i128 {
    timestamp_ms as i128 * 1_000_000
}

impl SignalSink for InfluxWriter {
    fn write_alpha_signal(
        &self,
        symbol: &str,
        momentum: f64,
        mean_rev_z: f64,
        rsi: f64,
        volume_ratio: f64,
        signal_type: &str,
    ) {
        self.enqueue(format!(
            "alpha_signal,symbol={symbol} momentum={momentum},meanRevZ={mean_rev_z},rsi={rsi},vbr={volume_ratio},signal_type=\"{signal_type}\""
        ));
    }

    fn write_microstructure(
        &self,
        symbol: &str,
        vpin: f64,
        toxicity: f64,
        lambda: f64,
        spread: f64,
        timestamp_ms: i64,
    ) {
        self.enqueue(format!(
            "microstructure,symbol={symbol} vpin={vpin},toxicity={toxicity},lambda={lambda},spread={spread} {}",
            ts_ns(timestamp_ms)
        ));
    }

    fn write_order_flow(
        &self,
        symbol: &str,
        ofi: f64,
        bid_pressure: f64,
        ask_pressure: f64,
        volume_delta: f64,
        timestamp_ms: i64,
    ) {
        self.enqueue(format!(
            "orderflow,symbol={symbol} ofi={ofi},bid_pressure={bid_pressure},ask_pressure={ask_pressure},volume_delta={volume_delta} {}",
            ts_ns(timestamp_ms)
        ));
    }

    fn write_regime(
        &self,
        symbol: &str,
        regime: &str,
        hurst: f64,
        volatility: f64,
        trend_strength: f64,
        timestamp_ms: i64,
    ) {
        self.enqueue(format!(
            "regime,symbol={symbol},regime={regime} hurst={hurst},volatility={volatility},trend_strength={trend_strength} {}",
            ts_ns(timestamp_ms)
        ));
    }

    fn write_vwap(&self, symbol: &str, vwap: f64, deviation: f64, timestamp_ms: i64) {
        self.enqueue(format!(
            "vwap,symbol={symbol} vwap={vwap},deviation={deviation} {}",
            ts_ns(timestamp_ms)
        ));
    }

    fn write_candle(&self, symbol: &str, candle: &Candle) {
        self.enqueue(format!(
            "candles,symbol={symbol} open={},high={},low={},close={},volume={} {}",
            candle.open,
            candle.high,
            candle.low,
            candle.close,
            candle.volume,
            ts_ns(candle.end_ms)
        ));
    }

    fn write_tick(&self, tick: &MarketTick) {
        self.enqueue(format!(
            "ticks,symbol={} price={},volume={} {}",
            tick.symbol,
            tick.price,
            tick.volume,
            ts_ns(tick.timestamp_ms)
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct MemoryTransport {
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl WriteTransport for MemoryTransport {
        fn write(&self, line: &str) -> Result<(), SinkError> {
            self.lines.lock().unwrap().push(line.to_owned());
            Ok(())
        }
    }

    #[derive(Clone)]
    struct FailingTransport;

    impl WriteTransport for FailingTransport {
        fn write(&self, _line: &str) -> Result<(), SinkError> {
            Err(SinkError::Transport("connection refused".into()))
        }
    }

    #[test]
    fn alpha_line_matches_schema() {
        let transport = MemoryTransport::default();
        let lines = Arc::clone(&transport.lines);
        let writer = InfluxWriter::with_transport(transport);

        writer.write_alpha_signal("BTCUSDT", 0.01, -1.5, 0.0, 0.0, "TICK_1m");
        writer.flush();

        let lines = lines.lock().unwrap();
        assert_eq!(
            lines[0],
            "alpha_signal,symbol=BTCUSDT momentum=0.01,meanRevZ=-1.5,rsi=0,vbr=0,signal_type=\"TICK_1m\""
        );
    }

    #[test]
    fn timestamped_lines_carry_nanoseconds() {
        let transport = MemoryTransport::default();
        let lines = Arc::clone(&transport.lines);
        let writer = InfluxWriter::with_transport(transport);

        writer.write_vwap("ETH-USD", 2000.5, -0.25, 1_700_000_000_123);
        writer.write_tick(&MarketTick::new("ETH-USD", 2001.0, 0.5, 1_700_000_000_124));
        writer.flush();

        let lines = lines.lock().unwrap();
        assert_eq!(
            lines[0],
            "vwap,symbol=ETH-USD vwap=2000.5,deviation=-0.25 1700000000123000000"
        );
        assert_eq!(
            lines[1],
            "ticks,symbol=ETH-USD price=2001,volume=0.5 1700000000124000000"
        );
    }

    #[test]
    fn regime_label_rides_in_tag_set() {
        let transport = MemoryTransport::default();
        let lines = Arc::clone(&transport.lines);
        let writer = InfluxWriter::with_transport(transport);

        writer.write_regime("AAPL", "TRENDING_LOW_VOL", 0.62, 0.18, 0.4, 1_000);
        writer.flush();

        let lines = lines.lock().unwrap();
        assert!(lines[0].starts_with("regime,symbol=AAPL,regime=TRENDING_LOW_VOL "));
    }

    #[test]
    fn writes_drain_in_order() {
        let transport = MemoryTransport::default();
        let lines = Arc::clone(&transport.lines);
        let writer = InfluxWriter::with_transport(transport);

        for i in 0..100 {
            writer.write_vwap("S", i as f64, 0.0, i);
        }
        writer.flush();
        assert_eq!(writer.pending(), 0);

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 100);
        for (i, line) in lines.iter().enumerate() {
            assert!(line.contains(&format!("vwap={}", i)), "line {i}: {line}");
        }
    }

    #[test]
    fn failed_writes_are_dropped_not_retried() {
        let writer = InfluxWriter::with_transport(FailingTransport);
        writer.write_vwap("S", 1.0, 0.0, 1);
        writer.write_vwap("S", 2.0, 0.0, 2);
        writer.flush();
        assert_eq!(writer.pending(), 0);
    }

    #[test]
    fn drop_performs_best_effort_drain() {
        let transport = MemoryTransport::default();
        let lines = Arc::clone(&transport.lines);
        {
            let writer = InfluxWriter::with_transport(transport);
            for i in 0..10 {
                writer.write_vwap("S", i as f64, 0.0, i);
            }
        }
        // Worker drained everything it could before joining.
        assert_eq!(lines.lock().unwrap().len(), 10);
    }
}
