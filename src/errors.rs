use thiserror::Error;

/// Reasons a market tick is rejected at the pipeline boundary.
///
/// Rejected ticks are dropped without touching analyzer state; the owning
/// composer counts them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TickError {
    #[error("non-positive price: {0}")]
    NonPositivePrice(f64),
    #[error("non-finite price")]
    NonFinitePrice,
    #[error("negative volume: {0}")]
    NegativeVolume(f64),
    #[error("non-finite volume")]
    NonFiniteVolume,
    #[error("negative timestamp: {0}")]
    NegativeTimestamp(i64),
}

/// Feed transport and lifecycle errors.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("feed is already running")]
    AlreadyRunning,
    #[error("feed requires a tick callback before start")]
    MissingCallback,
}

/// Sink transport errors. Failed writes are logged and the record dropped;
/// no retry queue is maintained.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("write rejected with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
}
