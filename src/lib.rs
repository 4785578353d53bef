//! Async Rust client for streaming telemetry from a firehose endpoint.
//!
//! Nozzle maintains one authenticated, optionally TLS-encrypted WebSocket
//! session to a telemetry aggregation endpoint and delivers the decoded event
//! stream to a single consumer. For the send path it provides an envelope
//! encoder that wraps locally-produced typed events into the common wire
//! format.
//!
//! # Features
//!
//! - **Single logical stream**: one session, one consumer, events in exact
//!   arrival order with one terminal notification (completion or error)
//! - **Typed events**: a closed sum type over the protocol's event kinds,
//!   checked exhaustively at compile time
//! - **Explicit trust**: TLS validates against system roots unless the caller
//!   explicitly opts out
//! - **No hidden retries**: every failure surfaces once; reconnect policy
//!   stays with the caller
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use nozzle::Nozzle;
//!
//! #[tokio::main]
//! async fn main() -> nozzle::Result<()> {
//!     let (sink, mut events) = nozzle::event_stream();
//!     let mut handle = Nozzle::builder("wss://doppler.example.com")
//!         .token("bearer ...")
//!         .subscription_id("nozzle-1")
//!         .build()?
//!         .activate(sink)?;
//!
//!     while let Some(envelope) = events.next().await {
//!         println!("{:?}", envelope?);
//!     }
//!     handle.close();
//!     Ok(())
//! }
//! ```
//!
//! # Encoding
//!
//! ```rust
//! use nozzle::{EnvelopeEncoder, ValueMetric};
//!
//! # fn main() -> nozzle::Result<()> {
//! let encoder = EnvelopeEncoder::new("metron-agent");
//! let envelope = encoder.encode(ValueMetric {
//!     name: "requests".to_string(),
//!     value: 42.0,
//!     unit: "count".to_string(),
//! })?;
//! assert_eq!(envelope.origin, "metron-agent");
//! # Ok(())
//! # }
//! ```

mod encoder;
mod endpoint;
mod error;
mod session;
mod subscriber;

pub mod events;

// Core exports
pub use encoder::EnvelopeEncoder;
pub use endpoint::{Endpoint, FIREHOSE_PATH_PREFIX, Scheme};
pub use error::{FirehoseError, Result};
pub use events::{
    ContainerMetric, CounterEvent, Envelope, ErrorEvent, Event, EventType, HttpStart,
    HttpStartStop, HttpStop, LogMessage, LogMessageType, Method, PeerType, Uuid, ValueMetric,
};
pub use session::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_FRAME_BYTES, FirehoseBuilder,
    FirehoseConfig, FirehoseHandle, FirehoseSession, SessionState,
};
pub use subscriber::{EventSink, EventStream, Subscriber, event_stream};

/// Unified entry point for firehose connections.
///
/// Thin front over [`FirehoseBuilder`] for the common case.
///
/// # Example
///
/// ```rust,no_run
/// use nozzle::Nozzle;
///
/// # fn main() -> nozzle::Result<()> {
/// let session = Nozzle::builder("ws://doppler.example.com")
///     .token("bearer ...")
///     .subscription_id("abc")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct Nozzle;

impl Nozzle {
    /// Start building a session against `url`.
    pub fn builder(url: impl Into<String>) -> FirehoseBuilder {
        FirehoseBuilder::new(url)
    }
}
