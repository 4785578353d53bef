//! Envelope encoder for the send path.
//!
//! Producers hand typed events to an [`EnvelopeEncoder`], which wraps each one
//! in the common wire [`Envelope`] with the encoder's fixed origin and a
//! wall-clock timestamp. No session state is involved; the transport layer
//! serializes and sends the result.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::events::{Envelope, Event, EventType};

/// Wraps typed events into wire envelopes, tagged with a fixed origin.
///
/// The encoder holds no mutable state: `encode` only reads the origin and
/// produces a fresh envelope, so one instance can be shared across any number
/// of producer tasks.
#[derive(Debug, Clone)]
pub struct EnvelopeEncoder {
    origin: String,
}

impl EnvelopeEncoder {
    /// Create an encoder whose envelopes carry `origin`.
    pub fn new(origin: impl Into<String>) -> Self {
        Self { origin: origin.into() }
    }

    /// The origin identifier stamped on every envelope.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Wrap `event` into an [`Envelope`] carrying the encoder's origin and the
    /// current wall-clock timestamp in nanoseconds.
    ///
    /// An input that is already an envelope is returned verbatim, never
    /// re-wrapped; its type tag is checked and an `UnsupportedEventType` error
    /// is returned when the tag names no known event kind. Every other input
    /// populates exactly the event-kind field matching its variant.
    pub fn encode(&self, event: impl Into<Event>) -> Result<Envelope> {
        let mut envelope = Envelope {
            origin: self.origin.clone(),
            timestamp: Some(wall_clock_nanos()),
            ..Default::default()
        };
        let kind = match event.into() {
            Event::Envelope(wrapped) => {
                wrapped.kind()?;
                return Ok(wrapped);
            }
            Event::HttpStart(e) => {
                envelope.http_start = Some(e);
                EventType::HttpStart
            }
            Event::HttpStop(e) => {
                envelope.http_stop = Some(e);
                EventType::HttpStop
            }
            Event::HttpStartStop(e) => {
                envelope.http_start_stop = Some(e);
                EventType::HttpStartStop
            }
            Event::LogMessage(e) => {
                envelope.log_message = Some(e);
                EventType::LogMessage
            }
            Event::ValueMetric(e) => {
                envelope.value_metric = Some(e);
                EventType::ValueMetric
            }
            Event::CounterEvent(e) => {
                envelope.counter_event = Some(e);
                EventType::CounterEvent
            }
            Event::Error(e) => {
                envelope.error = Some(e);
                EventType::Error
            }
            Event::ContainerMetric(e) => {
                envelope.container_metric = Some(e);
                EventType::ContainerMetric
            }
        };
        envelope.event_type = kind as i32;
        Ok(envelope)
    }
}

/// Wall-clock nanoseconds since the UNIX epoch.
fn wall_clock_nanos() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_nanos() as i64,
        // Clock reads before the epoch only on badly misconfigured hosts
        Err(_) => 0,
    }
}
