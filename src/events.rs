//! Wire types for the firehose event protocol.
//!
//! Every message on the wire is an [`Envelope`]: a protobuf-encoded wrapper
//! carrying one typed event payload plus common metadata (origin, timestamp,
//! and optional deployment placement fields). The message and enum declarations
//! here mirror the aggregation endpoint's schema; this crate encodes and
//! decodes them with prost but never reinterprets the schema itself.
//!
//! [`Event`] is the closed set of payload kinds as a Rust sum type. Adding a
//! kind means adding a variant, which the compiler then demands everywhere the
//! set is matched.

use std::collections::HashMap;

use crate::error::{FirehoseError, Result};

/// Wire tag identifying which event-kind field an [`Envelope`] carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EventType {
    HttpStart = 2,
    HttpStop = 3,
    HttpStartStop = 4,
    LogMessage = 5,
    ValueMetric = 6,
    CounterEvent = 7,
    Error = 8,
    ContainerMetric = 9,
}

/// The common wire wrapper: one typed event plus origin and timestamp.
///
/// Invariant: an envelope placed on the wire carries exactly one populated
/// event-kind field, consistent with `event_type`. [`Envelope::event`] enforces
/// this on extraction.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    /// Identifier of the process that produced the wrapped event.
    #[prost(string, tag = "1")]
    pub origin: String,

    /// Which event-kind field is populated. See [`Envelope::kind`].
    #[prost(enumeration = "EventType", tag = "2")]
    pub event_type: i32,

    /// Wall-clock nanoseconds since the UNIX epoch, stamped at encode time.
    #[prost(int64, optional, tag = "6")]
    pub timestamp: Option<i64>,

    /// Deployment placement metadata, filled in by intermediaries.
    #[prost(string, optional, tag = "13")]
    pub deployment: Option<String>,
    #[prost(string, optional, tag = "14")]
    pub job: Option<String>,
    #[prost(string, optional, tag = "15")]
    pub index: Option<String>,
    #[prost(string, optional, tag = "16")]
    pub ip: Option<String>,

    /// Free-form key/value annotations.
    #[prost(map = "string, string", tag = "17")]
    pub tags: HashMap<String, String>,

    #[prost(message, optional, tag = "3")]
    pub http_start: Option<HttpStart>,
    #[prost(message, optional, tag = "4")]
    pub http_stop: Option<HttpStop>,
    #[prost(message, optional, tag = "5")]
    pub log_message: Option<LogMessage>,
    #[prost(message, optional, tag = "7")]
    pub http_start_stop: Option<HttpStartStop>,
    #[prost(message, optional, tag = "8")]
    pub value_metric: Option<ValueMetric>,
    #[prost(message, optional, tag = "9")]
    pub counter_event: Option<CounterEvent>,
    #[prost(message, optional, tag = "10")]
    pub error: Option<ErrorEvent>,
    #[prost(message, optional, tag = "11")]
    pub container_metric: Option<ContainerMetric>,
}

impl Envelope {
    /// The typed event-kind tag, or an `UnsupportedEventType` error when the
    /// wire tag names no known kind.
    pub fn kind(&self) -> Result<EventType> {
        EventType::try_from(self.event_type)
            .map_err(|_| FirehoseError::unsupported_event_type(self.event_type))
    }

    /// Extracts the wrapped payload as an [`Event`].
    ///
    /// Fails with `UnsupportedEventType` for an unknown tag, or with a
    /// protocol error when the tagged field is not populated.
    pub fn event(&self) -> Result<Event> {
        let kind = self.kind()?;
        let missing =
            || FirehoseError::protocol(format!("envelope tagged {kind:?} carries no payload"));
        Ok(match kind {
            EventType::HttpStart => {
                Event::HttpStart(self.http_start.clone().ok_or_else(missing)?)
            }
            EventType::HttpStop => Event::HttpStop(self.http_stop.clone().ok_or_else(missing)?),
            EventType::HttpStartStop => {
                Event::HttpStartStop(self.http_start_stop.clone().ok_or_else(missing)?)
            }
            EventType::LogMessage => {
                Event::LogMessage(self.log_message.clone().ok_or_else(missing)?)
            }
            EventType::ValueMetric => {
                Event::ValueMetric(self.value_metric.clone().ok_or_else(missing)?)
            }
            EventType::CounterEvent => {
                Event::CounterEvent(self.counter_event.clone().ok_or_else(missing)?)
            }
            EventType::Error => Event::Error(self.error.clone().ok_or_else(missing)?),
            EventType::ContainerMetric => {
                Event::ContainerMetric(self.container_metric.clone().ok_or_else(missing)?)
            }
        })
    }
}

/// A 128-bit request identifier, split the way the wire carries it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, ::prost::Message)]
pub struct Uuid {
    #[prost(uint64, tag = "1")]
    pub low: u64,
    #[prost(uint64, tag = "2")]
    pub high: u64,
}

/// Which side of a request an HTTP event was recorded on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum PeerType {
    Client = 1,
    Server = 2,
}

/// HTTP request method as carried on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum Method {
    Get = 1,
    Post = 2,
    Put = 3,
    Delete = 4,
    Head = 5,
}

/// A named gauge-style measurement.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValueMetric {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(double, tag = "2")]
    pub value: f64,
    #[prost(string, tag = "3")]
    pub unit: String,
}

/// An increment of a named counter.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CounterEvent {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint64, tag = "2")]
    pub delta: u64,
    /// Running total, when the producer tracks one.
    #[prost(uint64, optional, tag = "3")]
    pub total: Option<u64>,
}

/// An error record reported by a producer.
///
/// Named `ErrorEvent` to keep `Error` free for error-handling types.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorEvent {
    #[prost(string, tag = "1")]
    pub source: String,
    #[prost(int32, tag = "2")]
    pub code: i32,
    #[prost(string, tag = "3")]
    pub message: String,
}

/// The start of an HTTP request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HttpStart {
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(message, optional, tag = "2")]
    pub request_id: Option<Uuid>,
    #[prost(enumeration = "PeerType", tag = "3")]
    pub peer_type: i32,
    #[prost(enumeration = "Method", tag = "4")]
    pub method: i32,
    #[prost(string, tag = "5")]
    pub uri: String,
    #[prost(string, tag = "6")]
    pub remote_address: String,
    #[prost(string, tag = "7")]
    pub user_agent: String,
    #[prost(message, optional, tag = "8")]
    pub parent_request_id: Option<Uuid>,
    #[prost(message, optional, tag = "9")]
    pub application_id: Option<Uuid>,
    #[prost(int32, tag = "10")]
    pub instance_index: i32,
    #[prost(string, tag = "11")]
    pub instance_id: String,
}

/// The end of an HTTP request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HttpStop {
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(string, tag = "2")]
    pub uri: String,
    #[prost(message, optional, tag = "3")]
    pub request_id: Option<Uuid>,
    #[prost(enumeration = "PeerType", tag = "4")]
    pub peer_type: i32,
    #[prost(int32, tag = "5")]
    pub status_code: i32,
    #[prost(int64, tag = "6")]
    pub content_length: i64,
    #[prost(message, optional, tag = "7")]
    pub application_id: Option<Uuid>,
}

/// A complete HTTP request/response round trip.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HttpStartStop {
    #[prost(int64, tag = "1")]
    pub start_timestamp: i64,
    #[prost(int64, tag = "2")]
    pub stop_timestamp: i64,
    #[prost(message, optional, tag = "3")]
    pub request_id: Option<Uuid>,
    #[prost(enumeration = "PeerType", tag = "4")]
    pub peer_type: i32,
    #[prost(enumeration = "Method", tag = "5")]
    pub method: i32,
    #[prost(string, tag = "6")]
    pub uri: String,
    #[prost(string, tag = "7")]
    pub remote_address: String,
    #[prost(string, tag = "8")]
    pub user_agent: String,
    #[prost(int32, tag = "9")]
    pub status_code: i32,
    #[prost(int64, tag = "10")]
    pub content_length: i64,
    #[prost(message, optional, tag = "12")]
    pub application_id: Option<Uuid>,
    #[prost(int32, tag = "13")]
    pub instance_index: i32,
    #[prost(string, tag = "14")]
    pub instance_id: String,
    #[prost(string, repeated, tag = "15")]
    pub forwarded: Vec<String>,
}

/// Stream a log line was written to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum LogMessageType {
    Out = 1,
    Err = 2,
}

/// One log line emitted by an application instance.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub message: Vec<u8>,
    #[prost(enumeration = "LogMessageType", tag = "2")]
    pub message_type: i32,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
    #[prost(string, tag = "4")]
    pub app_id: String,
    #[prost(string, tag = "5")]
    pub source_type: String,
    #[prost(string, tag = "6")]
    pub source_instance: String,
}

/// Resource usage of one application container.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerMetric {
    #[prost(string, tag = "1")]
    pub application_id: String,
    #[prost(int32, tag = "2")]
    pub instance_index: i32,
    #[prost(double, tag = "3")]
    pub cpu_percentage: f64,
    #[prost(uint64, tag = "4")]
    pub memory_bytes: u64,
    #[prost(uint64, tag = "5")]
    pub disk_bytes: u64,
}

/// The closed set of typed domain events, plus an already-wrapped envelope
/// for encoder pass-through.
///
/// Immutable once constructed; ownership flows producer to encoder to
/// transport.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    HttpStart(HttpStart),
    HttpStop(HttpStop),
    HttpStartStop(HttpStartStop),
    LogMessage(LogMessage),
    ValueMetric(ValueMetric),
    CounterEvent(CounterEvent),
    Error(ErrorEvent),
    ContainerMetric(ContainerMetric),
    /// An envelope that has already been wrapped. Encoding it again is a
    /// no-op; it is never double-wrapped.
    Envelope(Envelope),
}

macro_rules! event_from {
    ($($payload:ident),+ $(,)?) => {
        $(impl From<$payload> for Event {
            fn from(payload: $payload) -> Self {
                Event::$payload(payload)
            }
        })+
    };
}

event_from!(
    HttpStart,
    HttpStop,
    HttpStartStop,
    LogMessage,
    ValueMetric,
    CounterEvent,
    ContainerMetric,
    Envelope,
);

impl From<ErrorEvent> for Event {
    fn from(payload: ErrorEvent) -> Self {
        Event::Error(payload)
    }
}
