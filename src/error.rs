//! Error types for firehose streaming and envelope encoding.
//!
//! Every failure a session can hit (bad address, transport loss, TLS
//! negotiation, handshake rejection, protocol violation) surfaces through one
//! [`FirehoseError`] enum. Session errors are terminal: they are delivered
//! exactly once through the consumer's error notification and never retried
//! internally. Encoder errors are returned synchronously from `encode` and
//! touch no session state.
//!
//! Retry policy is the caller's concern; [`FirehoseError::is_retryable`]
//! classifies which failures are worth another connection attempt.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::error::CapacityError;

/// Result type alias for firehose operations.
pub type Result<T, E = FirehoseError> = std::result::Result<T, E>;

/// Main error type for firehose streaming and envelope encoding.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FirehoseError {
    #[error("Invalid firehose address: {reason}")]
    Address { reason: String },

    #[error("Failed to connect to firehose: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("TLS negotiation failed")]
    Tls {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Firehose handshake rejected with status {status}")]
    Handshake { status: u16 },

    #[error("No data read for {duration:?}")]
    Timeout { duration: Duration },

    #[error("Reassembled frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Failed to decode event envelope")]
    Decode {
        #[source]
        source: prost::DecodeError,
    },

    #[error("Unexpected {kind} frame on the event stream")]
    UnexpectedFrame { kind: &'static str },

    #[error("Protocol violation: {details}")]
    Protocol { details: String },

    #[error("Unsupported event type tag {tag}")]
    UnsupportedEventType { tag: i32 },
}

impl FirehoseError {
    /// Returns whether a fresh session has a chance of succeeding after this
    /// error. Protocol and encoding errors are deterministic and not worth a
    /// reconnect; transport-level failures may be transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            FirehoseError::Connection { .. } => true,
            FirehoseError::Timeout { .. } => true,
            FirehoseError::Tls { .. } => false,
            FirehoseError::Address { .. } => false,
            FirehoseError::Handshake { .. } => false,
            FirehoseError::FrameTooLarge { .. } => false,
            FirehoseError::Decode { .. } => false,
            FirehoseError::UnexpectedFrame { .. } => false,
            FirehoseError::Protocol { .. } => false,
            FirehoseError::UnsupportedEventType { .. } => false,
        }
    }

    /// Helper constructor for address errors.
    pub fn address(reason: impl Into<String>) -> Self {
        FirehoseError::Address { reason: reason.into() }
    }

    /// Helper constructor for connection errors.
    pub fn connection(reason: impl Into<String>) -> Self {
        FirehoseError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with a source.
    pub fn connection_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        FirehoseError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for protocol violations.
    pub fn protocol(details: impl Into<String>) -> Self {
        FirehoseError::Protocol { details: details.into() }
    }

    /// Helper constructor for unsupported event type tags.
    pub fn unsupported_event_type(tag: i32) -> Self {
        FirehoseError::UnsupportedEventType { tag }
    }
}

impl From<prost::DecodeError> for FirehoseError {
    fn from(err: prost::DecodeError) -> Self {
        FirehoseError::Decode { source: err }
    }
}

impl From<native_tls::Error> for FirehoseError {
    fn from(err: native_tls::Error) -> Self {
        FirehoseError::Tls { source: Box::new(err) }
    }
}

impl From<tungstenite::Error> for FirehoseError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Capacity(CapacityError::MessageTooLong { size, max_size }) => {
                FirehoseError::FrameTooLarge { size, limit: max_size }
            }
            tungstenite::Error::Capacity(other) => {
                FirehoseError::Protocol { details: other.to_string() }
            }
            tungstenite::Error::Http(response) => {
                FirehoseError::Handshake { status: response.status().as_u16() }
            }
            tungstenite::Error::Tls(source) => FirehoseError::Tls { source: Box::new(source) },
            tungstenite::Error::Io(source) => FirehoseError::Connection {
                reason: "socket error".to_string(),
                source: Some(Box::new(source)),
            },
            tungstenite::Error::Protocol(violation) => {
                FirehoseError::Protocol { details: violation.to_string() }
            }
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                FirehoseError::connection("connection closed")
            }
            other => FirehoseError::connection(other.to_string()),
        }
    }
}
