//! Consumer contract for a firehose session.
//!
//! A session delivers its stream to exactly one [`Subscriber`]: `on_start`
//! once after the handshake, `on_event` per decoded envelope in arrival order,
//! then exactly one terminal notification, either `on_completed` (clean remote
//! close) or `on_error` (any failure). Nothing follows a terminal
//! notification.
//!
//! Callers who prefer a stream to a callback trait can use [`event_stream`],
//! which adapts the same contract into a `futures::Stream`.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::{Stream, ready};
use tokio::sync::mpsc;

use crate::error::FirehoseError;
use crate::events::Envelope;

/// Receives the notifications of one firehose session.
///
/// Implementations run on the session's I/O task; a slow subscriber delays
/// frame processing, which is what keeps delivery ordered.
#[async_trait]
pub trait Subscriber: Send + 'static {
    /// Called exactly once, after the handshake completes and before any
    /// event. Not called when the connection attempt fails.
    async fn on_start(&mut self) {}

    /// Called once per decoded envelope, in frame arrival order.
    async fn on_event(&mut self, envelope: Envelope);

    /// Terminal: the remote closed the stream cleanly.
    async fn on_completed(&mut self) {}

    /// Terminal: the session failed. Never retried internally.
    async fn on_error(&mut self, error: FirehoseError) {
        let _ = error;
    }
}

enum Notice {
    Start,
    Event(Envelope),
    Completed,
    Error(FirehoseError),
}

/// Channel-backed [`Subscriber`] handed to `activate`; the paired
/// [`EventStream`] yields what it receives.
pub struct EventSink {
    tx: mpsc::UnboundedSender<Notice>,
}

#[async_trait]
impl Subscriber for EventSink {
    async fn on_start(&mut self) {
        let _ = self.tx.send(Notice::Start);
    }

    async fn on_event(&mut self, envelope: Envelope) {
        let _ = self.tx.send(Notice::Event(envelope));
    }

    async fn on_completed(&mut self) {
        let _ = self.tx.send(Notice::Completed);
    }

    async fn on_error(&mut self, error: FirehoseError) {
        let _ = self.tx.send(Notice::Error(error));
    }
}

/// Stream view of a firehose subscription.
///
/// Yields `Ok(envelope)` per event in arrival order. A clean remote close ends
/// the stream; a failure yields one `Err(..)` and then ends the stream.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Notice>,
    started: bool,
    done: bool,
}

impl EventStream {
    /// Whether the session's start notification has been observed yet.
    ///
    /// Only advances while the stream is being polled.
    pub fn has_started(&self) -> bool {
        self.started
    }
}

impl Stream for EventStream {
    type Item = Result<Envelope, FirehoseError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            match ready!(this.rx.poll_recv(cx)) {
                Some(Notice::Start) => {
                    this.started = true;
                }
                Some(Notice::Event(envelope)) => return Poll::Ready(Some(Ok(envelope))),
                Some(Notice::Error(error)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(error)));
                }
                // Sender dropped without a terminal notice ends the stream too
                Some(Notice::Completed) | None => {
                    this.done = true;
                    return Poll::Ready(None);
                }
            }
        }
    }
}

/// Create a connected subscriber/stream pair.
///
/// Hand the [`EventSink`] to `activate` and consume envelopes from the
/// [`EventStream`].
pub fn event_stream() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, EventStream { rx, started: false, done: false })
}
