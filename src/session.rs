//! Stream session: one authenticated WebSocket connection to the firehose.
//!
//! A session is built in two phases. [`FirehoseBuilder::build`] resolves and
//! validates the connection parameters without touching the network, and
//! [`FirehoseSession::activate`] attaches the single consumer and spawns the
//! I/O task. Activation consumes the session, so a session can neither be
//! driven without a consumer nor activated twice.
//!
//! The I/O task owns the socket and the session state machine
//! (`Disconnected -> Connecting -> HandshakePending -> Active -> Terminated`)
//! and publishes transitions through a watch channel. The caller keeps only a
//! [`FirehoseHandle`] for observation and close; after activation the session
//! belongs to its I/O context.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use prost::Message as _;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, client_async_tls_with_config};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::endpoint::Endpoint;
use crate::error::{FirehoseError, Result};
use crate::events::Envelope;
use crate::subscriber::Subscriber;

/// Ceiling on a reassembled data frame, matching the aggregation endpoint's
/// own limit.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Read inactivity window after which an established session is considered
/// dead.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Window for TCP connect and for the upgrade handshake, each.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_idle_timeout() -> Duration {
    DEFAULT_IDLE_TIMEOUT
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

/// Connection parameters for one firehose session.
///
/// Usually assembled through [`FirehoseBuilder`]; deserializable for callers
/// that keep endpoint settings in config files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirehoseConfig {
    /// Base WebSocket URL of the aggregation endpoint (`ws://` or `wss://`).
    pub url: String,

    /// Bearer credential, sent verbatim in the authorization header.
    #[serde(default)]
    pub token: String,

    /// Subscription identifier appended to the firehose path prefix.
    #[serde(default)]
    pub subscription_id: String,

    /// Accept any TLS certificate instead of validating against system roots.
    /// Never enabled implicitly.
    #[serde(default)]
    pub skip_tls_validation: bool,

    /// Reassembled frames above this size terminate the session with a
    /// protocol error.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: Duration,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

impl FirehoseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: String::new(),
            subscription_id: String::new(),
            skip_tls_validation: false,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Builder for a [`FirehoseSession`].
pub struct FirehoseBuilder {
    config: FirehoseConfig,
    runtime: Option<Handle>,
}

impl FirehoseBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self { config: FirehoseConfig::new(url), runtime: None }
    }

    pub fn from_config(config: FirehoseConfig) -> Self {
        Self { config, runtime: None }
    }

    /// Bearer credential for the upgrade request. Passed through verbatim; no
    /// parsing or validation beyond header-value well-formedness.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = token.into();
        self
    }

    pub fn subscription_id(mut self, id: impl Into<String>) -> Self {
        self.config.subscription_id = id.into();
        self
    }

    /// Explicitly accept any remote certificate. The default validates
    /// against the system trust roots.
    pub fn skip_tls_validation(mut self, skip: bool) -> Self {
        self.config.skip_tls_validation = skip;
        self
    }

    pub fn max_frame_bytes(mut self, limit: usize) -> Self {
        self.config.max_frame_bytes = limit;
        self
    }

    pub fn idle_timeout(mut self, window: Duration) -> Self {
        self.config.idle_timeout = window;
        self
    }

    pub fn connect_timeout(mut self, window: Duration) -> Self {
        self.config.connect_timeout = window;
        self
    }

    /// Run the session's I/O on this runtime instead of the ambient one.
    /// A caller-supplied runtime is never shut down by the session.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Validate the parameters and produce an inactive session.
    ///
    /// Address problems (unknown scheme, unparseable URL, credential that
    /// cannot be carried in a header) fail here, before any socket is opened.
    pub fn build(self) -> Result<FirehoseSession> {
        let endpoint = Endpoint::resolve(&self.config.url, &self.config.subscription_id)?;
        HeaderValue::from_str(&self.config.token)
            .map_err(|_| FirehoseError::address("credential is not a valid header value"))?;
        Ok(FirehoseSession { endpoint, config: self.config, runtime: self.runtime })
    }
}

/// Lifecycle of a stream session. Single-use: `Terminated` is final.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    HandshakePending,
    Active,
    Terminated,
}

/// A validated but not yet activated firehose session.
#[derive(Debug)]
pub struct FirehoseSession {
    endpoint: Endpoint,
    config: FirehoseConfig,
    runtime: Option<Handle>,
}

impl FirehoseSession {
    /// The resolved target this session will connect to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Attach the single consumer and begin connecting.
    ///
    /// Consumes the session: one activation, one consumer, one logical
    /// stream. The subscriber receives `on_start` exactly once after the
    /// handshake completes, or `on_error` if the connection attempt fails.
    ///
    /// I/O runs on the caller-supplied runtime if one was given, else on the
    /// ambient runtime, else on a runtime created (and owned) by the returned
    /// handle.
    pub fn activate<S: Subscriber>(self, subscriber: S) -> Result<FirehoseHandle> {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let cancel = CancellationToken::new();
        let task = run(self.endpoint, self.config, subscriber, state_tx, cancel.clone());

        let owned_runtime = if let Some(handle) = self.runtime {
            handle.spawn(task);
            None
        } else if let Ok(handle) = Handle::try_current() {
            handle.spawn(task);
            None
        } else {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("nozzle-io")
                .enable_all()
                .build()
                .map_err(|e| {
                    FirehoseError::connection_with_source("cannot start I/O runtime", Box::new(e))
                })?;
            runtime.spawn(task);
            Some(runtime)
        };

        Ok(FirehoseHandle { state: state_rx, cancel, owned_runtime })
    }
}

/// Observation and teardown handle for an activated session.
pub struct FirehoseHandle {
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    owned_runtime: Option<Runtime>,
}

impl FirehoseHandle {
    /// True once a transport socket exists and the session has not
    /// terminated. False while connecting and after any termination.
    pub fn is_connected(&self) -> bool {
        matches!(*self.state.borrow(), SessionState::HandshakePending | SessionState::Active)
    }

    /// Current lifecycle state of the session.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Tear the session down. Idempotent.
    ///
    /// Cancellation is not instantaneous: in-flight I/O may still complete or
    /// fail, but no consumer notification follows the terminal one. An
    /// internally-created runtime is shut down here; a caller-supplied or
    /// ambient runtime is left alone.
    pub fn close(&mut self) {
        self.cancel.cancel();
        if let Some(runtime) = self.owned_runtime.take() {
            runtime.shutdown_background();
        }
    }

    /// Wait until the session reaches `Terminated`.
    pub async fn terminated(&mut self) {
        loop {
            if *self.state.borrow_and_update() == SessionState::Terminated {
                return;
            }
            if self.state.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for FirehoseHandle {
    fn drop(&mut self) {
        // Only a privately-created runtime goes down with the handle; a
        // session on a caller's runtime keeps streaming until close().
        if let Some(runtime) = self.owned_runtime.take() {
            self.cancel.cancel();
            runtime.shutdown_background();
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// I/O task body: connect, hand the stream to the consumer, decode until a
/// terminal condition. Exactly one terminal notification leaves this
/// function.
async fn run<S: Subscriber>(
    endpoint: Endpoint,
    config: FirehoseConfig,
    mut subscriber: S,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("session closed during the connection attempt");
            let _ = state.send(SessionState::Terminated);
            return;
        }
        result = establish(&endpoint, &config, &state) => result,
    };

    let mut ws = match connected {
        Ok(ws) => ws,
        Err(error) => {
            fail(&state, &mut subscriber, error).await;
            return;
        }
    };

    // Atomic switch from handshake mode to streaming mode: the upgrade
    // response has been consumed, the frame-size ceiling is in force.
    let _ = state.send(SessionState::Active);
    info!(%endpoint, "firehose stream active");
    subscriber.on_start().await;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("local close, shutting the stream down");
                let _ = ws.close(None).await;
                complete(&state, &mut subscriber).await;
                return;
            }
            next = timeout(config.idle_timeout, ws.next()) => next,
        };

        match next {
            Err(_) => {
                let error = FirehoseError::Timeout { duration: config.idle_timeout };
                fail(&state, &mut subscriber, error).await;
                return;
            }
            Ok(None) => {
                info!("remote ended the stream");
                complete(&state, &mut subscriber).await;
                return;
            }
            Ok(Some(Err(error))) => {
                fail(&state, &mut subscriber, error.into()).await;
                return;
            }
            Ok(Some(Ok(message))) => match message {
                Message::Ping(payload) => {
                    trace!(bytes = payload.len(), "keepalive probe");
                    // The protocol layer queued the matching pong when it read
                    // the probe; push it onto the wire before the next frame.
                    if let Err(error) = ws.flush().await {
                        fail(&state, &mut subscriber, error.into()).await;
                        return;
                    }
                }
                Message::Binary(payload) => match Envelope::decode(payload.as_slice()) {
                    Ok(envelope) => {
                        trace!(origin = %envelope.origin, "event decoded");
                        subscriber.on_event(envelope).await;
                    }
                    Err(error) => {
                        fail(&state, &mut subscriber, error.into()).await;
                        return;
                    }
                },
                Message::Close(frame) => {
                    debug!(?frame, "remote close frame");
                    complete(&state, &mut subscriber).await;
                    return;
                }
                Message::Text(_) => {
                    let error = FirehoseError::UnexpectedFrame { kind: "text" };
                    fail(&state, &mut subscriber, error).await;
                    return;
                }
                // This session never sends pings, so a pong is unexpected
                Message::Pong(_) => {
                    let error = FirehoseError::UnexpectedFrame { kind: "pong" };
                    fail(&state, &mut subscriber, error).await;
                    return;
                }
                Message::Frame(_) => {
                    let error = FirehoseError::UnexpectedFrame { kind: "raw" };
                    fail(&state, &mut subscriber, error).await;
                    return;
                }
            },
        }
    }
}

/// Connect, negotiate TLS when the scheme asks for it, and perform the
/// upgrade handshake with the bearer credential.
async fn establish(
    endpoint: &Endpoint,
    config: &FirehoseConfig,
    state: &watch::Sender<SessionState>,
) -> Result<WsStream> {
    let _ = state.send(SessionState::Connecting);
    debug!(%endpoint, "connecting");

    let url = endpoint.url();
    let mut request = url.as_str().into_client_request()?;
    let credential = HeaderValue::from_str(&config.token)
        .map_err(|_| FirehoseError::address("credential is not a valid header value"))?;
    request.headers_mut().insert(AUTHORIZATION, credential);

    let connector = if endpoint.scheme().is_encrypted() {
        if config.skip_tls_validation {
            warn!("TLS certificate validation disabled for this session");
        }
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(config.skip_tls_validation)
            .build()?;
        Some(Connector::NativeTls(tls))
    } else {
        Some(Connector::Plain)
    };

    let socket = timeout(
        config.connect_timeout,
        TcpStream::connect((endpoint.host(), endpoint.port())),
    )
    .await
    .map_err(|_| FirehoseError::Timeout { duration: config.connect_timeout })?
    .map_err(|e| {
        FirehoseError::connection_with_source(format!("cannot reach {endpoint}"), Box::new(e))
    })?;

    let _ = state.send(SessionState::HandshakePending);
    trace!("transport socket established, upgrading");

    let ws_config = WebSocketConfig {
        max_message_size: Some(config.max_frame_bytes),
        max_frame_size: Some(config.max_frame_bytes),
        ..Default::default()
    };

    let (ws, response) = timeout(
        config.connect_timeout,
        client_async_tls_with_config(request, socket, Some(ws_config), connector),
    )
    .await
    .map_err(|_| FirehoseError::Timeout { duration: config.connect_timeout })??;

    debug!(status = response.status().as_u16(), "upgrade accepted");
    Ok(ws)
}

// Terminal notification first, then the observable state flip: anyone woken
// by `Terminated` must find the consumer already notified.
async fn fail<S: Subscriber>(
    state: &watch::Sender<SessionState>,
    subscriber: &mut S,
    error: FirehoseError,
) {
    warn!(%error, "firehose session terminated");
    subscriber.on_error(error).await;
    let _ = state.send(SessionState::Terminated);
}

async fn complete<S: Subscriber>(state: &watch::Sender<SessionState>, subscriber: &mut S) {
    subscriber.on_completed().await;
    let _ = state.send(SessionState::Terminated);
}
