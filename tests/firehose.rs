//! End-to-end session tests against an in-process WebSocket server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use prost::Message as _;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{Response as HttpResponse, StatusCode};
use tokio_tungstenite::{accept_async, accept_hdr_async};

use nozzle::{
    Envelope, EnvelopeEncoder, FirehoseError, Nozzle, SessionState, Subscriber, ValueMetric,
    event_stream,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[derive(Default)]
struct Shared {
    started: u32,
    events: Vec<Envelope>,
    completed: u32,
    errors: Vec<FirehoseError>,
}

impl Shared {
    fn metric_names(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| e.value_metric.as_ref())
            .map(|m| m.name.clone())
            .collect()
    }
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Shared>>);

#[async_trait]
impl Subscriber for Recorder {
    async fn on_start(&mut self) {
        self.0.lock().unwrap().started += 1;
    }

    async fn on_event(&mut self, envelope: Envelope) {
        self.0.lock().unwrap().events.push(envelope);
    }

    async fn on_completed(&mut self) {
        self.0.lock().unwrap().completed += 1;
    }

    async fn on_error(&mut self, error: FirehoseError) {
        self.0.lock().unwrap().errors.push(error);
    }
}

fn metric_bytes(encoder: &EnvelopeEncoder, name: &str) -> Vec<u8> {
    encoder
        .encode(ValueMetric { name: name.to_string(), value: 1.0, unit: "ms".to_string() })
        .unwrap()
        .encode_to_vec()
}

async fn bound_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("ws://{addr}"))
}

#[tokio::test]
async fn streams_events_in_order_then_completes() {
    init_tracing();
    let (listener, url) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let encoder = EnvelopeEncoder::new("router");

        ws.send(Message::Binary(metric_bytes(&encoder, "m1"))).await.unwrap();

        // A probe mid-stream must come back as a pong with the same payload
        // before the client touches anything else.
        ws.send(Message::Ping(b"hb-7".to_vec())).await.unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        assert_eq!(reply, Message::Pong(b"hb-7".to_vec()));

        ws.send(Message::Binary(metric_bytes(&encoder, "m2"))).await.unwrap();
        ws.send(Message::Binary(metric_bytes(&encoder, "m3"))).await.unwrap();
        let _ = ws.close(None).await;
    });

    let recorder = Recorder::default();
    let mut handle = Nozzle::builder(url)
        .token("bearer secret")
        .subscription_id("abc")
        .build()
        .unwrap()
        .activate(recorder.clone())
        .unwrap();

    handle.terminated().await;
    server.await.unwrap();

    let shared = recorder.0.lock().unwrap();
    assert_eq!(shared.started, 1);
    assert_eq!(shared.metric_names(), ["m1", "m2", "m3"]);
    assert_eq!(shared.completed, 1);
    assert!(shared.errors.is_empty());
    assert!(!handle.is_connected());
    assert_eq!(handle.state(), SessionState::Terminated);
}

#[tokio::test]
async fn upgrade_request_carries_path_and_credential() {
    let (listener, url) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = |req: &Request, resp: Response| {
            assert_eq!(req.uri().path(), "/firehose/abc");
            assert_eq!(req.headers().get("authorization").unwrap(), "bearer secret");
            Ok(resp)
        };
        let mut ws = accept_hdr_async(stream, callback).await.unwrap();
        let _ = ws.close(None).await;
    });

    let recorder = Recorder::default();
    let mut handle = Nozzle::builder(url)
        .token("bearer secret")
        .subscription_id("abc")
        .build()
        .unwrap()
        .activate(recorder.clone())
        .unwrap();

    handle.terminated().await;
    server.await.unwrap();

    let shared = recorder.0.lock().unwrap();
    assert_eq!(shared.started, 1);
    assert_eq!(shared.completed, 1);
    assert!(shared.errors.is_empty());
}

#[tokio::test]
async fn rejected_handshake_surfaces_error_without_start() {
    let (listener, url) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = |_req: &Request, _resp: Response| -> Result<Response, ErrorResponse> {
            let reject = HttpResponse::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body(Some("bad token".to_string()))
                .unwrap();
            Err(reject)
        };
        let _ = accept_hdr_async(stream, callback).await;
    });

    let recorder = Recorder::default();
    let mut handle = Nozzle::builder(url)
        .token("bearer wrong")
        .subscription_id("abc")
        .build()
        .unwrap()
        .activate(recorder.clone())
        .unwrap();

    handle.terminated().await;
    server.await.unwrap();

    let shared = recorder.0.lock().unwrap();
    assert_eq!(shared.started, 0);
    assert_eq!(shared.completed, 0);
    assert_eq!(shared.errors.len(), 1);
    assert!(matches!(shared.errors[0], FirehoseError::Handshake { status: 401 }));
}

#[tokio::test]
async fn connection_refused_surfaces_retryable_error() {
    let (listener, url) = bound_listener().await;
    drop(listener);

    let recorder = Recorder::default();
    let mut handle = Nozzle::builder(url)
        .subscription_id("abc")
        .build()
        .unwrap()
        .activate(recorder.clone())
        .unwrap();

    handle.terminated().await;

    let shared = recorder.0.lock().unwrap();
    assert_eq!(shared.started, 0);
    assert_eq!(shared.errors.len(), 1);
    assert!(matches!(shared.errors[0], FirehoseError::Connection { .. }));
    assert!(shared.errors[0].is_retryable());
}

#[tokio::test]
async fn oversized_frame_terminates_with_protocol_error() {
    let (listener, url) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Binary(vec![0u8; 1024])).await.unwrap();
        // Hold the socket until the client bails
        let _ = ws.next().await;
    });

    let recorder = Recorder::default();
    let mut handle = Nozzle::builder(url)
        .subscription_id("abc")
        .max_frame_bytes(256)
        .build()
        .unwrap()
        .activate(recorder.clone())
        .unwrap();

    handle.terminated().await;
    server.await.unwrap();

    let shared = recorder.0.lock().unwrap();
    assert_eq!(shared.started, 1);
    assert!(shared.events.is_empty());
    assert_eq!(shared.completed, 0);
    assert_eq!(shared.errors.len(), 1);
    assert!(matches!(shared.errors[0], FirehoseError::FrameTooLarge { .. }));
}

#[tokio::test]
async fn malformed_payload_terminates_with_decode_error() {
    let (listener, url) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        // Field header promising length-delimited data that never arrives
        ws.send(Message::Binary(vec![0x0A])).await.unwrap();
        let _ = ws.next().await;
    });

    let recorder = Recorder::default();
    let mut handle = Nozzle::builder(url)
        .subscription_id("abc")
        .build()
        .unwrap()
        .activate(recorder.clone())
        .unwrap();

    handle.terminated().await;
    server.await.unwrap();

    let shared = recorder.0.lock().unwrap();
    assert_eq!(shared.started, 1);
    assert!(shared.events.is_empty());
    assert_eq!(shared.errors.len(), 1);
    assert!(matches!(shared.errors[0], FirehoseError::Decode { .. }));
}

#[tokio::test]
async fn text_frame_terminates_with_unexpected_frame_error() {
    let (listener, url) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text("not an event".to_string())).await.unwrap();
        let _ = ws.next().await;
    });

    let recorder = Recorder::default();
    let mut handle = Nozzle::builder(url)
        .subscription_id("abc")
        .build()
        .unwrap()
        .activate(recorder.clone())
        .unwrap();

    handle.terminated().await;
    server.await.unwrap();

    let shared = recorder.0.lock().unwrap();
    assert_eq!(shared.errors.len(), 1);
    assert!(matches!(shared.errors[0], FirehoseError::UnexpectedFrame { kind: "text" }));
}

#[tokio::test]
async fn idle_stream_times_out() {
    let (listener, url) = bound_listener().await;

    let _server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        // Say nothing and let the client's idle window expire
        let _ = ws.next().await;
    });

    let recorder = Recorder::default();
    let mut handle = Nozzle::builder(url)
        .subscription_id("abc")
        .idle_timeout(Duration::from_millis(200))
        .build()
        .unwrap()
        .activate(recorder.clone())
        .unwrap();

    handle.terminated().await;

    let shared = recorder.0.lock().unwrap();
    assert_eq!(shared.started, 1);
    assert_eq!(shared.errors.len(), 1);
    assert!(matches!(shared.errors[0], FirehoseError::Timeout { .. }));
    assert!(shared.errors[0].is_retryable());
}

#[tokio::test]
async fn close_is_idempotent_and_terminal_fires_once() {
    init_tracing();
    let (listener, url) = bound_listener().await;

    let _server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let encoder = EnvelopeEncoder::new("router");
        ws.send(Message::Binary(metric_bytes(&encoder, "m1"))).await.unwrap();
        // Keep the stream open; the client closes first
        let _ = ws.next().await;
    });

    let recorder = Recorder::default();
    let mut handle = Nozzle::builder(url)
        .subscription_id("abc")
        .build()
        .unwrap()
        .activate(recorder.clone())
        .unwrap();

    // Wait until the stream is live and the first event has landed
    for _ in 0..500 {
        if !recorder.0.lock().unwrap().events.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(handle.is_connected());

    handle.close();
    handle.close();
    handle.terminated().await;

    let shared = recorder.0.lock().unwrap();
    assert_eq!(shared.events.len(), 1);
    assert_eq!(shared.completed, 1);
    assert!(shared.errors.is_empty());
    assert!(!handle.is_connected());
}

#[tokio::test]
async fn caller_supplied_runtime_is_used_and_never_torn_down() {
    let (listener, url) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _ = ws.close(None).await;
    });

    let recorder = Recorder::default();
    let mut handle = Nozzle::builder(url)
        .subscription_id("abc")
        .runtime(tokio::runtime::Handle::current())
        .build()
        .unwrap()
        .activate(recorder.clone())
        .unwrap();

    handle.terminated().await;
    server.await.unwrap();
    handle.close();
    handle.close();

    // The caller's runtime must still run tasks after close()
    let probe = tokio::spawn(async { 7 });
    assert_eq!(probe.await.unwrap(), 7);

    let shared = recorder.0.lock().unwrap();
    assert_eq!(shared.started, 1);
    assert_eq!(shared.completed, 1);
}

#[tokio::test]
async fn event_stream_adapter_yields_envelopes_in_order() {
    let (listener, url) = bound_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let encoder = EnvelopeEncoder::new("router");
        ws.send(Message::Binary(metric_bytes(&encoder, "a"))).await.unwrap();
        ws.send(Message::Binary(metric_bytes(&encoder, "b"))).await.unwrap();
        let _ = ws.close(None).await;
    });

    let (sink, mut events) = event_stream();
    let _handle = Nozzle::builder(url)
        .subscription_id("abc")
        .build()
        .unwrap()
        .activate(sink)
        .unwrap();

    let mut names = Vec::new();
    while let Some(envelope) = events.next().await {
        names.push(envelope.unwrap().value_metric.unwrap().name);
    }
    assert!(events.has_started());
    assert_eq!(names, ["a", "b"]);
    server.await.unwrap();
}
