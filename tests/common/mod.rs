//! Scriptable in-process gateway for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// HandshakeReply
// ============================================================================

/// How the mock answers `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeReply {
    /// `ok: true` with a `hello-ok` payload.
    Accept,
    /// `ok: false` with an `INVALID_REQUEST` error.
    Reject,
    /// `ok: true` with a `hello-fail` payload.
    HelloFail,
    /// No answer at all.
    Ignore,
}

// ============================================================================
// MockGateway
// ============================================================================

/// WebSocket server speaking the gateway protocol.
///
/// Methods understood after the handshake:
///
/// | Method | Reply |
/// |--------|-------|
/// | `ping` | held until the next `echo` |
/// | `echo` | `ok` with `params` as payload; with a held `ping`, then a `between` event and `pong` |
/// | `push` | a `tick` event, then `ok` |
/// | `fail` | `ok: false` with a `NOT_FOUND` error |
/// | `hang` | nothing |
/// | `noise` | a malformed frame and a stray response, then `ok` |
pub struct MockGateway {
    url: String,
    reply: Arc<Mutex<HandshakeReply>>,
    handshake_delay: Arc<Mutex<Duration>>,
    connections: Arc<AtomicUsize>,
    client_closes: Arc<AtomicUsize>,
    handshakes: Arc<AtomicUsize>,
    kick: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl MockGateway {
    /// Binds to a random local port and starts accepting.
    pub async fn start(reply: HandshakeReply) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let reply = Arc::new(Mutex::new(reply));
        let handshake_delay = Arc::new(Mutex::new(Duration::ZERO));
        let connections = Arc::new(AtomicUsize::new(0));
        let client_closes = Arc::new(AtomicUsize::new(0));
        let handshakes = Arc::new(AtomicUsize::new(0));
        let (kick, _) = broadcast::channel(4);

        let task = {
            let reply = Arc::clone(&reply);
            let handshake_delay = Arc::clone(&handshake_delay);
            let connections = Arc::clone(&connections);
            let client_closes = Arc::clone(&client_closes);
            let handshakes = Arc::clone(&handshakes);
            let kick = kick.clone();

            tokio::spawn(async move {
                while let Ok((stream, _addr)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let session = Session {
                        reply: *reply.lock(),
                        handshake_delay: *handshake_delay.lock(),
                        handshakes: Arc::clone(&handshakes),
                        client_closes: Arc::clone(&client_closes),
                        held_ping: None,
                    };
                    tokio::spawn(session.serve(stream, kick.subscribe()));
                }
            })
        };

        Ok(Self {
            url: format!("ws://127.0.0.1:{port}/ws"),
            reply,
            handshake_delay,
            connections,
            client_closes,
            handshakes,
            kick,
            task,
        })
    }

    /// Returns the `ws://` URL to connect to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Changes the handshake answer for future sockets.
    pub fn set_reply(&self, reply: HandshakeReply) {
        *self.reply.lock() = reply;
    }

    /// Delays the `connect` answer on future sockets.
    pub fn set_handshake_delay(&self, delay: Duration) {
        *self.handshake_delay.lock() = delay;
    }

    /// Number of sockets the client closed.
    pub fn client_closes(&self) -> usize {
        self.client_closes.load(Ordering::SeqCst)
    }

    /// Number of accepted TCP connections so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Number of `connect` requests received so far.
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Closes every open socket from the server side.
    pub fn drop_connections(&self) {
        let _ = self.kick.send(());
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.task.abort();
        let _ = self.kick.send(());
    }
}

// ============================================================================
// Session
// ============================================================================

struct Session {
    reply: HandshakeReply,
    handshake_delay: Duration,
    handshakes: Arc<AtomicUsize>,
    client_closes: Arc<AtomicUsize>,
    held_ping: Option<Value>,
}

impl Session {
    async fn serve(mut self, stream: TcpStream, mut kick: broadcast::Receiver<()>) {
        let Ok(ws_stream) = accept_async(stream).await else {
            return;
        };
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                _ = kick.recv() => {
                    let _ = write.close().await;
                    return;
                }

                message = read.next() => {
                    let text = match message {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                            self.client_closes.fetch_add(1, Ordering::SeqCst);
                            return;
                        }
                        Some(Ok(_)) => continue,
                    };

                    let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };

                    if frame["method"] == "connect" && !self.handshake_delay.is_zero() {
                        sleep(self.handshake_delay).await;
                    }

                    for out in self.respond(&frame) {
                        if write.send(Message::Text(out.into())).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }

    fn respond(&mut self, frame: &Value) -> Vec<String> {
        if frame["type"] != "req" {
            return Vec::new();
        }

        let id = frame["id"].clone();
        let params = frame.get("params").cloned().unwrap_or(Value::Null);

        let replies = match frame["method"].as_str().unwrap_or_default() {
            "connect" => {
                self.handshakes.fetch_add(1, Ordering::SeqCst);
                match self.reply {
                    HandshakeReply::Accept => vec![ok(&id, hello_ok())],
                    HandshakeReply::Reject => vec![error(&id, "INVALID_REQUEST", "protocol mismatch")],
                    HandshakeReply::HelloFail => vec![ok(
                        &id,
                        json!({"type": "hello-fail", "reason": "unsupported client"}),
                    )],
                    HandshakeReply::Ignore => Vec::new(),
                }
            }
            "ping" => {
                self.held_ping = Some(id);
                Vec::new()
            }
            "echo" => match self.held_ping.take() {
                Some(ping_id) => vec![
                    ok(&id, params),
                    json!({"type": "event", "event": "between", "payload": {}}),
                    ok(&ping_id, json!("pong")),
                ],
                None => vec![ok(&id, params)],
            },
            "push" => vec![
                json!({"type": "event", "event": "tick", "payload": {"n": 1}, "seq": 1}),
                ok(&id, json!({"pushed": true})),
            ],
            "fail" => vec![error(&id, "NOT_FOUND", "no such session")],
            "hang" => Vec::new(),
            "noise" => {
                return vec![
                    "{not json".to_string(),
                    ok(&json!("nobody-asked"), json!(1)).to_string(),
                    ok(&id, json!("after-noise")).to_string(),
                ];
            }
            other => vec![error(&id, "INVALID_REQUEST", &format!("unknown method {other}"))],
        };

        replies.iter().map(Value::to_string).collect()
    }
}

fn hello_ok() -> Value {
    json!({
        "type": "hello-ok",
        "protocol": 3,
        "server": {"version": "test", "connId": "conn-1"},
        "features": {"methods": ["ping", "echo", "push", "fail", "hang", "noise"], "events": ["tick", "between"]},
        "policy": {"maxPayload": 1_048_576, "maxBufferedBytes": 4_194_304, "tickIntervalMs": 30_000}
    })
}

fn ok(id: &Value, payload: Value) -> Value {
    json!({"type": "res", "id": id, "ok": true, "payload": payload})
}

fn error(id: &Value, code: &str, message: &str) -> Value {
    json!({"type": "res", "id": id, "ok": false, "error": {"code": code, "message": message}})
}

// ============================================================================
// Helpers
// ============================================================================

/// Installs a test subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `condition` every 10 ms until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let step = Duration::from_millis(10);
    let mut waited = Duration::ZERO;

    while waited < limit {
        if condition() {
            return true;
        }
        sleep(step).await;
        waited += step;
    }

    condition()
}
