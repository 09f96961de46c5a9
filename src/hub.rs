//! State Sync Hub (C5): per-client WebSocket sessions, action dispatch, and diff/
//! compress transport, all mediated through the Pub/Sub Bridge (C6) so a single
//! deployment and a multi-process fleet share one broadcast code path.
//!
//! Per §4.5 the hub itself is one logical serializer: a single task owns the session
//! set and process-wide server state, consuming `Register`/`Unregister`/`ApplyPatch`
//! commands from one channel in arrival order. Per-client reader and writer tasks run
//! concurrently with that serializer and with each other — only the shared state
//! mutations are funneled through it. `ApplyPatch` commands arrive exclusively from this
//! hub's own subscription to its pub/sub channel, so a "local" broadcast (one process)
//! and a cross-process broadcast take the identical path once published, per §4.6.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use dashmap::DashMap;
use flate2::Compression;
use flate2::write::GzEncoder;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

use crate::admission::AdmissionControl;
use crate::config::HubConfig;
use crate::error::AdmissionError;
use crate::pubsub::PubSub;
use crate::responder::Responder;
use crate::signals::{self, Signal};
use crate::types::{Request, Response};
use crate::ws::WavefrontWs;

/// A client session's unique, cryptographically random identity. Generated with
/// `Uuid::new_v4` (122 bits of CSPRNG output plus version/variant bits) so ids are
/// unguessable across reconnects, never a counter, per §9.
pub type SessionId = Uuid;

/// Per-session state machine, per §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Admitted,
    Open,
    Closing,
    Closed,
}

/// One live WebSocket client (C5's `ClientSession`).
pub struct ClientSession {
    pub id: SessionId,
    pub created_at: Instant,
    pub remote_addr: SocketAddr,
    last_seen: Mutex<Instant>,
    local_state: Mutex<HashMap<String, Value>>,
    last_sent_state: Mutex<HashMap<String, Value>>,
    send_tx: mpsc::Sender<Bytes>,
    lifecycle: Mutex<SessionState>,
    close: Arc<Notify>,
}

impl ClientSession {
    fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Current lifecycle state: `Connecting`/`Admitted` happen before this struct
    /// exists (admission runs against the raw HTTP request), so sessions start at
    /// `Admitted` and move to `Open` once their initial snapshot write completes.
    pub fn state(&self) -> SessionState {
        *self.lifecycle.lock()
    }

    fn set_open(&self) {
        *self.lifecycle.lock() = SessionState::Open;
    }

    fn set_closing(&self) {
        *self.lifecycle.lock() = SessionState::Closing;
    }

    fn set_closed(&self) {
        *self.lifecycle.lock() = SessionState::Closed;
    }

    /// Reads a session-local (not process-wide) state value, for "local" action
    /// handlers whose effect is scoped to this one client.
    pub fn get_local(&self, key: &str) -> Option<Value> {
        self.local_state.lock().get(key).cloned()
    }

    /// Writes a session-local state value.
    pub fn set_local(&self, key: impl Into<String>, value: Value) {
        self.local_state.lock().insert(key.into(), value);
    }

    /// Snapshot of `lastSentState`, the mirror of what this client has actually been
    /// sent — exposed for tests verifying §8's "concatenation of delivered patches"
    /// property.
    pub fn last_sent_state(&self) -> HashMap<String, Value> {
        self.last_sent_state.lock().clone()
    }
}

/// Outcome of an action handler: either the effect was entirely session-scoped
/// (`Local`), or it mutated process state and the returned patch must be broadcast to
/// every session via C6 (`Synced`).
pub enum ActionOutcome {
    Local,
    Synced(HashMap<String, Value>),
}

/// A registered action handler `(session, payload) -> optional-broadcast`. The error
/// string becomes the `ACTION_FAILED` detail logged server-side, never echoed verbatim
/// to other clients.
pub type ActionHandler = Arc<
    dyn Fn(Arc<ClientSession>, Value) -> BoxFuture<'static, Result<ActionOutcome, String>>
        + Send
        + Sync,
>;

#[derive(Debug, Clone, Deserialize)]
struct ActionPayload {
    name: String,
    payload: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum OutboundEnvelope {
    Snapshot {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        data: Value,
    },
    Patch {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        data: Value,
    },
    Ack {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        data: Value,
    },
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

/// Encodes an outbound envelope, wrapping it in a `CompressedEnvelope` when
/// compression is enabled and the payload exceeds the configured threshold.
fn encode_outbound(envelope: &OutboundEnvelope, config: &HubConfig) -> Bytes {
    let plain = serde_json::to_vec(envelope).expect("envelope always serializes");
    if config.compression_enabled && plain.len() > config.compression_threshold_bytes {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        use std::io::Write;
        let _ = encoder.write_all(&plain);
        if let Ok(compressed) = encoder.finish() {
            let wrapped = json!({
                "type": "compressed",
                "data": STANDARD.encode(compressed),
                "compressed": true,
            });
            return Bytes::from(serde_json::to_vec(&wrapped).expect("json always serializes"));
        }
    }
    Bytes::from(plain)
}

/// Attempts to enqueue `envelope` on `session`'s bounded send queue. Returns `false`
/// (without blocking) when the queue is full — callers must then treat the session as
/// a slow client and drop it, per §4.5's backpressure rule.
fn deliver(session: &ClientSession, config: &HubConfig, envelope: OutboundEnvelope) -> bool {
    let bytes = encode_outbound(&envelope, config);
    session.send_tx.try_send(bytes).is_ok()
}

enum HubCommand {
    Register(Arc<ClientSession>),
    Unregister(SessionId),
    ApplyPatch(HashMap<String, Value>),
    Inspect(oneshot::Sender<(usize, HashMap<String, Value>)>),
}

struct HubState {
    sessions: HashMap<SessionId, Arc<ClientSession>>,
    server_state: HashMap<String, Value>,
}

async fn run_hub_loop(mut cmd_rx: mpsc::Receiver<HubCommand>, config: HubConfig) {
    let mut state = HubState {
        sessions: HashMap::new(),
        server_state: HashMap::new(),
    };

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            HubCommand::Register(session) => {
                let snapshot = json!(state.server_state);
                if deliver(
                    &session,
                    &config,
                    OutboundEnvelope::Snapshot { id: None, data: snapshot },
                ) {
                    *session.last_sent_state.lock() = state.server_state.clone();
                    session.set_open();
                    let id = session.id;
                    state.sessions.insert(id, session);
                    signals::app_signals()
                        .emit(Signal::new(ids::CLIENT_ADMITTED))
                        .await;
                } else {
                    session.close.notify_one();
                }
            }
            HubCommand::Unregister(id) => {
                if let Some(session) = state.sessions.remove(&id) {
                    session.set_closed();
                }
            }
            HubCommand::ApplyPatch(patch) => {
                for (k, v) in patch.iter() {
                    state.server_state.insert(k.clone(), v.clone());
                }

                let targets: Vec<Arc<ClientSession>> = state.sessions.values().cloned().collect();
                let mut to_drop = Vec::new();

                for session in targets {
                    let delta: HashMap<String, Value> = if config.diff_enabled {
                        let last = session.last_sent_state.lock();
                        state
                            .server_state
                            .iter()
                            .filter(|(k, v)| last.get(*k) != Some(*v))
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect()
                    } else {
                        state.server_state.clone()
                    };

                    if delta.is_empty() {
                        continue;
                    }

                    if deliver(
                        &session,
                        &config,
                        OutboundEnvelope::Patch { id: None, data: json!(delta) },
                    ) {
                        let mut last = session.last_sent_state.lock();
                        for (k, v) in delta {
                            last.insert(k, v);
                        }
                    } else {
                        to_drop.push(session.id);
                        session.close.notify_one();
                        signals::app_signals()
                            .emit(Signal::new(ids::CLIENT_DROPPED))
                            .await;
                    }
                }

                for id in to_drop {
                    if let Some(session) = state.sessions.remove(&id) {
                        session.set_closed();
                    }
                }
            }
            HubCommand::Inspect(reply) => {
                let _ = reply.send((state.sessions.len(), state.server_state.clone()));
            }
        }
    }
}

/// Coordinates WebSocket session admission, dispatch, and broadcast (C5).
pub struct StateSyncHub {
    cmd_tx: mpsc::Sender<HubCommand>,
    pubsub: Arc<dyn PubSub>,
    channel: String,
    actions: Arc<DashMap<String, ActionHandler>>,
    config: HubConfig,
    admission: Arc<AdmissionControl>,
}

impl StateSyncHub {
    /// Builds a hub bound to `pubsub`, spawning its serializer task and the
    /// subscription bridge that turns `pubsub`'s stream into `ApplyPatch` commands.
    pub fn new(config: HubConfig, pubsub: Arc<dyn PubSub>) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(1024);
        let channel = config.channel.clone();
        let admission = AdmissionControl::new(config.admission.clone());

        tokio::spawn(run_hub_loop(cmd_rx, config.clone()));

        {
            let pubsub = pubsub.clone();
            let channel = channel.clone();
            let cmd_tx = cmd_tx.clone();
            tokio::spawn(async move {
                let mut sub = pubsub.subscribe(&channel).await;
                while let Some(bytes) = sub.next().await {
                    if let Ok(patch) = serde_json::from_slice::<HashMap<String, Value>>(&bytes) {
                        if cmd_tx.send(HubCommand::ApplyPatch(patch)).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }

        Arc::new(Self {
            cmd_tx,
            pubsub,
            channel,
            actions: Arc::new(DashMap::new()),
            config,
            admission,
        })
    }

    /// Registers an action handler under `name`, overwriting any prior registration.
    pub fn register_action(&self, name: impl Into<String>, handler: ActionHandler) {
        self.actions.insert(name.into(), handler);
    }

    /// Runs the source-address token bucket admission check for a pending upgrade.
    pub fn admit(&self, addr: SocketAddr) -> Result<(), AdmissionError> {
        self.admission.check(addr.ip())
    }

    /// Publishes a patch to every process's hub via C6. Synced action handlers call
    /// this; so does any external driver of process-wide state.
    pub async fn broadcast(
        &self,
        patch: HashMap<String, Value>,
    ) -> Result<(), crate::error::HubError> {
        let bytes = Bytes::from(
            serde_json::to_vec(&patch)
                .map_err(|e| crate::error::HubError::PubSub(e.to_string()))?,
        );
        self.pubsub.publish(&self.channel, bytes).await
    }

    /// Current session count and a snapshot of process state, for tests and
    /// diagnostics.
    pub async fn inspect(&self) -> (usize, HashMap<String, Value>) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(HubCommand::Inspect(tx)).await.is_err() {
            return (0, HashMap::new());
        }
        rx.await.unwrap_or((0, HashMap::new()))
    }

    /// HTTP handler for the WebSocket endpoint (default `/<runtime-prefix>/ws`):
    /// admits by source address, then upgrades and hands the resulting stream to
    /// [`StateSyncHub::handle_connection`].
    pub fn upgrade(self: Arc<Self>, req: Request) -> Response {
        let remote_addr = req
            .extensions()
            .get::<SocketAddr>()
            .copied()
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));

        if let Err(err) = self.admit(remote_addr) {
            return err.into_response();
        }

        let hub = self.clone();
        WavefrontWs::new(req, move |ws| async move {
            hub.handle_connection(ws, remote_addr).await;
        })
        .into_response()
    }

    /// Drives one established WebSocket connection end to end: registers the session,
    /// spawns its reader/writer/heartbeat tasks, and unregisters on close.
    pub async fn handle_connection(
        self: Arc<Self>,
        ws: WebSocketStream<TokioIo<Upgraded>>,
        remote_addr: SocketAddr,
    ) {
        let (sink, stream) = ws.split();
        let (send_tx, send_rx) = mpsc::channel::<Bytes>(self.config.send_queue_capacity);
        let close = Arc::new(Notify::new());

        let session = Arc::new(ClientSession {
            id: Uuid::new_v4(),
            created_at: Instant::now(),
            remote_addr,
            last_seen: Mutex::new(Instant::now()),
            local_state: Mutex::new(HashMap::new()),
            last_sent_state: Mutex::new(HashMap::new()),
            send_tx,
            lifecycle: Mutex::new(SessionState::Admitted),
            close: close.clone(),
        });

        if self.cmd_tx.send(HubCommand::Register(session.clone())).await.is_err() {
            return;
        }

        let writer = tokio::spawn(writer_loop(sink, send_rx, close));
        let heartbeat = tokio::spawn(heartbeat_loop(self.clone(), session.clone()));

        reader_loop(self.clone(), session.clone(), stream).await;
        session.set_closing();

        heartbeat.abort();
        let _ = self.cmd_tx.send(HubCommand::Unregister(session.id)).await;
        drop(session);
        let _ = writer.await;
    }
}

async fn writer_loop(
    mut sink: futures_util::stream::SplitSink<
        WebSocketStream<TokioIo<Upgraded>>,
        WsMessage,
    >,
    mut send_rx: mpsc::Receiver<Bytes>,
    close: Arc<Notify>,
) {
    loop {
        tokio::select! {
            received = send_rx.recv() => {
                match received {
                    Some(bytes) => {
                        let text = String::from_utf8_lossy(&bytes).into_owned();
                        if sink.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = close.notified() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}

async fn heartbeat_loop(hub: Arc<StateSyncHub>, session: Arc<ClientSession>) {
    let heartbeat = hub.config.admission.heartbeat();
    if heartbeat.is_zero() {
        return;
    }
    let mut tick = tokio::time::interval(heartbeat);
    tick.tick().await;

    loop {
        tick.tick().await;

        if session.idle_for() >= heartbeat * 2 {
            session.close.notify_one();
            let _ = hub.cmd_tx.send(HubCommand::Unregister(session.id)).await;
            break;
        }

        if !deliver(&session, &hub.config, OutboundEnvelope::Ping { id: None }) {
            session.close.notify_one();
            let _ = hub.cmd_tx.send(HubCommand::Unregister(session.id)).await;
            break;
        }
    }
}

async fn reader_loop(
    hub: Arc<StateSyncHub>,
    session: Arc<ClientSession>,
    mut stream: futures_util::stream::SplitStream<WebSocketStream<TokioIo<Upgraded>>>,
) {
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(_) => break,
        };

        match msg {
            WsMessage::Text(text) => {
                session.touch();
                if text.len() > hub.config.admission.max_frame_bytes {
                    send_error(&session, &hub.config, None, "frame exceeds the configured maximum size");
                    continue;
                }
                handle_inbound(&hub, &session, text.as_str()).await;
            }
            WsMessage::Binary(data) => {
                session.touch();
                if data.len() > hub.config.admission.max_frame_bytes {
                    send_error(&session, &hub.config, None, "frame exceeds the configured maximum size");
                }
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) => session.touch(),
            WsMessage::Close(_) => break,
            WsMessage::Frame(_) => {}
        }
    }
}

fn send_error(session: &ClientSession, config: &HubConfig, id: Option<String>, msg: &str) {
    deliver(
        session,
        config,
        OutboundEnvelope::Error { id, data: json!({ "error": msg }) },
    );
}

async fn handle_inbound(hub: &Arc<StateSyncHub>, session: &Arc<ClientSession>, text: &str) {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            send_error(session, &hub.config, None, "malformed json");
            return;
        }
    };

    let tag = value.get("type").and_then(|t| t.as_str()).unwrap_or("");
    let id = value.get("id").and_then(|i| i.as_str()).map(str::to_string);

    match tag {
        "action" => {
            let Some(data) = value.get("data") else {
                send_error(session, &hub.config, id, "missing action data");
                return;
            };
            let payload: ActionPayload = match serde_json::from_value(data.clone()) {
                Ok(p) => p,
                Err(_) => {
                    send_error(session, &hub.config, id, "malformed action payload");
                    return;
                }
            };
            dispatch_action(hub, session, id, payload).await;
        }
        "ping" => {
            deliver(session, &hub.config, OutboundEnvelope::Pong { id });
        }
        "pong" => {}
        other => {
            send_error(session, &hub.config, id, &format!("unknown envelope type: {other}"));
        }
    }
}

async fn dispatch_action(
    hub: &Arc<StateSyncHub>,
    session: &Arc<ClientSession>,
    id: Option<String>,
    payload: ActionPayload,
) {
    let Some(handler) = hub.actions.get(&payload.name).map(|h| h.clone()) else {
        deliver(
            session,
            &hub.config,
            OutboundEnvelope::Error {
                id,
                data: json!({ "error": "no action registered with this name", "code": "ACTION_NOT_FOUND" }),
            },
        );
        return;
    };

    match handler(session.clone(), payload.payload).await {
        Ok(ActionOutcome::Local) => {
            deliver(session, &hub.config, OutboundEnvelope::Ack { id, data: None });
        }
        Ok(ActionOutcome::Synced(patch)) => match hub.broadcast(patch).await {
            Ok(()) => {
                deliver(session, &hub.config, OutboundEnvelope::Ack { id, data: None });
            }
            Err(err) => {
                #[cfg(feature = "wavefront-tracing")]
                tracing::error!(error = %err, "broadcast failed for synced action");
                deliver(
                    session,
                    &hub.config,
                    OutboundEnvelope::Error {
                        id,
                        data: json!({ "error": "broadcast failed", "code": "ACTION_FAILED" }),
                    },
                );
            }
        },
        Err(detail) => {
            #[cfg(feature = "wavefront-tracing")]
            tracing::error!(%detail, "action handler failed");
            deliver(
                session,
                &hub.config,
                OutboundEnvelope::Error {
                    id,
                    data: json!({ "error": "action handler failed", "code": "ACTION_FAILED" }),
                },
            );
            let _ = detail;
        }
    }
}

/// Well-known signal ids emitted by the State Sync Hub, for observability hooks (A1).
pub mod ids {
    pub const CLIENT_ADMITTED: &str = "hub.client_admitted";
    pub const CLIENT_DROPPED: &str = "hub.client_dropped";
    pub const CLIENT_BACKPRESSURED: &str = "hub.client_backpressured";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::InMemoryPubSub;

    fn test_session(capacity: usize) -> (Arc<ClientSession>, mpsc::Receiver<Bytes>) {
        let (send_tx, send_rx) = mpsc::channel(capacity);
        let session = Arc::new(ClientSession {
            id: Uuid::new_v4(),
            created_at: Instant::now(),
            remote_addr: SocketAddr::from(([127, 0, 0, 1], 1234)),
            last_seen: Mutex::new(Instant::now()),
            local_state: Mutex::new(HashMap::new()),
            last_sent_state: Mutex::new(HashMap::new()),
            send_tx,
            lifecycle: Mutex::new(SessionState::Admitted),
            close: Arc::new(Notify::new()),
        });
        (session, send_rx)
    }

    #[tokio::test]
    async fn register_sends_initial_snapshot_and_opens_session() {
        let hub = StateSyncHub::new(HubConfig::default(), InMemoryPubSub::new());
        let (session, mut rx) = test_session(8);
        hub.cmd_tx
            .send(HubCommand::Register(session.clone()))
            .await
            .unwrap();

        let bytes = rx.recv().await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "snapshot");

        // allow the hub loop to process and flip the session to Open.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn broadcast_delivers_patch_to_registered_sessions() {
        let hub = StateSyncHub::new(HubConfig::default(), InMemoryPubSub::new());
        let (s1, mut rx1) = test_session(8);
        let (s2, mut rx2) = test_session(8);
        hub.cmd_tx.send(HubCommand::Register(s1.clone())).await.unwrap();
        hub.cmd_tx.send(HubCommand::Register(s2.clone())).await.unwrap();
        let _ = rx1.recv().await; // initial snapshot
        let _ = rx2.recv().await;

        let mut patch = HashMap::new();
        patch.insert("counter".to_string(), json!(1));
        hub.broadcast(patch).await.unwrap();

        let p1: Value = serde_json::from_slice(&rx1.recv().await.unwrap()).unwrap();
        let p2: Value = serde_json::from_slice(&rx2.recv().await.unwrap()).unwrap();
        assert_eq!(p1["type"], "patch");
        assert_eq!(p1["data"]["counter"], 1);
        assert_eq!(p2["data"]["counter"], 1);
    }

    #[tokio::test]
    async fn unchanged_keys_are_not_resent() {
        let hub = StateSyncHub::new(HubConfig::default(), InMemoryPubSub::new());
        let (session, mut rx) = test_session(8);
        hub.cmd_tx.send(HubCommand::Register(session.clone())).await.unwrap();
        let _ = rx.recv().await;

        let mut patch = HashMap::new();
        patch.insert("a".to_string(), json!(1));
        hub.broadcast(patch.clone()).await.unwrap();
        let _ = rx.recv().await;

        // Same patch again: nothing changed, so nothing should be resent.
        hub.broadcast(patch).await.unwrap();
        let result = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(result.is_err(), "expected no resend of an unchanged key");
    }

    #[tokio::test]
    async fn slow_client_is_dropped_without_blocking_broadcast() {
        let hub = StateSyncHub::new(HubConfig::default(), InMemoryPubSub::new());
        let (slow, _slow_rx) = test_session(1);
        let (fast, mut fast_rx) = test_session(8);
        hub.cmd_tx.send(HubCommand::Register(slow.clone())).await.unwrap();
        hub.cmd_tx.send(HubCommand::Register(fast.clone())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Fill the slow client's queue (capacity 1, already holds its snapshot) so the
        // next broadcast cannot be enqueued.
        let mut patch = HashMap::new();
        for i in 0..5 {
            patch.insert("k".to_string(), json!(i));
            hub.broadcast(patch.clone()).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        let (count, _) = hub.inspect().await;
        assert_eq!(count, 1, "slow client should have been dropped");
        assert!(fast_rx.recv().await.is_some());
    }

    #[test]
    fn compressed_envelope_round_trips() {
        let config = HubConfig {
            compression_enabled: true,
            compression_threshold_bytes: 4,
            ..HubConfig::default()
        };
        let envelope = OutboundEnvelope::Patch {
            id: None,
            data: json!({ "long_key": "x".repeat(100) }),
        };
        let bytes = encode_outbound(&envelope, &config);
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "compressed");
        assert_eq!(value["compressed"], true);

        let decoded = STANDARD.decode(value["data"].as_str().unwrap()).unwrap();
        let mut gz = flate2::read::GzDecoder::new(&decoded[..]);
        let mut plain = String::new();
        std::io::Read::read_to_string(&mut gz, &mut plain).unwrap();
        let inner: Value = serde_json::from_str(&plain).unwrap();
        assert_eq!(inner["type"], "patch");
    }

    #[test]
    fn small_payloads_are_not_compressed() {
        let config = HubConfig::default();
        let envelope = OutboundEnvelope::Ack { id: None, data: None };
        let bytes = encode_outbound(&envelope, &config);
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "ack");
    }
}
