//! The v12 connection layer and call dispatcher.
//!
//! Grounded in `v12/adapter.py` for the protocol steps, generalized per
//! the expanded spec's `StatusUpdate` reconciliation and mandatory
//! `Connect` first frame; grounded in the teacher's
//! `services/server/src/ws_forwarder.rs` / `services/forwarder/src/uplink.rs`
//! for the Rust connection-handling shape.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;

use onebot_core::{flattened_to_nested, BotIdentityRegistry, Collator, ResultStore};

use crate::bot::check_at_me;
use crate::config::Config;
use crate::event::{build_collator, classify_and_parse, AnyEvent, SchemaKind};
use crate::exception::{classify_retcode, AdapterError};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Clone)]
enum Encoding {
    Json,
    MsgPack,
}

#[derive(Clone)]
enum BotHandle {
    Ws { sender: mpsc::UnboundedSender<OutboundFrame>, encoding: Encoding, platform: String },
    Http { client: reqwest::Client, root: String, platform: String },
}

enum OutboundFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Connection context a payload was received over: which socket (for
/// cleanup bookkeeping) and, if it came in over a live WS, the sender to
/// register newly-seen bots against.
#[derive(Clone, Default)]
struct InboundContext {
    socket_id: Option<u64>,
    ws: Option<(mpsc::UnboundedSender<OutboundFrame>, Encoding)>,
}

impl InboundContext {
    fn none() -> Self {
        Self::default()
    }
}

/// One event paired with the `self_id` it's attributed to. Meta events
/// broadcast to every connected bot carry each bot's id in turn.
pub type Dispatched = (Option<String>, AnyEvent);

pub struct AdapterState {
    pub config: Config,
    collator: Collator<SchemaKind>,
    store: ResultStore,
    bots: RwLock<HashMap<String, BotHandle>>,
    /// Which bots were registered via which inbound WS connection, so
    /// closing that socket can disconnect exactly them.
    socket_bots: RwLock<HashMap<u64, HashSet<String>>>,
    next_socket_id: AtomicU64,
    events: mpsc::UnboundedSender<Dispatched>,
    http_client: reqwest::Client,
    identity: Option<Arc<dyn BotIdentityRegistry>>,
}

impl AdapterState {
    pub fn new(config: Config) -> (Arc<Self>, mpsc::UnboundedReceiver<Dispatched>) {
        Self::with_identity_registry(config, None)
    }

    pub fn with_identity_registry(
        config: Config,
        identity: Option<Arc<dyn BotIdentityRegistry>>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Dispatched>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Self {
            config,
            collator: build_collator(),
            store: ResultStore::new(),
            bots: RwLock::new(HashMap::new()),
            socket_bots: RwLock::new(HashMap::new()),
            next_socket_id: AtomicU64::new(0),
            events: tx,
            http_client: reqwest::Client::new(),
            identity,
        });
        (state, rx)
    }

    fn dispatch(&self, self_id: Option<String>, event: AnyEvent) {
        let _ = self.events.send((self_id, event));
    }

    async fn connected_ids(&self) -> HashSet<String> {
        self.bots.read().await.keys().cloned().collect()
    }

    /// Registers `self_id` as callable, either over the given WS context
    /// (when this bot was learned from a live inbound/outbound socket) or,
    /// failing that, over the configured HTTP root. No-op if already
    /// registered. Returns whether the bot ended up registered.
    async fn connect_bot(&self, self_id: &str, platform: &str, ctx: &InboundContext) -> bool {
        if self.bots.read().await.contains_key(self_id) {
            if let (Some(socket_id), Some(_)) = (ctx.socket_id, &ctx.ws) {
                self.socket_bots.write().await.entry(socket_id).or_default().insert(self_id.to_string());
            }
            return true;
        }
        if let Some(identity) = &self.identity {
            if !identity.try_claim(self_id).await {
                return false;
            }
        }
        if let Some((sender, encoding)) = &ctx.ws {
            self.bots.write().await.insert(
                self_id.to_string(),
                BotHandle::Ws { sender: sender.clone(), encoding: encoding.clone(), platform: platform.to_string() },
            );
            if let Some(socket_id) = ctx.socket_id {
                self.socket_bots.write().await.entry(socket_id).or_default().insert(self_id.to_string());
            }
            return true;
        }
        let Some(root) = self.config.onebot_http_urls.get(self_id) else {
            if let Some(identity) = &self.identity {
                identity.release(self_id).await;
            }
            return false;
        };
        self.bots.write().await.insert(
            self_id.to_string(),
            BotHandle::Http { client: self.http_client.clone(), root: root.clone(), platform: platform.to_string() },
        );
        true
    }

    async fn disconnect(&self, self_id: &str) {
        self.bots.write().await.remove(self_id);
        if let Some(identity) = &self.identity {
            identity.release(self_id).await;
        }
    }

    /// Applies a `StatusUpdate`'s `status.bots` against the current bot
    /// set: newly-online bots are connected (over the reporting socket if
    /// any, else HTTP), newly-offline ones are disconnected. Returns the
    /// ids that flipped each way, for event attribution.
    async fn reconcile_status(&self, status: &crate::event::Status, ctx: &InboundContext) -> (Vec<String>, Vec<String>) {
        let mut connected = Vec::new();
        let mut disconnected = Vec::new();

        for bot in &status.bots {
            let id = &bot.self_.user_id;
            let already = self.bots.read().await.contains_key(id);
            if bot.online && !already {
                if self.connect_bot(id, &bot.self_.platform, ctx).await {
                    connected.push(id.clone());
                }
            } else if !bot.online && already {
                self.disconnect(id).await;
                disconnected.push(id.clone());
            }
        }

        (connected, disconnected)
    }

    fn next_socket_id(&self) -> u64 {
        self.next_socket_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn cleanup_socket(&self, socket_id: u64) {
        if let Some(ids) = self.socket_bots.write().await.remove(&socket_id) {
            for id in ids {
                self.disconnect(&id).await;
            }
        }
    }
}

pub fn router(state: Arc<AdapterState>) -> Router {
    Router::new()
        .route("/onebot/v12/", post(http_webhook).get(ws_upgrade))
        .route("/onebot/v12/http", post(http_webhook))
        .route("/onebot/v12/http/", post(http_webhook))
        .route("/onebot/v12/ws", get(ws_upgrade))
        .route("/onebot/v12/ws/", get(ws_upgrade))
        .with_state(state)
}

fn bearer_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers.get("Authorization")?.to_str().ok()
}

fn check_auth(state: &AdapterState, headers: &HeaderMap, query_token: Option<&str>) -> bool {
    match state.config.onebot_access_token.as_deref() {
        None => true,
        Some(expected) => onebot_core::resolve_token(bearer_from_headers(headers), query_token) == Some(expected),
    }
}

#[derive(serde::Deserialize)]
struct WsQuery {
    access_token: Option<String>,
}

async fn http_webhook(State(state): State<Arc<AdapterState>>, headers: HeaderMap, body: axum::body::Bytes) -> impl IntoResponse {
    if headers.get("X-Impl").is_none() {
        return (StatusCode::BAD_REQUEST, "missing X-Impl").into_response();
    }
    if !check_auth(&state, &headers, None) {
        return (StatusCode::FORBIDDEN, "bad access token").into_response();
    }
    let Ok(raw) = serde_json::from_slice::<Value>(&body) else {
        return (StatusCode::BAD_REQUEST, "invalid json").into_response();
    };
    let payload = flattened_to_nested(raw);
    process_inbound(&state, &payload, &InboundContext::none()).await;
    StatusCode::NO_CONTENT.into_response()
}

async fn ws_upgrade(
    State(state): State<Arc<AdapterState>>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if !check_auth(&state, &headers, query.access_token.as_deref()) {
        return (StatusCode::FORBIDDEN, "bad access token").into_response();
    }
    ws.on_upgrade(move |socket| handle_inbound_ws(socket, state)).into_response()
}

async fn handle_inbound_ws(socket: WebSocket, state: Arc<AdapterState>) {
    let (mut sink, mut stream) = socket.split();
    let socket_id = state.next_socket_id();

    let first = loop {
        match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => break Some(text),
            Some(Ok(WsMessage::Binary(_))) | Some(Ok(_)) => continue,
            _ => break None,
        }
    };

    let Some(first) = first else {
        return;
    };
    let Ok(raw) = serde_json::from_str::<Value>(&first) else {
        close_policy(&mut sink, "Missing connect meta event").await;
        return;
    };
    let payload = flattened_to_nested(raw);
    let is_connect = payload.get("type").and_then(Value::as_str) == Some("meta")
        && payload.get("detail_type").and_then(Value::as_str) == Some("connect");
    if !is_connect {
        close_policy(&mut sink, "Missing connect meta event").await;
        return;
    }
    let Ok(Some(event)) = classify_and_parse(&state.collator, &payload) else {
        close_policy(&mut sink, "Missing connect meta event").await;
        return;
    };
    let AnyEvent::Connect(connect) = &event else {
        close_policy(&mut sink, "Missing connect meta event").await;
        return;
    };
    let encoding = if state.config.onebot_use_msgpack.for_impl(&connect.version.impl_) {
        Encoding::MsgPack
    } else {
        Encoding::Json
    };
    let bot_self = connect.base.self_.clone();

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let ctx = InboundContext { socket_id: Some(socket_id), ws: Some((tx, encoding)) };
    if let Some(bot_self) = &bot_self {
        if !state.connect_bot(&bot_self.user_id, &bot_self.platform, &ctx).await {
            let _ = sink
                .send(WsMessage::Close(Some(axum::extract::ws::CloseFrame {
                    code: 1000,
                    reason: "self_id already claimed by another connection".into(),
                })))
                .await;
            return;
        }
    }

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let msg = match frame {
                OutboundFrame::Text(t) => WsMessage::Text(t),
                OutboundFrame::Binary(b) => WsMessage::Binary(b),
            };
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    state.dispatch(bot_self.map(|s| s.user_id), event);

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            WsMessage::Text(text) => {
                if let Ok(raw) = serde_json::from_str::<Value>(&text) {
                    process_inbound(&state, &flattened_to_nested(raw), &ctx).await;
                }
            }
            WsMessage::Binary(bytes) => {
                if let Ok(raw) = rmp_serde::from_slice::<Value>(&bytes) {
                    process_inbound(&state, &flattened_to_nested(raw), &ctx).await;
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    state.cleanup_socket(socket_id).await;
}

async fn close_policy(sink: &mut futures_util::stream::SplitSink<WebSocket, WsMessage>, reason: &'static str) {
    let _ = sink
        .send(WsMessage::Close(Some(axum::extract::ws::CloseFrame { code: 1008, reason: reason.into() })))
        .await;
}

/// Shared classify/reconcile/dispatch logic for both the HTTP webhook and
/// the WS frame loop, after flattened-key expansion has already run.
async fn process_inbound(state: &Arc<AdapterState>, payload: &Value, ctx: &InboundContext) {
    let event = match classify_and_parse(&state.collator, payload) {
        Ok(Some(event)) => event,
        Ok(None) => {
            tracing::warn!("inbound v12 event did not match any schema");
            return;
        }
        Err(err) => {
            tracing::warn!(?err, "inbound v12 event key was malformed");
            return;
        }
    };

    match &event {
        AnyEvent::StatusUpdate(e) => {
            let (connected, disconnected) = state.reconcile_status(&e.status, ctx).await;
            for id in connected {
                state.dispatch(Some(id), event.clone());
            }
            for id in disconnected {
                state.dispatch(Some(id), event.clone());
            }
        }
        _ if event.is_meta() => {
            for id in state.connected_ids().await {
                state.dispatch(Some(id), event.clone());
            }
        }
        _ => {
            let self_record = event.base().self_.clone();
            if let Some(bot_self) = &self_record {
                state.connect_bot(&bot_self.user_id, &bot_self.platform, ctx).await;
            }
            let self_id = self_record.map(|s| s.user_id);
            let event = run_receive_pipeline(event);
            state.dispatch(self_id, event);
        }
    }
}

/// Runs the v12 receive pipeline over a message event before it reaches
/// the host: adjacent-text merging and `to_me` detection via leading or
/// trailing `mention` segments. Non-message events pass through
/// untouched; v12 has no reply or nickname pipeline (see `bot.rs`).
fn run_receive_pipeline(event: AnyEvent) -> AnyEvent {
    match event {
        AnyEvent::PrivateMessage(mut e) => {
            e.message.reduce();
            let to_me = check_at_me(&mut e.message, &e.base.self_id, true);
            e.to_me = Some(to_me);
            AnyEvent::PrivateMessage(e)
        }
        AnyEvent::GroupMessage(mut e) => {
            e.message.reduce();
            let to_me = check_at_me(&mut e.message, &e.base.self_id, false);
            e.to_me = Some(to_me);
            AnyEvent::GroupMessage(e)
        }
        other => other,
    }
}

pub fn spawn_outbound_clients(state: Arc<AdapterState>) -> Vec<tokio::task::JoinHandle<()>> {
    state
        .config
        .onebot_ws_urls
        .clone()
        .into_iter()
        .map(|url| {
            let state = state.clone();
            tokio::spawn(async move { outbound_supervisor(state, url).await })
        })
        .collect()
}

async fn outbound_supervisor(state: Arc<AdapterState>, url: String) {
    loop {
        if let Err(err) = run_outbound_session(&state, &url).await {
            tracing::warn!(url, error = %err, "v12 reverse ws session ended");
        }
        tokio::time::sleep(RECONNECT_INTERVAL).await;
    }
}

async fn run_outbound_session(state: &Arc<AdapterState>, url: &str) -> Result<(), AdapterError> {
    let mut request = url.into_client_request().map_err(|e| AdapterError::Network(e.to_string()))?;
    if let Some(token) = state.config.onebot_access_token.as_deref() {
        let value = format!("Bearer {token}")
            .parse()
            .map_err(|_| AdapterError::Network("invalid access token header value".into()))?;
        request.headers_mut().insert("Authorization", value);
    }

    let (ws_stream, _) = tokio_tungstenite::connect_async(request).await.map_err(|e| AdapterError::Network(e.to_string()))?;
    let (mut sink, mut stream) = ws_stream.split();

    let first = stream.next().await.ok_or_else(|| AdapterError::Network("connection closed before connect frame".into()))?;
    let first = first.map_err(|e| AdapterError::Network(e.to_string()))?;
    let TungsteniteMessage::Text(first_text) = first else {
        return Err(AdapterError::Network("first frame was not text".into()));
    };
    let raw: Value = serde_json::from_str(&first_text).map_err(|e| AdapterError::Network(e.to_string()))?;
    let payload = flattened_to_nested(raw);
    let is_connect = payload.get("type").and_then(Value::as_str) == Some("meta")
        && payload.get("detail_type").and_then(Value::as_str) == Some("connect");
    if !is_connect {
        return Err(AdapterError::Network("missing connect meta event".into()));
    }
    let Ok(Some(event)) = classify_and_parse(&state.collator, &payload) else {
        return Err(AdapterError::Network("missing connect meta event".into()));
    };
    let AnyEvent::Connect(connect) = &event else {
        return Err(AdapterError::Network("missing connect meta event".into()));
    };
    let encoding = if state.config.onebot_use_msgpack.for_impl(&connect.version.impl_) {
        Encoding::MsgPack
    } else {
        Encoding::Json
    };
    let bot_self = connect.base.self_.clone();

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let msg = match frame {
                OutboundFrame::Text(t) => TungsteniteMessage::Text(t),
                OutboundFrame::Binary(b) => TungsteniteMessage::Binary(b),
            };
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let socket_id = state.next_socket_id();
    let ctx = InboundContext { socket_id: Some(socket_id), ws: Some((tx, encoding)) };
    if let Some(bot_self) = &bot_self {
        if !state.connect_bot(&bot_self.user_id, &bot_self.platform, &ctx).await {
            writer.abort();
            return Err(AdapterError::Network("self_id already claimed by another connection".into()));
        }
    }
    state.dispatch(bot_self.map(|s| s.user_id), event);

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                writer.abort();
                state.cleanup_socket(socket_id).await;
                return Err(AdapterError::Network(err.to_string()));
            }
        };
        let raw = match msg {
            TungsteniteMessage::Text(text) => serde_json::from_str::<Value>(&text).ok(),
            TungsteniteMessage::Binary(bytes) => rmp_serde::from_slice::<Value>(&bytes).ok(),
            _ => None,
        };
        let Some(raw) = raw else { continue };
        process_inbound(state, &flattened_to_nested(raw), &ctx).await;
    }

    writer.abort();
    state.cleanup_socket(socket_id).await;
    Ok(())
}

pub async fn call_api(
    state: &Arc<AdapterState>,
    self_id: &str,
    action: &str,
    params: Value,
    timeout: Option<Duration>,
) -> Result<Value, AdapterError> {
    let handle = state.bots.read().await.get(self_id).cloned();
    match handle {
        Some(BotHandle::Ws { sender, encoding, platform }) => {
            call_via_ws(state, sender, encoding, self_id, &platform, action, params, timeout).await
        }
        Some(BotHandle::Http { client, root, .. }) => call_via_http(&client, &root, action, &params).await,
        None => Err(AdapterError::ApiNotAvailable),
    }
}

async fn call_via_ws(
    state: &Arc<AdapterState>,
    sender: mpsc::UnboundedSender<OutboundFrame>,
    encoding: Encoding,
    self_id: &str,
    platform: &str,
    action: &str,
    params: Value,
    timeout: Option<Duration>,
) -> Result<Value, AdapterError> {
    let seq = state.store.next_seq();
    let request = json!({
        "action": action,
        "params": params,
        "self": {"platform": platform, "user_id": self_id},
        "echo": seq.to_string(),
    });
    let frame = match encoding {
        Encoding::Json => OutboundFrame::Text(request.to_string()),
        Encoding::MsgPack => OutboundFrame::Binary(
            rmp_serde::to_vec_named(&request).map_err(|e| AdapterError::Network(e.to_string()))?,
        ),
    };
    sender.send(frame).map_err(|_| AdapterError::Network("websocket sender closed".into()))?;

    let result = state
        .store
        .fetch(seq, timeout.unwrap_or(DEFAULT_CALL_TIMEOUT))
        .await
        .map_err(|_| AdapterError::Timeout { action: action.to_string() })?;
    extract_v12_result(result)
}

async fn call_via_http(client: &reqwest::Client, root: &str, action: &str, params: &Value) -> Result<Value, AdapterError> {
    let body = json!({"action": action, "params": params});
    let response = client.post(root).json(&body).send().await.map_err(|e| AdapterError::Network(e.to_string()))?;
    if !response.status().is_success() {
        return Err(AdapterError::Network(format!("http status {}", response.status())));
    }
    let bytes = response.bytes().await.map_err(|e| AdapterError::Network(e.to_string()))?;
    if bytes.is_empty() {
        return Err(AdapterError::Network("empty response body".into()));
    }
    let value: Value = serde_json::from_slice(&bytes).map_err(|e| AdapterError::Network(format!("invalid json response: {e}")))?;
    extract_v12_result(value)
}

fn extract_v12_result(value: Value) -> Result<Value, AdapterError> {
    let (Some(status), Some(retcode), Some(message), Some(data)) = (
        value.get("status").and_then(Value::as_str),
        value.get("retcode").and_then(Value::as_i64),
        value.get("message").and_then(Value::as_str),
        value.get("data"),
    ) else {
        return Err(AdapterError::ActionMissingField(value.to_string()));
    };
    if status == "failed" {
        return Err(AdapterError::ActionFailed(classify_retcode(retcode, message.to_string(), data.clone())));
    }
    Ok(data.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_v12_result_requires_full_envelope() {
        let value = json!({"status": "ok", "retcode": 0});
        assert!(matches!(extract_v12_result(value), Err(AdapterError::ActionMissingField(_))));
    }

    #[test]
    fn extract_v12_result_requires_data_even_with_other_fields_present() {
        let value = json!({"status": "ok", "retcode": 0, "message": ""});
        assert!(matches!(extract_v12_result(value), Err(AdapterError::ActionMissingField(_))));
    }

    #[test]
    fn extract_v12_result_classifies_failure() {
        let value = json!({"status": "failed", "retcode": 10001, "data": "", "message": "bad"});
        let err = extract_v12_result(value).unwrap_err();
        assert!(matches!(err, AdapterError::ActionFailed(_)));
    }

    #[test]
    fn extract_v12_result_returns_data_on_success() {
        let value = json!({"status": "ok", "retcode": 0, "data": {"x": 1}, "message": ""});
        let data = extract_v12_result(value).unwrap();
        assert_eq!(data["x"], 1);
    }
}
