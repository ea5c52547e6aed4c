//! The connection layer and call dispatcher.
//!
//! Grounded in `v11/adapter.py` (`_handle_http`, `_handle_ws`,
//! `_forward_ws`, `_call_api`) for the protocol logic, and in the
//! teacher's `services/server/src/ws_forwarder.rs` /
//! `services/forwarder/src/uplink.rs` for the Rust shape of it: an axum
//! handler for the inbound side, a `tokio-tungstenite` client with a
//! reconnect loop for the outbound side.

use std::collections::HashMap;
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

use onebot_core::{BotIdentityRegistry, Collator, ResultStore};

use crate::bot::{apply_reply, extract_reply_target, finish_group_pipeline, finish_private_pipeline};
use crate::config::Config;
use crate::event::{build_collator, classify_and_parse, AnyEvent, SchemaKind};
use crate::exception::AdapterError;
use crate::signature::check_signature;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Clone)]
enum BotHandle {
    Ws(mpsc::UnboundedSender<String>),
    Http { client: reqwest::Client, root: String },
}

/// Shared adapter state: bot registry, event schema registry, result
/// store, and a channel the host drains to receive classified events.
pub struct AdapterState {
    pub config: Config,
    pub nicknames: Vec<String>,
    collator: Collator<SchemaKind>,
    store: ResultStore,
    bots: RwLock<HashMap<i64, BotHandle>>,
    events: mpsc::UnboundedSender<AnyEvent>,
    http_client: reqwest::Client,
    identity: Option<Arc<dyn BotIdentityRegistry>>,
}

impl AdapterState {
    pub fn new(config: Config, nicknames: Vec<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<AnyEvent>) {
        Self::with_identity_registry(config, nicknames, None)
    }

    /// Like [`new`](Self::new), but shares a [`BotIdentityRegistry`] with
    /// other protocol-version adapters so the same `self_id` can't be
    /// claimed twice across them at once.
    pub fn with_identity_registry(
        config: Config,
        nicknames: Vec<String>,
        identity: Option<Arc<dyn BotIdentityRegistry>>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<AnyEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Self {
            config,
            nicknames,
            collator: build_collator(),
            store: ResultStore::new(),
            bots: RwLock::new(HashMap::new()),
            events: tx,
            http_client: reqwest::Client::new(),
            identity,
        });
        (state, rx)
    }

    pub async fn is_connected(&self, self_id: i64) -> bool {
        self.bots.read().await.contains_key(&self_id)
    }

    /// Claims `self_id` (if a shared identity registry is configured) and
    /// registers its WS sender. Returns `false` if the id is already held
    /// by another connection, in which case the caller must refuse.
    async fn register_ws(&self, self_id: i64, sender: mpsc::UnboundedSender<String>) -> bool {
        if let Some(identity) = &self.identity {
            if !identity.try_claim(&self_id.to_string()).await {
                return false;
            }
        }
        self.bots.write().await.insert(self_id, BotHandle::Ws(sender));
        true
    }

    async fn register_http(&self, self_id: i64) {
        if self.bots.read().await.contains_key(&self_id) {
            return;
        }
        if let Some(root) = self.config.onebot_api_roots.get(&self_id.to_string()) {
            if let Some(identity) = &self.identity {
                if !identity.try_claim(&self_id.to_string()).await {
                    return;
                }
            }
            self.bots.write().await.insert(
                self_id,
                BotHandle::Http { client: self.http_client.clone(), root: root.clone() },
            );
        }
    }

    async fn unregister(&self, self_id: i64) {
        self.bots.write().await.remove(&self_id);
        if let Some(identity) = &self.identity {
            identity.release(&self_id.to_string()).await;
        }
    }

    fn dispatch(&self, event: AnyEvent) {
        // Host work is independent of further frame receipt; a send
        // failure just means nobody is listening for events anymore.
        let _ = self.events.send(event);
    }
}

/// Builds the v11 axum sub-router: three HTTP POST paths and three
/// WebSocket upgrade paths, all aliases of the same two handlers.
pub fn router(state: Arc<AdapterState>) -> Router {
    Router::new()
        .route("/onebot/v11/", post(http_webhook).get(ws_upgrade))
        .route("/onebot/v11/http", post(http_webhook))
        .route("/onebot/v11/http/", post(http_webhook))
        .route("/onebot/v11/ws", get(ws_upgrade))
        .route("/onebot/v11/ws/", get(ws_upgrade))
        .with_state(state)
}

fn self_id_header(headers: &HeaderMap) -> Option<i64> {
    headers.get("X-Self-ID")?.to_str().ok()?.parse().ok()
}

fn bearer_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers.get("Authorization")?.to_str().ok()
}

async fn http_webhook(
    State(state): State<Arc<AdapterState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let Some(self_id) = self_id_header(&headers) else {
        return (StatusCode::BAD_REQUEST, "missing X-Self-ID").into_response();
    };

    if let Some(secret) = state.config.onebot_secret.as_deref() {
        let Some(sig) = headers.get("X-Signature").and_then(|v| v.to_str().ok()) else {
            return (StatusCode::UNAUTHORIZED, "missing X-Signature").into_response();
        };
        if !check_signature(secret, &body, sig) {
            return (StatusCode::FORBIDDEN, "signature mismatch").into_response();
        }
    }

    if let Some(token) = state.config.onebot_access_token.as_deref() {
        let presented = onebot_core::resolve_token(bearer_from_headers(&headers), None);
        if presented != Some(token) {
            return (StatusCode::FORBIDDEN, "bad access token").into_response();
        }
    }

    let Ok(payload): Result<Value, _> = serde_json::from_slice(&body) else {
        return (StatusCode::BAD_REQUEST, "invalid json").into_response();
    };

    if payload.get("post_type").is_none() {
        // A response echo delivered over the HTTP callback path.
        state.store.deliver(&payload).await;
        return StatusCode::NO_CONTENT.into_response();
    }

    state.register_http(self_id).await;
    if let Ok(Some(event)) = classify_and_parse(&state.collator, &payload) {
        let event = run_receive_pipeline(&state, event).await;
        state.dispatch(event);
    } else {
        tracing::warn!(self_id, "inbound v11 http event did not match any schema");
    }
    StatusCode::NO_CONTENT.into_response()
}

#[derive(serde::Deserialize)]
struct WsQuery {
    access_token: Option<String>,
}

async fn ws_upgrade(
    State(state): State<Arc<AdapterState>>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(self_id) = self_id_header(&headers) else {
        return (StatusCode::BAD_REQUEST, "missing X-Self-ID").into_response();
    };

    if let Some(token) = state.config.onebot_access_token.as_deref() {
        let presented = onebot_core::resolve_token(bearer_from_headers(&headers), query.access_token.as_deref());
        if presented != Some(token) {
            return (StatusCode::FORBIDDEN, "bad access token").into_response();
        }
    }

    if state.is_connected(self_id).await {
        return ws.on_upgrade(move |socket| close_duplicate(socket)).into_response();
    }

    ws.on_upgrade(move |socket| handle_inbound_ws(socket, state, self_id)).into_response()
}

async fn close_duplicate(mut socket: WebSocket) {
    let _ = socket
        .send(WsMessage::Close(Some(axum::extract::ws::CloseFrame {
            code: 1008,
            reason: "Duplicate X-Self-ID".into(),
        })))
        .await;
}

async fn handle_inbound_ws(socket: WebSocket, state: Arc<AdapterState>, self_id: i64) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    if !state.register_ws(self_id, tx).await {
        let _ = sink
            .send(WsMessage::Close(Some(axum::extract::ws::CloseFrame {
                code: 1000,
                reason: "self_id already claimed by another connection".into(),
            })))
            .await;
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.send(WsMessage::Close(None)).await;
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            WsMessage::Text(text) => handle_inbound_frame(&state, &text).await,
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    state.unregister(self_id).await;
    tracing::debug!(self_id, "v11 inbound websocket closed");
}

async fn handle_inbound_frame(state: &Arc<AdapterState>, text: &str) {
    let Ok(payload) = serde_json::from_str::<Value>(text) else {
        tracing::warn!("dropping malformed v11 ws frame");
        return;
    };
    if payload.get("post_type").is_none() {
        state.store.deliver(&payload).await;
        return;
    }
    match classify_and_parse(&state.collator, &payload) {
        Ok(Some(event)) => {
            let event = run_receive_pipeline(state, event).await;
            state.dispatch(event);
        }
        Ok(None) => tracing::warn!("inbound v11 ws event did not match any schema"),
        Err(err) => tracing::warn!(?err, "inbound v11 ws event key was malformed"),
    }
}

/// Starts one reconnect-supervised outbound (reverse) WS client per
/// configured URL. Returns immediately; tasks run until `state` is
/// dropped or the returned handles are aborted.
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
            tracing::warn!(url, error = %err, "v11 reverse ws session ended");
        }
        tokio::time::sleep(RECONNECT_INTERVAL).await;
    }
}

async fn run_outbound_session(state: &Arc<AdapterState>, url: &str) -> Result<(), AdapterError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| AdapterError::Network(e.to_string()))?;
    if let Some(token) = state.config.onebot_access_token.as_deref() {
        let value = format!("Bearer {token}")
            .parse()
            .map_err(|_| AdapterError::Network("invalid access token header value".into()))?;
        request.headers_mut().insert("Authorization", value);
    }

    let (ws_stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| AdapterError::Network(e.to_string()))?;
    let (mut sink, mut stream) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut self_id: Option<i64> = None;

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(TungsteniteMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        let msg = msg.map_err(|e| AdapterError::Network(e.to_string()))?;
        let TungsteniteMessage::Text(text) = msg else { continue };
        let Ok(payload) = serde_json::from_str::<Value>(&text) else { continue };

        if payload.get("post_type").is_none() {
            state.store.deliver(&payload).await;
            continue;
        }

        if self_id.is_none() {
            if let Some(sid) = learn_self_id(&payload) {
                if !state.register_ws(sid, tx.clone()).await {
                    tracing::warn!(self_id = sid, "reverse ws self_id already claimed elsewhere");
                    break;
                }
                self_id = Some(sid);
            }
        }

        if let Ok(Some(event)) = classify_and_parse(&state.collator, &payload) {
            let event = run_receive_pipeline(state, event).await;
            state.dispatch(event);
        }
    }

    writer.abort();
    if let Some(sid) = self_id {
        state.unregister(sid).await;
    }
    Ok(())
}

/// Runs the full inbound receive pipeline over a message event before it
/// reaches the host: reply resolution (a round trip through `get_msg`),
/// adjacent-text merging, and at-me / nickname detection. Non-message
/// events pass through untouched.
async fn run_receive_pipeline(state: &Arc<AdapterState>, event: AnyEvent) -> AnyEvent {
    match event {
        AnyEvent::PrivateMessage(mut e) => {
            if let Some(id) = extract_reply_target(&mut e) {
                if let Some(reply) = fetch_reply(state, e.base.self_id, &id).await {
                    apply_reply(&mut e, reply);
                }
            }
            e.message.reduce();
            finish_private_pipeline(&mut e, &state.nicknames);
            AnyEvent::PrivateMessage(e)
        }
        AnyEvent::GroupMessage(mut e) => {
            if let Some(id) = extract_reply_target(&mut e) {
                if let Some(reply) = fetch_reply(state, e.base.self_id, &id).await {
                    apply_reply(&mut e, reply);
                }
            }
            e.message.reduce();
            finish_group_pipeline(&mut e, &state.nicknames);
            AnyEvent::GroupMessage(e)
        }
        other => other,
    }
}

/// Fetches the message a `reply` segment pointed at via `get_msg`, for
/// [`apply_reply`] to attach. Any failure (no transport, timeout,
/// malformed response) just means the reply isn't resolved.
async fn fetch_reply(state: &Arc<AdapterState>, self_id: i64, message_id: &str) -> Option<crate::event::Reply> {
    let value = message_id
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(message_id.to_string()));
    match call_api(state, self_id, "get_msg", json!({"message_id": value}), None).await {
        Ok(data) => serde_json::from_value(data).ok(),
        Err(err) => {
            tracing::warn!(error = %err, "failed to fetch reply target message");
            None
        }
    }
}

/// A `meta_event`/`lifecycle`/`connect` frame is the only way a reverse
/// connection learns which bot it belongs to.
fn learn_self_id(payload: &Value) -> Option<i64> {
    if payload.get("post_type").and_then(Value::as_str) != Some("meta_event") {
        return None;
    }
    if payload.get("meta_event_type").and_then(Value::as_str) != Some("lifecycle") {
        return None;
    }
    if payload.get("sub_type").and_then(Value::as_str) != Some("connect") {
        return None;
    }
    payload.get("self_id").and_then(Value::as_i64)
}

/// Invokes `action` on the given bot, preferring a live WS connection and
/// falling back to its configured HTTP API root.
pub async fn call_api(
    state: &Arc<AdapterState>,
    self_id: i64,
    action: &str,
    params: Value,
    timeout: Option<Duration>,
) -> Result<Value, AdapterError> {
    let handle = state.bots.read().await.get(&self_id).cloned();
    match handle {
        Some(BotHandle::Ws(sender)) => call_via_ws(state, sender, action, params, timeout).await,
        Some(BotHandle::Http { client, root }) => call_via_http(&client, &root, action, &params).await,
        None => Err(AdapterError::ApiNotAvailable),
    }
}

async fn call_via_ws(
    state: &Arc<AdapterState>,
    sender: mpsc::UnboundedSender<String>,
    action: &str,
    params: Value,
    timeout: Option<Duration>,
) -> Result<Value, AdapterError> {
    let seq = state.store.next_seq();
    let echo = seq.to_string();
    let frame = json!({"action": action, "params": params, "echo": echo}).to_string();
    sender
        .send(frame)
        .map_err(|_| AdapterError::Network("websocket sender closed".into()))?;

    let result = state
        .store
        .fetch(seq, timeout.unwrap_or(DEFAULT_CALL_TIMEOUT))
        .await
        .map_err(|_| AdapterError::Timeout { action: action.to_string() })?;
    extract_v11_result(result)
}

async fn call_via_http(
    client: &reqwest::Client,
    root: &str,
    action: &str,
    params: &Value,
) -> Result<Value, AdapterError> {
    let url = format!("{}/{}", root.trim_end_matches('/'), action);
    let response = client
        .post(&url)
        .json(params)
        .send()
        .await
        .map_err(|e| AdapterError::Network(e.to_string()))?;
    if !response.status().is_success() {
        return Err(AdapterError::Network(format!("http status {}", response.status())));
    }
    let body = response.bytes().await.map_err(|e| AdapterError::Network(e.to_string()))?;
    if body.is_empty() {
        return Err(AdapterError::Network("empty response body".into()));
    }
    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| AdapterError::Network(format!("invalid json response: {e}")))?;
    extract_v11_result(value)
}

fn extract_v11_result(value: Value) -> Result<Value, AdapterError> {
    if value.get("status").and_then(Value::as_str) == Some("failed") {
        let retcode = value.get("retcode").and_then(Value::as_i64).unwrap_or(-1);
        return Err(AdapterError::ActionFailed { retcode, info: value });
    }
    Ok(value.get("data").cloned().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learn_self_id_requires_lifecycle_connect() {
        let payload = json!({
            "post_type": "meta_event", "meta_event_type": "lifecycle",
            "sub_type": "connect", "self_id": 42, "time": 1
        });
        assert_eq!(learn_self_id(&payload), Some(42));

        let heartbeat = json!({"post_type": "meta_event", "meta_event_type": "heartbeat"});
        assert_eq!(learn_self_id(&heartbeat), None);
    }

    #[test]
    fn extract_v11_result_maps_failed_status() {
        let value = json!({"status": "failed", "retcode": 100, "data": null});
        let err = extract_v11_result(value).unwrap_err();
        assert!(matches!(err, AdapterError::ActionFailed { retcode: 100, .. }));
    }

    #[test]
    fn extract_v11_result_returns_data_on_success() {
        let value = json!({"status": "ok", "retcode": 0, "data": {"message_id": 5}});
        let data = extract_v11_result(value).unwrap();
        assert_eq!(data["message_id"], 5);
    }
}
