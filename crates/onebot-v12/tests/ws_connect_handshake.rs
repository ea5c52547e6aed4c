//! v12 WS handshake: first frame must be a `Connect` meta event.

use futures_util::{SinkExt, StreamExt};
use onebot_v12::{AdapterState, Config};
use tokio_tungstenite::tungstenite::Message;

async fn make_server(config: Config) -> std::net::SocketAddr {
    let (state, _events) = AdapterState::new(config);
    let router = onebot_v12::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn non_connect_first_frame_closes_with_policy_violation() {
    let addr = make_server(Config::default()).await;
    let url = format!("ws://{addr}/onebot/v12/ws");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let heartbeat = serde_json::json!({
        "id": "1", "impl": "impl-a", "platform": "qq", "self_id": "1",
        "time": 1.0, "type": "meta", "detail_type": "heartbeat", "interval": 1000
    });
    ws.send(Message::Text(heartbeat.to_string())).await.unwrap();

    let next = ws.next().await.unwrap().unwrap();
    match next {
        Message::Close(Some(frame)) => assert_eq!(frame.code, 1008u16.into()),
        other => panic!("expected a policy-violation close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn connect_first_frame_is_accepted() {
    let addr = make_server(Config::default()).await;
    let url = format!("ws://{addr}/onebot/v12/ws");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let connect = serde_json::json!({
        "id": "1", "impl": "impl-a", "platform": "qq", "self_id": "1",
        "time": 1.0, "type": "meta", "detail_type": "connect",
        "self": {"platform": "qq", "user_id": "1"},
        "version": {"impl": "impl-a", "version": "1.0", "onebot_version": "12"}
    });
    ws.send(Message::Text(connect.to_string())).await.unwrap();

    // The connection stays open; send a heartbeat and expect no close.
    let heartbeat = serde_json::json!({
        "id": "2", "impl": "impl-a", "platform": "qq", "self_id": "1",
        "time": 2.0, "type": "meta", "detail_type": "heartbeat", "interval": 1000
    });
    ws.send(Message::Text(heartbeat.to_string())).await.unwrap();

    let outcome = tokio::time::timeout(std::time::Duration::from_millis(200), ws.next()).await;
    assert!(outcome.is_err(), "connection should remain open after a valid connect frame");
}
