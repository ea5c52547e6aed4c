//! HTTP webhook auth/shape checks, grounded in `tests/v11/test_v11_connection.py`.

use onebot_v11::{AdapterState, Config};

async fn make_server(config: Config) -> std::net::SocketAddr {
    let (state, _events) = AdapterState::new(config, Vec::new());
    let router = onebot_v11::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn missing_self_id_header_is_rejected() {
    let addr = make_server(Config::default()).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/onebot/v11/"))
        .json(&serde_json::json!({"post_type": "message"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mismatched_signature_is_forbidden() {
    let config = Config { onebot_secret: Some("topsecret".into()), ..Default::default() };
    let addr = make_server(config).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/onebot/v11/"))
        .header("X-Self-ID", "1")
        .header("X-Signature", "sha1=0000000000000000000000000000000000000000")
        .json(&serde_json::json!({"post_type": "message"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn well_formed_private_message_is_accepted() {
    let addr = make_server(Config::default()).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/onebot/v11/"))
        .header("X-Self-ID", "1")
        .json(&serde_json::json!({
            "time": 1, "self_id": 1, "post_type": "message", "message_type": "private",
            "sub_type": "friend", "message_id": 1, "user_id": 10, "message": [],
            "raw_message": "", "font": 0
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);
}
