//! Echo-correlated result store for the WS call dispatcher.
//!
//! A monotonically increasing sequence number is stamped into each
//! outgoing API call as its `echo`; a oneshot waiter is parked under that
//! sequence number until a matching response arrives (or the caller's
//! timeout expires). Mirrors the original `ResultStore`, with the Python
//! `asyncio.Future` replaced by `tokio::sync::oneshot`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{oneshot, RwLock};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no response received for seq {0} within the timeout")]
    Timeout(u64),
    #[error("waiter for seq {0} was dropped before a response arrived")]
    Cancelled(u64),
}

/// Allocates sequence numbers and correlates API call results delivered
/// asynchronously over a WebSocket connection with the call that requested
/// them.
pub struct ResultStore {
    seq: AtomicU64,
    waiters: RwLock<HashMap<u64, oneshot::Sender<serde_json::Value>>>,
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultStore {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            waiters: RwLock::new(HashMap::new()),
        }
    }

    /// Allocates the next sequence number, wrapping on overflow.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a waiter for `seq` and blocks until a result is
    /// [`deliver`](Self::deliver)ed for it or `timeout` elapses. The waiter
    /// is always removed before returning.
    pub async fn fetch(
        &self,
        seq: u64,
        timeout: Duration,
    ) -> Result<serde_json::Value, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.waiters.write().await.insert(seq, tx);
        let outcome = tokio::time::timeout(timeout, rx).await;
        self.waiters.write().await.remove(&seq);
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(StoreError::Cancelled(seq)),
            Err(_) => Err(StoreError::Timeout(seq)),
        }
    }

    /// Looks for an `echo` field in `payload` that decodes to a registered
    /// sequence number, and if one is waiting, fulfils it. Payloads with no
    /// matching waiter (unsolicited events, stale echoes) are ignored.
    pub async fn deliver(&self, payload: &serde_json::Value) {
        let Some(seq) = payload.get("echo").and_then(parse_echo) else {
            return;
        };
        if let Some(tx) = self.waiters.write().await.remove(&seq) {
            let _ = tx.send(payload.clone());
        }
    }

    /// Number of calls still awaiting a response. Exposed for diagnostics.
    pub async fn pending(&self) -> usize {
        self.waiters.read().await.len()
    }
}

fn parse_echo(echo: &serde_json::Value) -> Option<u64> {
    match echo {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_the_matching_waiter() {
        let store = std::sync::Arc::new(ResultStore::new());
        let seq = store.next_seq();
        let fetch = tokio::spawn({
            let store = store.clone();
            async move { store.fetch(seq, Duration::from_secs(1)).await }
        });
        // Give the fetch task a chance to register its waiter.
        tokio::task::yield_now().await;
        store
            .deliver(&serde_json::json!({"echo": seq.to_string(), "retcode": 0}))
            .await;
        let result = fetch.await.unwrap().unwrap();
        assert_eq!(result["retcode"], 0);
    }

    #[tokio::test]
    async fn times_out_with_no_delivery() {
        let store = ResultStore::new();
        let seq = store.next_seq();
        let err = store.fetch(seq, Duration::from_millis(20)).await;
        assert!(matches!(err, Err(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn unsolicited_payload_with_no_waiter_is_ignored() {
        let store = ResultStore::new();
        store
            .deliver(&serde_json::json!({"echo": "999", "retcode": 0}))
            .await;
        assert_eq!(store.pending().await, 0);
    }

    #[tokio::test]
    async fn echo_as_numeric_value_also_resolves() {
        let store = std::sync::Arc::new(ResultStore::new());
        let seq = store.next_seq();
        let fetch = tokio::spawn({
            let store = store.clone();
            async move { store.fetch(seq, Duration::from_secs(1)).await }
        });
        tokio::task::yield_now().await;
        store
            .deliver(&serde_json::json!({"echo": seq, "retcode": 0}))
            .await;
        let result = fetch.await.unwrap().unwrap();
        assert_eq!(result["retcode"], 0);
    }
}
