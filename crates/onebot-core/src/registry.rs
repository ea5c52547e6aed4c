//! Cross-protocol bot identity registry.
//!
//! v11 and v12 adapters each keep their own connection bookkeeping, but a
//! `self_id` is meaningful across both at once (a host can run both
//! protocol versions against the same underlying bot implementation). This
//! is the one place that coordination has to happen, so it lives in the
//! shared crate rather than being duplicated in each protocol module.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;

/// Claims and releases bot identities so at most one connection, across
/// any protocol version, is registered as a given `self_id` at a time.
#[async_trait::async_trait]
pub trait BotIdentityRegistry: Send + Sync {
    /// Attempts to claim `self_id`. Returns `false` if it's already held.
    async fn try_claim(&self, self_id: &str) -> bool;
    async fn release(&self, self_id: &str);
}

#[derive(Default)]
pub struct SharedBotIdentityRegistry {
    claimed: RwLock<HashSet<String>>,
}

impl SharedBotIdentityRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait::async_trait]
impl BotIdentityRegistry for SharedBotIdentityRegistry {
    async fn try_claim(&self, self_id: &str) -> bool {
        self.claimed.write().await.insert(self_id.to_string())
    }

    async fn release(&self, self_id: &str) {
        self.claimed.write().await.remove(self_id);
    }
}
