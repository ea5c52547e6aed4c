//! Wires one `SharedBotIdentityRegistry` into both protocol adapters so a
//! `self_id` claimed on one version's connection is visible to the other.

use std::sync::Arc;

use onebot_core::SharedBotIdentityRegistry;
use tokio::sync::mpsc;

use crate::config::Config;

pub struct Gateway {
    pub v11: Arc<onebot_v11::AdapterState>,
    pub v12: Arc<onebot_v12::AdapterState>,
    pub v11_events: mpsc::UnboundedReceiver<onebot_v11::AnyEvent>,
    pub v12_events: mpsc::UnboundedReceiver<onebot_v12::adapter::Dispatched>,
}

impl Gateway {
    pub fn new(config: Config) -> Self {
        let identity = SharedBotIdentityRegistry::new();
        let (v11, v11_events) =
            onebot_v11::AdapterState::with_identity_registry(config.v11, config.nicknames, Some(identity.clone()));
        let (v12, v12_events) = onebot_v12::AdapterState::with_identity_registry(config.v12, Some(identity));
        Self { v11, v12, v11_events, v12_events }
    }
}
