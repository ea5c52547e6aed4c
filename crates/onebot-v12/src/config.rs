//! Recognized v12 configuration keys, grounded in `v12/config.py`.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub onebot_access_token: Option<String>,
    /// URLs this adapter reverse-connects to as a WS client.
    #[serde(default)]
    pub onebot_ws_urls: HashSet<String>,
    /// HTTP API root per `self_id`, used when no WS connection is live.
    #[serde(default)]
    pub onebot_http_urls: HashMap<String, String>,
    /// Whether to encode outgoing frames as MessagePack, globally or per
    /// implementation name.
    #[serde(default)]
    pub onebot_use_msgpack: MsgpackSetting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MsgpackSetting {
    Global(bool),
    PerImpl(HashMap<String, bool>),
}

impl Default for MsgpackSetting {
    fn default() -> Self {
        Self::Global(false)
    }
}

impl MsgpackSetting {
    pub fn for_impl(&self, impl_name: &str) -> bool {
        match self {
            Self::Global(value) => *value,
            Self::PerImpl(map) => map.get(impl_name).copied().unwrap_or(false),
        }
    }
}
