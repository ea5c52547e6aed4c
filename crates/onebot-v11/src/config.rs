//! Recognized v11 configuration keys.
//!
//! Grounded in `v11/config.py`; loaded from the host application's TOML
//! config the same way the teacher's `forwarder` loads `UplinkConfig` —
//! a plain deserialize target, not diffed against defaults here.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Token inbound HTTP/WS connections must present.
    #[serde(default)]
    pub onebot_access_token: Option<String>,
    /// HMAC-SHA1 secret used to verify the `X-Signature` header on
    /// inbound HTTP webhooks. `None` disables signature checking.
    #[serde(default)]
    pub onebot_secret: Option<String>,
    /// URLs this adapter reverse-connects to as a WS client.
    #[serde(default)]
    pub onebot_ws_urls: HashSet<String>,
    /// HTTP API root per `self_id`, used when no WS connection is live.
    #[serde(default)]
    pub onebot_api_roots: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_from_toml() {
        let toml = r#"
            onebot_access_token = "secret-token"
            onebot_ws_urls = ["ws://127.0.0.1:6700/ws"]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.onebot_access_token.as_deref(), Some("secret-token"));
        assert_eq!(config.onebot_ws_urls.len(), 1);
        assert!(config.onebot_secret.is_none());
    }

    #[test]
    fn all_fields_optional() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.onebot_access_token.is_none());
        assert!(config.onebot_ws_urls.is_empty());
    }
}
