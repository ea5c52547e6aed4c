//! Top-level gateway configuration: where to bind, and the per-protocol
//! sections handed to each adapter's own `Config`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub v11: onebot_v11::Config,
    #[serde(default)]
    pub v12: onebot_v12::Config,
    /// Nicknames the v11 pipeline treats as equivalent to an @-mention at
    /// the start of a message.
    #[serde(default)]
    pub nicknames: Vec<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
