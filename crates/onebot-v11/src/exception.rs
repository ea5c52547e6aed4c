//! v11 error taxonomy.
//!
//! Grounded in `exception.py`. The teacher's `UplinkError` uses a plain
//! enum with manual `Display`/`Error` impls; this taxonomy has enough
//! variants with structured payloads (the raw API response) that
//! `thiserror` pulls its weight here instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    /// The call API action returned a non-zero retcode.
    #[error("action failed with retcode {retcode}: {info}")]
    ActionFailed {
        retcode: i64,
        info: serde_json::Value,
    },
    /// The underlying WS/HTTP transport failed before a result arrived.
    #[error("network error: {0}")]
    Network(String),
    /// Neither a WS connection nor an HTTP callback URL is available for
    /// this bot, so no API call can be dispatched.
    #[error("api not available for this bot")]
    ApiNotAvailable,
    /// A call that timed out waiting for its result.
    #[error("timed out waiting for a response to call {action}")]
    Timeout { action: String },
}

impl AdapterError {
    /// Whether this error should propagate to a user-visible log. Mirrors
    /// `NoLogException`: certain conditions (e.g. disconnect races) are
    /// expected often enough they shouldn't be logged as failures.
    pub fn should_log(&self) -> bool {
        !matches!(self, AdapterError::ApiNotAvailable)
    }
}
