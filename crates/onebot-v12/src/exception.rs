//! v12 error taxonomy, including the retcode-prefix classification.
//!
//! Grounded in `tests/v12/test_v12_api.py` (`BadRequest`,
//! `ActionFailedWithRetcode`) and the retcode ranges spelled out for the
//! result-handling step of the call dispatcher: `10xxx` request errors,
//! `20xxx` handler errors, `31`/`32`/`33`/`34`/`35`/`36` execution
//! subfamilies, `6xxxx`-`9xxxx` extended/implementation-defined.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("transport error: {0}")]
    Network(String),
    #[error("timed out waiting for a response to action {action}")]
    Timeout { action: String },
    #[error("no transport available to call this bot")]
    ApiNotAvailable,
    #[error("response envelope is missing required field(s): {0}")]
    ActionMissingField(String),
    #[error(transparent)]
    ActionFailed(#[from] ActionFailedWithRetcode),
}

/// A failed action response, classified by the family its retcode falls
/// into. `retcode`/`message`/`data` are always the raw values from the
/// response so a caller can recover full detail regardless of class.
#[derive(Debug, Error)]
#[error("action failed ({class:?}, retcode {retcode}): {message}")]
pub struct ActionFailedWithRetcode {
    pub class: RetcodeClass,
    pub retcode: i64,
    pub message: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetcodeClass {
    /// `1xxxx` — malformed or unsupported request.
    BadRequest,
    /// `2xxxx` — the handler itself failed.
    HandlerError,
    /// `31xxx` — storage/database failure.
    Database,
    /// `32xxx` — filesystem failure.
    Filesystem,
    /// `33xxx` — network failure on the platform side.
    PlatformNetwork,
    /// `34xxx` — platform rejected the action.
    Platform,
    /// `35xxx` — logic error (e.g. permission, not found).
    Logic,
    /// `36xxx` — rate limited / overloaded ("I'm tired").
    Tired,
    /// `6xxxx`-`9xxxx` — implementation-defined extension.
    Extended,
    /// Anything else, including retcodes `>= 100000`.
    Generic,
}

/// Classifies a failed action response into [`ActionFailedWithRetcode`]
/// by the retcode's zero-padded 5-digit prefix.
pub fn classify_retcode(retcode: i64, message: String, data: serde_json::Value) -> ActionFailedWithRetcode {
    let class = if !(0..100_000).contains(&retcode) {
        RetcodeClass::Generic
    } else {
        let padded = format!("{retcode:05}");
        let first_two = &padded[0..2];
        let first = padded.as_bytes()[0];
        match first_two {
            "10" => RetcodeClass::BadRequest,
            "20" => RetcodeClass::HandlerError,
            "31" => RetcodeClass::Database,
            "32" => RetcodeClass::Filesystem,
            "33" => RetcodeClass::PlatformNetwork,
            "34" => RetcodeClass::Platform,
            "35" => RetcodeClass::Logic,
            "36" => RetcodeClass::Tired,
            _ if (b'6'..=b'9').contains(&first) => RetcodeClass::Extended,
            _ => RetcodeClass::Generic,
        }
    };
    ActionFailedWithRetcode { class, retcode, message, data }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_bad_request() {
        let err = classify_retcode(10001, "bad".into(), serde_json::Value::Null);
        assert_eq!(err.class, RetcodeClass::BadRequest);
    }

    #[test]
    fn classifies_extended_range() {
        let err = classify_retcode(61525, "custom".into(), serde_json::Value::Null);
        assert_eq!(err.class, RetcodeClass::Extended);
    }

    #[test]
    fn retcodes_at_or_above_100000_are_generic() {
        let err = classify_retcode(100000, "oops".into(), serde_json::Value::Null);
        assert_eq!(err.class, RetcodeClass::Generic);
    }

    #[test]
    fn classifies_each_execution_subfamily() {
        assert_eq!(classify_retcode(31000, String::new(), serde_json::Value::Null).class, RetcodeClass::Database);
        assert_eq!(classify_retcode(32000, String::new(), serde_json::Value::Null).class, RetcodeClass::Filesystem);
        assert_eq!(classify_retcode(33000, String::new(), serde_json::Value::Null).class, RetcodeClass::PlatformNetwork);
        assert_eq!(classify_retcode(34000, String::new(), serde_json::Value::Null).class, RetcodeClass::Platform);
        assert_eq!(classify_retcode(35000, String::new(), serde_json::Value::Null).class, RetcodeClass::Logic);
        assert_eq!(classify_retcode(36000, String::new(), serde_json::Value::Null).class, RetcodeClass::Tired);
    }
}
