//! The CQ (Coding for Qex) message codec: escaping, parsing a CQ string
//! into segments, and rendering segments back into one.
//!
//! Grounded in the original `v11/utils.py` (`escape`/`unescape`) and
//! `v11/message.py` (`MessageSegment`/`Message`, the `_construct` regex).

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Escapes `&`, `[`, `]` (and `,` when `escape_comma` is set) so the string
/// is safe to embed in a CQ code parameter or as plain text.
pub fn escape(text: &str, escape_comma: bool) -> String {
    let mut out = text.replace('&', "&amp;").replace('[', "&#91;").replace(']', "&#93;");
    if escape_comma {
        out = out.replace(',', "&#44;");
    }
    out
}

/// Reverses [`escape`].
pub fn unescape(text: &str) -> String {
    text.replace("&#44;", ",")
        .replace("&#91;", "[")
        .replace("&#93;", "]")
        .replace("&amp;", "&")
}

static CQ_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[CQ:(?P<type>[a-zA-Z0-9_.-]+)(?P<params>(?:,[a-zA-Z0-9_.-]+=[^,\]]*)*),?\]")
        .expect("static CQ regex is valid")
});

/// One CQ message segment: a type tag plus an untyped parameter bag.
/// `text` segments store their content under the `"text"` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSegment {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub data: HashMap<String, Value>,
}

impl MessageSegment {
    pub fn new(type_: impl Into<String>, data: HashMap<String, Value>) -> Self {
        Self {
            type_: type_.into(),
            data,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new("text", HashMap::from([("text".into(), Value::String(text.into()))]))
    }

    pub fn at(qq: impl Into<String>) -> Self {
        Self::new("at", HashMap::from([("qq".into(), Value::String(qq.into()))]))
    }

    pub fn at_all() -> Self {
        Self::at("all")
    }

    pub fn face(id: i64) -> Self {
        Self::new("face", HashMap::from([("id".into(), Value::from(id))]))
    }

    pub fn image(file: impl Into<String>) -> Self {
        Self::new("image", HashMap::from([("file".into(), Value::String(file.into()))]))
    }

    pub fn record(file: impl Into<String>) -> Self {
        Self::new("record", HashMap::from([("file".into(), Value::String(file.into()))]))
    }

    pub fn reply(id: impl Into<String>) -> Self {
        Self::new("reply", HashMap::from([("id".into(), Value::String(id.into()))]))
    }

    pub fn node_custom(user_id: i64, nickname: impl Into<String>, content: Message) -> Self {
        Self::new(
            "node",
            HashMap::from([
                ("user_id".into(), Value::from(user_id)),
                ("nickname".into(), Value::String(nickname.into())),
                ("content".into(), serde_json::to_value(content.0).unwrap_or_default()),
            ]),
        )
    }

    pub fn is_text(&self) -> bool {
        self.type_ == "text"
    }

    /// Returns the `"text"` field's content, or `""` for non-text segments.
    pub fn plain_text(&self) -> &str {
        if !self.is_text() {
            return "";
        }
        self.data.get("text").and_then(Value::as_str).unwrap_or("")
    }
}

impl fmt::Display for MessageSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_text() {
            return write!(f, "{}", escape(self.plain_text(), false));
        }
        write!(f, "[CQ:{}", self.type_)?;
        // Iteration order doesn't matter for round-tripping, but sorting
        // keeps output deterministic for logs and tests.
        let mut keys: Vec<&String> = self.data.keys().collect();
        keys.sort();
        for key in keys {
            let value = &self.data[key];
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            write!(f, ",{}={}", key, escape(&rendered, true))?;
        }
        write!(f, "]")
    }
}

/// An ordered sequence of [`MessageSegment`]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(pub Vec<MessageSegment>);

impl Message {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, segment: MessageSegment) {
        self.0.push(segment);
    }

    /// Parses a CQ string (the v11 "string message" wire format) into
    /// segments, interleaving unescaped plain text with CQ codes.
    pub fn from_cq_str(text: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in CQ_CODE.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            if whole.start() > last {
                let plain = unescape(&text[last..whole.start()]);
                if !plain.is_empty() {
                    segments.push(MessageSegment::text(plain));
                }
            }
            let type_ = caps.name("type").unwrap().as_str().to_string();
            let params_str = caps.name("params").map(|m| m.as_str()).unwrap_or("");
            let mut data = HashMap::new();
            for pair in params_str.split(',').filter(|p| !p.is_empty()) {
                if let Some((key, value)) = pair.split_once('=') {
                    data.insert(key.to_string(), Value::String(unescape(value)));
                }
            }
            segments.push(MessageSegment::new(type_, data));
            last = whole.end();
        }
        if last < text.len() {
            let plain = unescape(&text[last..]);
            if !plain.is_empty() {
                segments.push(MessageSegment::text(plain));
            }
        }
        Self(segments)
    }

    /// Merges adjacent text segments into one, in place.
    pub fn reduce(&mut self) {
        let mut merged: Vec<MessageSegment> = Vec::with_capacity(self.0.len());
        for segment in self.0.drain(..) {
            if segment.is_text() {
                if let Some(last) = merged.last_mut() {
                    if last.is_text() {
                        let mut text = last.plain_text().to_string();
                        text.push_str(segment.plain_text());
                        last.data.insert("text".into(), Value::String(text));
                        continue;
                    }
                }
            }
            merged.push(segment);
        }
        self.0 = merged;
    }

    /// Concatenates the text of every `text` segment, ignoring the rest.
    pub fn extract_plain_text(&self) -> String {
        self.0.iter().filter(|s| s.is_text()).map(MessageSegment::plain_text).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.0 {
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::from_cq_str(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::from_cq_str(&text)
    }
}

impl From<MessageSegment> for Message {
    fn from(segment: MessageSegment) -> Self {
        Self(vec![segment])
    }
}

impl Extend<MessageSegment> for Message {
    fn extend<T: IntoIterator<Item = MessageSegment>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl IntoIterator for Message {
    type Item = MessageSegment;
    type IntoIter = std::vec::IntoIter<MessageSegment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_and_unescape_round_trip() {
        let raw = "a & b [c] d, e";
        let escaped = escape(raw, true);
        assert_eq!(escaped, "a &amp; b &#91;c&#93; d&#44; e");
        assert_eq!(unescape(&escaped), raw);
    }

    #[test]
    fn text_segment_does_not_escape_commas() {
        let seg = MessageSegment::text("hi, there & [stuff]");
        assert_eq!(seg.to_string(), "hi, there &amp; &#91;stuff&#93;");
    }

    #[test]
    fn renders_a_cq_code_with_sorted_params() {
        let seg = MessageSegment::at("123");
        assert_eq!(seg.to_string(), "[CQ:at,qq=123]");
    }

    #[test]
    fn parses_mixed_text_and_cq_codes() {
        let msg = Message::from_cq_str("hello [CQ:at,qq=123] world");
        assert_eq!(msg.0.len(), 3);
        assert_eq!(msg.0[0], MessageSegment::text("hello "));
        assert_eq!(msg.0[1], MessageSegment::at("123"));
        assert_eq!(msg.0[2], MessageSegment::text(" world"));
    }

    #[test]
    fn parses_escaped_values_inside_params() {
        let msg = Message::from_cq_str("[CQ:text,text=a&#44;b]");
        // "text" isn't a real CQ type used this way in practice, but the
        // param-unescaping logic must still apply uniformly.
        assert_eq!(msg.0[0].data.get("text").unwrap(), "a,b");
    }

    #[test]
    fn reduce_merges_adjacent_text_segments() {
        let mut msg = Message(vec![
            MessageSegment::text("a"),
            MessageSegment::text("b"),
            MessageSegment::at("1"),
            MessageSegment::text("c"),
        ]);
        msg.reduce();
        assert_eq!(msg.0.len(), 3);
        assert_eq!(msg.0[0], MessageSegment::text("ab"));
    }

    #[test]
    fn extract_plain_text_skips_non_text_segments() {
        let msg = Message(vec![
            MessageSegment::text("hello "),
            MessageSegment::at("1"),
            MessageSegment::text(" world"),
        ]);
        assert_eq!(msg.extract_plain_text(), "hello  world");
    }

    #[test]
    fn round_trips_through_display_and_parse() {
        let original = Message(vec![MessageSegment::text("say, hi"), MessageSegment::at("42")]);
        let rendered = original.to_string();
        let reparsed = Message::from_cq_str(&rendered);
        assert_eq!(original, reparsed);
    }
}
