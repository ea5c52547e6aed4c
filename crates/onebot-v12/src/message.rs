//! v12 message model: always an array of segments, never a text codec —
//! there is no CQ-style embedding in this protocol version.
//!
//! Grounded in `v12/message.py`. `reduce`/`extract_plain_text` carry the
//! same shape as the v11 codec deliberately keeps, but construction from
//! a bare string yields exactly one `text` segment instead of parsing.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSegment {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub data: HashMap<String, Value>,
}

impl MessageSegment {
    pub fn new(type_: impl Into<String>, data: HashMap<String, Value>) -> Self {
        Self { type_: type_.into(), data }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new("text", HashMap::from([("text".into(), Value::String(text.into()))]))
    }

    pub fn mention(user_id: impl Into<String>) -> Self {
        Self::new("mention", HashMap::from([("user_id".into(), Value::String(user_id.into()))]))
    }

    pub fn mention_all() -> Self {
        Self::new("mention_all", HashMap::new())
    }

    pub fn image(file_id: impl Into<String>) -> Self {
        Self::new("image", HashMap::from([("file_id".into(), Value::String(file_id.into()))]))
    }

    pub fn voice(file_id: impl Into<String>) -> Self {
        Self::new("voice", HashMap::from([("file_id".into(), Value::String(file_id.into()))]))
    }

    pub fn audio(file_id: impl Into<String>) -> Self {
        Self::new("audio", HashMap::from([("file_id".into(), Value::String(file_id.into()))]))
    }

    pub fn video(file_id: impl Into<String>) -> Self {
        Self::new("video", HashMap::from([("file_id".into(), Value::String(file_id.into()))]))
    }

    pub fn file(file_id: impl Into<String>) -> Self {
        Self::new("file", HashMap::from([("file_id".into(), Value::String(file_id.into()))]))
    }

    pub fn location(latitude: f64, longitude: f64) -> Self {
        Self::new(
            "location",
            HashMap::from([
                ("latitude".into(), Value::from(latitude)),
                ("longitude".into(), Value::from(longitude)),
            ]),
        )
    }

    pub fn reply(message_id: impl Into<String>) -> Self {
        Self::new("reply", HashMap::from([("message_id".into(), Value::String(message_id.into()))]))
    }

    pub fn is_text(&self) -> bool {
        self.type_ == "text"
    }

    pub fn is_mention(&self) -> bool {
        self.type_ == "mention"
    }

    pub fn plain_text(&self) -> &str {
        if !self.is_text() {
            return "";
        }
        self.data.get("text").and_then(Value::as_str).unwrap_or("")
    }

    pub fn mention_target(&self) -> Option<&str> {
        if !self.is_mention() {
            return None;
        }
        self.data.get("user_id").and_then(Value::as_str)
    }
}

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
            if segment.is_text() {
                write!(f, "{}", segment.plain_text())?;
            } else {
                write!(f, "[{}]", segment.type_)?;
            }
        }
        Ok(())
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self(vec![MessageSegment::text(text)])
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self(vec![MessageSegment::text(text)])
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
    fn string_construction_yields_one_text_segment() {
        let msg: Message = "hello".into();
        assert_eq!(msg.0, vec![MessageSegment::text("hello")]);
    }

    #[test]
    fn reduce_merges_adjacent_text() {
        let mut msg = Message(vec![
            MessageSegment::text("a"),
            MessageSegment::text("b"),
            MessageSegment::mention("1"),
        ]);
        msg.reduce();
        assert_eq!(msg.0, vec![MessageSegment::text("ab"), MessageSegment::mention("1")]);
    }

    #[test]
    fn extract_plain_text_skips_mentions() {
        let msg = Message(vec![MessageSegment::mention("1"), MessageSegment::text("hi")]);
        assert_eq!(msg.extract_plain_text(), "hi");
    }
}
