//! Send helper and inbound receive pipeline for v12.
//!
//! v12 has no `reply_message` prefixing (that's v11-only) and detects
//! `to_me` via `mention` segments instead of CQ `at` segments, keyed off
//! `detail_type` rather than a `message_type` field.

use serde_json::{json, Value};

use crate::event::{AnyEvent, GroupMessageEvent, PrivateMessageEvent};
use crate::exception::AdapterError;
use crate::message::{Message, MessageSegment};

fn is_mention_of(segment: &MessageSegment, self_id: &str) -> bool {
    segment.is_mention() && segment.mention_target() == Some(self_id)
}

fn strip_leading_whitespace(message: &mut Message) {
    if let Some(first) = message.0.first_mut() {
        if first.is_text() {
            let trimmed = first.plain_text().trim_start().to_string();
            if trimmed.is_empty() {
                message.0.remove(0);
            } else {
                first.data.insert("text".into(), Value::String(trimmed));
            }
        }
    }
}

/// Private messages are always `to_me`. Group messages are `to_me` only
/// when mentioned at the start or end; the mention segment is stripped
/// either way, matching the v11 pipeline's shape.
pub fn check_at_me(message: &mut Message, self_id: &str, is_private: bool) -> bool {
    if is_private {
        return true;
    }
    if message.0.is_empty() {
        return false;
    }
    if is_mention_of(&message.0[0], self_id) {
        message.0.remove(0);
        strip_leading_whitespace(message);
        true
    } else if message.0.last().is_some_and(|seg| is_mention_of(seg, self_id)) {
        message.0.pop();
        true
    } else {
        false
    }
}

/// Builds the `send_message` action name and params for replying to
/// `event`. `at_sender` prefixes a `mention` segment for group/guild
/// routing; private routing ignores it (mentioning a DM peer is
/// meaningless).
pub fn prepare_send(event: &AnyEvent, message: Message, at_sender: bool) -> Result<(&'static str, Value), AdapterError> {
    let mut full = Message::new();

    let params = match event {
        AnyEvent::PrivateMessage(PrivateMessageEvent { user_id, .. }) => {
            full.extend(message.0);
            json!({"detail_type": "private", "user_id": user_id, "message": full.0})
        }
        AnyEvent::GroupMessage(GroupMessageEvent { group_id, user_id, .. }) => {
            if at_sender {
                full.push(MessageSegment::mention(user_id.clone()));
                full.push(MessageSegment::text(" "));
            }
            full.extend(message.0);
            json!({"detail_type": "group", "group_id": group_id, "message": full.0})
        }
        _ => return Err(AdapterError::ApiNotAvailable),
    };
    Ok(("send_message", params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBase;

    fn base() -> EventBase {
        EventBase {
            id: "1".into(),
            impl_: "impl-a".into(),
            platform: "qq".into(),
            self_id: "100".into(),
            time: 1.0,
            type_: "message".into(),
            detail_type: "group".into(),
            sub_type: None,
            self_: None,
        }
    }

    #[test]
    fn strips_leading_mention_and_marks_to_me() {
        let mut message = Message(vec![MessageSegment::mention("100"), MessageSegment::text("  hi")]);
        let to_me = check_at_me(&mut message, "100", false);
        assert!(to_me);
        assert_eq!(message.extract_plain_text(), "hi");
    }

    #[test]
    fn private_is_always_to_me_without_mutation() {
        let mut message = Message(vec![MessageSegment::text("hi")]);
        assert!(check_at_me(&mut message, "100", true));
        assert_eq!(message.0.len(), 1);
    }

    #[test]
    fn prepare_send_adds_mention_for_group_at_sender() {
        let event = AnyEvent::GroupMessage(GroupMessageEvent {
            base: base(),
            message_id: "m1".into(),
            message: Message::new(),
            alt_message: String::new(),
            group_id: "g1".into(),
            user_id: "u1".into(),
            to_me: None,
        });
        let (action, params) = prepare_send(&event, Message(vec![MessageSegment::text("hi")]), true).unwrap();
        assert_eq!(action, "send_message");
        assert_eq!(params["message"][0]["type"], "mention");
    }
}
