//! Send helper and inbound receive pipeline.
//!
//! Grounded in `v11/bot.py`: `send()`'s routing/prefix derivation and the
//! `_check_reply` / `_check_at_me` / `_check_nickname` pipeline that runs
//! over every inbound message event before user handlers see it.

use regex::Regex;
use serde_json::{json, Value};

use crate::event::{AnyEvent, GroupMessageEvent, PrivateMessageEvent, Reply};
use crate::exception::AdapterError;
use crate::message::{Message, MessageSegment};

/// Common accessors needed by the pipeline over both message event types.
/// Rust has no class hierarchy to lean on here, so the shared behavior is
/// expressed as a trait instead.
pub trait MessageEventMut {
    fn self_id(&self) -> i64;
    fn sender_user_id(&self) -> Option<i64>;
    fn message_mut(&mut self) -> &mut Message;
    fn set_to_me(&mut self, value: bool);
    fn to_me(&self) -> bool;
    fn set_reply(&mut self, reply: Reply);
}

impl MessageEventMut for PrivateMessageEvent {
    fn self_id(&self) -> i64 {
        self.base.self_id
    }
    fn sender_user_id(&self) -> Option<i64> {
        self.sender.user_id
    }
    fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }
    fn set_to_me(&mut self, value: bool) {
        self.to_me = Some(value);
    }
    fn to_me(&self) -> bool {
        self.to_me.unwrap_or(false)
    }
    fn set_reply(&mut self, reply: Reply) {
        self.reply = Some(reply);
    }
}

impl MessageEventMut for GroupMessageEvent {
    fn self_id(&self) -> i64 {
        self.base.self_id
    }
    fn sender_user_id(&self) -> Option<i64> {
        self.sender.user_id
    }
    fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }
    fn set_to_me(&mut self, value: bool) {
        self.to_me = Some(value);
    }
    fn to_me(&self) -> bool {
        self.to_me.unwrap_or(false)
    }
    fn set_reply(&mut self, reply: Reply) {
        self.reply = Some(reply);
    }
}

/// Pops a leading `reply` segment and returns the message id it points at,
/// so the caller can fetch the original message and feed it back through
/// [`apply_reply`]. Returns `None` if the message doesn't start with one.
pub fn extract_reply_target<E: MessageEventMut>(event: &mut E) -> Option<String> {
    let message = event.message_mut();
    let is_reply = message.0.first().is_some_and(|seg| seg.type_ == "reply");
    if !is_reply {
        return None;
    }
    let segment = message.0.remove(0);
    segment.data.get("id").and_then(Value::as_str).map(str::to_owned)
}

/// Attaches a fetched [`Reply`] to the event, marks `to_me` if the replied
/// message was sent by this bot, and strips a now-redundant leading `at`
/// segment plus the whitespace that follows it.
pub fn apply_reply<E: MessageEventMut>(event: &mut E, reply: Reply) {
    let replied_by_me = reply.sender.user_id == Some(event.self_id());
    event.set_reply(reply);
    if replied_by_me {
        event.set_to_me(true);
    }
    let message = event.message_mut();
    if message.0.first().is_some_and(|seg| seg.type_ == "at") {
        message.0.remove(0);
        strip_leading_whitespace(message);
    }
}

fn is_at_me(segment: &MessageSegment, self_id: i64) -> bool {
    segment.type_ == "at"
        && segment
            .data
            .get("qq")
            .and_then(Value::as_str)
            .is_some_and(|qq| qq == self_id.to_string())
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

/// Private messages are always directed at the bot. Group messages are
/// only `to_me` when the bot is `@`'d at the very start or end of the
/// message; the matching segment (and any leading whitespace it leaves
/// behind) is stripped either way. A leading at-self may be immediately
/// followed by a second at-self, which is stripped too; a trailing
/// whitespace-only text segment is skipped over when checking the last
/// segment for at-self.
pub fn check_at_me<E: MessageEventMut>(event: &mut E, is_private: bool) {
    if is_private {
        event.set_to_me(true);
        return;
    }
    let self_id = event.self_id();
    if event.message_mut().0.is_empty() {
        return;
    }

    if is_at_me(&event.message_mut().0[0], self_id) {
        let message = event.message_mut();
        message.0.remove(0);
        strip_leading_whitespace(message);
        event.set_to_me(true);
        let message = event.message_mut();
        if message.0.first().is_some_and(|seg| is_at_me(seg, self_id)) {
            message.0.remove(0);
            strip_leading_whitespace(message);
        }
        return;
    }

    let message = event.message_mut();
    let mut tail = message.0.len();
    if tail >= 2 && message.0[tail - 1].is_text() && message.0[tail - 1].plain_text().trim().is_empty() {
        tail -= 1;
    }
    if tail == 0 {
        return;
    }
    if is_at_me(&message.0[tail - 1], self_id) {
        message.0.truncate(tail - 1);
        event.set_to_me(true);
    }
}

/// Strips a configured nickname from the start of the message and marks
/// `to_me`, e.g. `"bot, hello"` -> `"hello"` with `to_me = true`.
pub fn check_nickname<E: MessageEventMut>(event: &mut E, nicknames: &[String]) {
    if event.to_me() || nicknames.is_empty() {
        return;
    }
    let message = event.message_mut();
    let Some(first) = message.0.first() else {
        return;
    };
    if !first.is_text() {
        return;
    }
    let text = first.plain_text().to_string();
    let pattern = nickname_pattern(nicknames);
    let Some(m) = pattern.find(&text) else {
        return;
    };
    let rest = text[m.end()..].to_string();
    if rest.is_empty() {
        message.0.remove(0);
    } else {
        message.0[0].data.insert("text".into(), Value::String(rest));
    }
    event.set_to_me(true);
}

fn nickname_pattern(nicknames: &[String]) -> Regex {
    let alternatives = nicknames.iter().map(|n| regex::escape(n)).collect::<Vec<_>>().join("|");
    Regex::new(&format!(r"(?i)^({alternatives})([\s,，]*|$)"))
        .expect("nickname alternatives are escaped, so this is always valid")
}

/// Recomputes the full receive pipeline for a private message: reply
/// resolution is the caller's job (it needs an API round trip), so this
/// only re-runs at-me / nickname detection once `to_me` from the reply
/// step (if any) is already applied.
pub fn finish_private_pipeline(event: &mut PrivateMessageEvent, nicknames: &[String]) {
    check_at_me(event, true);
    check_nickname(event, nicknames);
}

pub fn finish_group_pipeline(event: &mut GroupMessageEvent, nicknames: &[String]) {
    check_at_me(event, false);
    check_nickname(event, nicknames);
}

/// Builds the `send_msg` action name and params for replying to `event`,
/// applying `reply_message`/`at_sender` prefixes the way `send()` does.
pub fn prepare_send(
    event: &AnyEvent,
    message: Message,
    at_sender: bool,
    reply_message: bool,
) -> Result<(&'static str, Value), AdapterError> {
    let mut full = Message::new();

    let params = match event {
        AnyEvent::PrivateMessage(e) => {
            if reply_message {
                full.push(MessageSegment::reply(e.message_id.to_string()));
            }
            full.extend(message.0);
            json!({"message_type": "private", "user_id": e.user_id, "message": full.0})
        }
        AnyEvent::GroupMessage(e) => {
            if reply_message {
                full.push(MessageSegment::reply(e.message_id.to_string()));
            }
            if at_sender {
                full.push(MessageSegment::at(e.user_id.to_string()));
                full.push(MessageSegment::text(" "));
            }
            full.extend(message.0);
            json!({"message_type": "group", "group_id": e.group_id, "message": full.0})
        }
        _ => return Err(AdapterError::ApiNotAvailable),
    };
    Ok(("send_msg", params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventBase, Sender};

    fn base() -> EventBase {
        EventBase { time: 0, self_id: 100, post_type: "message".into() }
    }

    fn group_event(message: Message) -> GroupMessageEvent {
        GroupMessageEvent {
            base: base(),
            message_type: "group".into(),
            sub_type: "normal".into(),
            message_id: 1,
            group_id: 1,
            user_id: 200,
            message,
            raw_message: String::new(),
            font: 0,
            sender: Sender {
                user_id: Some(200),
                nickname: None,
                sex: None,
                age: None,
                card: None,
                area: None,
                level: None,
                role: None,
                title: None,
            },
            anonymous: None,
            to_me: None,
            reply: None,
        }
    }

    #[test]
    fn private_message_is_always_to_me() {
        let mut event = PrivateMessageEvent {
            base: base(),
            message_type: "private".into(),
            sub_type: "friend".into(),
            message_id: 1,
            user_id: 200,
            message: Message(vec![MessageSegment::text("hi")]),
            raw_message: String::new(),
            font: 0,
            sender: Sender {
                user_id: Some(200),
                nickname: None,
                sex: None,
                age: None,
                card: None,
                area: None,
                level: None,
                role: None,
                title: None,
            },
            to_me: None,
            reply: None,
        };
        check_at_me(&mut event, true);
        assert!(event.to_me.unwrap());
    }

    #[test]
    fn group_message_to_me_when_at_leads_the_message() {
        let mut event = group_event(Message(vec![
            MessageSegment::at("100"),
            MessageSegment::text("  hello"),
        ]));
        check_at_me(&mut event, false);
        assert!(event.to_me.unwrap());
        assert_eq!(event.message.extract_plain_text(), "hello");
    }

    #[test]
    fn group_message_strips_a_second_immediately_following_at_self() {
        let mut event = group_event(Message(vec![
            MessageSegment::at("100"),
            MessageSegment::at("100"),
            MessageSegment::text("  hello"),
        ]));
        check_at_me(&mut event, false);
        assert!(event.to_me.unwrap());
        assert_eq!(event.message.extract_plain_text(), "hello");
    }

    #[test]
    fn group_message_to_me_when_at_trails_before_whitespace() {
        let mut event = group_event(Message(vec![
            MessageSegment::text("hello "),
            MessageSegment::at("100"),
            MessageSegment::text("  "),
        ]));
        check_at_me(&mut event, false);
        assert!(event.to_me.unwrap());
        assert_eq!(event.message.extract_plain_text(), "hello ");
    }

    #[test]
    fn group_message_not_to_me_without_at() {
        let mut event = group_event(Message(vec![MessageSegment::text("hello")]));
        check_at_me(&mut event, false);
        assert!(!event.to_me.unwrap_or(false));
    }

    #[test]
    fn nickname_prefix_is_stripped_and_marks_to_me() {
        let nicknames = vec!["bot".to_string()];
        let mut event = group_event(Message(vec![MessageSegment::text("bot, hello")]));
        check_nickname(&mut event, &nicknames);
        assert!(event.to_me.unwrap());
        assert_eq!(event.message.extract_plain_text(), "hello");
    }

    #[test]
    fn prepare_send_adds_at_sender_prefix_for_groups() {
        let event = AnyEvent::GroupMessage(group_event(Message::new()));
        let (action, params) = prepare_send(&event, Message(vec![MessageSegment::text("hi")]), true, false)
            .unwrap();
        assert_eq!(action, "send_msg");
        let segments = params["message"].as_array().unwrap();
        assert_eq!(segments[0]["type"], "at");
    }
}
