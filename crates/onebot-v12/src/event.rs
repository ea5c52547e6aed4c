//! The v12 event taxonomy and its collator registration.
//!
//! Discriminators are flat (`type`, `detail_type`, `sub_type` — no
//! grouped alternatives like v11's `message_type`/`notice_type`/...),
//! matching the dotted-path trie key the original `json2event` builds.

use std::collections::HashMap;

use onebot_core::collator::{Collator, KeySpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSelf {
    pub platform: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBase {
    pub id: String,
    #[serde(rename = "impl")]
    pub impl_: String,
    pub platform: String,
    pub self_id: String,
    pub time: f64,
    #[serde(rename = "type")]
    pub type_: String,
    pub detail_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    /// Identifies the originating bot on a multi-bot connection. Absent
    /// on meta events, required on everything else.
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub self_: Option<BotSelf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "impl")]
    pub impl_: String,
    pub version: String,
    pub onebot_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectMetaEvent {
    #[serde(flatten)]
    pub base: EventBase,
    pub version: VersionInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatMetaEvent {
    #[serde(flatten)]
    pub base: EventBase,
    pub interval: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotStatus {
    #[serde(rename = "self")]
    pub self_: BotSelf,
    pub online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub good: bool,
    pub bots: Vec<BotStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdateMetaEvent {
    #[serde(flatten)]
    pub base: EventBase,
    pub status: Status,
}

macro_rules! message_event {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name {
            #[serde(flatten)]
            pub base: EventBase,
            pub message_id: String,
            pub message: Message,
            pub alt_message: String,
            $(pub $field: $ty,)*
            /// Set by the receive pipeline's `check_at_me`; absent until then.
            #[serde(default, skip_serializing_if = "Option::is_none")]
            pub to_me: Option<bool>,
        }
    };
}

message_event!(PrivateMessageEvent { user_id: String });
message_event!(GroupMessageEvent { group_id: String, user_id: String });

macro_rules! notice_event {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name {
            #[serde(flatten)]
            pub base: EventBase,
            $(pub $field: $ty,)*
        }
    };
}

notice_event!(FriendIncreaseNoticeEvent { user_id: String });
notice_event!(FriendDecreaseNoticeEvent { user_id: String });
notice_event!(GroupMemberIncreaseNoticeEvent { group_id: String, user_id: String, operator_id: String });
notice_event!(GroupMemberDecreaseNoticeEvent { group_id: String, user_id: String, operator_id: String });
notice_event!(GroupMessageDeleteNoticeEvent { group_id: String, user_id: String, message_id: String, operator_id: String });

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericRequestEvent {
    #[serde(flatten)]
    pub base: EventBase,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone)]
pub enum AnyEvent {
    Connect(ConnectMetaEvent),
    Heartbeat(HeartbeatMetaEvent),
    StatusUpdate(StatusUpdateMetaEvent),
    PrivateMessage(PrivateMessageEvent),
    GroupMessage(GroupMessageEvent),
    FriendIncrease(FriendIncreaseNoticeEvent),
    FriendDecrease(FriendDecreaseNoticeEvent),
    GroupMemberIncrease(GroupMemberIncreaseNoticeEvent),
    GroupMemberDecrease(GroupMemberDecreaseNoticeEvent),
    GroupMessageDelete(GroupMessageDeleteNoticeEvent),
    Request(GenericRequestEvent),
}

impl AnyEvent {
    pub fn base(&self) -> &EventBase {
        match self {
            Self::Connect(e) => &e.base,
            Self::Heartbeat(e) => &e.base,
            Self::StatusUpdate(e) => &e.base,
            Self::PrivateMessage(e) => &e.base,
            Self::GroupMessage(e) => &e.base,
            Self::FriendIncrease(e) => &e.base,
            Self::FriendDecrease(e) => &e.base,
            Self::GroupMemberIncrease(e) => &e.base,
            Self::GroupMemberDecrease(e) => &e.base,
            Self::GroupMessageDelete(e) => &e.base,
            Self::Request(e) => &e.base,
        }
    }

    pub fn is_meta(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Heartbeat(_) | Self::StatusUpdate(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Connect,
    Heartbeat,
    StatusUpdate,
    PrivateMessage,
    GroupMessage,
    FriendIncrease,
    FriendDecrease,
    GroupMemberIncrease,
    GroupMemberDecrease,
    GroupMessageDelete,
    Request,
}

pub fn build_collator() -> Collator<SchemaKind> {
    let mut c = Collator::new(
        "onebot-v12",
        vec![
            KeySpec::Field("type"),
            KeySpec::Field("detail_type"),
            KeySpec::Field("sub_type"),
        ],
    );
    let reg = |c: &mut Collator<SchemaKind>, path: [Option<&str>; 3], kind: SchemaKind| {
        c.register(&path, kind).expect("built-in key path is well-formed");
    };

    reg(&mut c, [Some("meta"), Some("connect"), None], SchemaKind::Connect);
    reg(&mut c, [Some("meta"), Some("heartbeat"), None], SchemaKind::Heartbeat);
    reg(&mut c, [Some("meta"), Some("status_update"), None], SchemaKind::StatusUpdate);
    reg(&mut c, [Some("message"), Some("private"), None], SchemaKind::PrivateMessage);
    reg(&mut c, [Some("message"), Some("group"), None], SchemaKind::GroupMessage);
    reg(&mut c, [Some("notice"), Some("friend_increase"), None], SchemaKind::FriendIncrease);
    reg(&mut c, [Some("notice"), Some("friend_decrease"), None], SchemaKind::FriendDecrease);
    reg(&mut c, [Some("notice"), Some("group_member_increase"), None], SchemaKind::GroupMemberIncrease);
    reg(&mut c, [Some("notice"), Some("group_member_decrease"), None], SchemaKind::GroupMemberDecrease);
    reg(&mut c, [Some("notice"), Some("group_message_delete"), None], SchemaKind::GroupMessageDelete);
    reg(&mut c, [Some("request"), None, None], SchemaKind::Request);

    c
}

pub fn discriminator_key(payload: &Value) -> [Option<&str>; 3] {
    [
        payload.get("type").and_then(Value::as_str),
        payload.get("detail_type").and_then(Value::as_str),
        payload.get("sub_type").and_then(Value::as_str),
    ]
}

fn parse<T: serde::de::DeserializeOwned>(payload: &Value) -> Option<T> {
    serde_json::from_value(payload.clone()).ok()
}

pub fn parse_event(kind: SchemaKind, payload: &Value) -> Option<AnyEvent> {
    Some(match kind {
        SchemaKind::Connect => AnyEvent::Connect(parse(payload)?),
        SchemaKind::Heartbeat => AnyEvent::Heartbeat(parse(payload)?),
        SchemaKind::StatusUpdate => AnyEvent::StatusUpdate(parse(payload)?),
        SchemaKind::PrivateMessage => AnyEvent::PrivateMessage(parse(payload)?),
        SchemaKind::GroupMessage => AnyEvent::GroupMessage(parse(payload)?),
        SchemaKind::FriendIncrease => AnyEvent::FriendIncrease(parse(payload)?),
        SchemaKind::FriendDecrease => AnyEvent::FriendDecrease(parse(payload)?),
        SchemaKind::GroupMemberIncrease => AnyEvent::GroupMemberIncrease(parse(payload)?),
        SchemaKind::GroupMemberDecrease => AnyEvent::GroupMemberDecrease(parse(payload)?),
        SchemaKind::GroupMessageDelete => AnyEvent::GroupMessageDelete(parse(payload)?),
        SchemaKind::Request => AnyEvent::Request(parse(payload)?),
    })
}

pub fn classify_and_parse(
    collator: &Collator<SchemaKind>,
    payload: &Value,
) -> Result<Option<AnyEvent>, onebot_core::CollatorError> {
    let key = discriminator_key(payload);
    let candidates = collator.classify(&key)?;
    Ok(candidates.into_iter().find_map(|kind| parse_event(*kind, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_connect_meta_event() {
        let collator = build_collator();
        let payload = json!({
            "id": "1", "impl": "impl-a", "platform": "qq", "self_id": "123",
            "time": 1.0, "type": "meta", "detail_type": "connect",
            "version": {"impl": "impl-a", "version": "1.0", "onebot_version": "12"}
        });
        let event = classify_and_parse(&collator, &payload).unwrap().unwrap();
        assert!(matches!(event, AnyEvent::Connect(_)));
        assert!(event.is_meta());
    }

    #[test]
    fn classifies_status_update_with_bots() {
        let collator = build_collator();
        let payload = json!({
            "id": "1", "impl": "impl-a", "platform": "qq", "self_id": "123",
            "time": 1.0, "type": "meta", "detail_type": "status_update",
            "status": {"good": true, "bots": [{"self": {"platform": "qq", "user_id": "1"}, "online": true}]}
        });
        let event = classify_and_parse(&collator, &payload).unwrap().unwrap();
        match event {
            AnyEvent::StatusUpdate(e) => assert_eq!(e.status.bots.len(), 1),
            _ => panic!("expected status update"),
        }
    }

    #[test]
    fn non_meta_event_carries_self_record() {
        let collator = build_collator();
        let payload = json!({
            "id": "1", "impl": "impl-a", "platform": "qq", "self_id": "123",
            "time": 1.0, "type": "message", "detail_type": "private",
            "self": {"platform": "qq", "user_id": "123"},
            "message_id": "m1", "message": [{"type": "text", "data": {"text": "hi"}}],
            "alt_message": "hi", "user_id": "456"
        });
        let event = classify_and_parse(&collator, &payload).unwrap().unwrap();
        assert!(event.base().self_.is_some());
    }
}
