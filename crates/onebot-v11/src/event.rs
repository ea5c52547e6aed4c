//! The v11 event taxonomy and its collator registration.
//!
//! Grounded in `v11/event.py`. Rust has no runtime model inheritance, so
//! each concrete event flattens a shared [`EventBase`] instead of
//! subclassing it, and the registry stores a [`SchemaKind`] tag rather
//! than a model class — [`parse_event`] does the actual deserialization
//! once the collator has picked the most specific matching tag.

use onebot_core::collator::{extract_group, Collator, KeySpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBase {
    pub time: i64,
    pub self_id: i64,
    pub post_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sender {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anonymous {
    pub id: i64,
    pub name: String,
    pub flag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub time: i64,
    pub message_type: String,
    pub message_id: i32,
    pub real_id: i32,
    pub sender: Sender,
    pub message: Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub busid: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    #[serde(flatten)]
    pub extra: std::collections::HashMap<String, Value>,
    pub online: bool,
    pub good: bool,
}

macro_rules! message_event {
    ($name:ident, $message_type:literal) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name {
            #[serde(flatten)]
            pub base: EventBase,
            pub message_type: String,
            pub sub_type: String,
            pub message_id: i32,
            pub user_id: i64,
            pub message: Message,
            pub raw_message: String,
            pub font: i32,
            pub sender: Sender,
            #[serde(skip_serializing_if = "Option::is_none")]
            pub to_me: Option<bool>,
            #[serde(skip_serializing_if = "Option::is_none")]
            pub reply: Option<Reply>,
        }

        impl $name {
            pub const MESSAGE_TYPE: &'static str = $message_type;
        }
    };
}

message_event!(PrivateMessageEvent, "private");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMessageEvent {
    #[serde(flatten)]
    pub base: EventBase,
    pub message_type: String,
    pub sub_type: String,
    pub message_id: i32,
    pub group_id: i64,
    pub user_id: i64,
    pub message: Message,
    pub raw_message: String,
    pub font: i32,
    pub sender: Sender,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anonymous: Option<Anonymous>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_me: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<Reply>,
}

impl GroupMessageEvent {
    pub const MESSAGE_TYPE: &'static str = "group";
}

macro_rules! notice_event {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name {
            #[serde(flatten)]
            pub base: EventBase,
            pub notice_type: String,
            $(pub $field: $ty,)*
        }
    };
}

notice_event!(GroupUploadNoticeEvent { group_id: i64, user_id: i64, file: FileInfo });
notice_event!(GroupAdminNoticeEvent { sub_type: String, group_id: i64, user_id: i64 });
notice_event!(GroupDecreaseNoticeEvent { sub_type: String, group_id: i64, operator_id: i64, user_id: i64 });
notice_event!(GroupIncreaseNoticeEvent { sub_type: String, group_id: i64, operator_id: i64, user_id: i64 });
notice_event!(GroupBanNoticeEvent { sub_type: String, group_id: i64, operator_id: i64, user_id: i64, duration: i64 });
notice_event!(FriendAddNoticeEvent { user_id: i64 });
notice_event!(GroupRecallNoticeEvent { group_id: i64, user_id: i64, operator_id: i64, message_id: i32 });
notice_event!(FriendRecallNoticeEvent { user_id: i64, message_id: i32 });

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PokeNotifyEvent {
    #[serde(flatten)]
    pub base: EventBase,
    pub notice_type: String,
    pub sub_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    pub user_id: i64,
    pub target_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LuckyKingNotifyEvent {
    #[serde(flatten)]
    pub base: EventBase,
    pub notice_type: String,
    pub sub_type: String,
    pub group_id: i64,
    pub user_id: i64,
    pub target_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HonorNotifyEvent {
    #[serde(flatten)]
    pub base: EventBase,
    pub notice_type: String,
    pub sub_type: String,
    pub group_id: i64,
    pub honor_type: String,
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequestEvent {
    #[serde(flatten)]
    pub base: EventBase,
    pub request_type: String,
    pub user_id: i64,
    pub comment: String,
    pub flag: String,
}

impl FriendRequestEvent {
    /// Returns the action name and params to call in order to accept this
    /// request.
    pub fn approve(&self) -> (&'static str, Value) {
        ("set_friend_add_request", serde_json::json!({"flag": self.flag, "approve": true}))
    }

    pub fn reject(&self) -> (&'static str, Value) {
        ("set_friend_add_request", serde_json::json!({"flag": self.flag, "approve": false}))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRequestEvent {
    #[serde(flatten)]
    pub base: EventBase,
    pub request_type: String,
    pub sub_type: String,
    pub group_id: i64,
    pub user_id: i64,
    pub comment: String,
    pub flag: String,
}

impl GroupRequestEvent {
    pub fn approve(&self) -> (&'static str, Value) {
        (
            "set_group_add_request",
            serde_json::json!({"flag": self.flag, "sub_type": self.sub_type, "approve": true}),
        )
    }

    pub fn reject(&self, reason: &str) -> (&'static str, Value) {
        (
            "set_group_add_request",
            serde_json::json!({
                "flag": self.flag,
                "sub_type": self.sub_type,
                "approve": false,
                "reason": reason,
            }),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleMetaEvent {
    #[serde(flatten)]
    pub base: EventBase,
    pub meta_event_type: String,
    pub sub_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatMetaEvent {
    #[serde(flatten)]
    pub base: EventBase,
    pub meta_event_type: String,
    pub status: Status,
    pub interval: i64,
}

/// Owned union of every concrete event type this adapter understands.
/// Returned by [`classify_and_parse`] once a schema match is found.
#[derive(Debug, Clone)]
pub enum AnyEvent {
    PrivateMessage(PrivateMessageEvent),
    GroupMessage(GroupMessageEvent),
    GroupUpload(GroupUploadNoticeEvent),
    GroupAdmin(GroupAdminNoticeEvent),
    GroupDecrease(GroupDecreaseNoticeEvent),
    GroupIncrease(GroupIncreaseNoticeEvent),
    GroupBan(GroupBanNoticeEvent),
    FriendAdd(FriendAddNoticeEvent),
    GroupRecall(GroupRecallNoticeEvent),
    FriendRecall(FriendRecallNoticeEvent),
    PokeNotify(PokeNotifyEvent),
    LuckyKingNotify(LuckyKingNotifyEvent),
    HonorNotify(HonorNotifyEvent),
    FriendRequest(FriendRequestEvent),
    GroupRequest(GroupRequestEvent),
    Lifecycle(LifecycleMetaEvent),
    Heartbeat(HeartbeatMetaEvent),
}

impl AnyEvent {
    pub fn self_id(&self) -> i64 {
        match self {
            Self::PrivateMessage(e) => e.base.self_id,
            Self::GroupMessage(e) => e.base.self_id,
            Self::GroupUpload(e) => e.base.self_id,
            Self::GroupAdmin(e) => e.base.self_id,
            Self::GroupDecrease(e) => e.base.self_id,
            Self::GroupIncrease(e) => e.base.self_id,
            Self::GroupBan(e) => e.base.self_id,
            Self::FriendAdd(e) => e.base.self_id,
            Self::GroupRecall(e) => e.base.self_id,
            Self::FriendRecall(e) => e.base.self_id,
            Self::PokeNotify(e) => e.base.self_id,
            Self::LuckyKingNotify(e) => e.base.self_id,
            Self::HonorNotify(e) => e.base.self_id,
            Self::FriendRequest(e) => e.base.self_id,
            Self::GroupRequest(e) => e.base.self_id,
            Self::Lifecycle(e) => e.base.self_id,
            Self::Heartbeat(e) => e.base.self_id,
        }
    }
}

/// Which concrete schema a collator leaf resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    PrivateMessage,
    GroupMessage,
    GroupUpload,
    GroupAdmin,
    GroupDecrease,
    GroupIncrease,
    GroupBan,
    FriendAdd,
    GroupRecall,
    FriendRecall,
    PokeNotify,
    LuckyKingNotify,
    HonorNotify,
    FriendRequest,
    GroupRequest,
    Lifecycle,
    Heartbeat,
}

/// Builds the collator with every built-in schema registered under its
/// `(post_type, {message,notice,request,meta_event}_type, sub_type)` key.
pub fn build_collator() -> Collator<SchemaKind> {
    let mut c = Collator::new(
        "onebot-v11",
        vec![
            KeySpec::Field("post_type"),
            KeySpec::Group(&["message_type", "notice_type", "request_type", "meta_event_type"]),
            KeySpec::Field("sub_type"),
        ],
    );

    let reg = |c: &mut Collator<SchemaKind>, path: [Option<&str>; 3], kind: SchemaKind| {
        c.register(&path, kind).expect("built-in key path is well-formed");
    };

    reg(&mut c, [Some("message"), Some("private"), None], SchemaKind::PrivateMessage);
    reg(&mut c, [Some("message"), Some("group"), None], SchemaKind::GroupMessage);
    reg(&mut c, [Some("notice"), Some("group_upload"), None], SchemaKind::GroupUpload);
    reg(&mut c, [Some("notice"), Some("group_admin"), None], SchemaKind::GroupAdmin);
    reg(&mut c, [Some("notice"), Some("group_decrease"), None], SchemaKind::GroupDecrease);
    reg(&mut c, [Some("notice"), Some("group_increase"), None], SchemaKind::GroupIncrease);
    reg(&mut c, [Some("notice"), Some("group_ban"), None], SchemaKind::GroupBan);
    reg(&mut c, [Some("notice"), Some("friend_add"), None], SchemaKind::FriendAdd);
    reg(&mut c, [Some("notice"), Some("group_recall"), None], SchemaKind::GroupRecall);
    reg(&mut c, [Some("notice"), Some("friend_recall"), None], SchemaKind::FriendRecall);
    reg(&mut c, [Some("notice"), Some("notify"), Some("poke")], SchemaKind::PokeNotify);
    reg(&mut c, [Some("notice"), Some("notify"), Some("lucky_king")], SchemaKind::LuckyKingNotify);
    reg(&mut c, [Some("notice"), Some("notify"), Some("honor")], SchemaKind::HonorNotify);
    reg(&mut c, [Some("request"), Some("friend"), None], SchemaKind::FriendRequest);
    reg(&mut c, [Some("request"), Some("group"), None], SchemaKind::GroupRequest);
    reg(&mut c, [Some("meta_event"), Some("lifecycle"), None], SchemaKind::Lifecycle);
    reg(&mut c, [Some("meta_event"), Some("heartbeat"), None], SchemaKind::Heartbeat);

    c
}

/// Resolves the discriminator tuple for `payload`, suitable for
/// [`Collator::classify`].
pub fn discriminator_key(payload: &Value) -> Result<[Option<&str>; 3], onebot_core::CollatorError> {
    let post_type = payload.get("post_type").and_then(Value::as_str);
    let sub_type = payload.get("sub_type").and_then(Value::as_str);
    let group_field = extract_group(&[
        payload.get("message_type").and_then(Value::as_str),
        payload.get("notice_type").and_then(Value::as_str),
        payload.get("request_type").and_then(Value::as_str),
        payload.get("meta_event_type").and_then(Value::as_str),
    ])?;
    Ok([post_type, group_field, sub_type])
}

fn parse<T: serde::de::DeserializeOwned>(payload: &Value) -> Option<T> {
    serde_json::from_value(payload.clone()).ok()
}

/// Attempts to deserialize `payload` into the schema named by `kind`.
pub fn parse_event(kind: SchemaKind, payload: &Value) -> Option<AnyEvent> {
    Some(match kind {
        SchemaKind::PrivateMessage => AnyEvent::PrivateMessage(parse(payload)?),
        SchemaKind::GroupMessage => AnyEvent::GroupMessage(parse(payload)?),
        SchemaKind::GroupUpload => AnyEvent::GroupUpload(parse(payload)?),
        SchemaKind::GroupAdmin => AnyEvent::GroupAdmin(parse(payload)?),
        SchemaKind::GroupDecrease => AnyEvent::GroupDecrease(parse(payload)?),
        SchemaKind::GroupIncrease => AnyEvent::GroupIncrease(parse(payload)?),
        SchemaKind::GroupBan => AnyEvent::GroupBan(parse(payload)?),
        SchemaKind::FriendAdd => AnyEvent::FriendAdd(parse(payload)?),
        SchemaKind::GroupRecall => AnyEvent::GroupRecall(parse(payload)?),
        SchemaKind::FriendRecall => AnyEvent::FriendRecall(parse(payload)?),
        SchemaKind::PokeNotify => AnyEvent::PokeNotify(parse(payload)?),
        SchemaKind::LuckyKingNotify => AnyEvent::LuckyKingNotify(parse(payload)?),
        SchemaKind::HonorNotify => AnyEvent::HonorNotify(parse(payload)?),
        SchemaKind::FriendRequest => AnyEvent::FriendRequest(parse(payload)?),
        SchemaKind::GroupRequest => AnyEvent::GroupRequest(parse(payload)?),
        SchemaKind::Lifecycle => AnyEvent::Lifecycle(parse(payload)?),
        SchemaKind::Heartbeat => AnyEvent::Heartbeat(parse(payload)?),
    })
}

/// Classifies `payload` and tries each candidate schema deepest-first,
/// returning the first one that deserializes successfully.
pub fn classify_and_parse(
    collator: &Collator<SchemaKind>,
    payload: &Value,
) -> Result<Option<AnyEvent>, onebot_core::CollatorError> {
    let key = discriminator_key(payload)?;
    let candidates = collator.classify(&key)?;
    Ok(candidates
        .into_iter()
        .find_map(|kind| parse_event(*kind, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_a_private_message() {
        let collator = build_collator();
        let payload = json!({
            "time": 1, "self_id": 1, "post_type": "message",
            "message_type": "private", "sub_type": "friend",
            "message_id": 1, "user_id": 2, "message": [{"type": "text", "data": {"text": "hi"}}],
            "raw_message": "hi", "font": 0,
            "sender": {}
        });
        let event = classify_and_parse(&collator, &payload).unwrap().unwrap();
        assert!(matches!(event, AnyEvent::PrivateMessage(_)));
    }

    #[test]
    fn classifies_a_poke_notify_over_the_bare_notify_path() {
        let collator = build_collator();
        let payload = json!({
            "time": 1, "self_id": 1, "post_type": "notice",
            "notice_type": "notify", "sub_type": "poke",
            "group_id": 1, "user_id": 2, "target_id": 3
        });
        let event = classify_and_parse(&collator, &payload).unwrap().unwrap();
        assert!(matches!(event, AnyEvent::PokeNotify(_)));
    }

    #[test]
    fn friend_request_approve_builds_expected_call() {
        let event = FriendRequestEvent {
            base: EventBase { time: 1, self_id: 1, post_type: "request".into() },
            request_type: "friend".into(),
            user_id: 2,
            comment: "hi".into(),
            flag: "flag123".into(),
        };
        let (action, params) = event.approve();
        assert_eq!(action, "set_friend_add_request");
        assert_eq!(params["flag"], "flag123");
        assert_eq!(params["approve"], true);
    }
}
