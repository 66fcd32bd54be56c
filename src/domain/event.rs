use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChatId, MessageId, MessageRecord, UserId};

/// 领域事件类型 / Domain event kinds
///
/// 这是推送通道上的线缆契约，名称与HTTP层返回的实体保持一致
/// Wire contract of the push channel; names match the HTTP-layer entities
pub mod kind {
    pub const MESSAGE_CREATED: &str = "message.created";
    pub const MESSAGE_UPDATED: &str = "message.updated";
    pub const MESSAGE_DELETED: &str = "message.deleted";
    pub const MESSAGE_READ: &str = "message.read";
    pub const REACTION_ADDED: &str = "reaction.added";
    pub const REACTION_REMOVED: &str = "reaction.removed";
    pub const CHAT_DELETED: &str = "chat.deleted";
    pub const USER_PRESENCE: &str = "user.presence";
    pub const USER_TYPING: &str = "user.typing";
}

/// 事件信封 / Event envelope
///
/// 推送层对载荷不做解释，按字节原样转发给每个连接
/// The push layer treats the payload as opaque and forwards it verbatim
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatEvent {
    pub event: String,
    pub data: Value,
}

impl ChatEvent {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }

    pub fn message_created(message: &MessageRecord) -> Self {
        Self::new(kind::MESSAGE_CREATED, message_data(message))
    }

    pub fn message_updated(message: &MessageRecord) -> Self {
        Self::new(kind::MESSAGE_UPDATED, message_data(message))
    }

    pub fn message_deleted(message_id: MessageId, chat_id: ChatId) -> Self {
        Self::new(
            kind::MESSAGE_DELETED,
            serde_json::json!({ "id": message_id, "chat_id": chat_id }),
        )
    }

    pub fn message_read(chat_id: ChatId, reader_id: UserId, message_ids: &[MessageId]) -> Self {
        Self::new(
            kind::MESSAGE_READ,
            serde_json::json!({
                "chat_id": chat_id,
                "user_id": reader_id,
                "message_ids": message_ids,
            }),
        )
    }

    pub fn reaction_added(message_id: MessageId, chat_id: ChatId, user_id: UserId, emoji: &str) -> Self {
        Self::new(
            kind::REACTION_ADDED,
            reaction_data(message_id, chat_id, user_id, emoji),
        )
    }

    pub fn reaction_removed(message_id: MessageId, chat_id: ChatId, user_id: UserId, emoji: &str) -> Self {
        Self::new(
            kind::REACTION_REMOVED,
            reaction_data(message_id, chat_id, user_id, emoji),
        )
    }

    pub fn chat_deleted(chat_id: ChatId) -> Self {
        Self::new(kind::CHAT_DELETED, serde_json::json!({ "chat_id": chat_id }))
    }

    pub fn presence(user_id: UserId, status: &str, last_seen: Option<DateTime<Utc>>) -> Self {
        Self::new(
            kind::USER_PRESENCE,
            serde_json::json!({
                "user_id": user_id,
                "status": status,
                "last_seen": last_seen.map(|t| t.to_rfc3339()),
                "timestamp": Utc::now().to_rfc3339(),
            }),
        )
    }

    pub fn typing(chat_id: ChatId, user_id: UserId, is_typing: bool) -> Self {
        Self::new(
            kind::USER_TYPING,
            serde_json::json!({
                "chat_id": chat_id,
                "user_id": user_id,
                "is_typing": is_typing,
            }),
        )
    }
}

fn message_data(message: &MessageRecord) -> Value {
    serde_json::json!({
        "id": message.id,
        "chat_id": message.chat_id,
        "author_id": message.author_id,
        "type": message.kind,
        "content": message.content,
        "payload": message.payload,
        "status": message.status,
        "ts": message.ts.to_rfc3339(),
    })
}

fn reaction_data(message_id: MessageId, chat_id: ChatId, user_id: UserId, emoji: &str) -> Value {
    serde_json::json!({
        "message_id": message_id,
        "chat_id": chat_id,
        "user_id": user_id,
        "emoji": emoji,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trip() {
        let event = ChatEvent::typing(5, 42, true);
        let json = serde_json::to_string(&event).unwrap();
        let back: ChatEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event, kind::USER_TYPING);
        assert_eq!(back.data["chat_id"], 5);
        assert_eq!(back.data["is_typing"], true);
    }
}
