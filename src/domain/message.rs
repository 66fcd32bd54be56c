use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChatId, MessageId, UserId};

/// 消息投递状态 / Message delivery status
///
/// `delivered → read` 是唯一合法迁移，且不可逆
/// `delivered → read` is the only legal transition and is terminal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "delivered" => Some(MessageStatus::Delivered),
            "read" => Some(MessageStatus::Read),
            _ => None,
        }
    }
}

/// 消息记录 / Message record
///
/// 持久层拥有该实体，本层只迁移 `status`
/// Owned by the durable layer; this layer only transitions `status`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub author_id: Option<UserId>,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Option<String>,
    pub payload: Option<Value>,
    pub status: MessageStatus,
    pub ts: DateTime<Utc>,
}

/// 新建消息参数 / New message parameters
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub author_id: Option<UserId>,
    pub kind: String,
    pub content: Option<String>,
    pub payload: Option<Value>,
}
