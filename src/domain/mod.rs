//! 领域模型 - 消息与事件 / Domain model - messages and events

pub mod event;
pub mod message;

pub use event::ChatEvent;
pub use message::{MessageRecord, MessageStatus, NewMessage};

/// 用户ID / User ID
pub type UserId = i64;
/// 会话ID / Chat ID
pub type ChatId = i64;
/// 消息ID / Message ID
pub type MessageId = i64;
