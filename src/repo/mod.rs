//! 持久层协作方契约 / Durable-store collaborator contract
//!
//! 事务性存储拥有消息与已读标记；本层只消费其表面
//! The transactional store owns messages and read marks; this layer only
//! consumes its surface

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{ChatId, MessageId, MessageRecord, MessageStatus, NewMessage, UserId};

pub mod memory;
pub mod postgres;

pub use memory::MemoryChatStore;
pub use postgres::PgChatStore;

#[derive(Debug, Error)]
pub enum DurableError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0} not found")]
    NotFound(&'static str),
}

pub type DurableResult<T> = Result<T, DurableError>;

/// 会话存储 / Chat store
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// 开启工作单元；已读聚合必须在单个事务内进行
    /// Open a unit of work; read aggregation runs inside one transaction
    async fn begin(&self) -> DurableResult<Box<dyn ChatUnitOfWork>>;

    async fn chat_participants(&self, chat_id: ChatId) -> DurableResult<Vec<UserId>>;

    async fn is_member(&self, chat_id: ChatId, user_id: UserId) -> DurableResult<bool>;

    async fn get_message(&self, id: MessageId) -> DurableResult<Option<MessageRecord>>;

    async fn create_message(&self, new: NewMessage) -> DurableResult<MessageRecord>;

    async fn update_message(
        &self,
        id: MessageId,
        content: Option<String>,
        payload: Option<Value>,
    ) -> DurableResult<MessageRecord>;

    /// 软删除；状态保持不变 / Soft delete; status is left untouched
    async fn delete_message(&self, id: MessageId) -> DurableResult<()>;

    /// 唯一约束吸收重复：已存在时返回false / Unique constraint absorbs duplicates: false when present
    async fn add_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> DurableResult<bool>;

    async fn remove_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> DurableResult<bool>;
}

/// 已读聚合的事务表面 / Transaction surface for read aggregation
#[async_trait]
pub trait ChatUnitOfWork: Send {
    /// 他人撰写且无本用户已读标记的消息 / Messages authored by others lacking this user's mark
    async fn unread_message_ids(
        &mut self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> DurableResult<Vec<MessageId>>;

    /// 幂等创建：(message, user)对已存在时返回false
    /// Idempotent create: false when the (message, user) pair already exists
    async fn create_read_mark(
        &mut self,
        message_id: MessageId,
        user_id: UserId,
    ) -> DurableResult<bool>;

    async fn read_mark_count(&mut self, message_id: MessageId) -> DurableResult<u64>;

    async fn chat_participants(&mut self, chat_id: ChatId) -> DurableResult<Vec<UserId>>;

    async fn get_message(&mut self, id: MessageId) -> DurableResult<Option<MessageRecord>>;

    /// 受保护的状态迁移：仅delivered行被改写，返回是否实际迁移
    /// Guarded transition: only a delivered row is rewritten; returns whether it happened
    async fn set_message_status(
        &mut self,
        id: MessageId,
        status: MessageStatus,
    ) -> DurableResult<bool>;

    async fn commit(self: Box<Self>) -> DurableResult<()>;

    async fn rollback(self: Box<Self>) -> DurableResult<()>;
}
