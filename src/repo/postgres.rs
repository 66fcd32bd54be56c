//! PostgreSQL会话存储 / PostgreSQL chat store

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::info;

use crate::domain::{ChatId, MessageId, MessageRecord, MessageStatus, NewMessage, UserId};

use super::{ChatStore, ChatUnitOfWork, DurableError, DurableResult};

const INIT_SQL: &str = include_str!("../../migrations/001_init.sql");

const MESSAGE_COLUMNS: &str = "id, chat_id, author_id, type, content, payload, status, ts";

pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub async fn connect(url: &str, max_connections: u32) -> DurableResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// 应用内置迁移 / Apply bundled migrations
    pub async fn migrate(&self) -> DurableResult<()> {
        sqlx::raw_sql(INIT_SQL).execute(&self.pool).await?;
        info!("📦 durable store migrations applied");
        Ok(())
    }
}

fn row_to_message(row: &PgRow) -> DurableResult<MessageRecord> {
    let status: String = row.try_get("status").map_err(DurableError::Database)?;
    let status = MessageStatus::parse(&status)
        .ok_or_else(|| DurableError::Database(sqlx::Error::Decode(
            format!("unknown message status: {}", status).into(),
        )))?;
    Ok(MessageRecord {
        id: row.try_get("id").map_err(DurableError::Database)?,
        chat_id: row.try_get("chat_id").map_err(DurableError::Database)?,
        author_id: row.try_get("author_id").map_err(DurableError::Database)?,
        kind: row.try_get("type").map_err(DurableError::Database)?,
        content: row.try_get("content").map_err(DurableError::Database)?,
        payload: row.try_get("payload").map_err(DurableError::Database)?,
        status,
        ts: row.try_get("ts").map_err(DurableError::Database)?,
    })
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn begin(&self) -> DurableResult<Box<dyn ChatUnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn chat_participants(&self, chat_id: ChatId) -> DurableResult<Vec<UserId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM chat_members WHERE chat_id = $1 ORDER BY user_id",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn is_member(&self, chat_id: ChatId, user_id: UserId) -> DurableResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM chat_members WHERE chat_id = $1 AND user_id = $2)",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn get_message(&self, id: MessageId) -> DurableResult<Option<MessageRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1 AND is_deleted = FALSE"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn create_message(&self, new: NewMessage) -> DurableResult<MessageRecord> {
        let row = sqlx::query(&format!(
            "INSERT INTO messages (chat_id, author_id, type, content, payload) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(new.chat_id)
        .bind(new.author_id)
        .bind(&new.kind)
        .bind(&new.content)
        .bind(&new.payload)
        .fetch_one(&self.pool)
        .await?;
        row_to_message(&row)
    }

    async fn update_message(
        &self,
        id: MessageId,
        content: Option<String>,
        payload: Option<Value>,
    ) -> DurableResult<MessageRecord> {
        let row = sqlx::query(&format!(
            "UPDATE messages SET content = COALESCE($2, content), \
             payload = COALESCE($3, payload), updated_at = now() \
             WHERE id = $1 AND is_deleted = FALSE RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(id)
        .bind(&content)
        .bind(&payload)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => row_to_message(&row),
            None => Err(DurableError::NotFound("message")),
        }
    }

    async fn delete_message(&self, id: MessageId) -> DurableResult<()> {
        let result = sqlx::query(
            "UPDATE messages SET is_deleted = TRUE, deleted_at = now() \
             WHERE id = $1 AND is_deleted = FALSE",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DurableError::NotFound("message"));
        }
        Ok(())
    }

    async fn add_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> DurableResult<bool> {
        let result = sqlx::query(
            "INSERT INTO message_reactions (message_id, user_id, emoji) VALUES ($1, $2, $3) \
             ON CONFLICT (message_id, user_id, emoji) DO NOTHING",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> DurableResult<bool> {
        let result = sqlx::query(
            "DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ChatUnitOfWork for PgUnitOfWork {
    async fn unread_message_ids(
        &mut self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> DurableResult<Vec<MessageId>> {
        // 自己的消息不计入未读 / own messages never count as unread
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM messages \
             WHERE chat_id = $1 AND is_deleted = FALSE AND author_id <> $2 \
             AND id NOT IN (SELECT message_id FROM message_reads WHERE user_id = $2) \
             ORDER BY id",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids)
    }

    async fn create_read_mark(
        &mut self,
        message_id: MessageId,
        user_id: UserId,
    ) -> DurableResult<bool> {
        let result = sqlx::query(
            "INSERT INTO message_reads (message_id, user_id) VALUES ($1, $2) \
             ON CONFLICT (message_id, user_id) DO NOTHING",
        )
        .bind(message_id)
        .bind(user_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn read_mark_count(&mut self, message_id: MessageId) -> DurableResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM message_reads WHERE message_id = $1",
        )
        .bind(message_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn chat_participants(&mut self, chat_id: ChatId) -> DurableResult<Vec<UserId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM chat_members WHERE chat_id = $1 ORDER BY user_id",
        )
        .bind(chat_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids)
    }

    async fn get_message(&mut self, id: MessageId) -> DurableResult<Option<MessageRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1 AND is_deleted = FALSE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn set_message_status(
        &mut self,
        id: MessageId,
        status: MessageStatus,
    ) -> DurableResult<bool> {
        // 只有delivered行可以被改写，迁移至多发生一次
        // Only a delivered row is rewritten, so the transition happens at most once
        let result = sqlx::query(
            "UPDATE messages SET status = $2 WHERE id = $1 AND status = 'delivered'",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> DurableResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DurableResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
