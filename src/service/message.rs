//! 消息生命周期 / Message lifecycle
//!
//! 持久提交在前，事件扇出在后；扇出失败不回滚已提交的变更
//! Durable commit first, fan-out second; a fan-out failure never rolls back
//! a committed mutation

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::domain::{ChatEvent, ChatId, MessageId, MessageRecord, NewMessage, UserId};
use crate::error::{AppError, AppResult};
use crate::repo::ChatStore;

use super::EventRouter;

/// 语音消息载荷必填键 / Required keys of a voice message payload
const VOICE_REQUIRED_KEYS: [&str; 3] = ["attachment_id", "duration_ms", "codec"];

pub struct MessageService {
    durable: Arc<dyn ChatStore>,
    router: Arc<EventRouter>,
}

impl MessageService {
    pub fn new(durable: Arc<dyn ChatStore>, router: Arc<EventRouter>) -> Self {
        Self { durable, router }
    }

    pub async fn create_message(&self, new: NewMessage) -> AppResult<MessageRecord> {
        validate_payload(&new.kind, new.payload.as_ref())?;
        let message = self.durable.create_message(new).await?;
        self.fan_out(message.chat_id, ChatEvent::message_created(&message))
            .await;
        Ok(message)
    }

    pub async fn update_message(
        &self,
        id: MessageId,
        content: Option<String>,
        payload: Option<Value>,
    ) -> AppResult<MessageRecord> {
        if let Some(payload) = payload.as_ref() {
            let kind = self
                .durable
                .get_message(id)
                .await?
                .ok_or_else(|| AppError::not_found("message"))?
                .kind;
            validate_payload(&kind, Some(payload))?;
        }
        let message = self.durable.update_message(id, content, payload).await?;
        self.fan_out(message.chat_id, ChatEvent::message_updated(&message))
            .await;
        Ok(message)
    }

    /// 软删除；已读状态不因删除而回退 / Soft delete; read status never resets
    pub async fn delete_message(&self, message: &MessageRecord) -> AppResult<()> {
        self.durable.delete_message(message.id).await?;
        self.fan_out(
            message.chat_id,
            ChatEvent::message_deleted(message.id, message.chat_id),
        )
        .await;
        Ok(())
    }

    pub async fn add_reaction(
        &self,
        message: &MessageRecord,
        user_id: UserId,
        emoji: &str,
    ) -> AppResult<bool> {
        let added = self.durable.add_reaction(message.id, user_id, emoji).await?;
        if added {
            self.fan_out(
                message.chat_id,
                ChatEvent::reaction_added(message.id, message.chat_id, user_id, emoji),
            )
            .await;
        }
        Ok(added)
    }

    pub async fn remove_reaction(
        &self,
        message: &MessageRecord,
        user_id: UserId,
        emoji: &str,
    ) -> AppResult<bool> {
        let removed = self
            .durable
            .remove_reaction(message.id, user_id, emoji)
            .await?;
        if removed {
            self.fan_out(
                message.chat_id,
                ChatEvent::reaction_removed(message.id, message.chat_id, user_id, emoji),
            )
            .await;
        }
        Ok(removed)
    }

    async fn fan_out(&self, chat_id: ChatId, event: ChatEvent) {
        match self.durable.chat_participants(chat_id).await {
            Ok(recipients) => self.router.publish(&event, &recipients).await,
            Err(e) => warn!("fan-out of {} for chat {} skipped: {}", event.event, chat_id, e),
        }
    }
}

fn validate_payload(kind: &str, payload: Option<&Value>) -> AppResult<()> {
    if kind != "voice" {
        return Ok(());
    }
    let keys = payload.and_then(|p| p.as_object());
    let missing: Vec<&str> = VOICE_REQUIRED_KEYS
        .iter()
        .filter(|k| !keys.map(|m| m.contains_key(**k)).unwrap_or(false))
        .copied()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::validation(
            "payload",
            format!("voice message payload missing keys: {}", missing.join(", ")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemoryChatStore;
    use crate::store::{user_channel, EphemeralStore, MemoryStore};

    fn fixture() -> (Arc<MemoryStore>, MemoryChatStore, MessageService) {
        let store = Arc::new(MemoryStore::new());
        let durable = MemoryChatStore::new();
        let router = Arc::new(EventRouter::new(store.clone()));
        let service = MessageService::new(Arc::new(durable.clone()), router);
        (store, durable, service)
    }

    fn text_message(chat_id: ChatId, author: UserId) -> NewMessage {
        NewMessage {
            chat_id,
            author_id: Some(author),
            kind: "text".to_string(),
            content: Some("hello".to_string()),
            payload: None,
        }
    }

    #[tokio::test]
    async fn create_fans_out_to_participants() {
        let (store, durable, service) = fixture();
        let chat = durable.create_chat(&[1, 2]);
        let mut sub = store.subscribe(&[user_channel(2)]).await.unwrap();

        let message = service.create_message(text_message(chat, 1)).await.unwrap();

        let event: ChatEvent = serde_json::from_str(&sub.next().await.unwrap()).unwrap();
        assert_eq!(event.event, "message.created");
        assert_eq!(event.data["id"], message.id);
        assert_eq!(event.data["status"], "delivered");
    }

    #[tokio::test]
    async fn voice_payload_is_validated() {
        let (_, durable, service) = fixture();
        let chat = durable.create_chat(&[1, 2]);
        let result = service
            .create_message(NewMessage {
                chat_id: chat,
                author_id: Some(1),
                kind: "voice".to_string(),
                content: None,
                payload: Some(serde_json::json!({"attachment_id": 5})),
            })
            .await;
        match result {
            Err(AppError::Validation { message, .. }) => {
                assert!(message.contains("codec"));
                assert!(message.contains("duration_ms"));
            }
            other => panic!("expected validation error, got {:?}", other.map(|m| m.id)),
        }
    }

    #[tokio::test]
    async fn reactions_are_idempotent_per_emoji() {
        let (_, durable, service) = fixture();
        let chat = durable.create_chat(&[1, 2]);
        let message = service.create_message(text_message(chat, 1)).await.unwrap();

        assert!(service.add_reaction(&message, 2, "👍").await.unwrap());
        assert!(!service.add_reaction(&message, 2, "👍").await.unwrap());
        assert!(service.remove_reaction(&message, 2, "👍").await.unwrap());
        assert!(!service.remove_reaction(&message, 2, "👍").await.unwrap());
    }

    #[tokio::test]
    async fn delete_emits_deleted_event() {
        let (store, durable, service) = fixture();
        let chat = durable.create_chat(&[1, 2]);
        let message = service.create_message(text_message(chat, 1)).await.unwrap();
        let mut sub = store.subscribe(&[user_channel(1)]).await.unwrap();

        service.delete_message(&message).await.unwrap();

        let event: ChatEvent = serde_json::from_str(&sub.next().await.unwrap()).unwrap();
        assert_eq!(event.event, "message.deleted");
        assert!(durable.get_message(message.id).await.unwrap().is_none());
    }
}
