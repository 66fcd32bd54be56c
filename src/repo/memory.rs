//! 内存会话存储 / In-memory chat store
//!
//! 测试与无数据库开发模式的替身；工作单元直接落在共享状态上，
//! commit为空操作（测试不验证回滚保真度）
//! Test double and databaseless dev fallback; the unit of work applies
//! straight to shared state and commit is a no-op (tests do not exercise
//! rollback fidelity)

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

use crate::domain::{ChatId, MessageId, MessageRecord, MessageStatus, NewMessage, UserId};

use super::{ChatStore, ChatUnitOfWork, DurableError, DurableResult};

#[derive(Default)]
struct State {
    chats: HashMap<ChatId, Vec<UserId>>,
    messages: BTreeMap<MessageId, MessageRecord>,
    deleted: HashSet<MessageId>,
    read_marks: HashSet<(MessageId, UserId)>,
    reactions: HashSet<(MessageId, UserId, String)>,
    next_chat_id: ChatId,
    next_message_id: MessageId,
}

#[derive(Clone, Default)]
pub struct MemoryChatStore {
    state: Arc<Mutex<State>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 建立带成员的会话 / Create a chat with the given members
    pub fn create_chat(&self, participants: &[UserId]) -> ChatId {
        let mut state = self.state.lock();
        state.next_chat_id += 1;
        let id = state.next_chat_id;
        state.chats.insert(id, participants.to_vec());
        id
    }

    /// 成员退出会话 / Remove a member from a chat
    pub fn remove_participant(&self, chat_id: ChatId, user_id: UserId) {
        let mut state = self.state.lock();
        if let Some(members) = state.chats.get_mut(&chat_id) {
            members.retain(|&u| u != user_id);
        }
    }
}

fn live_message(state: &State, id: MessageId) -> Option<MessageRecord> {
    if state.deleted.contains(&id) {
        return None;
    }
    state.messages.get(&id).cloned()
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn begin(&self) -> DurableResult<Box<dyn ChatUnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            state: self.state.clone(),
        }))
    }

    async fn chat_participants(&self, chat_id: ChatId) -> DurableResult<Vec<UserId>> {
        Ok(self
            .state
            .lock()
            .chats
            .get(&chat_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn is_member(&self, chat_id: ChatId, user_id: UserId) -> DurableResult<bool> {
        Ok(self
            .state
            .lock()
            .chats
            .get(&chat_id)
            .map(|m| m.contains(&user_id))
            .unwrap_or(false))
    }

    async fn get_message(&self, id: MessageId) -> DurableResult<Option<MessageRecord>> {
        Ok(live_message(&self.state.lock(), id))
    }

    async fn create_message(&self, new: NewMessage) -> DurableResult<MessageRecord> {
        let mut state = self.state.lock();
        if !state.chats.contains_key(&new.chat_id) {
            return Err(DurableError::NotFound("chat"));
        }
        state.next_message_id += 1;
        let record = MessageRecord {
            id: state.next_message_id,
            chat_id: new.chat_id,
            author_id: new.author_id,
            kind: new.kind,
            content: new.content,
            payload: new.payload,
            status: MessageStatus::Delivered,
            ts: Utc::now(),
        };
        state.messages.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_message(
        &self,
        id: MessageId,
        content: Option<String>,
        payload: Option<Value>,
    ) -> DurableResult<MessageRecord> {
        let mut state = self.state.lock();
        if state.deleted.contains(&id) {
            return Err(DurableError::NotFound("message"));
        }
        let message = state
            .messages
            .get_mut(&id)
            .ok_or(DurableError::NotFound("message"))?;
        if let Some(content) = content {
            message.content = Some(content);
        }
        if let Some(payload) = payload {
            message.payload = Some(payload);
        }
        Ok(message.clone())
    }

    async fn delete_message(&self, id: MessageId) -> DurableResult<()> {
        let mut state = self.state.lock();
        if !state.messages.contains_key(&id) || !state.deleted.insert(id) {
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
        let mut state = self.state.lock();
        if !state.messages.contains_key(&message_id) {
            return Err(DurableError::NotFound("message"));
        }
        Ok(state.reactions.insert((message_id, user_id, emoji.to_string())))
    }

    async fn remove_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> DurableResult<bool> {
        let mut state = self.state.lock();
        Ok(state.reactions.remove(&(message_id, user_id, emoji.to_string())))
    }
}

pub struct MemoryUnitOfWork {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl ChatUnitOfWork for MemoryUnitOfWork {
    async fn unread_message_ids(
        &mut self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> DurableResult<Vec<MessageId>> {
        let state = self.state.lock();
        Ok(state
            .messages
            .values()
            .filter(|m| {
                m.chat_id == chat_id
                    && !state.deleted.contains(&m.id)
                    && m.author_id.map(|a| a != user_id).unwrap_or(false)
                    && !state.read_marks.contains(&(m.id, user_id))
            })
            .map(|m| m.id)
            .collect())
    }

    async fn create_read_mark(
        &mut self,
        message_id: MessageId,
        user_id: UserId,
    ) -> DurableResult<bool> {
        Ok(self.state.lock().read_marks.insert((message_id, user_id)))
    }

    async fn read_mark_count(&mut self, message_id: MessageId) -> DurableResult<u64> {
        Ok(self
            .state
            .lock()
            .read_marks
            .iter()
            .filter(|(m, _)| *m == message_id)
            .count() as u64)
    }

    async fn chat_participants(&mut self, chat_id: ChatId) -> DurableResult<Vec<UserId>> {
        Ok(self
            .state
            .lock()
            .chats
            .get(&chat_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_message(&mut self, id: MessageId) -> DurableResult<Option<MessageRecord>> {
        Ok(live_message(&self.state.lock(), id))
    }

    async fn set_message_status(
        &mut self,
        id: MessageId,
        status: MessageStatus,
    ) -> DurableResult<bool> {
        let mut state = self.state.lock();
        match state.messages.get_mut(&id) {
            Some(m) if m.status == MessageStatus::Delivered && m.status != status => {
                m.status = status;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    async fn commit(self: Box<Self>) -> DurableResult<()> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DurableResult<()> {
        Ok(())
    }
}
