//! 输入状态追踪 / Typing-indicator tracking
//!
//! 10s TTL自愈：调用方崩溃或断网时条目自行过期，但不会补发停止事件，
//! UI必须在同一窗口内本地过期指示器
//! 10s TTL self-heals: entries expire if the caller crashes, but no stop
//! event is ever synthesized — UIs must locally expire indicators within the
//! same window

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::domain::{ChatEvent, ChatId, UserId};
use crate::repo::ChatStore;
use crate::store::{EphemeralStore, StoreResult};

use super::EventRouter;

pub struct TypingTracker {
    store: Arc<dyn EphemeralStore>,
    durable: Arc<dyn ChatStore>,
    router: Arc<EventRouter>,
    typing_ttl: Duration,
}

impl TypingTracker {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        durable: Arc<dyn ChatStore>,
        router: Arc<EventRouter>,
        typing_ttl: Duration,
    ) -> Self {
        Self {
            store,
            durable,
            router,
            typing_ttl,
        }
    }

    fn key(chat_id: ChatId, user_id: UserId) -> String {
        format!("{}{}", Self::prefix(chat_id), user_id)
    }

    fn prefix(chat_id: ChatId) -> String {
        format!("typing:chat:{}:user:", chat_id)
    }

    pub async fn start_typing(&self, chat_id: ChatId, user_id: UserId) -> StoreResult<()> {
        self.store
            .set_with_ttl(&Self::key(chat_id, user_id), "typing", self.typing_ttl)
            .await?;
        self.broadcast(chat_id, user_id, true).await;
        Ok(())
    }

    /// 立即删除并广播停止；过期兜底只负责清键，不负责事件
    /// Immediate delete plus stop broadcast; expiry only clears the key,
    /// never emits
    pub async fn stop_typing(&self, chat_id: ChatId, user_id: UserId) -> StoreResult<()> {
        self.store.delete(&Self::key(chat_id, user_id)).await?;
        self.broadcast(chat_id, user_id, false).await;
        Ok(())
    }

    /// 当前正在输入的用户集合，即时快照、无顺序保证
    /// The set of currently-typing users; point-in-time, unordered
    pub async fn list_typing(&self, chat_id: ChatId) -> StoreResult<Vec<UserId>> {
        let prefix = Self::prefix(chat_id);
        let keys = self.store.scan_keys(&prefix).await?;
        Ok(keys
            .iter()
            .filter_map(|key| key.rsplit(':').next()?.parse::<UserId>().ok())
            .collect())
    }

    async fn broadcast(&self, chat_id: ChatId, user_id: UserId, is_typing: bool) {
        // 接收者来自只读的现任成员名单；取不到就放弃这条提示
        // Recipients come from the read-only current member list; skip the
        // hint if it cannot be resolved
        match self.durable.chat_participants(chat_id).await {
            Ok(recipients) => {
                self.router
                    .publish(&ChatEvent::typing(chat_id, user_id, is_typing), &recipients)
                    .await;
            }
            Err(e) => warn!("typing fan-out for chat {} skipped: {}", chat_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemoryChatStore;
    use crate::store::{user_channel, MemoryStore};

    fn fixture(ttl: Duration) -> (Arc<MemoryStore>, MemoryChatStore, TypingTracker) {
        let store = Arc::new(MemoryStore::new());
        let durable = MemoryChatStore::new();
        let router = Arc::new(EventRouter::new(store.clone()));
        let tracker = TypingTracker::new(store.clone(), Arc::new(durable.clone()), router, ttl);
        (store, durable, tracker)
    }

    #[tokio::test]
    async fn typing_set_reflects_live_entries() {
        let (_, durable, tracker) = fixture(Duration::from_secs(10));
        let chat = durable.create_chat(&[1, 2]);
        tracker.start_typing(chat, 1).await.unwrap();
        assert_eq!(tracker.list_typing(chat).await.unwrap(), vec![1]);
        tracker.stop_typing(chat, 1).await.unwrap();
        assert!(tracker.list_typing(chat).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn entries_expire_without_stop() {
        let (_, durable, tracker) = fixture(Duration::from_millis(40));
        let chat = durable.create_chat(&[1, 2]);
        tracker.start_typing(chat, 1).await.unwrap();
        assert_eq!(tracker.list_typing(chat).await.unwrap(), vec![1]);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(tracker.list_typing(chat).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn typing_sets_are_per_chat() {
        let (_, durable, tracker) = fixture(Duration::from_secs(10));
        let chat_a = durable.create_chat(&[1, 2]);
        let chat_b = durable.create_chat(&[1, 2]);
        tracker.start_typing(chat_a, 1).await.unwrap();
        assert!(tracker.list_typing(chat_b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_and_stop_reach_chat_members() {
        let (store, durable, tracker) = fixture(Duration::from_secs(10));
        let chat = durable.create_chat(&[1, 2]);
        let mut sub = store.subscribe(&[user_channel(2)]).await.unwrap();

        tracker.start_typing(chat, 1).await.unwrap();
        tracker.stop_typing(chat, 1).await.unwrap();

        let started: ChatEvent = serde_json::from_str(&sub.next().await.unwrap()).unwrap();
        assert_eq!(started.event, "user.typing");
        assert_eq!(started.data["is_typing"], true);
        let stopped: ChatEvent = serde_json::from_str(&sub.next().await.unwrap()).unwrap();
        assert_eq!(stopped.data["is_typing"], false);
    }
}
