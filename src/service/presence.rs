//! 在线状态追踪 / Presence tracking
//!
//! 心跳续租300s TTL；键消失即离线，被动过期不产生事件，
//! 读取方必须以读取时刻的键存在性为准
//! Heartbeats renew a 300s TTL; a missing key IS offline, passive expiry
//! fires no event, readers trust key presence at read time

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::domain::{ChatEvent, UserId};
use crate::store::{EphemeralStore, StoreResult};

const ONLINE: &str = "online";
const OFFLINE: &str = "offline";

use super::EventRouter;

#[derive(Clone, Debug, Serialize)]
pub struct PresenceStatus {
    pub user_id: UserId,
    pub status: String,
    pub last_seen: Option<DateTime<Utc>>,
}

pub struct PresenceTracker {
    store: Arc<dyn EphemeralStore>,
    router: Arc<EventRouter>,
    online_ttl: Duration,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn EphemeralStore>, router: Arc<EventRouter>, online_ttl: Duration) -> Self {
        Self {
            store,
            router,
            online_ttl,
        }
    }

    fn presence_key(user_id: UserId) -> String {
        format!("presence:user:{}", user_id)
    }

    fn last_seen_key(user_id: UserId) -> String {
        format!("presence:last_seen:{}", user_id)
    }

    /// 续租在线状态并记录last_seen / Renew the online lease and record last_seen
    ///
    /// 仅在离线→在线的边沿广播事件，平稳心跳保持安静
    /// Broadcasts only on the offline→online edge; steady heartbeats stay quiet
    pub async fn heartbeat(&self, user_id: UserId) -> StoreResult<()> {
        let key = Self::presence_key(user_id);
        let now = Utc::now();
        let refreshed = self.store.set_if_present(&key, ONLINE, self.online_ttl).await?;
        if !refreshed {
            self.store.set_with_ttl(&key, ONLINE, self.online_ttl).await?;
            self.router
                .publish_presence(&ChatEvent::presence(user_id, ONLINE, Some(now)))
                .await;
        }
        // last_seen无TTL，离线后仍可展示 / last_seen carries no TTL, survives for display
        self.store
            .set(&Self::last_seen_key(user_id), &now.to_rfc3339())
            .await?;
        Ok(())
    }

    /// 显式下线 / Explicit go-offline
    ///
    /// 删除在线键并立即广播；被动TTL过期没有对应事件
    /// Deletes the lease and broadcasts immediately; passive expiry has no event
    pub async fn set_offline(&self, user_id: UserId) -> StoreResult<()> {
        self.store.delete(&Self::presence_key(user_id)).await?;
        let last_seen = self.read_last_seen(user_id).await;
        self.router
            .publish_presence(&ChatEvent::presence(user_id, OFFLINE, last_seen))
            .await;
        Ok(())
    }

    /// 读取状态；存储不可达时降级为离线 / Read status; degrades to offline when the store is down
    pub async fn get_status(&self, user_id: UserId) -> PresenceStatus {
        let online = match self.store.get(&Self::presence_key(user_id)).await {
            Ok(value) => value.is_some(),
            Err(e) => {
                warn!("presence read for user {} degraded to offline: {}", user_id, e);
                return PresenceStatus {
                    user_id,
                    status: OFFLINE.to_string(),
                    last_seen: None,
                };
            }
        };
        PresenceStatus {
            user_id,
            status: if online { ONLINE } else { OFFLINE }.to_string(),
            last_seen: self.read_last_seen(user_id).await,
        }
    }

    async fn read_last_seen(&self, user_id: UserId) -> Option<DateTime<Utc>> {
        match self.store.get(&Self::last_seen_key(user_id)).await {
            Ok(Some(raw)) => DateTime::parse_from_rfc3339(&raw)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            Ok(None) => None,
            Err(e) => {
                warn!("last_seen read for user {} failed: {}", user_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, PRESENCE_CHANNEL};

    fn tracker(store: Arc<MemoryStore>, ttl: Duration) -> PresenceTracker {
        let router = Arc::new(EventRouter::new(store.clone()));
        PresenceTracker::new(store, router, ttl)
    }

    #[tokio::test]
    async fn heartbeat_marks_online() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store, Duration::from_secs(300));
        tracker.heartbeat(7).await.unwrap();
        let status = tracker.get_status(7).await;
        assert_eq!(status.status, "online");
        assert!(status.last_seen.is_some());
    }

    #[tokio::test]
    async fn lease_expiry_means_offline_with_last_seen() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store, Duration::from_millis(40));
        tracker.heartbeat(7).await.unwrap();
        let before = tracker.get_status(7).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        let after = tracker.get_status(7).await;
        assert_eq!(after.status, "offline");
        assert_eq!(after.last_seen, before.last_seen);
    }

    #[tokio::test]
    async fn unknown_user_is_offline() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store, Duration::from_secs(300));
        let status = tracker.get_status(404).await;
        assert_eq!(status.status, "offline");
        assert!(status.last_seen.is_none());
    }

    #[tokio::test]
    async fn online_edge_publishes_once() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store.clone(), Duration::from_secs(300));
        let mut sub = store
            .subscribe(&[PRESENCE_CHANNEL.to_string()])
            .await
            .unwrap();

        tracker.heartbeat(7).await.unwrap();
        tracker.heartbeat(7).await.unwrap();
        tracker.set_offline(7).await.unwrap();

        let online: ChatEvent = serde_json::from_str(&sub.next().await.unwrap()).unwrap();
        assert_eq!(online.data["status"], "online");
        // 第二次心跳保持安静，下一条即离线事件 / second heartbeat is quiet, next frame is offline
        let offline: ChatEvent = serde_json::from_str(&sub.next().await.unwrap()).unwrap();
        assert_eq!(offline.data["status"], "offline");
    }
}
