//! 事件扇出路由 / Event fan-out router
//!
//! 每个接收者一个专属频道；投递尽力而为、至多一次，
//! 无连接订阅时事件被丢弃，持久对账走轮询路径
//! One dedicated channel per recipient; best-effort, at-most-once delivery;
//! events with no live subscriber are dropped, durable reconciliation polls

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{ChatEvent, UserId};
use crate::store::{user_channel, EphemeralStore, PRESENCE_CHANNEL};

pub struct EventRouter {
    store: Arc<dyn EphemeralStore>,
}

impl EventRouter {
    pub fn new(store: Arc<dyn EphemeralStore>) -> Self {
        Self { store }
    }

    /// 向每个接收者的频道发布事件 / Publish the event to every recipient's channel
    ///
    /// 同一进程对同一接收者保持发布顺序；发布失败记录后吞掉
    /// Per-recipient publish order holds within one origin process; publish
    /// failures are logged and swallowed
    pub async fn publish(&self, event: &ChatEvent, recipients: &[UserId]) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("failed to serialize event {}: {}", event.event, e);
                return;
            }
        };
        for &user_id in recipients {
            if let Err(e) = self.store.publish(&user_channel(user_id), &payload).await {
                warn!("fan-out of {} to user {} failed: {}", event.event, user_id, e);
            }
        }
        debug!("📣 published {} to {} recipients", event.event, recipients.len());
    }

    /// 在线状态事件走共享广播频道 / Presence events go over the shared broadcast channel
    pub async fn publish_presence(&self, event: &ChatEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("failed to serialize event {}: {}", event.event, e);
                return;
            }
        };
        if let Err(e) = self.store.publish(PRESENCE_CHANNEL, &payload).await {
            warn!("presence broadcast failed: {}", e);
        }
    }
}
