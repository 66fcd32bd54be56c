//! 服务端全局状态 / Server global state

pub mod registry;

pub use registry::{ConnectionHandle, ConnectionRegistry};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::domain::UserId;
use crate::repo::ChatStore;
use crate::service::{
    EventRouter, IdempotencyGate, MessageService, PresenceTracker, ReadReceiptAggregator,
    TypingTracker,
};
use crate::store::{user_channel, EphemeralStore, PRESENCE_CHANNEL};
use crate::ws::auth::{Authenticator, StaticAuthenticator};

/// 聚合全部核心服务的进程状态 / Process state aggregating every core service
pub struct VChatServer {
    pub registry: Arc<ConnectionRegistry>,
    pub ephemeral: Arc<dyn EphemeralStore>,
    pub durable: Arc<dyn ChatStore>,
    pub router: Arc<EventRouter>,
    pub idempotency: IdempotencyGate,
    pub receipts: ReadReceiptAggregator,
    pub presence: PresenceTracker,
    pub typing: TypingTracker,
    pub messages: MessageService,
    pub authenticator: Arc<dyn Authenticator>,
    pub auth_deadline_ms: u64,
    pub started_at: DateTime<Utc>,
    /// 每用户一个订阅泵；首连启动，末连撤销 / One pump per user; first connection starts it, last one stops it
    subscriptions: DashMap<UserId, JoinHandle<()>>,
}

impl VChatServer {
    pub fn new(
        config: &AppConfig,
        ephemeral: Arc<dyn EphemeralStore>,
        durable: Arc<dyn ChatStore>,
    ) -> Self {
        let router = Arc::new(EventRouter::new(ephemeral.clone()));
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            idempotency: IdempotencyGate::new(
                ephemeral.clone(),
                config.idempotency.pending_ttl(),
                config.idempotency.retention(),
            ),
            receipts: ReadReceiptAggregator::new(durable.clone(), router.clone()),
            presence: PresenceTracker::new(
                ephemeral.clone(),
                router.clone(),
                config.presence.online_ttl(),
            ),
            typing: TypingTracker::new(
                ephemeral.clone(),
                durable.clone(),
                router.clone(),
                config.presence.typing_ttl(),
            ),
            messages: MessageService::new(durable.clone(), router.clone()),
            authenticator: Arc::new(StaticAuthenticator),
            auth_deadline_ms: config.server.auth_deadline_ms,
            started_at: Utc::now(),
            subscriptions: DashMap::new(),
            ephemeral,
            durable,
            router,
        }
    }

    /// 配置鉴权实现 / Configure the authenticator
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// 确保该用户的频道订阅泵在运行 / Ensure the user's channel pump is running
    ///
    /// 订阅覆盖专属频道和在线状态广播；事件按字节原样转发给每条本地连接
    /// The subscription covers the user channel plus the presence broadcast;
    /// events are forwarded verbatim to every local connection
    pub async fn ensure_user_subscription(&self, user_id: UserId) {
        if self.subscriptions.contains_key(&user_id) {
            return;
        }
        let channels = vec![user_channel(user_id), PRESENCE_CHANNEL.to_string()];
        let mut subscription = match self.ephemeral.subscribe(&channels).await {
            Ok(subscription) => subscription,
            Err(e) => {
                // 实时提示降级；客户端的轮询对账路径不受影响
                // Live hints degrade; the client's polling reconciliation is unaffected
                warn!("subscription for user {} failed: {}", user_id, e);
                return;
            }
        };
        let registry = self.registry.clone();
        let pump = tokio::spawn(async move {
            while let Some(payload) = subscription.next().await {
                registry.deliver_local(user_id, &payload);
            }
        });
        match self.subscriptions.entry(user_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                // 并发注册抢先一步，保留既有泵 / a racing register won, keep the existing pump
                pump.abort();
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(pump);
                debug!("🔔 subscription pump started for user {}", user_id);
            }
        }
    }

    /// 撤销该用户的订阅泵 / Tear down the user's subscription pump
    pub fn release_user_subscription(&self, user_id: UserId) {
        if let Some((_, pump)) = self.subscriptions.remove(&user_id) {
            pump.abort();
            debug!("🔕 subscription pump stopped for user {}", user_id);
        }
    }

    pub fn has_subscription(&self, user_id: UserId) -> bool {
        self.subscriptions.contains_key(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    use crate::domain::ChatEvent;
    use crate::repo::MemoryChatStore;
    use crate::store::MemoryStore;

    fn server_fixture() -> (Arc<MemoryStore>, Arc<VChatServer>) {
        let store = Arc::new(MemoryStore::new());
        let config = crate::config::load(None).unwrap();
        let server = VChatServer::new(
            &config,
            store.clone(),
            Arc::new(MemoryChatStore::new()),
        );
        (store, Arc::new(server))
    }

    fn register(server: &VChatServer, user_id: UserId, conn_id: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        server.registry.register(ConnectionHandle {
            conn_id: conn_id.to_string(),
            user_id,
            addr,
            sender: tx,
            connected_at: Utc::now(),
        });
        rx
    }

    #[tokio::test]
    async fn pump_forwards_published_events_to_connections() {
        let (store, server) = server_fixture();
        let mut rx = register(&server, 7, "c1");
        server.ensure_user_subscription(7).await;

        let event = ChatEvent::chat_deleted(1);
        let payload = serde_json::to_string(&event).unwrap();
        store
            .publish(&crate::store::user_channel(7), &payload)
            .await
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(frame, Message::Text(t) if t == payload));
    }

    #[tokio::test]
    async fn released_subscription_stops_delivery() {
        let (store, server) = server_fixture();
        let mut rx = register(&server, 9, "c1");
        server.ensure_user_subscription(9).await;
        assert!(server.has_subscription(9));

        server.release_user_subscription(9);
        assert!(!server.has_subscription(9));
        tokio::time::sleep(Duration::from_millis(20)).await;

        store
            .publish(&crate::store::user_channel(9), "late")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let (_, server) = server_fixture();
        let _rx = register(&server, 3, "c1");
        server.ensure_user_subscription(3).await;
        server.ensure_user_subscription(3).await;
        assert!(server.has_subscription(3));
    }
}
