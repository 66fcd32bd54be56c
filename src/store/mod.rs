//! 临时态存储抽象 / Ephemeral state store abstraction
//!
//! 低延迟键值存储：原子条件写入、TTL过期、发布/订阅
//! Low-latency key/value store: atomic conditional set, TTL expiry, pub/sub
//!
//! 发布/订阅显式非持久：无积压、无重放、至多一次投递
//! Pub/sub is explicitly non-durable: no backlog, no replay, at-most-once

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis::RedisStore;

/// 临时态存储错误 / Ephemeral store error
///
/// 消费方按契约降级：存在性读取视为离线，幂等准入拒绝放行
/// Consumers degrade per contract: presence reads as offline, admission fails closed
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ephemeral store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// 临时态存储契约 / Ephemeral store contract
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// 原子检查并写入：仅当键不存在时写入并返回true / Atomic check-and-set: write only when absent
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// 仅当键仍存在时覆盖写入 / Overwrite only when the key still exists
    async fn set_if_present(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// 带TTL的无条件写入 / Unconditional write with TTL
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// 无TTL写入（如last_seen时间戳） / Write without TTL (e.g. last_seen timestamps)
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// 读取；过期键视为不存在 / Read; expired keys count as absent
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// 按前缀枚举存活键，即时快照 / Enumerate live keys by prefix, point-in-time snapshot
    async fn scan_keys(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// 发布到频道；无订阅者时事件被丢弃 / Publish; dropped when nobody is subscribed
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()>;

    /// 订阅一组频道 / Subscribe to a set of channels
    async fn subscribe(&self, channels: &[String]) -> StoreResult<Subscription>;
}

/// 订阅句柄 / Subscription handle
///
/// Drop时终止转发任务并退订
/// Dropping aborts the forwarding tasks and unsubscribes
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<String>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { rx, tasks }
    }

    /// 下一条载荷；所有转发任务结束后返回None / Next payload; None once every forwarder is gone
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// 用户专属推送频道名 / Per-user push channel name
pub fn user_channel(user_id: i64) -> String {
    format!("ws:user:{}", user_id)
}

/// 在线状态广播频道 / Presence broadcast channel
pub const PRESENCE_CHANNEL: &str = "ws:presence";
