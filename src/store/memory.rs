//! 进程内临时态存储 / In-process ephemeral store
//!
//! 测试与单机部署的默认后端；语义对齐Redis：
//! Default backend for tests and single-node runs; semantics mirror Redis:
//! 过期惰性判定、条件写入原子性、广播通道无积压
//! lazy expiry, atomic conditional writes, broadcast channels without backlog

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};

use super::{EphemeralStore, StoreResult, Subscription};

/// 每个频道的广播缓冲上限；落后的订阅者丢帧而不是回放
/// Per-channel broadcast buffer; lagging subscribers drop frames, no replay
const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    /// 清除已过期条目，由后台清扫任务周期调用
    /// Purge expired entries, called periodically by the sweeper task
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
        }
        None
    }

    fn entry(value: &str, ttl: Option<Duration>) -> Entry {
        Entry {
            value: value.to_string(),
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        // entry API锁住分片，检查与写入不可分割 / entry API holds the shard lock, check+write indivisible
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(Self::entry(value, Some(ttl)));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Self::entry(value, Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn set_if_present(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.remove();
                    Ok(false)
                } else {
                    occupied.insert(Self::entry(value, Some(ttl)));
                    Ok(true)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(_) => Ok(false),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.entries
            .insert(key.to_string(), Self::entry(value, Some(ttl)));
        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.entries.insert(key.to_string(), Self::entry(value, None));
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.live_value(key))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn scan_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        if let Some(tx) = self.channels.get(channel) {
            // 无接收者时send失败：事件按契约被丢弃 / send fails with no receivers: dropped per contract
            let _ = tx.send(payload.to_string());
        }
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> StoreResult<Subscription> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let mut tasks = Vec::with_capacity(channels.len());
        for channel in channels {
            let mut rx = self
                .channels
                .entry(channel.clone())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe();
            let tx = out_tx.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(payload) => {
                            if tx.send(payload).is_err() {
                                break;
                            }
                        }
                        // 落后即丢帧，保持至多一次语义 / lagged means dropped frames, at-most-once holds
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }
        Ok(Subscription::new(out_rx, tasks))
    }
}
