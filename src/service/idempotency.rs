//! 幂等门 / Idempotency gate
//!
//! 以调用方提供的令牌为键，把变更请求包进恰好一次的信封。
//! 中心不变量：同一令牌并发begin至多放行一个。
//! Wraps a mutating request in an exactly-once envelope keyed by the
//! caller-supplied token. Central invariant: concurrent begins on one token
//! admit at most one caller.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::store::{EphemeralStore, StoreResult};

const KEY_PREFIX: &str = "idempotency";
const PENDING: &str = "pending";
const COMPLETED: &str = "completed";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenState {
    None,
    Pending,
    Completed,
}

pub struct IdempotencyGate {
    store: Arc<dyn EphemeralStore>,
    pending_ttl: Duration,
    retention: Duration,
}

impl IdempotencyGate {
    pub fn new(store: Arc<dyn EphemeralStore>, pending_ttl: Duration, retention: Duration) -> Self {
        Self {
            store,
            pending_ttl,
            retention,
        }
    }

    fn key(&self, token: &str) -> String {
        format!("{}:{}", KEY_PREFIX, token)
    }

    /// 原子检查并占据令牌 / Atomically check-and-claim the token
    ///
    /// 存储不可达时错误向上传播：准入失败关闭，绝不放任重复执行
    /// Store errors propagate: admission fails closed, duplicates never slip by
    pub async fn begin(&self, token: &str) -> StoreResult<Admission> {
        let claimed = self
            .store
            .set_if_absent(&self.key(token), PENDING, self.pending_ttl)
            .await?;
        Ok(if claimed {
            Admission::Admitted
        } else {
            Admission::Rejected
        })
    }

    /// 标记完成并延长保留期，使已完成请求的重试被识别为重复
    /// Mark completed and extend retention so retries of a finished request
    /// are recognized as duplicates
    pub async fn complete(&self, token: &str) -> StoreResult<()> {
        let updated = self
            .store
            .set_if_present(&self.key(token), COMPLETED, self.retention)
            .await?;
        if !updated {
            // pending已过期：下一次重试将被当作新请求 / pending expired: next retry counts as new
            debug!("idempotency token {} expired before completion", token);
        }
        Ok(())
    }

    pub async fn peek(&self, token: &str) -> StoreResult<TokenState> {
        Ok(match self.store.get(&self.key(token)).await?.as_deref() {
            Some(COMPLETED) => TokenState::Completed,
            Some(_) => TokenState::Pending,
            None => TokenState::None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::store::{MemoryStore, StoreError, Subscription};

    fn gate(store: Arc<dyn EphemeralStore>) -> IdempotencyGate {
        IdempotencyGate::new(store, Duration::from_secs(300), Duration::from_secs(86400))
    }

    #[tokio::test]
    async fn concurrent_begin_admits_exactly_one() {
        let store = Arc::new(MemoryStore::new());
        let gate = Arc::new(gate(store));
        let mut handles = Vec::new();
        for _ in 0..24 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                gate.begin("tok-race").await.unwrap()
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() == Admission::Admitted {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn completed_token_stays_rejected() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate(store);
        assert_eq!(gate.begin("tok-1").await.unwrap(), Admission::Admitted);
        gate.complete("tok-1").await.unwrap();
        assert_eq!(gate.begin("tok-1").await.unwrap(), Admission::Rejected);
        assert_eq!(gate.peek("tok-1").await.unwrap(), TokenState::Completed);
    }

    #[tokio::test]
    async fn expired_token_is_fresh() {
        let store = Arc::new(MemoryStore::new());
        let gate = IdempotencyGate::new(store, Duration::from_millis(30), Duration::from_secs(60));
        assert_eq!(gate.begin("tok-ttl").await.unwrap(), Admission::Admitted);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(gate.peek("tok-ttl").await.unwrap(), TokenState::None);
        assert_eq!(gate.begin("tok-ttl").await.unwrap(), Admission::Admitted);
    }

    #[tokio::test]
    async fn complete_after_expiry_does_not_resurrect() {
        let store: Arc<dyn EphemeralStore> = Arc::new(MemoryStore::new());
        let gate = IdempotencyGate::new(
            store.clone(),
            Duration::from_millis(20),
            Duration::from_secs(60),
        );
        gate.begin("tok-gone").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.complete("tok-gone").await.unwrap();
        assert_eq!(gate.peek("tok-gone").await.unwrap(), TokenState::None);
    }

    /// 存储失联的替身 / Stand-in for an unreachable store
    struct DownStore;

    #[async_trait]
    impl EphemeralStore for DownStore {
        async fn set_if_absent(&self, _: &str, _: &str, _: Duration) -> StoreResult<bool> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn set_if_present(&self, _: &str, _: &str, _: Duration) -> StoreResult<bool> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn set_with_ttl(&self, _: &str, _: &str, _: Duration) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn set(&self, _: &str, _: &str) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn get(&self, _: &str) -> StoreResult<Option<String>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn delete(&self, _: &str) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn scan_keys(&self, _: &str) -> StoreResult<Vec<String>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn publish(&self, _: &str, _: &str) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn subscribe(&self, _: &[String]) -> StoreResult<Subscription> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn unreachable_store_fails_closed() {
        let gate = gate(Arc::new(DownStore));
        assert!(gate.begin("tok-down").await.is_err());
    }
}
