//! Redis临时态存储后端 / Redis ephemeral store backend
//!
//! 条件写入映射为 `SET NX/XX EX`，订阅走独立的pub/sub连接
//! Conditional writes map onto `SET NX/XX EX`; subscriptions use a dedicated
//! pub/sub connection per subscriber

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use super::{EphemeralStore, StoreError, StoreResult, Subscription};

pub struct RedisStore {
    client: redis::Client,
    conn: Arc<Mutex<MultiplexedConnection>>,
}

impl RedisStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(store_err)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_err)?;
        Ok(Self {
            client,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 探活 / Liveness probe
    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        let _: String = redis::cmd("PING")
            .query_async::<_, String>(&mut *conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn set_conditional(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        flag: &str,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.lock().await;
        let outcome: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg(flag)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, Option<String>>(&mut *conn)
            .await
            .map_err(store_err)?;
        Ok(outcome.is_some())
    }
}

fn store_err(e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

#[async_trait]
impl EphemeralStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.set_conditional(key, value, ttl, "NX").await
    }

    async fn set_if_present(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.set_conditional(key, value, ttl, "XX").await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .arg(value)
            .query_async::<_, ()>(&mut *conn)
            .await
            .map_err(store_err)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<_, ()>(&mut *conn)
            .await
            .map_err(store_err)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.lock().await;
        redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut *conn)
            .await
            .map_err(store_err)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut *conn)
            .await
            .map_err(store_err)
    }

    async fn scan_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let pattern = format!("{}*", prefix);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        let mut conn = self.conn.lock().await;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async::<_, (u64, Vec<String>)>(&mut *conn)
                .await
                .map_err(store_err)?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<_, ()>(&mut *conn)
            .await
            .map_err(store_err)
    }

    async fn subscribe(&self, channels: &[String]) -> StoreResult<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(store_err)?;
        for channel in channels {
            pubsub.subscribe(channel).await.map_err(store_err)?;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("dropping undecodable pub/sub payload: {}", e),
                }
            }
        });
        Ok(Subscription::new(rx, vec![task]))
    }
}
