//! 连接注册表 / Connection registry
//!
//! 进程内用户到活跃连接集合的映射；显式注入的实例，内部自带同步，
//! 绝不做进程级单例
//! Per-process map from user to live connections; an explicitly injected
//! instance with internal synchronization, never a process-wide singleton

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::domain::UserId;

/// 单条连接信息 / A single connection
#[derive(Clone)]
pub struct ConnectionHandle {
    pub conn_id: String,
    pub user_id: UserId,
    pub addr: SocketAddr,
    pub sender: mpsc::UnboundedSender<Message>,
    pub connected_at: DateTime<Utc>,
}

/// 用户 → 连接集合；一个用户可同时挂多台设备
/// User → connection set; one user may hold several devices at once
pub struct ConnectionRegistry {
    connections: DashMap<UserId, DashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// 注册连接；返回是否为该用户的首条连接
    /// Register; returns whether this is the user's first connection
    pub fn register(&self, handle: ConnectionHandle) -> bool {
        let user_conns = self.connections.entry(handle.user_id).or_default();
        let first = user_conns.is_empty();
        user_conns.insert(handle.conn_id.clone(), handle);
        first
    }

    /// 注销连接；返回是否为该用户的最后一条连接
    /// Deregister; returns whether it was the user's last connection
    pub fn deregister(&self, user_id: UserId, conn_id: &str) -> bool {
        let mut last = false;
        if let Some(user_conns) = self.connections.get_mut(&user_id) {
            user_conns.remove(conn_id);
            last = user_conns.is_empty();
        }
        if last {
            self.connections.remove_if(&user_id, |_, conns| conns.is_empty());
        }
        last
    }

    /// 把载荷原样投给该用户的每条本地连接，顺带剔除已死的发送端
    /// Deliver the payload verbatim to every local connection of the user,
    /// pruning dead senders along the way
    pub fn deliver_local(&self, user_id: UserId, payload: &str) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        if let Some(user_conns) = self.connections.get(&user_id) {
            for conn in user_conns.iter() {
                if conn
                    .sender
                    .send(Message::Text(payload.to_string()))
                    .is_ok()
                {
                    delivered += 1;
                } else {
                    dead.push(conn.conn_id.clone());
                }
            }
        }
        if !dead.is_empty() {
            for conn_id in &dead {
                self.deregister(user_id, conn_id);
            }
            debug!("pruned {} dead connections for user {}", dead.len(), user_id);
        }
        delivered
    }

    pub fn connections_for(&self, user_id: UserId) -> usize {
        self.connections
            .get(&user_id)
            .map(|conns| conns.len())
            .unwrap_or(0)
    }

    pub fn user_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.iter().map(|e| e.value().len()).sum()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(user_id: UserId, conn_id: &str) -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ConnectionHandle {
                conn_id: conn_id.to_string(),
                user_id,
                addr: "127.0.0.1:9999".parse().unwrap(),
                sender: tx,
                connected_at: Utc::now(),
            },
            rx,
        )
    }

    #[test]
    fn first_and_last_accounting() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = handle(1, "a");
        let (b, _rx_b) = handle(1, "b");
        assert!(registry.register(a));
        assert!(!registry.register(b));
        assert!(!registry.deregister(1, "a"));
        assert!(registry.deregister(1, "b"));
        assert_eq!(registry.user_count(), 0);
    }

    #[test]
    fn delivers_to_every_device() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = handle(1, "a");
        let (b, mut rx_b) = handle(1, "b");
        registry.register(a);
        registry.register(b);

        assert_eq!(registry.deliver_local(1, "ping"), 2);
        assert!(matches!(rx_a.try_recv().unwrap(), Message::Text(t) if t == "ping"));
        assert!(matches!(rx_b.try_recv().unwrap(), Message::Text(t) if t == "ping"));
        assert_eq!(registry.deliver_local(2, "nobody"), 0);
    }

    #[test]
    fn dead_senders_are_pruned() {
        let registry = ConnectionRegistry::new();
        let (a, rx_a) = handle(1, "a");
        registry.register(a);
        drop(rx_a);
        assert_eq!(registry.deliver_local(1, "gone"), 0);
        assert_eq!(registry.connections_for(1), 0);
    }
}
