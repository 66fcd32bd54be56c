//! v-chat-realtime
//!
//! 聊天后端的实时投递与已读状态协调层：
//! 幂等门、已读回执聚合、在线/输入状态、事件扇出、连接注册表
//! The real-time delivery and read-state coordination layer of a chat
//! backend: idempotency gate, read-receipt aggregation, presence/typing,
//! event fan-out, connection registry

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod repo;
pub mod router;
pub mod server;
pub mod service;
pub mod store;
pub mod tasks;
pub mod ws;

pub use error::{AppError, AppResult};
pub use server::VChatServer;

use tracing_subscriber::EnvFilter;

/// 初始化日志 / Initialize logging
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .ok();
}
