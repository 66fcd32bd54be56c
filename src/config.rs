//! 配置加载 / Configuration loading
//!
//! TOML文件 + `VCHAT__`前缀环境变量覆盖
//! TOML file plus `VCHAT__`-prefixed environment overrides

use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ephemeral: EphemeralConfig,
    pub database: DatabaseConfig,
    pub idempotency: IdempotencyConfig,
    pub presence: PresenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub ws_port: u16,
    pub http_port: u16,
    /// 连接后必须在该期限内完成鉴权，否则踢出 / Auth must land within this deadline or the socket is dropped
    pub auth_deadline_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EphemeralConfig {
    /// "memory" 或 "redis" / "memory" or "redis"
    pub backend: String,
    pub redis_url: String,
    pub sweep_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 为空时回退到内存存储 / Empty falls back to the in-memory store
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    pub pending_ttl_secs: u64,
    pub retention_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    pub online_ttl_secs: u64,
    pub typing_ttl_secs: u64,
}

impl IdempotencyConfig {
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl PresenceConfig {
    pub fn online_ttl(&self) -> Duration {
        Duration::from_secs(self.online_ttl_secs)
    }

    pub fn typing_ttl(&self) -> Duration {
        Duration::from_secs(self.typing_ttl_secs)
    }
}

pub fn load(path: Option<&str>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = Config::builder()
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.ws_port", 5300_i64)?
        .set_default("server.http_port", 8080_i64)?
        .set_default("server.auth_deadline_ms", 1000_i64)?
        .set_default("ephemeral.backend", "memory")?
        .set_default("ephemeral.redis_url", "redis://127.0.0.1:6379")?
        .set_default("ephemeral.sweep_interval_ms", 5000_i64)?
        .set_default("database.url", "")?
        .set_default("database.max_connections", 10_i64)?
        .set_default("idempotency.pending_ttl_secs", 300_i64)?
        .set_default("idempotency.retention_secs", 86400_i64)?
        .set_default("presence.online_ttl_secs", 300_i64)?
        .set_default("presence.typing_ttl_secs", 10_i64)?;
    if let Some(path) = path {
        builder = builder.add_source(File::with_name(path).required(false));
    }
    builder
        .add_source(Environment::with_prefix("VCHAT").separator("__"))
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_file() {
        let cfg = load(None).unwrap();
        assert_eq!(cfg.ephemeral.backend, "memory");
        assert_eq!(cfg.presence.typing_ttl(), Duration::from_secs(10));
        assert_eq!(cfg.idempotency.retention(), Duration::from_secs(86400));
        assert!(cfg.database.url.is_empty());
    }
}
