use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use v_chat_realtime::config::{self, AppConfig};
use v_chat_realtime::repo::{ChatStore, MemoryChatStore, PgChatStore};
use v_chat_realtime::store::{EphemeralStore, MemoryStore};
use v_chat_realtime::tasks::sweeper::spawn_sweeper_task;
use v_chat_realtime::{init_tracing, router, ws, VChatServer};

/// 命令行参数 / Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "v-chat-realtime WebSocket & HTTP server", long_about = None)]
struct Args {
    /// 配置文件路径 / Config file path
    #[arg(short = 'c', long = "config", default_value = "config/default.toml")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    info!("🎯 Starting v-chat-realtime hybrid server (WebSocket + HTTP)...");

    let config = config::load(args.config.as_deref())?;
    if let Some(path) = &args.config {
        info!("🔧 Loaded config: {}", path);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ephemeral = build_ephemeral_store(&config, shutdown_rx).await?;
    let durable = build_durable_store(&config).await?;

    let server = Arc::new(VChatServer::new(&config, ephemeral, durable));

    // WS面与HTTP面共享同一份进程状态 / WS and HTTP planes share one state value
    let ws_server = server.clone();
    let ws_host = config.server.host.clone();
    let ws_port = config.server.ws_port;
    tokio::spawn(async move {
        if let Err(e) = ws::server::run(ws_server, ws_host, ws_port).await {
            tracing::error!("WebSocket server terminated: {}", e);
        }
    });

    let http_addr = format!("{}:{}", config.server.host, config.server.http_port);
    info!("🌐 HTTP server starting on http://{}", http_addr);
    info!("📡 Available HTTP endpoints:");
    info!("   POST /v1/messages - Create message (requires Idempotency-Key)");
    info!("   POST /v1/chats/{{chat_id}}/read - Mark chat as read");
    info!("   POST /v1/presence/heartbeat - Presence heartbeat");
    info!("   POST /v1/presence/typing - Typing indicator");
    info!("   GET  /v1/presence/typing/{{chat_id}} - Who is typing");
    info!("   GET  /v1/health - Basic health check");

    let http_state = web::Data::new(server.clone());
    HttpServer::new(move || {
        App::new()
            .app_data(http_state.clone())
            .configure(router::configure)
    })
    .bind(http_addr)?
    .run()
    .await?;

    let _ = shutdown_tx.send(true);
    Ok(())
}

async fn build_ephemeral_store(
    config: &AppConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<Arc<dyn EphemeralStore>> {
    match config.ephemeral.backend.as_str() {
        "redis" => {
            #[cfg(feature = "redis")]
            {
                let store = Arc::new(
                    v_chat_realtime::store::RedisStore::connect(&config.ephemeral.redis_url)
                        .await?,
                );
                store.ping().await?;
                info!("🗄️  Using Redis ephemeral store: {}", config.ephemeral.redis_url);
                let _ = shutdown_rx;
                Ok(store)
            }
            #[cfg(not(feature = "redis"))]
            {
                warn!("Redis 功能未启用，回退到内存存储 / redis feature disabled, falling back to the memory store");
                Ok(memory_ephemeral_store(config, shutdown_rx))
            }
        }
        _ => {
            info!("🗄️  Using in-process memory ephemeral store");
            Ok(memory_ephemeral_store(config, shutdown_rx))
        }
    }
}

fn memory_ephemeral_store(
    config: &AppConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> Arc<dyn EphemeralStore> {
    let store = Arc::new(MemoryStore::new());
    spawn_sweeper_task(store.clone(), config.ephemeral.sweep_interval_ms, shutdown_rx);
    store
}

async fn build_durable_store(config: &AppConfig) -> Result<Arc<dyn ChatStore>> {
    if config.database.url.is_empty() {
        warn!("database.url 未配置，使用内存会话存储 / database.url not set, using the in-memory chat store");
        return Ok(Arc::new(MemoryChatStore::new()));
    }
    let store = PgChatStore::connect(&config.database.url, config.database.max_connections).await?;
    store.migrate().await?;
    info!("🗄️  Connected to durable store");
    Ok(Arc::new(store))
}
