use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

use crate::server::VChatServer;

/// 启动WS监听 / Start the WS listener
pub async fn run(server: Arc<VChatServer>, host: String, port: u16) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🚀 v-chat-realtime WebSocket server starting on {}", addr);
    info!("📡 Waiting for connections...");

    while let Ok((stream, peer_addr)) = listener.accept().await {
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = super::connection::handle_connection(stream, peer_addr, server).await {
                tracing::error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }

    Ok(())
}
