use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::UserId;
use crate::server::{ConnectionHandle, VChatServer};
use crate::ws::auth::Authenticator;

use super::ClientFrame;

/// 处理新连接 / Handle a new connection
///
/// 鉴权 → 注册 → 事件转发；断开（无论优雅与否）都会注销并在
/// 末条连接时退订，清理不阻塞其他连接
/// Authenticate → register → forward events; any disconnect deregisters and,
/// on the last connection, unsubscribes without blocking other connections
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    server: Arc<VChatServer>,
) -> Result<()> {
    info!("📨 New connection from: {}", peer_addr);

    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn_id = Uuid::new_v4().to_string();

    let conn_id_clone = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(&msg, Message::Close(_));
            if let Err(e) = ws_sender.send(msg).await {
                debug!("failed to send to {}: {}", conn_id_clone, e);
                break;
            }
            if is_close {
                let _ = ws_sender.close().await;
                break;
            }
        }
    });

    let _ = tx.send(control_frame(
        "connected",
        serde_json::json!({ "conn_id": conn_id }),
    ));

    // 授权看门狗：期限内未鉴权则踢出 / Auth watchdog: drop the socket unless auth lands in time
    let authed_user = Arc::new(AtomicI64::new(0));
    {
        let watchdog_user = authed_user.clone();
        let watchdog_tx = tx.clone();
        let watchdog_conn = conn_id.clone();
        let deadline_ms = server.auth_deadline_ms;
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(deadline_ms)).await;
            if watchdog_user.load(Ordering::SeqCst) == 0 {
                warn!("disconnecting unauthenticated conn_id={}", watchdog_conn);
                let _ = watchdog_tx.send(Message::Close(None));
            }
        });
    }

    let mut user_id: Option<UserId> = None;
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(message) => {
                if let Err(e) = handle_incoming(
                    &server,
                    message,
                    &conn_id,
                    peer_addr,
                    &tx,
                    &mut user_id,
                    &authed_user,
                )
                .await
                {
                    tracing::error!("Error handling frame from {}: {}", conn_id, e);
                }
            }
            Err(e) => {
                debug!("WebSocket error from {}: {}", conn_id, e);
                break;
            }
        }
    }

    send_task.abort();
    if let Some(user_id) = user_id {
        let last = server.registry.deregister(user_id, &conn_id);
        if last {
            server.release_user_subscription(user_id);
        }
        info!("👋 Client {} (user {}) disconnected", conn_id, user_id);
    } else {
        info!("👋 Client {} disconnected before auth", conn_id);
    }
    Ok(())
}

async fn handle_incoming(
    server: &Arc<VChatServer>,
    message: Message,
    conn_id: &str,
    peer_addr: SocketAddr,
    tx: &mpsc::UnboundedSender<Message>,
    user_id: &mut Option<UserId>,
    authed_user: &Arc<AtomicI64>,
) -> Result<()> {
    let text = match message {
        Message::Text(text) => text,
        Message::Close(frame) => {
            debug!("🔒 Client {} requested close: {:?}", conn_id, frame);
            return Ok(());
        }
        Message::Ping(_) | Message::Pong(_) => return Ok(()),
        _ => return Ok(()),
    };

    let frame = match serde_json::from_str::<ClientFrame>(&text) {
        Ok(frame) => frame,
        Err(_) => {
            let _ = tx.send(error_frame("invalid json"));
            return Ok(());
        }
    };

    match frame.kind.as_str() {
        "auth" => {
            let token = frame.data.get("token").and_then(|v| v.as_str()).unwrap_or("");
            match server.authenticator.authenticate(token).await? {
                Some(uid) => {
                    *user_id = Some(uid);
                    authed_user.store(uid, Ordering::SeqCst);
                    let first = server.registry.register(ConnectionHandle {
                        conn_id: conn_id.to_string(),
                        user_id: uid,
                        addr: peer_addr,
                        sender: tx.clone(),
                        connected_at: Utc::now(),
                    });
                    if first {
                        server.ensure_user_subscription(uid).await;
                    }
                    info!("✅ Client {} authenticated as user {}", conn_id, uid);
                    let _ = tx.send(control_frame(
                        "auth_response",
                        serde_json::json!({ "status": "success", "user_id": uid }),
                    ));
                }
                None => {
                    warn!("🔐 auth failed for conn_id={}", conn_id);
                    let _ = tx.send(control_frame(
                        "auth_response",
                        serde_json::json!({ "status": "failed" }),
                    ));
                    let _ = tx.send(Message::Close(None));
                }
            }
        }
        "ping" => {
            debug!("🏓 Ping from {}", conn_id);
            let _ = tx.send(control_frame(
                "pong",
                serde_json::json!({ "timestamp": Utc::now().timestamp_millis() }),
            ));
        }
        other => {
            if user_id.is_none() {
                let _ = tx.send(error_frame("authentication required"));
            } else {
                warn!("⚠️  Unknown frame type from {}: {}", conn_id, other);
                let _ = tx.send(error_frame(&format!("unknown frame type: {}", other)));
            }
        }
    }
    Ok(())
}

fn control_frame(kind: &str, data: serde_json::Value) -> Message {
    Message::Text(
        serde_json::json!({ "type": kind, "data": data }).to_string(),
    )
}

fn error_frame(message: &str) -> Message {
    control_frame("error", serde_json::json!({ "message": message }))
}
