//! WebSocket连接面 / WebSocket connection plane

pub mod auth;
pub mod connection;
pub mod server;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 客户端入站帧 / Inbound client frame
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}
