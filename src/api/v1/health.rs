use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;

use crate::server::VChatServer;
use crate::store::EphemeralStore;

pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(health_handle)));
}

// 基础健康检查 / Basic health check
pub async fn health_handle(server: web::Data<Arc<VChatServer>>) -> impl Responder {
    let uptime_secs = (Utc::now() - server.started_at).num_seconds();
    let ephemeral = match server.ephemeral.get("health:probe").await {
        Ok(_) => "ok",
        Err(_) => "degraded",
    };
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "uptime_secs": uptime_secs,
        "ephemeral": ephemeral,
        "users": server.registry.user_count(),
        "connections": server.registry.connection_count(),
    }))
}
