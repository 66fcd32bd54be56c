use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};

use crate::api::CurrentUser;
use crate::domain::UserId;
use crate::error::AppResult;
use crate::server::VChatServer;

pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    // 固定段先注册，避免被{user_id}吞掉 / fixed segments first so {user_id} cannot shadow them
    cfg.service(web::resource(format!("{}/me", path)).route(web::get().to(my_presence_handle)));
    cfg.service(
        web::resource(format!("{}/heartbeat", path)).route(web::post().to(heartbeat_handle)),
    );
    cfg.service(
        web::resource(format!("{}/{{user_id}}", path)).route(web::get().to(user_presence_handle)),
    );
}

/// 自己的在线状态 / Own presence
pub async fn my_presence_handle(
    server: web::Data<Arc<VChatServer>>,
    user: CurrentUser,
) -> impl Responder {
    HttpResponse::Ok().json(server.presence.get_status(user.0).await)
}

/// 任意用户的在线状态；键不存在即权威离线
/// Any user's presence; a missing key is authoritative offline
pub async fn user_presence_handle(
    server: web::Data<Arc<VChatServer>>,
    path: web::Path<UserId>,
) -> impl Responder {
    HttpResponse::Ok().json(server.presence.get_status(path.into_inner()).await)
}

/// 心跳：续租在线状态 / Heartbeat: renew the online lease
pub async fn heartbeat_handle(
    server: web::Data<Arc<VChatServer>>,
    user: CurrentUser,
) -> AppResult<impl Responder> {
    server.presence.heartbeat(user.0).await?;
    Ok(HttpResponse::NoContent().finish())
}
