use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;

use crate::api::CurrentUser;
use crate::domain::ChatId;
use crate::error::AppResult;
use crate::server::VChatServer;

#[derive(Debug, Deserialize)]
pub struct TypingIndicator {
    pub chat_id: ChatId,
    pub is_typing: bool,
}

pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::post().to(set_typing_handle)));
    cfg.service(
        web::resource(format!("{}/{{chat_id}}", path)).route(web::get().to(list_typing_handle)),
    );
}

/// 设置/撤销输入指示 / Raise or clear the typing indicator
pub async fn set_typing_handle(
    server: web::Data<Arc<VChatServer>>,
    user: CurrentUser,
    payload: web::Json<TypingIndicator>,
) -> AppResult<impl Responder> {
    if payload.is_typing {
        server.typing.start_typing(payload.chat_id, user.0).await?;
    } else {
        server.typing.stop_typing(payload.chat_id, user.0).await?;
    }
    Ok(HttpResponse::NoContent().finish())
}

/// 正在输入的用户快照 / Snapshot of currently-typing users
pub async fn list_typing_handle(
    server: web::Data<Arc<VChatServer>>,
    path: web::Path<ChatId>,
) -> AppResult<impl Responder> {
    let users = server.typing.list_typing(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(users))
}
