use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};

use crate::api::CurrentUser;
use crate::domain::ChatId;
use crate::error::{AppError, AppResult};
use crate::repo::ChatStore;
use crate::server::VChatServer;

pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(
        web::resource(format!("{}/{{chat_id}}/read", path))
            .route(web::post().to(mark_chat_read_handle)),
    );
}

/// 把会话内全部未读消息标记为已读，返回触达的消息ID
/// Mark every unread message in the chat as read; returns the touched ids
pub async fn mark_chat_read_handle(
    server: web::Data<Arc<VChatServer>>,
    user: CurrentUser,
    path: web::Path<ChatId>,
) -> AppResult<impl Responder> {
    let chat_id = path.into_inner();
    if !server.durable.is_member(chat_id, user.0).await? {
        return Err(AppError::access_denied("not a member of this chat"));
    }
    let message_ids = server.receipts.mark_read(chat_id, user.0).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message_ids": message_ids })))
}
