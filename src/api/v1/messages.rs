use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::Deserialize;
use serde_json::Value;

use crate::api::{require_idempotency_key, CurrentUser};
use crate::domain::{MessageId, MessageRecord, NewMessage};
use crate::error::{AppError, AppResult};
use crate::repo::ChatStore;
use crate::server::VChatServer;
use crate::service::{Admission, TokenState};

#[derive(Debug, Deserialize)]
pub struct MessageCreate {
    pub chat_id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Option<String>,
    pub payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct MessageUpdate {
    pub content: Option<String>,
    pub payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ReactionBody {
    pub emoji: String,
}

pub fn register(cfg: &mut actix_web::web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::post().to(create_message_handle)));
    cfg.service(
        web::resource(format!("{}/{{message_id}}", path))
            .route(web::patch().to(update_message_handle))
            .route(web::delete().to(delete_message_handle)),
    );
    cfg.service(
        web::resource(format!("{}/{{message_id}}/reactions", path))
            .route(web::post().to(add_reaction_handle))
            .route(web::delete().to(remove_reaction_handle)),
    );
}

/// 同一令牌的重复请求换来确定性的冲突应答，绝不重复执行
/// A retried token yields a definitive conflict, never a second execution
async fn admit(server: &VChatServer, token: &str) -> AppResult<()> {
    match server.idempotency.begin(token).await? {
        Admission::Admitted => Ok(()),
        Admission::Rejected => {
            let message = match server.idempotency.peek(token).await? {
                TokenState::Completed => "request already completed",
                _ => "request still in progress",
            };
            Err(AppError::conflict(message))
        }
    }
}

pub async fn create_message_handle(
    server: web::Data<Arc<VChatServer>>,
    user: CurrentUser,
    payload: web::Json<MessageCreate>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let token = require_idempotency_key(&req)?;
    if !server.durable.is_member(payload.chat_id, user.0).await? {
        return Err(AppError::access_denied("not a member of this chat"));
    }
    admit(&server, &token).await?;
    let payload = payload.into_inner();
    let message = server
        .messages
        .create_message(NewMessage {
            chat_id: payload.chat_id,
            author_id: Some(user.0),
            kind: payload.kind,
            content: payload.content,
            payload: payload.payload,
        })
        .await?;
    // 失败时令牌停留在pending直至TTL，重试届时被当作新请求
    // On failure the token stays pending until TTL; a later retry counts as new
    server.idempotency.complete(&token).await?;
    Ok(HttpResponse::Created().json(message))
}

pub async fn update_message_handle(
    server: web::Data<Arc<VChatServer>>,
    user: CurrentUser,
    path: web::Path<MessageId>,
    payload: web::Json<MessageUpdate>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let token = require_idempotency_key(&req)?;
    let message = fetch_own_message(&server, path.into_inner(), user.0).await?;
    admit(&server, &token).await?;
    let payload = payload.into_inner();
    let message = server
        .messages
        .update_message(message.id, payload.content, payload.payload)
        .await?;
    server.idempotency.complete(&token).await?;
    Ok(HttpResponse::Ok().json(message))
}

pub async fn delete_message_handle(
    server: web::Data<Arc<VChatServer>>,
    user: CurrentUser,
    path: web::Path<MessageId>,
) -> AppResult<impl Responder> {
    let message = fetch_own_message(&server, path.into_inner(), user.0).await?;
    server.messages.delete_message(&message).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn add_reaction_handle(
    server: web::Data<Arc<VChatServer>>,
    user: CurrentUser,
    path: web::Path<MessageId>,
    body: web::Json<ReactionBody>,
) -> AppResult<impl Responder> {
    let message = fetch_visible_message(&server, path.into_inner(), user.0).await?;
    let added = server
        .messages
        .add_reaction(&message, user.0, &body.emoji)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "added": added })))
}

pub async fn remove_reaction_handle(
    server: web::Data<Arc<VChatServer>>,
    user: CurrentUser,
    path: web::Path<MessageId>,
    body: web::Json<ReactionBody>,
) -> AppResult<impl Responder> {
    let message = fetch_visible_message(&server, path.into_inner(), user.0).await?;
    let removed = server
        .messages
        .remove_reaction(&message, user.0, &body.emoji)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "removed": removed })))
}

/// 仅作者可改动自己的消息 / Only the author may touch their own message
async fn fetch_own_message(
    server: &VChatServer,
    message_id: MessageId,
    user_id: i64,
) -> AppResult<MessageRecord> {
    let message = server
        .durable
        .get_message(message_id)
        .await?
        .ok_or_else(|| AppError::not_found("message"))?;
    if message.author_id != Some(user_id) {
        return Err(AppError::access_denied("not the author of this message"));
    }
    Ok(message)
}

/// 会话成员可见 / Visible to chat members
async fn fetch_visible_message(
    server: &VChatServer,
    message_id: MessageId,
    user_id: i64,
) -> AppResult<MessageRecord> {
    let message = server
        .durable
        .get_message(message_id)
        .await?
        .ok_or_else(|| AppError::not_found("message"))?;
    if !server.durable.is_member(message.chat_id, user_id).await? {
        return Err(AppError::access_denied("not a member of this chat"));
    }
    Ok(message)
}
