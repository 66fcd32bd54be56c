//! HTTP请求面 / HTTP request plane

pub mod v1;

use std::future::{ready, Ready};

use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest};

use crate::domain::UserId;
use crate::error::{AppError, AppResult};

/// 已鉴权的请求用户 / The authenticated request user
///
/// 令牌解码属于外部协作方；网关把身份放进该头部
/// Token decoding is an external collaborator; the gateway injects the
/// identity into this header
pub struct CurrentUser(pub UserId);

impl FromRequest for CurrentUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.headers()
                .get("X-User-Id")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<UserId>().ok())
                .filter(|id| *id > 0)
                .map(CurrentUser)
                .ok_or_else(|| AppError::auth("missing or invalid X-User-Id header")),
        )
    }
}

/// 变更请求必须携带幂等令牌 / Mutating requests must carry an idempotency token
pub fn require_idempotency_key(req: &HttpRequest) -> AppResult<String> {
    req.headers()
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| AppError::validation("Idempotency-Key", "header is required"))
}
