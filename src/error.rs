use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::repo::DurableError;
use crate::store::StoreError;

/// 统一的应用错误类型 / Unified application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// 幂等令牌冲突：确定性拒绝，永不自动重试
    /// Idempotency token conflict: definitive rejection, never auto-retried
    #[error("duplicate request: {message}")]
    Conflict { message: String },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("authentication error: {message}")]
    Auth { message: String },

    #[error("access denied: {message}")]
    AccessDenied { message: String },

    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },

    /// 临时态存储不可用：幂等准入拒绝放行，在线状态降级为离线
    /// Ephemeral store unavailable: admission fails closed, presence degrades
    #[error("ephemeral store error: {0}")]
    EphemeralStore(#[from] StoreError),

    #[error("durable store error: {0}")]
    Durable(DurableError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn conflict<T: Into<String>>(message: T) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn not_found<T: Into<String>>(resource: T) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn auth<T: Into<String>>(message: T) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn access_denied<T: Into<String>>(message: T) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    pub fn validation<T: Into<String>, U: Into<String>>(field: T, message: U) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 获取错误代码 / Error code
    pub fn error_code(&self) -> i32 {
        match self {
            AppError::Conflict { .. } => 1001,
            AppError::NotFound { .. } => 1002,
            AppError::Auth { .. } => 1007,
            AppError::AccessDenied { .. } => 1003,
            AppError::Validation { .. } => 1004,
            AppError::EphemeralStore(_) => 1005,
            AppError::Durable(_) => 1006,
            AppError::Internal(_) => 1000,
        }
    }

    /// 获取HTTP状态码 / HTTP status code
    pub fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        match self {
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Auth { .. } => StatusCode::UNAUTHORIZED,
            AppError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::EphemeralStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Durable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DurableError> for AppError {
    fn from(e: DurableError) -> Self {
        match e {
            DurableError::NotFound(resource) => AppError::NotFound {
                resource: resource.to_string(),
            },
            other => AppError::Durable(other),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        // 记录错误日志 / Log by severity
        match self {
            AppError::Internal(_) | AppError::Durable(_) => {
                tracing::error!("Internal error: {}", message);
            }
            AppError::EphemeralStore(_) => {
                tracing::warn!("Ephemeral store error: {}", message);
            }
            _ => {
                tracing::info!("Client error: {}", message);
            }
        }

        HttpResponse::build(status).json(json!({
            "success": false,
            "error": {
                "code": error_code,
                "message": message,
            },
            "timestamp": chrono::Utc::now().to_rfc3339()
        }))
    }

    fn status_code(&self) -> actix_web::http::StatusCode {
        AppError::status_code(self)
    }
}

/// 应用结果类型 / Application result type
pub type AppResult<T> = Result<T, AppError>;
