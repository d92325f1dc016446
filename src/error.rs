//! 统一错误分类 - 所有适配器错误最终归一到 DispatchError

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// 文件被拒绝的具体原因（用于错误码后缀）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRejectReason {
    /// URL scheme 不是 http/https
    Scheme,
    /// 主机解析到回环或内网地址
    Host,
    /// 超过分类大小上限
    Size,
    /// 扩展名或 MIME 类型不在白名单
    Type,
}

impl FileRejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileRejectReason::Scheme => "scheme",
            FileRejectReason::Host => "host",
            FileRejectReason::Size => "size",
            FileRejectReason::Type => "type",
        }
    }
}

/// 消息分发错误分类
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("service not configured: {0}")]
    NotConfigured(String),

    #[error("backend rejected credentials: {0}")]
    Unauthenticated(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("file rejected ({}): {message}", reason.as_str())]
    FileRejected {
        reason: FileRejectReason,
        message: String,
    },

    #[error("worker execution failed: {0}")]
    WorkerExecutionFailed(String),

    #[error("worker output malformed: {0}")]
    WorkerOutputMalformed(String),

    #[error("worker timed out after {0}s")]
    WorkerTimeout(u64),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("missing x-api-key header")]
    ApiKeyMissing,

    #[error("invalid x-api-key")]
    ApiKeyInvalid,
}

impl DispatchError {
    /// 机器可读错误码，文件类错误带子原因后缀（如 `FileRejected:host`）
    pub fn code(&self) -> String {
        match self {
            DispatchError::NotConfigured(_) => "NotConfigured".to_string(),
            DispatchError::Unauthenticated(_) => "Unauthenticated".to_string(),
            DispatchError::BackendUnavailable(_) => "BackendUnavailable".to_string(),
            DispatchError::RateLimited(_) => "RateLimited".to_string(),
            DispatchError::FileRejected { reason, .. } => {
                format!("FileRejected:{}", reason.as_str())
            }
            DispatchError::WorkerExecutionFailed(_) => "WorkerExecutionFailed".to_string(),
            DispatchError::WorkerOutputMalformed(_) => "WorkerOutputMalformed".to_string(),
            DispatchError::WorkerTimeout(_) => "WorkerTimeout".to_string(),
            DispatchError::UnsupportedOperation(_) => "UnsupportedOperation".to_string(),
            DispatchError::Validation(_) => "ValidationError".to_string(),
            DispatchError::ApiKeyMissing => "ApiKeyMissing".to_string(),
            DispatchError::ApiKeyInvalid => "ApiKeyInvalid".to_string(),
        }
    }

    /// HTTP 状态码映射：校验 400，认证 401，其余 500
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::Validation(_) => StatusCode::BAD_REQUEST,
            DispatchError::ApiKeyMissing | DispatchError::ApiKeyInvalid => {
                StatusCode::UNAUTHORIZED
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
