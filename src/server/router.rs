//! 路由表和 API key 认证中间件

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;
use crate::error::DispatchError;

/// 构建完整的 axum Router
pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/services", get(handlers::services))
        .route("/contacts", get(handlers::contacts))
        .route("/send/text", post(handlers::send_text))
        .route("/send/file", post(handlers::send_file))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 每个请求都校验 x-api-key（默认拒绝：缺失和错误分别返回
/// 可区分的 401 错误码）
async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    match request.headers().get("x-api-key") {
        None => DispatchError::ApiKeyMissing.into_response(),
        Some(value) if value.as_bytes() == state.config.api_key.as_bytes() => {
            next.run(request).await
        }
        Some(_) => DispatchError::ApiKeyInvalid.into_response(),
    }
}
