//! HTTP 处理器 - /health /services /contacts /send/*

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use serde_json::json;

use super::state::AppState;
use crate::dispatch::{DispatchResult, SendFileRequest, SendTextRequest};
use crate::error::{DispatchError, Result};
use crate::provider::{ProviderStatus, KNOWN_PROVIDERS};

/// GET /health - 逐适配器健康检查；未配置的适配器报告 disabled
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut services = BTreeMap::new();
    for name in KNOWN_PROVIDERS {
        let status = match state.registry.get(name) {
            Some(provider) => provider.health_check().await,
            None => ProviderStatus::disabled(),
        };
        services.insert(name, status);
    }

    state.ports.refresh();
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "port": state.ports.current(),
        "services": services,
    }))
}

/// GET /services - 已启用的服务列表
pub async fn services(State(state): State<AppState>) -> Json<serde_json::Value> {
    let services: Vec<_> = state
        .registry
        .enabled()
        .iter()
        .map(|p| {
            json!({
                "name": p.name(),
                "displayName": p.display_name(),
                "features": p.features(),
            })
        })
        .collect();

    Json(json!({
        "count": services.len(),
        "services": services,
    }))
}

/// GET /contacts - 联系人列表（仅 UI 自动化后端）
pub async fn contacts(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let provider = state.registry.get("personal-wechat").ok_or_else(|| {
        DispatchError::NotConfigured("personal-wechat is not configured".to_string())
    })?;

    let contacts = provider.contacts().await?;
    Ok(Json(json!({
        "count": contacts.len(),
        "provider": "wxauto",
        "contacts": contacts,
    })))
}

/// POST /send/text
pub async fn send_text(
    State(state): State<AppState>,
    Json(request): Json<SendTextRequest>,
) -> Result<Json<DispatchResult>> {
    let result = state.dispatcher.send_text(request).await?;
    Ok(Json(result))
}

/// POST /send/file
pub async fn send_file(
    State(state): State<AppState>,
    Json(request): Json<SendFileRequest>,
) -> Result<Json<DispatchResult>> {
    let result = state.dispatcher.send_file(request).await?;
    Ok(Json(result))
}
