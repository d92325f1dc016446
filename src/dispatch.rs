//! 请求路由门面 - 校验规范化请求、解析适配器、单发或批量
//!
//! 这里是唯一把各后端异构错误归一成统一 DispatchResult 信封的地方。
//! 对固定的合法请求，路由结果是确定的（同一个 service id 永远解析到
//! 同一个适配器实例）。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::batch::{self, BatchOptions, BatchSummary, TargetOutcome};
use crate::error::{DispatchError, Result};
use crate::provider::{
    FileRef, Provider, ProviderRegistry, Target, TargetKind, KNOWN_PROVIDERS,
};

/// POST /send/text 请求体
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTextRequest {
    pub service: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub to_type: Option<TargetKind>,
    #[serde(default)]
    pub to_id: Option<String>,
    #[serde(default)]
    pub to_ids: Option<Vec<String>>,
    #[serde(default)]
    pub batch_options: Option<BatchOptions>,
}

/// POST /send/file 请求体
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendFileRequest {
    pub service: String,
    #[serde(default)]
    pub url: Option<String>,
    /// base64 编码的内联文件数据（与 url 二选一）
    #[serde(default)]
    pub file_data: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub to_type: Option<TargetKind>,
    #[serde(default)]
    pub to_id: Option<String>,
    #[serde(default)]
    pub to_ids: Option<Vec<String>>,
    #[serde(default)]
    pub batch_options: Option<BatchOptions>,
}

/// 统一响应信封
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub success: bool,
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_target: Option<Vec<TargetOutcome>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<BatchSummary>,
}

/// 解析后的发送目标：自己 / 单个 / 有序多个
#[derive(Debug, Clone)]
enum ResolvedTargets {
    Single(Target),
    Batch(TargetKind, Vec<String>),
}

pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// 解析 service id：已知但未配置 → NotConfigured，未知 → ValidationError
    pub fn resolve(&self, service: &str) -> Result<Arc<dyn Provider>> {
        if let Some(provider) = self.registry.get(service) {
            return Ok(provider);
        }
        if KNOWN_PROVIDERS.contains(&service) {
            Err(DispatchError::NotConfigured(format!(
                "service '{service}' is not configured"
            )))
        } else {
            Err(DispatchError::Validation(format!(
                "unknown service '{service}'"
            )))
        }
    }

    /// 目标解析：默认 filehelper；非 filehelper 必须有至少一个 id；
    /// toIds 保序，重复允许（顺序即发送顺序）
    fn resolve_targets(
        to_type: Option<TargetKind>,
        to_id: Option<String>,
        to_ids: Option<Vec<String>>,
    ) -> Result<ResolvedTargets> {
        let kind = to_type.unwrap_or(TargetKind::FileHelper);

        if kind == TargetKind::FileHelper {
            return Ok(ResolvedTargets::Single(Target::file_helper()));
        }

        let mut ids: Vec<String> = to_ids.unwrap_or_default();
        if ids.is_empty() {
            if let Some(id) = to_id.filter(|id| !id.is_empty()) {
                ids.push(id);
            }
        }

        match ids.len() {
            0 => Err(DispatchError::Validation(format!(
                "toId or toIds is required for toType '{}'",
                kind.as_str()
            ))),
            1 => Ok(ResolvedTargets::Single(Target::new(
                kind,
                ids.remove(0),
            ))),
            _ => Ok(ResolvedTargets::Batch(kind, ids)),
        }
    }

    fn single_result(service: &str, outcome: crate::provider::SendOutcome) -> DispatchResult {
        DispatchResult {
            success: true,
            service: service.to_string(),
            message_id: outcome.message_id,
            message: outcome.message,
            per_target: None,
            summary: None,
        }
    }

    fn batch_result(service: &str, report: batch::BatchReport) -> DispatchResult {
        DispatchResult {
            success: true,
            service: service.to_string(),
            message_id: None,
            message: None,
            per_target: Some(report.per_target),
            summary: Some(report.summary),
        }
    }

    /// 发送文本
    pub async fn send_text(&self, request: SendTextRequest) -> Result<DispatchResult> {
        let text = request
            .text
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DispatchError::Validation("text is required".to_string()))?
            .to_string();

        let provider = self.resolve(&request.service)?;
        let targets =
            Self::resolve_targets(request.to_type, request.to_id, request.to_ids)?;

        info!(service = %request.service, "Dispatching text send");

        match targets {
            ResolvedTargets::Single(target) => {
                let outcome = provider.send_text(&target, &text).await?;
                Ok(Self::single_result(&request.service, outcome))
            }
            ResolvedTargets::Batch(kind, ids) => {
                let options = request.batch_options.unwrap_or_default();
                let report = batch::run_batch(&ids, &options, |id| {
                    let provider = provider.clone();
                    let text = text.clone();
                    async move { provider.send_text(&Target::new(kind, id), &text).await }
                })
                .await;
                Ok(Self::batch_result(&request.service, report))
            }
        }
    }

    /// 发送文件
    pub async fn send_file(&self, request: SendFileRequest) -> Result<DispatchResult> {
        let inline_data = match (&request.url, &request.file_data) {
            (None, None) => {
                return Err(DispatchError::Validation(
                    "url or fileData is required".to_string(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(DispatchError::Validation(
                    "url and fileData are mutually exclusive".to_string(),
                ));
            }
            (_, Some(data)) => Some(crate::provider::wxauto::decode_file_data(data)?),
            (Some(_), None) => None,
        };

        let file = FileRef {
            url: request.url.clone(),
            inline_data,
            filename: request.filename.clone().unwrap_or_default(),
            mime_type: request.mime_type.clone(),
            caption: request.caption.clone(),
        };

        let provider = self.resolve(&request.service)?;
        let targets =
            Self::resolve_targets(request.to_type, request.to_id, request.to_ids)?;

        info!(service = %request.service, file = %file.filename, "Dispatching file send");

        match targets {
            ResolvedTargets::Single(target) => {
                let outcome = provider.send_file(&target, &file).await?;
                Ok(Self::single_result(&request.service, outcome))
            }
            ResolvedTargets::Batch(kind, ids) => {
                let options = request.batch_options.unwrap_or_default();
                let report = batch::run_batch(&ids, &options, |id| {
                    let provider = provider.clone();
                    let file = file.clone();
                    async move { provider.send_file(&Target::new(kind, id), &file).await }
                })
                .await;
                Ok(Self::batch_result(&request.service, report))
            }
        }
    }
}
