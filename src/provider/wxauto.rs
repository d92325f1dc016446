//! wxauto 个人微信适配器 - 基于 UI 自动化 worker
//!
//! 所有操作都走 WorkerBridge：每次发送拉起一次 worker 进程。
//! 文件发送先经安全校验和流式下载落到临时文件，worker 只拿本地
//! 路径，不接触网络；临时文件在 worker 退出后清理。

use async_trait::async_trait;
use base64::Engine;
use tracing::{info, warn};

use super::{Contact, FileRef, Provider, ProviderStatus, SendOutcome, Target, TargetKind};
use crate::config::WxautoConfig;
use crate::error::{DispatchError, Result};
use crate::filesafety::{self, FileTypePolicy};
use crate::ratelimit::RateLimiter;
use crate::worker::{WorkerAction, WorkerBridge, WorkerReply};

#[derive(Debug)]
pub struct WxautoProvider {
    bridge: WorkerBridge,
    client: reqwest::Client,
    limiter: RateLimiter,
    policy: FileTypePolicy,
}

impl WxautoProvider {
    pub fn new(config: WxautoConfig, rate_limit_per_minute: u32) -> Self {
        Self {
            bridge: WorkerBridge::new(config.worker_cmd, config.timeout_secs),
            client: filesafety::http_client(std::time::Duration::from_secs(120)),
            limiter: RateLimiter::new(rate_limit_per_minute),
            policy: FileTypePolicy::generic(),
        }
    }

    fn target_payload(target: &Target) -> serde_json::Value {
        serde_json::json!({
            "toType": target.kind.as_str(),
            "to": match target.kind {
                TargetKind::FileHelper => None,
                _ => target.id.as_deref(),
            },
        })
    }

    /// worker 返回 success=false 时归一为后端错误
    fn reply_to_outcome(reply: WorkerReply, id_prefix: &str) -> Result<SendOutcome> {
        if reply.success {
            Ok(SendOutcome {
                message_id: Some(format!(
                    "{}_{}",
                    id_prefix,
                    chrono::Utc::now().timestamp_millis()
                )),
                message: reply.message,
            })
        } else {
            Err(DispatchError::BackendUnavailable(
                reply
                    .error
                    .unwrap_or_else(|| "worker reported failure".to_string()),
            ))
        }
    }

    /// 发送一个已落盘的本地文件
    async fn send_local_file(
        &self,
        target: &Target,
        path: &std::path::Path,
        filename: &str,
        caption: Option<&str>,
    ) -> Result<SendOutcome> {
        let mut payload = Self::target_payload(target);
        payload["path"] = serde_json::json!(path.to_string_lossy());
        payload["filename"] = serde_json::json!(filename);
        if let Some(caption) = caption {
            payload["caption"] = serde_json::json!(caption);
        }

        let reply = self.bridge.invoke(WorkerAction::SendFile, &payload).await?;
        Self::reply_to_outcome(reply, "wxauto_file")
    }
}

#[async_trait]
impl Provider for WxautoProvider {
    fn name(&self) -> &str {
        "personal-wechat"
    }

    fn display_name(&self) -> &str {
        "个人微信 (WxAuto)"
    }

    fn features(&self) -> Vec<&'static str> {
        vec!["text", "file", "image"]
    }

    async fn send_text(&self, target: &Target, text: &str) -> Result<SendOutcome> {
        self.limiter.check()?;

        let mut payload = Self::target_payload(target);
        payload["message"] = serde_json::json!(text);

        let reply = self.bridge.invoke(WorkerAction::SendText, &payload).await?;
        info!(provider = self.name(), to = ?target.id, "Text handed to automation worker");
        Self::reply_to_outcome(reply, "wxauto")
    }

    async fn send_file(&self, target: &Target, file: &FileRef) -> Result<SendOutcome> {
        self.limiter.check()?;

        let (mut artifact, filename) = if let Some(url) = file.url.as_deref() {
            let validated =
                filesafety::validate_remote(&self.client, url, &file.filename, &self.policy)
                    .await?;
            let artifact = filesafety::download_to_temp(&self.client, &validated).await?;
            (artifact, validated.filename)
        } else if let Some(data) = &file.inline_data {
            let (filename, _category) = filesafety::validate_inline(
                data,
                &file.filename,
                file.mime_type.as_deref(),
                &self.policy,
            )?;
            let artifact = crate::worker::TempArtifact::create(&filename, data).await?;
            (artifact, filename)
        } else {
            return Err(DispatchError::Validation(
                "file url or fileData is required".to_string(),
            ));
        };

        let result = self
            .send_local_file(target, artifact.path(), &filename, file.caption.as_deref())
            .await;

        // 不论发送结果如何，临时文件都要清掉
        artifact.cleanup().await;
        result
    }

    async fn health_check(&self) -> ProviderStatus {
        match self
            .bridge
            .invoke(WorkerAction::CheckStatus, &serde_json::json!({}))
            .await
        {
            Ok(reply) => {
                let logged_in = reply.logged_in.unwrap_or(reply.success);
                ProviderStatus {
                    status: if logged_in { "ok" } else { "waiting_login" }.to_string(),
                    authenticated: Some(logged_in),
                    error: reply.error,
                }
            }
            Err(e) => {
                warn!(provider = self.name(), error = %e, "Worker health check failed");
                ProviderStatus::error(e.to_string())
            }
        }
    }

    async fn contacts(&self) -> Result<Vec<Contact>> {
        let reply = self
            .bridge
            .invoke(WorkerAction::GetContacts, &serde_json::json!({}))
            .await?;

        if !reply.success {
            return Err(DispatchError::BackendUnavailable(
                reply
                    .error
                    .unwrap_or_else(|| "worker could not list contacts".to_string()),
            ));
        }

        let data = reply.data.unwrap_or(serde_json::Value::Null);
        // worker 可能返回 {"contacts": [...]} 或直接返回数组
        let list = data
            .get("contacts")
            .cloned()
            .unwrap_or(data);

        serde_json::from_value(list).map_err(|e| {
            DispatchError::WorkerOutputMalformed(format!("bad contacts payload: {e}"))
        })
    }
}

/// 把 n8n 节点传来的 base64 文件数据解码为字节
pub fn decode_file_data(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| DispatchError::Validation(format!("fileData is not valid base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> WxautoProvider {
        WxautoProvider::new(
            WxautoConfig {
                worker_cmd: "/nonexistent/wxauto-worker".to_string(),
                timeout_secs: 5,
            },
            20,
        )
    }

    #[test]
    fn test_target_payload_shapes() {
        let fh = WxautoProvider::target_payload(&Target::file_helper());
        assert_eq!(fh["toType"], "filehelper");
        assert!(fh["to"].is_null());

        let contact = WxautoProvider::target_payload(&Target::new(TargetKind::Contact, "张三"));
        assert_eq!(contact["toType"], "contact");
        assert_eq!(contact["to"], "张三");
    }

    #[test]
    fn test_reply_mapping() {
        let ok = WorkerReply {
            success: true,
            message: Some("发送成功".to_string()),
            error: None,
            data: None,
            logged_in: None,
        };
        let outcome = WxautoProvider::reply_to_outcome(ok, "wxauto").unwrap();
        assert!(outcome.message_id.unwrap().starts_with("wxauto_"));

        let failed = WorkerReply {
            success: false,
            message: None,
            error: Some("微信窗口未找到".to_string()),
            data: None,
            logged_in: None,
        };
        let err = WxautoProvider::reply_to_outcome(failed, "wxauto").unwrap_err();
        assert_eq!(err.code(), "BackendUnavailable");
        assert!(err.to_string().contains("微信窗口未找到"));
    }

    #[test]
    fn test_decode_file_data() {
        assert_eq!(decode_file_data("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(
            decode_file_data("not-base64!!").unwrap_err().code(),
            "ValidationError"
        );
    }

    #[tokio::test]
    async fn test_configured_rate_limit_fails_fast() {
        let p = WxautoProvider::new(
            WxautoConfig {
                worker_cmd: "/nonexistent/wxauto-worker".to_string(),
                timeout_secs: 5,
            },
            0, // 配额 0：第一次调用就限流，不会尝试拉起 worker
        );
        let err = p
            .send_text(&Target::file_helper(), "hi")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RateLimited");
    }

    #[tokio::test]
    async fn test_send_file_requires_source() {
        let p = provider();
        let file = FileRef {
            url: None,
            inline_data: None,
            filename: "a.pdf".to_string(),
            mime_type: None,
            caption: None,
        };
        let err = p
            .send_file(&Target::file_helper(), &file)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ValidationError");
    }

    #[tokio::test]
    async fn test_inline_file_cleans_temp_even_on_worker_failure() {
        let p = provider();
        let file = FileRef {
            url: None,
            inline_data: Some(b"report body".to_vec()),
            filename: "report.txt".to_string(),
            mime_type: Some("text/plain".to_string()),
            caption: None,
        };

        // worker 可执行文件不存在，发送必然失败
        let err = p
            .send_file(&Target::new(TargetKind::Contact, "A"), &file)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "WorkerExecutionFailed");

        // 临时目录里不能留下 report.txt
        let leftover = std::fs::read_dir(std::env::temp_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().ends_with("report.txt"));
        assert!(!leftover);
    }
}
