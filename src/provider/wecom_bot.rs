//! 企业微信群机器人适配器
//!
//! 通过群机器人 webhook 发送文本；文件先经安全校验和
//! 流式下载，再上传到素材接口换 media_id 发出。目标由 webhook
//! 本身决定（固定群），toType/toId 对这个后端没有意义。

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use super::{FileRef, Provider, ProviderStatus, SendOutcome, Target};
use crate::config::WecomBotConfig;
use crate::error::{DispatchError, Result};
use crate::filesafety::{self, FileTypePolicy};
use crate::ratelimit::RateLimiter;

/// 素材上传接口（群机器人专用，key 与 webhook 相同）
const UPLOAD_MEDIA_URL: &str = "https://qyapi.weixin.qq.com/cgi-bin/webhook/upload_media";

/// 企业微信接口的统一应答
#[derive(Debug, Deserialize)]
struct WecomResponse {
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    media_id: Option<String>,
}

/// 无效的机器人 key
const ERR_INVALID_KEY: i64 = 93000;
/// 空消息内容（健康检查用它来验证连通性而不真正发消息）
const ERR_EMPTY_CONTENT: i64 = 44004;

#[derive(Debug)]
pub struct WecomBotProvider {
    client: reqwest::Client,
    webhook_url: String,
    limiter: RateLimiter,
    policy: FileTypePolicy,
}

impl WecomBotProvider {
    pub fn new(config: WecomBotConfig, rate_limit_per_minute: u32) -> Self {
        Self {
            client: filesafety::http_client(std::time::Duration::from_secs(120)),
            webhook_url: config.webhook_url,
            limiter: RateLimiter::new(rate_limit_per_minute),
            policy: FileTypePolicy::strict_wecom(),
        }
    }

    /// 从 webhook URL 提取 key 参数（素材上传要用）
    fn webhook_key(&self) -> Result<String> {
        url::Url::parse(&self.webhook_url)
            .ok()
            .and_then(|u| {
                u.query_pairs()
                    .find(|(k, _)| k == "key")
                    .map(|(_, v)| v.into_owned())
            })
            .ok_or_else(|| {
                DispatchError::NotConfigured(
                    "webhook url has no key parameter".to_string(),
                )
            })
    }

    async fn post_webhook(&self, body: &serde_json::Value) -> Result<WecomResponse> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(body)
            .send()
            .await
            .map_err(|e| DispatchError::BackendUnavailable(format!(
                "webhook request failed: {e}"
            )))?;

        response
            .json::<WecomResponse>()
            .await
            .map_err(|e| DispatchError::BackendUnavailable(format!(
                "invalid webhook response: {e}"
            )))
    }

    fn check_errcode(&self, response: &WecomResponse) -> Result<()> {
        match response.errcode {
            0 => Ok(()),
            ERR_INVALID_KEY => Err(DispatchError::Unauthenticated(format!(
                "webhook key rejected: {}",
                response.errmsg
            ))),
            _ => Err(DispatchError::BackendUnavailable(format!(
                "wecom gateway error {}: {}",
                response.errcode, response.errmsg
            ))),
        }
    }

    /// 上传文件换取 media_id
    async fn upload_media(&self, bytes: Vec<u8>, filename: &str, mime: &str) -> Result<String> {
        let key = self.webhook_key()?;
        let url = format!("{UPLOAD_MEDIA_URL}?key={key}&type=file");

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime)
            .map_err(|e| DispatchError::BackendUnavailable(format!("bad mime type: {e}")))?;
        let form = reqwest::multipart::Form::new().part("media", part);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| DispatchError::BackendUnavailable(format!(
                "media upload failed: {e}"
            )))?
            .json::<WecomResponse>()
            .await
            .map_err(|e| DispatchError::BackendUnavailable(format!(
                "invalid upload response: {e}"
            )))?;

        self.check_errcode(&response)?;
        response.media_id.ok_or_else(|| {
            DispatchError::BackendUnavailable("upload response missing media_id".to_string())
        })
    }

    fn message_id(prefix: &str) -> String {
        format!("{}_{}", prefix, chrono::Utc::now().timestamp_millis())
    }
}

#[async_trait]
impl Provider for WecomBotProvider {
    fn name(&self) -> &str {
        "enterprise-wechat-bot"
    }

    fn display_name(&self) -> &str {
        "企业微信机器人"
    }

    fn features(&self) -> Vec<&'static str> {
        vec!["text", "image", "file"]
    }

    async fn send_text(&self, _target: &Target, text: &str) -> Result<SendOutcome> {
        self.limiter.check()?;

        let response = self
            .post_webhook(&serde_json::json!({
                "msgtype": "text",
                "text": { "content": text },
            }))
            .await?;
        self.check_errcode(&response)?;

        info!(provider = self.name(), "Text message sent via webhook");
        Ok(SendOutcome {
            message_id: Some(Self::message_id("wecom_bot")),
            message: None,
        })
    }

    async fn send_file(&self, _target: &Target, file: &FileRef) -> Result<SendOutcome> {
        self.limiter.check()?;

        if file.inline_data.is_some() {
            return Err(DispatchError::UnsupportedOperation(
                "enterprise-wechat-bot only accepts file urls, not inline data".to_string(),
            ));
        }
        let url = file.url.as_deref().ok_or_else(|| {
            DispatchError::Validation("file url is required".to_string())
        })?;

        let validated =
            filesafety::validate_remote(&self.client, url, &file.filename, &self.policy).await?;
        let mut artifact = filesafety::download_to_temp(&self.client, &validated).await?;

        let bytes = tokio::fs::read(artifact.path()).await.map_err(|e| {
            DispatchError::BackendUnavailable(format!("cannot read downloaded file: {e}"))
        });
        artifact.cleanup().await;
        let bytes = bytes?;

        let mime = validated
            .probe
            .content_type
            .clone()
            .or_else(|| file.mime_type.clone())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let media_id = self
            .upload_media(bytes, &validated.filename, &mime)
            .await?;

        let response = self
            .post_webhook(&serde_json::json!({
                "msgtype": "file",
                "file": { "media_id": media_id },
            }))
            .await?;
        self.check_errcode(&response)?;

        // 说明文字跟在文件后面单独发一条
        if let Some(caption) = file.caption.as_deref().filter(|c| !c.is_empty()) {
            if let Err(e) = self.send_text(_target, caption).await {
                warn!(error = %e, "File sent but caption delivery failed");
            }
        }

        info!(provider = self.name(), file = %validated.filename, "File sent via webhook");
        Ok(SendOutcome {
            message_id: Some(Self::message_id("wecom_bot_file")),
            message: None,
        })
    }

    /// 发一条空文本探活：网关会应答 errcode（空内容错误也算可达），
    /// 不会真的往群里投递消息
    async fn health_check(&self) -> ProviderStatus {
        match self
            .post_webhook(&serde_json::json!({
                "msgtype": "text",
                "text": { "content": "" },
            }))
            .await
        {
            Ok(response) => match response.errcode {
                0 | ERR_EMPTY_CONTENT => ProviderStatus::ok(true),
                ERR_INVALID_KEY => ProviderStatus::error("webhook key rejected"),
                other => ProviderStatus::error(format!(
                    "gateway error {other}: {}",
                    response.errmsg
                )),
            },
            Err(e) => ProviderStatus::error(e.to_string()),
        }
    }
}
