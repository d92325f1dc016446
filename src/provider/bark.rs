//! Bark 推送网关适配器 - iOS 个人推送，仅支持文本
//!
//! GET {base}/{device_key}/{title}/{body}，服务器可自建。

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::{FileRef, Provider, ProviderStatus, SendOutcome, Target};
use crate::config::BarkConfig;
use crate::error::{DispatchError, Result};
use crate::filesafety;
use crate::ratelimit::RateLimiter;

#[derive(Debug, Deserialize)]
struct BarkResponse {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug)]
pub struct BarkProvider {
    client: reqwest::Client,
    config: BarkConfig,
    limiter: RateLimiter,
}

impl BarkProvider {
    pub fn new(config: BarkConfig, rate_limit_per_minute: u32) -> Self {
        Self {
            client: filesafety::http_client(std::time::Duration::from_secs(30)),
            config,
            limiter: RateLimiter::new(rate_limit_per_minute),
        }
    }

    /// 文本第一行作为推送标题，其余作为正文
    fn split_title(text: &str) -> (&str, &str) {
        match text.split_once('\n') {
            Some((title, body)) => (title.trim_end(), body.trim_start()),
            None => (text, ""),
        }
    }

    fn push_url(&self, title: &str, body: &str) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.config.base_url).map_err(|e| {
            DispatchError::NotConfigured(format!("bad bark base url: {e}"))
        })?;
        url.path_segments_mut()
            .map_err(|_| DispatchError::NotConfigured("bark base url cannot be a base".into()))?
            .push(&self.config.device_key)
            .push(title)
            .push(body);
        Ok(url)
    }

    async fn push(&self, title: &str, body: &str) -> Result<()> {
        let url = self.push_url(title, body)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DispatchError::BackendUnavailable(format!(
                "bark request failed: {e}"
            )))?
            .json::<BarkResponse>()
            .await
            .map_err(|e| DispatchError::BackendUnavailable(format!(
                "invalid bark response: {e}"
            )))?;

        match response.code {
            200 => Ok(()),
            400 => Err(DispatchError::Unauthenticated(format!(
                "bark rejected device key: {}",
                response.message
            ))),
            other => Err(DispatchError::BackendUnavailable(format!(
                "bark error {other}: {}",
                response.message
            ))),
        }
    }
}

#[async_trait]
impl Provider for BarkProvider {
    fn name(&self) -> &str {
        "bark"
    }

    fn display_name(&self) -> &str {
        "Bark 推送"
    }

    fn features(&self) -> Vec<&'static str> {
        vec!["text"]
    }

    async fn send_text(&self, _target: &Target, text: &str) -> Result<SendOutcome> {
        self.limiter.check()?;

        let (title, body) = Self::split_title(text);
        self.push(title, body).await?;

        info!(provider = self.name(), "Push notification sent");
        Ok(SendOutcome {
            message_id: Some(format!("bark_{}", chrono::Utc::now().timestamp_millis())),
            message: None,
        })
    }

    async fn send_file(&self, _target: &Target, _file: &FileRef) -> Result<SendOutcome> {
        Err(DispatchError::UnsupportedOperation(
            "bark is a text-only push gateway".to_string(),
        ))
    }

    /// 发一条测试推送探活（Bark 没有只读探活接口）
    async fn health_check(&self) -> ProviderStatus {
        match self.push("健康检查", "message bridge is running").await {
            Ok(()) => ProviderStatus::ok(true),
            Err(e) => ProviderStatus::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> BarkProvider {
        BarkProvider::new(
            BarkConfig {
                device_key: "devkey123".to_string(),
                base_url: "https://api.day.app".to_string(),
            },
            20,
        )
    }

    #[test]
    fn test_split_title() {
        assert_eq!(BarkProvider::split_title("hello"), ("hello", ""));
        assert_eq!(
            BarkProvider::split_title("构建完成\n所有测试通过"),
            ("构建完成", "所有测试通过")
        );
    }

    #[test]
    fn test_push_url_encodes_segments() {
        let p = provider();
        let url = p.push_url("标题 1", "a/b").unwrap();
        let s = url.as_str();
        assert!(s.starts_with("https://api.day.app/devkey123/"));
        // path 段必须被转义，斜杠不能把 body 拆成两段
        assert!(!s.ends_with("a/b"));
        assert!(s.contains("a%2Fb"));
    }

    #[tokio::test]
    async fn test_configured_rate_limit_fails_fast() {
        let p = BarkProvider::new(
            BarkConfig {
                device_key: "devkey123".to_string(),
                base_url: "https://api.day.app".to_string(),
            },
            0, // 配额 0：第一次调用就限流，不发起网络请求
        );
        let err = p
            .send_text(&Target::file_helper(), "hello")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RateLimited");
    }

    #[tokio::test]
    async fn test_file_send_is_unsupported() {
        let p = provider();
        let file = FileRef {
            url: Some("https://example.com/a.pdf".to_string()),
            inline_data: None,
            filename: "a.pdf".to_string(),
            mime_type: None,
            caption: None,
        };
        let err = p
            .send_file(&Target::file_helper(), &file)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UnsupportedOperation");
    }
}
