//! 服务适配器抽象 - sendText / sendFile / healthCheck 三能力
//!
//! 每种后端（群机器人 webhook、UI 自动化 worker、推送网关）各实现一个
//! 适配器。适配器在启动时根据配置创建一次，生命周期与进程相同，
//! 除了自己的限流计数器外不持有共享可变状态。

pub mod bark;
pub mod wecom_bot;
pub mod wxauto;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::BridgeConfig;
use crate::error::{DispatchError, Result};

/// 已知的服务 id（闭集，启动时解析，不做按名动态加载）
pub const KNOWN_PROVIDERS: [&str; 3] = ["enterprise-wechat-bot", "personal-wechat", "bark"];

/// 发送目标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// 文件传输助手（发给自己，忽略 id）
    FileHelper,
    Contact,
    Room,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::FileHelper => "filehelper",
            TargetKind::Contact => "contact",
            TargetKind::Room => "room",
        }
    }
}

/// 单个发送目标（批量发送会按顺序逐个构造）
#[derive(Debug, Clone)]
pub struct Target {
    pub kind: TargetKind,
    /// filehelper 时为 None
    pub id: Option<String>,
}

impl Target {
    pub fn file_helper() -> Self {
        Self {
            kind: TargetKind::FileHelper,
            id: None,
        }
    }

    pub fn new(kind: TargetKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: Some(id.into()),
        }
    }
}

/// 一次文件发送的引用 - 每请求构造，消费一次，不持久化
#[derive(Debug, Clone)]
pub struct FileRef {
    /// 远程下载地址（与 inline_data 二选一）
    pub url: Option<String>,
    /// 内联文件数据
    pub inline_data: Option<Vec<u8>>,
    pub filename: String,
    pub mime_type: Option<String>,
    pub caption: Option<String>,
}

/// 单次发送的成功结果
#[derive(Debug, Clone, Default)]
pub struct SendOutcome {
    /// 后端消息 id（如 `wecom_bot_<ts>`）
    pub message_id: Option<String>,
    /// 后端附带的提示信息
    pub message: Option<String>,
}

/// 健康检查结果
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    /// "ok" | "waiting_login" | "error" | "disabled"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderStatus {
    pub fn ok(authenticated: bool) -> Self {
        Self {
            status: "ok".to_string(),
            authenticated: Some(authenticated),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            authenticated: Some(false),
            error: Some(message.into()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            status: "disabled".to_string(),
            authenticated: None,
            error: None,
        }
    }
}

/// 联系人（仅 UI 自动化后端支持）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub contact_type: String,
}

/// 服务适配器 trait
#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug {
    /// 服务 id（用于请求路由和日志）
    fn name(&self) -> &str;

    /// 展示名称
    fn display_name(&self) -> &str;

    /// 支持的能力（"text", "markdown", "file", "image" 等）
    fn features(&self) -> Vec<&'static str>;

    /// 发送文本到单个目标
    async fn send_text(&self, target: &Target, text: &str) -> Result<SendOutcome>;

    /// 发送文件到单个目标
    async fn send_file(&self, target: &Target, file: &FileRef) -> Result<SendOutcome>;

    /// 健康检查 - 不改变状态，往返一次轻量无害调用
    async fn health_check(&self) -> ProviderStatus;

    /// 获取联系人列表（默认不支持）
    async fn contacts(&self) -> Result<Vec<Contact>> {
        Err(DispatchError::UnsupportedOperation(format!(
            "{} does not expose contacts",
            self.name()
        )))
    }
}

/// 适配器注册表 - 启动时根据配置构建一次
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// 根据配置构建所有已启用的适配器
    pub fn from_config(config: &BridgeConfig) -> Self {
        let mut registry = Self::new();

        if let Some(bot) = &config.wecom_bot {
            registry.register(Arc::new(wecom_bot::WecomBotProvider::new(
                bot.clone(),
                config.rate_limit_per_minute,
            )));
        }
        if let Some(wx) = &config.wxauto {
            registry.register(Arc::new(wxauto::WxautoProvider::new(
                wx.clone(),
                config.rate_limit_per_minute,
            )));
        }
        if let Some(bark) = &config.bark {
            registry.register(Arc::new(bark::BarkProvider::new(
                bark.clone(),
                config.rate_limit_per_minute,
            )));
        }

        registry
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        tracing::info!(provider = provider.name(), "Registering provider");
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// 已启用的适配器，按 KNOWN_PROVIDERS 的稳定顺序
    pub fn enabled(&self) -> Vec<Arc<dyn Provider>> {
        KNOWN_PROVIDERS
            .iter()
            .filter_map(|name| self.providers.get(*name).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
