//! 服务配置 - 启动时从环境变量加载一次
//!
//! 某个适配器缺少配置不是错误：它会在 /health 和 /services 中
//! 显示为 disabled。

use std::env;

/// 企业微信群机器人配置
#[derive(Debug, Clone)]
pub struct WecomBotConfig {
    /// 群机器人 webhook URL（含 key 参数）
    pub webhook_url: String,
}

/// wxauto UI 自动化 worker 配置
#[derive(Debug, Clone)]
pub struct WxautoConfig {
    /// worker 可执行文件（或命令名）
    pub worker_cmd: String,
    /// 单次调用超时（秒）
    pub timeout_secs: u64,
}

/// Bark 推送网关配置
#[derive(Debug, Clone)]
pub struct BarkConfig {
    /// 设备 key
    pub device_key: String,
    /// 服务器地址（可自建）
    pub base_url: String,
}

/// 全局服务配置
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// 静态共享密钥，所有请求的 x-api-key 都要校验
    pub api_key: String,
    /// HTTP 监听端口
    pub port: u16,
    /// 每适配器每分钟出站调用上限
    pub rate_limit_per_minute: u32,
    pub wecom_bot: Option<WecomBotConfig>,
    pub wxauto: Option<WxautoConfig>,
    pub bark: Option<BarkConfig>,
}

impl BridgeConfig {
    /// 从环境变量加载配置
    ///
    /// `MSGBRIDGE_API_KEY` 必须存在（默认拒绝策略，没有 key 就无法启动）。
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = env::var("MSGBRIDGE_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow::anyhow!("MSGBRIDGE_API_KEY is required"))?;

        let port = env::var("MSGBRIDGE_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let rate_limit_per_minute = env::var("MSGBRIDGE_RATE_LIMIT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(20);

        let wecom_bot = env::var("WECOM_BOT_WEBHOOK_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .map(|webhook_url| WecomBotConfig { webhook_url });

        let wxauto = if env::var("WXAUTO_ENABLED").map(|v| v == "true").unwrap_or(false) {
            Some(WxautoConfig {
                worker_cmd: env::var("WXAUTO_WORKER_CMD")
                    .ok()
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| "wxauto-worker".to_string()),
                timeout_secs: env::var("WXAUTO_WORKER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            })
        } else {
            None
        };

        let bark = env::var("BARK_DEVICE_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .map(|device_key| BarkConfig {
                device_key,
                base_url: env::var("BARK_BASE_URL")
                    .ok()
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| "https://api.day.app".to_string()),
            });

        Ok(Self {
            api_key,
            port,
            rate_limit_per_minute,
            wecom_bot,
            wxauto,
            bark,
        })
    }
}
