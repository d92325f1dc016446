//! HTTP 服务启动和进程内端口注册
//!
//! 原型里"最后已知端口"持久化在文件里、每个请求都去读，这里收敛为
//! 一个进程内注册值：启动时写入一次，带显式 TTL，活跃请求会刷新。
//! 不落盘。

pub mod handlers;
pub mod router;
pub mod state;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::info;

use crate::config::BridgeConfig;
use crate::provider::ProviderRegistry;

/// 注册值的默认有效期
const DEFAULT_PORT_TTL: Duration = Duration::from_secs(300);

/// 进程内端口注册 - 启动时创建一次，归进程所有
#[derive(Debug)]
pub struct PortRegistry {
    port: u16,
    ttl: Duration,
    registered_at: Mutex<Instant>,
}

impl PortRegistry {
    pub fn new(port: u16) -> Self {
        Self::with_ttl(port, DEFAULT_PORT_TTL)
    }

    pub fn with_ttl(port: u16, ttl: Duration) -> Self {
        Self {
            port,
            ttl,
            registered_at: Mutex::new(Instant::now()),
        }
    }

    /// 注册值仍然新鲜时返回端口
    pub fn current(&self) -> Option<u16> {
        self.current_at(Instant::now())
    }

    fn current_at(&self, now: Instant) -> Option<u16> {
        let registered = *self
            .registered_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if now.duration_since(registered) <= self.ttl {
            Some(self.port)
        } else {
            None
        }
    }

    /// 活跃请求刷新时间戳
    pub fn refresh(&self) {
        let mut registered = self
            .registered_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *registered = Instant::now();
    }

    #[cfg(test)]
    fn backdate(&self, by: Duration) {
        let mut registered = self.registered_at.lock().unwrap();
        *registered -= by;
    }
}

/// 启动 HTTP 服务，阻塞到进程退出
pub async fn start(config: BridgeConfig) -> anyhow::Result<()> {
    let registry = Arc::new(ProviderRegistry::from_config(&config));
    info!(providers = registry.len(), "Provider registry initialized");

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    let local_port = listener.local_addr()?.port();

    let ports = Arc::new(PortRegistry::new(local_port));
    let app_state = state::AppState::new(registry, Arc::new(config), ports);
    let app = router::build(app_state);

    info!(port = local_port, "Message bridge listening");
    axum::serve(listener, app)
        .await
        .context("server error")?;

    Ok(())
}
