//! HTTP 处理器共享状态

use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::dispatch::Dispatcher;
use crate::provider::ProviderRegistry;
use crate::server::PortRegistry;

/// 所有 handler 可见的应用状态
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProviderRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<BridgeConfig>,
    pub ports: Arc<PortRegistry>,
}

impl AppState {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        config: Arc<BridgeConfig>,
        ports: Arc<PortRegistry>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(registry.clone()));
        Self {
            registry,
            dispatcher,
            config,
            ports,
        }
    }
}
