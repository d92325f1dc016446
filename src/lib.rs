//! Message Bridge - 本地统一消息分发服务
//!
//! 接收规范化的发送请求，路由到异构后端（群机器人 webhook、
//! 桌面 UI 自动化 worker、推送网关），返回统一结果。

pub mod batch;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod filesafety;
pub mod provider;
pub mod ratelimit;
pub mod server;
pub mod worker;

pub use batch::{BatchOptions, BatchReport, BatchSummary, TargetOutcome};
pub use config::BridgeConfig;
pub use dispatch::{DispatchResult, Dispatcher, SendFileRequest, SendTextRequest};
pub use error::{DispatchError, FileRejectReason};
pub use filesafety::{FileCategory, FileTypePolicy};
pub use provider::{
    Contact, FileRef, Provider, ProviderRegistry, ProviderStatus, SendOutcome, Target, TargetKind,
};
pub use ratelimit::RateLimiter;
pub use server::PortRegistry;
pub use worker::{TempArtifact, WorkerAction, WorkerBridge, WorkerReply};
