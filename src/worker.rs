//! UI 自动化 worker 桥接 - 每次调用拉起一个独立 worker 进程
//!
//! 调用契约：`worker_cmd <action> (--payload <json> | --payload-file <path>)`，
//! worker 跑完退出，最后一行 stdout 是 JSON 结果。payload 超过 4KB 时写入
//! 唯一命名的临时文件，只传路径，避免命令行长度限制。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{DispatchError, Result};

/// payload 内联传参的大小上限（字节），超过则走临时文件
pub const INLINE_PAYLOAD_LIMIT: usize = 4096;

/// 临时文件清理的最大重试次数（worker 可能尚未释放句柄）
const CLEANUP_RETRIES: u32 = 3;
const CLEANUP_RETRY_DELAY: Duration = Duration::from_millis(500);

/// worker 支持的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerAction {
    SendText,
    SendFile,
    CheckStatus,
    GetContacts,
}

impl WorkerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerAction::SendText => "send_text",
            WorkerAction::SendFile => "send_file",
            WorkerAction::CheckStatus => "check_status",
            WorkerAction::GetContacts => "get_contacts",
        }
    }
}

/// worker 的结构化返回
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerReply {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// 动作相关的附加数据（如联系人列表、登录状态）
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub logged_in: Option<bool>,
}

/// 桥接器创建的临时文件 - 独占所有权，所有路径上保证删除
///
/// worker 崩溃或删除冲突时做有限重试，Drop 兜底一次同步删除。
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    cleaned: bool,
}

impl TempArtifact {
    /// 在系统临时目录生成唯一文件名（时间戳 + 随机后缀，
    /// 并发调用不会撞名）
    pub fn unique_path(filename: &str) -> PathBuf {
        let stamp = chrono::Utc::now().timestamp();
        let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
        std::env::temp_dir().join(format!("{}_{}_{}", stamp, suffix, filename))
    }

    /// 写入字节并接管该文件
    pub async fn create(filename: &str, bytes: &[u8]) -> Result<Self> {
        let path = Self::unique_path(filename);
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| DispatchError::WorkerExecutionFailed(format!(
                "failed to create temp file: {e}"
            )))?;
        file.write_all(bytes)
            .await
            .map_err(|e| DispatchError::WorkerExecutionFailed(format!(
                "failed to write temp file: {e}"
            )))?;
        file.flush().await.ok();
        Ok(Self {
            path,
            cleaned: false,
        })
    }

    /// 接管一个已存在的文件（下载器写好后移交）
    pub fn adopt(path: PathBuf) -> Self {
        Self {
            path,
            cleaned: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 删除文件，句柄冲突时有限重试
    pub async fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        for attempt in 1..=CLEANUP_RETRIES {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    debug!(path = %self.path.display(), "Temp artifact removed");
                    self.cleaned = true;
                    return;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    self.cleaned = true;
                    return;
                }
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        attempt,
                        error = %e,
                        "Temp artifact removal failed, retrying"
                    );
                    tokio::time::sleep(CLEANUP_RETRY_DELAY).await;
                }
            }
        }
        // 最后一次尝试，失败交给 Drop
        if tokio::fs::remove_file(&self.path).await.is_ok() {
            self.cleaned = true;
        }
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if !self.cleaned {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// worker 桥接器
#[derive(Debug, Clone)]
pub struct WorkerBridge {
    worker_cmd: String,
    timeout_secs: u64,
}

impl WorkerBridge {
    pub fn new(worker_cmd: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            worker_cmd: worker_cmd.into(),
            timeout_secs,
        }
    }

    /// 执行一次 worker 调用：序列化 payload、选择传输方式、
    /// 等待退出并解析输出。临时文件在所有路径上都会被清理。
    pub async fn invoke(
        &self,
        action: WorkerAction,
        payload: &serde_json::Value,
    ) -> Result<WorkerReply> {
        let serialized = serde_json::to_string(payload)
            .map_err(|e| DispatchError::WorkerExecutionFailed(format!(
                "failed to serialize payload: {e}"
            )))?;

        let mut temp: Option<TempArtifact> = None;
        let mut cmd = Command::new(&self.worker_cmd);
        cmd.arg(action.as_str());

        if serialized.len() > INLINE_PAYLOAD_LIMIT {
            let artifact = TempArtifact::create("payload.json", serialized.as_bytes()).await?;
            cmd.arg("--payload-file").arg(artifact.path());
            temp = Some(artifact);
        } else {
            cmd.arg("--payload").arg(&serialized);
        }

        let result = self.run_to_completion(cmd, action).await;

        if let Some(mut artifact) = temp {
            artifact.cleanup().await;
        }

        result
    }

    async fn run_to_completion(
        &self,
        mut cmd: Command,
        action: WorkerAction,
    ) -> Result<WorkerReply> {
        debug!(
            worker = %self.worker_cmd,
            action = action.as_str(),
            "Spawning automation worker"
        );

        // kill_on_drop: 调用方断开或超时后 worker 进程一并终止
        let child = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DispatchError::WorkerExecutionFailed(format!(
                "failed to spawn worker '{}': {e}",
                self.worker_cmd
            )))?;

        let output = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| DispatchError::WorkerTimeout(self.timeout_secs))?
        .map_err(|e| DispatchError::WorkerExecutionFailed(format!(
            "failed to collect worker output: {e}"
        )))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DispatchError::WorkerExecutionFailed(format!(
                "worker exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_worker_output(&stdout)
    }
}

/// 解析 worker 输出：先整体严格解析，失败则取最后一个非空行
/// （worker 可能在结果前打印诊断行），都失败则返回 WorkerOutputMalformed
/// 并附带原始输出便于排查。
pub fn parse_worker_output(stdout: &str) -> Result<WorkerReply> {
    let trimmed = stdout.trim();

    if let Ok(reply) = serde_json::from_str::<WorkerReply>(trimmed) {
        return Ok(reply);
    }

    if let Some(last_line) = trimmed.lines().rev().find(|l| !l.trim().is_empty()) {
        if let Ok(reply) = serde_json::from_str::<WorkerReply>(last_line.trim()) {
            return Ok(reply);
        }
    }

    Err(DispatchError::WorkerOutputMalformed(format!(
        "no JSON result in worker output: {}",
        trimmed
    )))
}
