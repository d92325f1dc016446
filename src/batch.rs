//! 批量发送 - 按目标顺序逐个发送，带基础延迟加随机抖动
//!
//! 目标之间的延迟是防封号措施：UI 自动化后端如果突发式连发，
//! 上游平台会标记异常。单个目标失败不会中止批次，始终处理完整个
//! 目标列表并返回逐目标明细和汇总。尽力广播，不是事务，已发出的
//! 消息没有回滚。

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::provider::SendOutcome;

/// 基础延迟允许范围（秒）
const MIN_DELAY_SECS: u64 = 1;
const MAX_DELAY_SECS: u64 = 60;

/// 批量发送选项
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOptions {
    /// 目标间基础延迟（秒），默认 3，限制在 1-60
    #[serde(default = "default_send_delay", alias = "baseDelaySeconds")]
    pub send_delay: u64,
    /// 是否附加 1-5 秒随机抖动，默认开启
    #[serde(default = "default_random_delay", alias = "randomJitter")]
    pub random_delay: bool,
}

fn default_send_delay() -> u64 {
    3
}

fn default_random_delay() -> bool {
    true
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            send_delay: default_send_delay(),
            random_delay: default_random_delay(),
        }
    }
}

impl BatchOptions {
    /// 计算下一次发送前要等待的毫秒数
    pub fn delay_ms(&self) -> u64 {
        let base = self.send_delay.clamp(MIN_DELAY_SECS, MAX_DELAY_SECS) * 1000;
        if self.random_delay {
            base + rand::thread_rng().gen_range(1000..=5000)
        } else {
            base
        }
    }
}

/// 单个目标的发送结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetOutcome {
    pub to_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 批次汇总
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// 批次结果：逐目标明细（与输入顺序一致）+ 汇总
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub per_target: Vec<TargetOutcome>,
    pub summary: BatchSummary,
}

/// 顺序发送到每个目标
///
/// `send` 闭包执行单目标发送；除最后一个目标外，每次发送后
/// 挂起等待（`tokio::time::sleep` 是协作式挂起点，不会阻塞
/// 其他并发请求）。
pub async fn run_batch<F, Fut>(to_ids: &[String], options: &BatchOptions, send: F) -> BatchReport
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<SendOutcome>>,
{
    let total = to_ids.len();
    info!(
        targets = total,
        send_delay = options.send_delay,
        random_delay = options.random_delay,
        "Starting batch send"
    );

    let mut per_target = Vec::with_capacity(total);

    for (i, to_id) in to_ids.iter().enumerate() {
        debug!(target = %to_id, index = i + 1, total, "Sending to batch target");

        match send(to_id.clone()).await {
            Ok(outcome) => per_target.push(TargetOutcome {
                to_id: to_id.clone(),
                success: true,
                message_id: outcome.message_id,
                message: outcome.message,
                error: None,
            }),
            Err(e) => {
                warn!(target = %to_id, error = %e, "Batch target failed");
                per_target.push(TargetOutcome {
                    to_id: to_id.clone(),
                    success: false,
                    message_id: None,
                    message: None,
                    error: Some(format!("{}: {}", e.code(), e)),
                });
            }
        }

        if i + 1 < total {
            let delay = options.delay_ms();
            debug!(delay_ms = delay, "Waiting before next batch target");
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    let successful = per_target.iter().filter(|t| t.success).count();
    let summary = BatchSummary {
        total,
        successful,
        failed: total - successful,
    };
    info!(
        total = summary.total,
        successful = summary.successful,
        failed = summary.failed,
        "Batch send complete"
    );

    BatchReport {
        per_target,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    // 暂停时钟下要用 tokio 的 Instant，std 的不跟随虚拟时间
    use tokio::time::Instant;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_batch_completeness_despite_failures() {
        // 无论个别目标失败与否，n 个目标必须产出 n 条明细
        let targets = ids(&["A", "B", "C"]);
        let options = BatchOptions {
            send_delay: 1,
            random_delay: false,
        };

        let report = run_batch(&targets, &options, |to_id| async move {
            if to_id == "B" {
                Err(DispatchError::BackendUnavailable("B is down".into()))
            } else {
                Ok(SendOutcome {
                    message_id: Some(format!("msg-{to_id}")),
                    message: None,
                })
            }
        })
        .await;

        assert_eq!(report.per_target.len(), 3);
        assert_eq!(
            report.summary,
            BatchSummary {
                total: 3,
                successful: 2,
                failed: 1
            }
        );
        // 顺序与输入一致
        assert_eq!(report.per_target[0].to_id, "A");
        assert_eq!(report.per_target[1].to_id, "B");
        assert!(!report.per_target[1].success);
        assert!(report.per_target[1]
            .error
            .as_deref()
            .unwrap()
            .starts_with("BackendUnavailable"));
        assert_eq!(report.per_target[2].to_id, "C");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_lower_bound_between_sends() {
        // sendDelay=3, randomDelay=false, 3 个目标：相邻发送间隔 >= 3000ms
        let targets = ids(&["A", "B", "C"]);
        let options = BatchOptions {
            send_delay: 3,
            random_delay: false,
        };

        let start = Instant::now();
        let report = run_batch(&targets, &options, |_| async {
            Ok(SendOutcome::default())
        })
        .await;

        // 两个间隔，总耗时 >= 6s（暂停时钟下 sleep 自动推进，结果确定）
        assert!(start.elapsed() >= Duration::from_secs(6));
        assert_eq!(report.summary.successful, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_delay_after_last_target() {
        let targets = ids(&["only"]);
        let options = BatchOptions {
            send_delay: 60,
            random_delay: false,
        };

        let start = Instant::now();
        run_batch(&targets, &options, |_| async { Ok(SendOutcome::default()) }).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_delay_clamped_to_range() {
        let zero = BatchOptions {
            send_delay: 0,
            random_delay: false,
        };
        assert_eq!(zero.delay_ms(), 1000);

        let huge = BatchOptions {
            send_delay: 600,
            random_delay: false,
        };
        assert_eq!(huge.delay_ms(), 60_000);
    }

    #[test]
    fn test_jitter_within_bounds() {
        let options = BatchOptions {
            send_delay: 3,
            random_delay: true,
        };
        for _ in 0..50 {
            let d = options.delay_ms();
            assert!((4000..=8000).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn test_options_accept_field_aliases() {
        let parsed: BatchOptions =
            serde_json::from_str(r#"{"baseDelaySeconds": 5, "randomJitter": false}"#).unwrap();
        assert_eq!(parsed.send_delay, 5);
        assert!(!parsed.random_delay);

        let wire: BatchOptions =
            serde_json::from_str(r#"{"sendDelay": 1, "randomDelay": false}"#).unwrap();
        assert_eq!(wire.send_delay, 1);
        assert!(!wire.random_delay);

        let defaults: BatchOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(defaults.send_delay, 3);
        assert!(defaults.random_delay);
    }
}
