//! 出站限流模块 - 每个适配器实例一个滑动一分钟窗口
//!
//! 这是适配器对自身配额的保护（advisory self-throttling），
//! 不是跨进程的全局协调。超限时在发起任何网络调用前快速失败。

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{DispatchError, Result};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct WindowState {
    count: u32,
    window_start: Instant,
}

/// 滑动窗口限流器
#[derive(Debug)]
pub struct RateLimiter {
    /// 每窗口调用上限
    max_per_minute: u32,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    /// 创建限流器（默认配额在配置层给出，通常 20/分钟）
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            state: Mutex::new(WindowState {
                count: 0,
                window_start: Instant::now(),
            }),
        }
    }

    /// 记录一次调用，超限返回 `RateLimited`
    pub fn check(&self) -> Result<()> {
        self.check_at(Instant::now())
    }

    /// 带时间戳的版本（用于测试）
    pub fn check_at(&self, now: Instant) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if now.duration_since(state.window_start) > WINDOW {
            state.count = 0;
            state.window_start = now;
        }

        state.count += 1;

        if state.count > self.max_per_minute {
            return Err(DispatchError::RateLimited(format!(
                "at most {} requests per minute",
                self.max_per_minute
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_ceiling() {
        let limiter = RateLimiter::new(3);
        let now = Instant::now();
        assert!(limiter.check_at(now).is_ok());
        assert!(limiter.check_at(now).is_ok());
        assert!(limiter.check_at(now).is_ok());
        // 第 4 次超限
        let err = limiter.check_at(now).unwrap_err();
        assert_eq!(err.code(), "RateLimited");
    }

    #[test]
    fn test_window_resets_after_one_minute() {
        let limiter = RateLimiter::new(1);
        let start = Instant::now();
        assert!(limiter.check_at(start).is_ok());
        assert!(limiter.check_at(start).is_err());

        // 窗口过期后计数重置
        let later = start + Duration::from_secs(61);
        assert!(limiter.check_at(later).is_ok());
    }

    #[test]
    fn test_window_does_not_reset_within_minute() {
        let limiter = RateLimiter::new(1);
        let start = Instant::now();
        assert!(limiter.check_at(start).is_ok());
        assert!(limiter.check_at(start + Duration::from_secs(59)).is_err());
    }
}
