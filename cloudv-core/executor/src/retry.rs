//! 重试退避策略

use std::time::Duration;

/// 指数退避：第 n 次失败后等待 `base * 2^(n-1)`，不超过 `cap`，
/// 从第一次尝试开始累计不超过 `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub cap: Duration,
    pub window: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, cap: Duration, window: Duration) -> Self {
        Self { base, cap, window }
    }

    /// 第 `attempt` 次（从 1 开始）失败后的等待时间
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.cap, |d| d.min(self.cap))
    }

    /// 已经过 `elapsed` 时，再等待 `delay` 后是否仍在窗口内
    pub fn allows(&self, elapsed: Duration, delay: Duration) -> bool {
        elapsed + delay <= self.window
    }
}

/// 线性退避：第 n 次失败后等待 `step * n`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    pub step: Duration,
}

impl LinearBackoff {
    pub fn new(step: Duration) -> Self {
        Self { step }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.step * attempt.max(1)
    }
}
