//! 重试策略与退避计算
//!
//! 提供指数退避（带抖动）的延迟计算，以及通用的异步重试执行器。
//!
//! 两种用法：
//! - 对账 Worker 只借用 [`RetryPolicy::jittered_delay`] 计算下一次轮询的等待时间，
//!   重试次数不设上限（`max_retries = None`），订单一直保留到拿到终态为止；
//! - 启动阶段的数据库连接等一次性操作使用 [`retry_with_policy`]，有限次数重试后放弃。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

/// 重试策略配置
///
/// 首次失败等待 `initial_delay`，之后每次乘以 `multiplier`，直到 `max_delay` 封顶。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次执行），`None` 表示无限重试
    pub max_retries: Option<u32>,
    /// 首次重试前的等待时间
    pub initial_delay: Duration,
    /// 退避时间上限
    pub max_delay: Duration,
    /// 每次重试的退避倍数
    pub multiplier: f64,
    /// 抖动比例（0.0 ~ 1.0），实际延迟在 `[delay * (1 - jitter), delay]` 内随机
    pub jitter: f64,
}

impl Default for RetryPolicy {
    /// 默认策略：最多重试 3 次，初始等待 1 秒，最大等待 30 秒，倍数 2.0，不抖动
    fn default() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// 无重试上限的策略（对账轮询使用）
    pub fn unbounded(initial_delay: Duration, max_delay: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            max_retries: None,
            initial_delay,
            max_delay,
            multiplier,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// 计算第 N 次重试的等待时间（attempt 从 0 开始，不含抖动）
    ///
    /// 公式: initial_delay * multiplier^attempt，结果不超过 max_delay。
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        // powi 的指数是 i32，超大 attempt 直接封顶
        let exp = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = base_ms * self.multiplier.max(1.0).powi(exp);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// 计算带抖动的等待时间
    ///
    /// 抖动只向下收缩，保证结果永远不超过 max_delay。
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }

        let factor = 1.0 - rand::rng().random_range(0.0..=self.jitter.min(1.0));
        Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
    }

    /// 是否应继续重试
    ///
    /// attempt 表示已经失败的次数，无上限策略永远返回 true。
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_retries.is_none_or(|max| attempt < max)
    }
}

/// 带重试的异步执行器
///
/// 仅在 `is_retryable` 返回 true 时才重试，其余错误直接向上传播。
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation = operation_name, attempt, "操作在重试后成功");
                }
                return Ok(value);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    warn!(
                        operation = operation_name,
                        error = %err,
                        "操作失败且不可重试，直接返回错误"
                    );
                    return Err(err);
                }

                if !policy.should_retry(attempt) {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_retries = ?policy.max_retries,
                        error = %err,
                        "已达最大重试次数，放弃重试"
                    );
                    return Err(err);
                }

                let delay = policy.jittered_delay(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "操作失败，将在退避后重试"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
