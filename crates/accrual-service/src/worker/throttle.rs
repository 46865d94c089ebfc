//! 全局轮询节流
//!
//! 外部系统返回 429 时，整个 Worker 池在 Retry-After 期间停止发起请求。
//! 所有 Worker 共享一个"最早恢复时间"，取任务前和取到任务后都要等到该时间点。

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct PollThrottle {
    resume_at: Arc<Mutex<Option<Instant>>>,
}

impl PollThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 暂停整个池 `duration`，已有更晚的恢复时间时保持不变
    ///
    /// 返回生效的恢复时间
    pub fn pause_for(&self, duration: Duration) -> Instant {
        let candidate = Instant::now() + duration;
        let mut resume_at = self.resume_at.lock();
        let effective = match *resume_at {
            Some(existing) if existing >= candidate => existing,
            _ => candidate,
        };
        *resume_at = Some(effective);
        effective
    }

    /// 尚未到达的恢复时间
    pub fn resume_at(&self) -> Option<Instant> {
        let now = Instant::now();
        (*self.resume_at.lock()).filter(|t| *t > now)
    }

    pub fn is_paused(&self) -> bool {
        self.resume_at().is_some()
    }

    /// 等待直到允许发起请求
    ///
    /// 等待期间恢复时间被推迟时会继续等待
    pub async fn wait_ready(&self) {
        while let Some(deadline) = self.resume_at() {
            tokio::time::sleep_until(deadline).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pause_only_extends() {
        let throttle = PollThrottle::new();
        assert!(!throttle.is_paused());

        let long = throttle.pause_for(Duration::from_secs(60));
        let short = throttle.pause_for(Duration::from_secs(5));
        assert_eq!(long, short);
        assert!(throttle.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_sleeps_until_resume() {
        let throttle = PollThrottle::new();
        let started = Instant::now();

        throttle.wait_ready().await;
        assert_eq!(started.elapsed(), Duration::ZERO);

        throttle.pause_for(Duration::from_secs(30));
        throttle.wait_ready().await;
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(!throttle.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_follows_extension() {
        let throttle = PollThrottle::new();
        let started = Instant::now();
        throttle.pause_for(Duration::from_secs(10));

        let extender = {
            let throttle = throttle.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                throttle.pause_for(Duration::from_secs(20));
            })
        };

        throttle.wait_ready().await;
        extender.await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(25));
    }
}
