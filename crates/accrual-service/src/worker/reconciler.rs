//! 单个订单的对账步骤
//!
//! 一次 [`OrderReconciler::process`] 对应一轮：认领订单、查询外部系统、
//! 落库结果，并给出该订单接下来的去向（结束、丢弃或延迟重试）。
//! 所有状态迁移都以"订单尚未终态"为前提，所以即使租约过期导致两个 Worker
//! 先后处理同一订单，积分也只会入账一次。

use std::sync::Arc;
use std::time::Duration;

use gophermart_shared::config::ReconciliationConfig;
use gophermart_shared::observability::metrics as obs_metrics;
use gophermart_shared::retry::RetryPolicy;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accrual_client::{AccrualClient, AccrualClientError, AccrualStatus};
use crate::error::AccrualError;
use crate::models::{Amount, OrderStatus};
use crate::queue::{Observation, WorkItem};
use crate::repository::{ClaimOutcome, LedgerStore};
use crate::worker::throttle::PollThrottle;

/// 外部系统回复"订单未登记"时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownOrderPolicy {
    /// 按普通退避一直重试
    RetryForever,
    /// 连续 N 次未登记后判定为 INVALID
    InvalidateAfter(u32),
}

impl UnknownOrderPolicy {
    /// 0 表示无限重试
    pub fn from_threshold(threshold: u32) -> Self {
        if threshold == 0 {
            Self::RetryForever
        } else {
            Self::InvalidateAfter(threshold)
        }
    }
}

/// 重新排队的原因（指标标签）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// 外部系统仍在计算
    Pending,
    RateLimited,
    /// 网络、超时、5xx 或响应格式错误
    Transient,
    UnknownOrder,
    /// 订单被其他 Worker 持有
    Busy,
    Storage,
}

impl RetryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::UnknownOrder => "unknown_order",
            Self::Busy => "busy",
            Self::Storage => "storage",
        }
    }
}

/// 一轮对账后订单的去向
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// 本轮把订单推进到了终态
    Finished(OrderStatus),
    /// 订单已终态、不存在或已被其他 Worker 终结，无需再处理
    Dropped,
    Retry {
        item: WorkItem,
        delay: Duration,
        reason: RetryReason,
    },
}

/// 对账参数
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub backoff: RetryPolicy,
    pub claim_lease: Duration,
    pub unknown_policy: UnknownOrderPolicy,
}

impl ReconcilerSettings {
    pub fn from_config(config: &ReconciliationConfig) -> Self {
        Self {
            backoff: RetryPolicy::unbounded(
                config.base_delay(),
                config.max_delay(),
                config.multiplier,
                config.jitter,
            ),
            claim_lease: config.claim_lease(),
            unknown_policy: UnknownOrderPolicy::from_threshold(config.unknown_order_invalidate_after),
        }
    }
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from_config(&ReconciliationConfig::default())
    }
}

/// 单个 Worker 的对账执行器，持有自己的认领标识
pub struct OrderReconciler {
    store: Arc<dyn LedgerStore>,
    client: Arc<dyn AccrualClient>,
    throttle: PollThrottle,
    settings: ReconcilerSettings,
    worker_id: Uuid,
}

impl OrderReconciler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        client: Arc<dyn AccrualClient>,
        throttle: PollThrottle,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store,
            client,
            throttle,
            settings,
            worker_id: Uuid::new_v4(),
        }
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// 处理一个工作项
    pub async fn process(&self, mut item: WorkItem) -> Disposition {
        let number = item.order_number.clone();

        let claimed = self
            .store
            .claim_order(&number, self.worker_id, self.settings.claim_lease)
            .await;
        match claimed {
            Ok(ClaimOutcome::Claimed(order)) => {
                debug!(order = %number, status = %order.status, worker = %self.worker_id, "已认领订单");
            }
            Ok(ClaimOutcome::Terminal(status)) => {
                debug!(order = %number, status = %status, "订单已终态，跳过");
                return Disposition::Dropped;
            }
            Ok(ClaimOutcome::Busy) => {
                debug!(order = %number, "订单被其他 Worker 持有，租约到期后再试");
                item.last_observation = Some(Observation::Busy);
                return self.retry(item, self.settings.claim_lease, RetryReason::Busy);
            }
            Ok(ClaimOutcome::NotFound) => {
                warn!(order = %number, "队列中的订单在存储中不存在，丢弃");
                return Disposition::Dropped;
            }
            Err(e) => return self.storage_failure(item, e),
        }

        let reply = self.client.query(&number).await;
        // 只统计连续的"未登记"回复，其他任何回复都打断连续计数
        if !matches!(reply, Err(AccrualClientError::UnknownOrder)) {
            item.unknown_streak = 0;
        }

        match reply {
            Ok(reply) => match reply.status {
                AccrualStatus::Registered | AccrualStatus::Processing => {
                    let observation = if reply.status == AccrualStatus::Registered {
                        Observation::Registered
                    } else {
                        Observation::Processing
                    };
                    if let Err(e) = self.store.mark_processing(&number, self.worker_id).await {
                        return self.release_after_storage_failure(item, e).await;
                    }
                    self.backoff(item, observation, RetryReason::Pending)
                }
                AccrualStatus::Invalid => self.finish_invalid(item).await,
                AccrualStatus::Processed { accrual } => self.finish_processed(item, accrual).await,
            },
            Err(e) => {
                if let Some(retry_after) = e.retry_after() {
                    self.pause_pool(item, retry_after).await
                } else if e.is_retryable() {
                    warn!(order = %number, error = %e, kind = e.kind(), "查询积分服务失败，稍后重试");
                    self.release(&number).await;
                    self.backoff(item, Observation::Failure, RetryReason::Transient)
                } else {
                    // 除限流外唯一不可重试的错误是"未登记"
                    self.unknown_order(item).await
                }
            }
        }
    }

    async fn unknown_order(&self, mut item: WorkItem) -> Disposition {
        item.unknown_streak = item.unknown_streak.saturating_add(1);
        if let UnknownOrderPolicy::InvalidateAfter(limit) = self.settings.unknown_policy {
            if item.unknown_streak >= limit {
                info!(
                    order = %item.order_number,
                    streak = item.unknown_streak,
                    "外部系统持续未登记该订单，判定为 INVALID"
                );
                return self.finish_invalid(item).await;
            }
        }
        self.release(&item.order_number).await;
        self.backoff(item, Observation::UnknownOrder, RetryReason::UnknownOrder)
    }

    async fn pause_pool(&self, mut item: WorkItem, retry_after: Duration) -> Disposition {
        let resume_at = self.throttle.pause_for(retry_after);
        warn!(
            order = %item.order_number,
            retry_after_secs = retry_after.as_secs(),
            "积分服务限流，暂停整个 Worker 池"
        );
        self.release(&item.order_number).await;
        item.attempt = 0;
        item.last_observation = Some(Observation::RateLimited);
        let delay = resume_at.saturating_duration_since(tokio::time::Instant::now());
        self.retry(item, delay.max(retry_after), RetryReason::RateLimited)
    }

    async fn finish_processed(&self, item: WorkItem, accrual: Amount) -> Disposition {
        match self.store.apply_accrual(&item.order_number, accrual).await {
            Ok(true) => {
                info!(order = %item.order_number, accrual = %accrual, "订单积分已入账");
                obs_metrics::record_order_finalized(OrderStatus::Processed.as_str());
                obs_metrics::record_points_credited(accrual.minor());
                Disposition::Finished(OrderStatus::Processed)
            }
            Ok(false) => {
                debug!(order = %item.order_number, "订单已被其他 Worker 终结");
                Disposition::Dropped
            }
            Err(e) => self.release_after_storage_failure(item, e).await,
        }
    }

    async fn finish_invalid(&self, item: WorkItem) -> Disposition {
        match self.store.mark_invalid(&item.order_number).await {
            Ok(true) => {
                info!(order = %item.order_number, "订单被判定为 INVALID");
                obs_metrics::record_order_finalized(OrderStatus::Invalid.as_str());
                Disposition::Finished(OrderStatus::Invalid)
            }
            Ok(false) => Disposition::Dropped,
            Err(e) => self.release_after_storage_failure(item, e).await,
        }
    }

    /// 按退避策略重排，观察结果变化时退避归零
    fn backoff(&self, mut item: WorkItem, observation: Observation, reason: RetryReason) -> Disposition {
        if item.last_observation == Some(observation) {
            item.attempt = item.attempt.saturating_add(1);
        } else {
            item.attempt = 0;
            item.last_observation = Some(observation);
        }
        let delay = self.settings.backoff.jittered_delay(item.attempt);
        self.retry(item, delay, reason)
    }

    fn retry(&self, item: WorkItem, delay: Duration, reason: RetryReason) -> Disposition {
        obs_metrics::record_retry(reason.as_str());
        Disposition::Retry {
            item,
            delay,
            reason,
        }
    }

    fn storage_failure(&self, item: WorkItem, err: AccrualError) -> Disposition {
        warn!(
            order = %item.order_number,
            error = %err,
            code = err.error_code(),
            "存储操作失败，稍后重试"
        );
        self.backoff(item, Observation::Failure, RetryReason::Storage)
    }

    async fn release_after_storage_failure(&self, item: WorkItem, err: AccrualError) -> Disposition {
        self.release(&item.order_number).await;
        self.storage_failure(item, err)
    }

    /// 尽力释放认领，失败时等租约自然过期
    async fn release(&self, number: &str) {
        if let Err(e) = self.store.release_claim(number, self.worker_id).await {
            warn!(order = %number, error = %e, "释放订单认领失败");
        }
    }
}
