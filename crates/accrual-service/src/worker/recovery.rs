//! 恢复扫描
//!
//! 队列只存在于内存中。启动时把存储里所有未终结的订单重新入队，
//! 不管租约是否到期：上一个进程可能在查询外部系统途中崩溃，留下仍有效的租约，
//! Worker 认领时遇到 Busy 会在租约到期后重试。之后按配置周期性扫描，
//! 只接手租约已过期的订单（崩溃的对等实例遗留）。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::queue::ReconciliationQueue;
use crate::repository::LedgerStore;

pub struct RecoverySweeper {
    store: Arc<dyn LedgerStore>,
    queue: ReconciliationQueue,
    batch_size: i64,
    interval: Option<Duration>,
}

impl RecoverySweeper {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        queue: ReconciliationQueue,
        batch_size: i64,
        interval: Option<Duration>,
    ) -> Self {
        Self {
            store,
            queue,
            batch_size: batch_size.max(1),
            interval,
        }
    }

    /// 启动扫描：所有未终结订单入队，返回新入队数量
    pub async fn sweep_all(&self) -> Result<usize> {
        self.sweep(true).await
    }

    /// 周期扫描：只入队未被有效认领的订单
    pub async fn sweep_unclaimed(&self) -> Result<usize> {
        self.sweep(false).await
    }

    #[instrument(skip(self))]
    async fn sweep(&self, include_claimed: bool) -> Result<usize> {
        let mut after: Option<String> = None;
        let mut enqueued = 0usize;
        let mut scanned = 0usize;

        loop {
            let page = self
                .store
                .list_unfinished_orders(after.clone(), self.batch_size, include_claimed)
                .await?;
            let page_len = page.len();
            scanned += page_len;

            for number in &page {
                if self.queue.enqueue(number) {
                    enqueued += 1;
                }
            }

            if (page_len as i64) < self.batch_size {
                break;
            }
            after = page.into_iter().last();
        }

        if enqueued > 0 {
            info!(scanned, enqueued, "恢复扫描完成，未终结订单已重新入队");
        }
        Ok(enqueued)
    }

    /// 启动时扫描一次，之后按间隔周期扫描直到关闭
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.sweep_all().await {
            warn!(error = %e, code = e.error_code(), "启动恢复扫描失败");
        }

        let Some(interval) = self.interval else {
            return;
        };

        let mut ticker = tokio::time::interval(interval);
        // 第一次 tick 立即返回，启动扫描已经做过
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("恢复扫描已停止");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_unclaimed().await {
                        warn!(error = %e, code = e.error_code(), "周期恢复扫描失败");
                    }
                }
            }
        }
    }
}
