//! 对账 Worker 池
//!
//! 固定数量的 tokio 任务从 [`ReconciliationQueue`] 取订单，每个任务持有独立的
//! [`OrderReconciler`]（独立认领标识）。取任务前后都要经过全局节流，
//! 收到关闭信号后不再取新任务，进行中的订单处理完再退出。

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::accrual_client::AccrualClient;
use crate::queue::ReconciliationQueue;
use crate::repository::LedgerStore;
use crate::worker::reconciler::{Disposition, OrderReconciler, ReconcilerSettings};
use crate::worker::throttle::PollThrottle;

pub struct ReconciliationWorkerPool {
    store: Arc<dyn LedgerStore>,
    client: Arc<dyn AccrualClient>,
    queue: ReconciliationQueue,
    throttle: PollThrottle,
    settings: ReconcilerSettings,
    workers: usize,
}

impl ReconciliationWorkerPool {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        client: Arc<dyn AccrualClient>,
        queue: ReconciliationQueue,
        throttle: PollThrottle,
        settings: ReconcilerSettings,
        workers: usize,
    ) -> Self {
        Self {
            store,
            client,
            queue,
            throttle,
            settings,
            workers: workers.max(1),
        }
    }

    /// 启动全部 Worker，返回各自的 JoinHandle
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(workers = self.workers, "启动对账 Worker 池");

        (0..self.workers)
            .map(|index| {
                let reconciler = OrderReconciler::new(
                    self.store.clone(),
                    self.client.clone(),
                    self.throttle.clone(),
                    self.settings.clone(),
                );
                tokio::spawn(run_worker(
                    index,
                    reconciler,
                    self.queue.clone(),
                    self.throttle.clone(),
                    shutdown.clone(),
                ))
            })
            .collect()
    }
}

async fn run_worker(
    index: usize,
    reconciler: OrderReconciler,
    queue: ReconciliationQueue,
    throttle: PollThrottle,
    mut shutdown: watch::Receiver<bool>,
) {
    let worker_id = reconciler.worker_id();
    debug!(index, worker = %worker_id, "对账 Worker 已启动");

    loop {
        let item = tokio::select! {
            biased;

            _ = shutdown_requested(&mut shutdown) => break,

            item = async {
                throttle.wait_ready().await;
                queue.recv().await
            } => item,
        };

        let Some(item) = item else {
            debug!(index, "对账队列已关闭");
            break;
        };

        // 等待期间其他 Worker 可能触发了限流，取到任务后再检查一次
        if throttle.is_paused() {
            debug!(index, order = %item.order_number, "Worker 池限流中，暂缓处理");
            tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown) => break,

                _ = throttle.wait_ready() => {}
            }
        }

        let number = item.order_number.clone();
        match reconciler.process(item).await {
            Disposition::Finished(_) | Disposition::Dropped => queue.complete(&number),
            Disposition::Retry { item, delay, reason } => {
                debug!(
                    order = %number,
                    attempt = item.attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = reason.as_str(),
                    "订单重新排队"
                );
                queue.schedule(item, delay);
            }
        }
    }

    info!(index, worker = %worker_id, "对账 Worker 已停止");
}

/// 关闭信号置为 true 或发送端被丢弃时返回
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
