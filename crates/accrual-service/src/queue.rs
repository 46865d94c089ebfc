//! 对账队列
//!
//! 进程内的订单号队列。同一订单号在"排队中、延迟等待中、处理中"三种状态下
//! 最多只出现一次，直到 Worker 调用 [`ReconciliationQueue::complete`]。
//!
//! 延迟重排由独立的定时任务完成，不占用 Worker。
//! 队列内容可以随时从存储中的 NEW/PROCESSING 订单重建，进程退出时直接丢弃。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashSet;
use gophermart_shared::observability::metrics as obs_metrics;
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::debug;

/// Worker 上一次对该订单的观察结果，用于判断退避是否需要归零
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Registered,
    Processing,
    UnknownOrder,
    RateLimited,
    /// 网络、超时、5xx、格式错误或存储失败
    Failure,
    /// 被其他 Worker 认领
    Busy,
}

/// 队列中的工作项
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub order_number: String,
    /// 当前观察结果连续出现的次数，决定下一次退避
    pub attempt: u32,
    pub last_observation: Option<Observation>,
    /// 连续"订单未登记"回复次数
    pub unknown_streak: u32,
}

impl WorkItem {
    pub fn new(order_number: impl Into<String>) -> Self {
        Self {
            order_number: order_number.into(),
            attempt: 0,
            last_observation: None,
            unknown_streak: 0,
        }
    }
}

struct Inner {
    tx: mpsc::UnboundedSender<WorkItem>,
    rx: Mutex<mpsc::UnboundedReceiver<WorkItem>>,
    pending: DashSet<String>,
    closed: AtomicBool,
    close_notify: Notify,
}

/// 对账队列，clone 后共享同一队列
#[derive(Clone)]
pub struct ReconciliationQueue {
    inner: Arc<Inner>,
}

impl Default for ReconciliationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconciliationQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                tx,
                rx: Mutex::new(rx),
                pending: DashSet::new(),
                closed: AtomicBool::new(false),
                close_notify: Notify::new(),
            }),
        }
    }

    /// 放入一个新订单号
    ///
    /// 已在队列中（或处理中）时返回 false，不重复放入
    pub fn enqueue(&self, order_number: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        if !self.inner.pending.insert(order_number.to_string()) {
            debug!(order = %order_number, "订单已在队列中，忽略重复入队");
            return false;
        }

        if self.inner.tx.send(WorkItem::new(order_number)).is_err() {
            self.inner.pending.remove(order_number);
            return false;
        }
        self.report_pending();
        true
    }

    /// 延迟后重新放入（订单号保持占位）
    pub fn schedule(&self, item: WorkItem, delay: Duration) {
        if self.is_closed() {
            self.complete(&item.order_number);
            return;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let closed = inner.close_notify.notified();
            tokio::pin!(closed);
            closed.as_mut().enable();
            if inner.closed.load(Ordering::Acquire) {
                return;
            }

            tokio::select! {
                _ = &mut closed => {}
                _ = tokio::time::sleep(delay) => {
                    let number = item.order_number.clone();
                    if inner.closed.load(Ordering::Acquire) || inner.tx.send(item).is_err() {
                        inner.pending.remove(&number);
                    }
                }
            }
        });
    }

    /// 取出下一个工作项，队列关闭后返回 None
    pub async fn recv(&self) -> Option<WorkItem> {
        let closed = self.inner.close_notify.notified();
        tokio::pin!(closed);
        closed.as_mut().enable();
        if self.is_closed() {
            return None;
        }

        tokio::select! {
            biased;
            _ = &mut closed => None,
            item = async { self.inner.rx.lock().await.recv().await } => item,
        }
    }

    /// 订单处理结束（终态或放弃），释放占位
    pub fn complete(&self, order_number: &str) {
        self.inner.pending.remove(order_number);
        self.report_pending();
    }

    pub fn contains(&self, order_number: &str) -> bool {
        self.inner.pending.contains(order_number)
    }

    /// 排队、延迟等待与处理中的订单总数
    pub fn pending(&self) -> usize {
        self.inner.pending.len()
    }

    /// 关闭队列：不再接收新订单，唤醒所有等待者，丢弃延迟中的工作项
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.close_notify.notify_waiters();
            debug!(pending = self.pending(), "对账队列已关闭");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn report_pending(&self) {
        obs_metrics::set_queue_pending(self.inner.pending.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_dedups_pending_numbers() {
        let queue = ReconciliationQueue::new();

        assert!(queue.enqueue("12345678903"));
        assert!(!queue.enqueue("12345678903"));
        assert_eq!(queue.pending(), 1);

        let item = queue.recv().await.unwrap();
        assert_eq!(item, WorkItem::new("12345678903"));

        // 处理中仍然占位
        assert!(!queue.enqueue("12345678903"));
        queue.complete("12345678903");
        assert!(queue.enqueue("12345678903"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_delivers_after_delay() {
        let queue = ReconciliationQueue::new();
        assert!(queue.enqueue("79927398713"));
        let mut item = queue.recv().await.unwrap();
        item.attempt = 3;

        let started = tokio::time::Instant::now();
        queue.schedule(item, Duration::from_secs(8));

        let redelivered = queue.recv().await.unwrap();
        assert_eq!(redelivered.attempt, 3);
        assert!(started.elapsed() >= Duration::from_secs(8));
        assert!(queue.contains("79927398713"));
    }

    #[tokio::test]
    async fn test_close_wakes_receivers() {
        let queue = ReconciliationQueue::new();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.recv().await })
        };

        tokio::task::yield_now().await;
        queue.close();

        assert!(waiter.await.unwrap().is_none());
        assert!(!queue.enqueue("12345678903"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_drops_scheduled_items() {
        let queue = ReconciliationQueue::new();
        queue.enqueue("12345678903");
        let item = queue.recv().await.unwrap();
        queue.schedule(item, Duration::from_secs(60));

        queue.close();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(queue.recv().await.is_none());
    }
}
