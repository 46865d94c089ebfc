//! 积分结算服务
//!
//! 用户提交订单号后，异步向外部积分计算系统轮询订单结果，
//! 把最终积分恰好一次地记入用户余额，并提供余额查询与提现。
//!
//! ## 核心流程
//!
//! 订单准入（Luhn 校验、去重）-> 存储（NEW）-> 对账队列 -> Worker 池
//! -> 外部系统（轮询直到终态）-> 存储（状态、积分、余额同事务）
//!
//! ## 模块结构
//!
//! - `models`: 领域模型
//! - `error`: 错误类型
//! - `luhn`: 订单号校验
//! - `accrual_client`: 外部积分系统客户端
//! - `repository`: 账本存储（PostgreSQL / 内存）
//! - `queue`: 对账队列
//! - `worker`: 对账 Worker 池、全局节流与恢复扫描
//! - `service`: 准入、余额与提现服务
//! - `test_utils`: 测试辅助

pub mod accrual_client;
pub mod error;
pub mod luhn;
pub mod models;
pub mod queue;
pub mod repository;
pub mod service;
pub mod test_utils;
pub mod worker;

use std::sync::Arc;

use gophermart_shared::config::ReconciliationConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub use accrual_client::{
    AccrualClient, AccrualClientError, AccrualReply, AccrualStatus, HttpAccrualClient,
};
pub use error::{AccrualError, Result};
pub use models::*;
pub use queue::{ReconciliationQueue, WorkItem};
pub use repository::{LedgerStore, MemoryLedgerStore, PgLedgerStore};
pub use service::{
    AdmissionOutcome, BalanceService, OrderAdmissionGate, RejectReason, WithdrawOutcome,
};
pub use worker::{
    PollThrottle, ReconcilerSettings, ReconciliationWorkerPool, RecoverySweeper,
    UnknownOrderPolicy,
};

/// 对账流水线的组装入口
///
/// 持有共享的存储、客户端、队列与节流器，向上层提供准入与余额服务，
/// 并负责启动 Worker 池和恢复扫描。
pub struct AccrualPipeline {
    store: Arc<dyn LedgerStore>,
    client: Arc<dyn AccrualClient>,
    queue: ReconciliationQueue,
    throttle: PollThrottle,
    settings: ReconcilerSettings,
    workers: usize,
    sweep_batch_size: i64,
    sweep_interval: Option<std::time::Duration>,
}

impl AccrualPipeline {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        client: Arc<dyn AccrualClient>,
        config: &ReconciliationConfig,
    ) -> Self {
        Self::with_settings(store, client, config, ReconcilerSettings::from_config(config))
    }

    /// 使用自定义对账参数（测试中用于关闭抖动）
    pub fn with_settings(
        store: Arc<dyn LedgerStore>,
        client: Arc<dyn AccrualClient>,
        config: &ReconciliationConfig,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store,
            client,
            queue: ReconciliationQueue::new(),
            throttle: PollThrottle::new(),
            settings,
            workers: config.workers,
            sweep_batch_size: config.sweep_batch_size,
            sweep_interval: config.sweep_interval(),
        }
    }

    pub fn admission_gate(&self) -> OrderAdmissionGate {
        OrderAdmissionGate::new(self.store.clone(), self.queue.clone())
    }

    pub fn balance_service(&self) -> BalanceService {
        BalanceService::new(self.store.clone())
    }

    pub fn queue(&self) -> &ReconciliationQueue {
        &self.queue
    }

    pub fn throttle(&self) -> &PollThrottle {
        &self.throttle
    }

    /// 启动恢复扫描与 Worker 池
    ///
    /// `shutdown` 置为 true 后 Worker 不再取新任务，[`PipelineHandle::join`] 等待全部退出
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> PipelineHandle {
        let sweeper = RecoverySweeper::new(
            self.store.clone(),
            self.queue.clone(),
            self.sweep_batch_size,
            self.sweep_interval,
        );
        let sweeper_task = tokio::spawn(sweeper.run(shutdown.clone()));

        let pool = ReconciliationWorkerPool::new(
            self.store.clone(),
            self.client.clone(),
            self.queue.clone(),
            self.throttle.clone(),
            self.settings.clone(),
            self.workers,
        );
        let worker_tasks = pool.spawn(shutdown);

        info!(workers = worker_tasks.len(), "对账流水线已启动");

        PipelineHandle {
            queue: self.queue.clone(),
            sweeper_task,
            worker_tasks,
        }
    }
}

/// 运行中的流水线
pub struct PipelineHandle {
    queue: ReconciliationQueue,
    sweeper_task: JoinHandle<()>,
    worker_tasks: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    /// 等待 Worker 与恢复扫描退出，然后关闭队列
    ///
    /// 调用前应先发出关闭信号
    pub async fn join(self) {
        for result in futures::future::join_all(self.worker_tasks).await {
            if let Err(e) = result {
                error!(error = %e, "对账 Worker 异常退出");
            }
        }
        if let Err(e) = self.sweeper_task.await {
            error!(error = %e, "恢复扫描任务异常退出");
        }

        self.queue.close();
        info!(dropped = self.queue.pending(), "对账流水线已停止，未完成订单将由下次启动恢复");
    }
}
