//! 积分结算服务
//!
//! 启动恢复扫描与对账 Worker 池，持续把订单推进到终态。

use std::sync::Arc;
use std::time::Duration;

use gophermart_accrual::{AccrualPipeline, HttpAccrualClient, PgLedgerStore};
use gophermart_shared::{
    config::AppConfig, database::Database, observability, retry::RetryPolicy,
};
use tokio::sync::watch;
use tracing::{error, info};

const SERVICE_NAME: &str = "gophermart-accrual";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!(
        environment = %config.environment,
        accrual_base_url = %config.accrual.base_url,
        workers = config.reconciliation.workers,
        "Starting {}",
        SERVICE_NAME
    );

    // 编排环境下数据库可能晚于服务就绪
    let connect_policy = RetryPolicy {
        max_retries: Some(5),
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(15),
        ..Default::default()
    };
    let db = Database::connect_with_retry(&config.database, &connect_policy).await?;
    db.health_check().await?;
    db.ensure_tables(PgLedgerStore::REQUIRED_TABLES).await?;

    let store = Arc::new(PgLedgerStore::new(db.pool().clone()));
    let client = Arc::new(HttpAccrualClient::new(&config.accrual)?);
    info!(base_url = %client.base_url(), "积分服务客户端已就绪");

    let pipeline = AccrualPipeline::new(store, client, &config.reconciliation);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = pipeline.start(shutdown_rx);

    shutdown_signal().await;

    if shutdown_tx.send(true).is_err() {
        error!("所有 Worker 已提前退出");
    }
    handle.join().await;
    db.close().await;

    info!("{} stopped", SERVICE_NAME);
    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
