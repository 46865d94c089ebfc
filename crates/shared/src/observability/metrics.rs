//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    /// 停止指标 HTTP 服务
    pub fn shutdown(self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(MetricsHandle { server_handle })
}

/// 注册对账流水线的指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("orders_admitted_total", "Order submissions by admission outcome");
    metrics::describe_counter!(
        "accrual_requests_total",
        "Requests to the external accrual service by result"
    );
    metrics::describe_histogram!(
        "accrual_request_duration_seconds",
        "External accrual request latency in seconds"
    );
    metrics::describe_counter!("orders_finalized_total", "Orders that reached a terminal status");
    metrics::describe_counter!(
        "accrual_points_credited_total",
        "Accrual points credited to balances, in hundredths"
    );
    metrics::describe_counter!("withdrawals_total", "Withdrawal requests by outcome");
    metrics::describe_counter!(
        "reconciliation_retries_total",
        "Orders rescheduled for another polling round, by reason"
    );
    metrics::describe_gauge!(
        "reconciliation_queue_pending",
        "Orders queued, scheduled or in flight in this process"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录订单准入结果
#[inline]
pub fn record_admission(outcome: &'static str) {
    metrics::counter!("orders_admitted_total", "outcome" => outcome).increment(1);
}

/// 记录一次外部积分服务请求
#[inline]
pub fn record_accrual_request(result: &'static str, duration_secs: f64) {
    metrics::counter!("accrual_requests_total", "result" => result).increment(1);
    metrics::histogram!("accrual_request_duration_seconds", "result" => result)
        .record(duration_secs);
}

/// 记录订单进入终态
#[inline]
pub fn record_order_finalized(status: &'static str) {
    metrics::counter!("orders_finalized_total", "status" => status).increment(1);
}

/// 记录入账积分（单位：分）
#[inline]
pub fn record_points_credited(minor_units: i64) {
    if minor_units > 0 {
        metrics::counter!("accrual_points_credited_total").increment(minor_units as u64);
    }
}

/// 记录提现结果
#[inline]
pub fn record_withdrawal(outcome: &'static str) {
    metrics::counter!("withdrawals_total", "outcome" => outcome).increment(1);
}

/// 记录一次重新排队
#[inline]
pub fn record_retry(reason: &'static str) {
    metrics::counter!("reconciliation_retries_total", "reason" => reason).increment(1);
}

/// 更新进程内待处理订单数
#[inline]
pub fn set_queue_pending(pending: usize) {
    metrics::gauge!("reconciliation_queue_pending").set(pending as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_admission("accepted");
        record_accrual_request("processed", 0.02);
        record_order_finalized("PROCESSED");
        record_points_credited(50_000);
        record_points_credited(0);
        record_withdrawal("accepted");
        record_retry("transient");
        set_queue_pending(3);
    }
}
