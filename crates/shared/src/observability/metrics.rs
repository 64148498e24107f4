//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "ledger_orders_created_total",
        "Total number of orders created by ledger transactions"
    );
    metrics::describe_counter!(
        "ledger_transactions_failed_total",
        "Total number of rolled back ledger transactions"
    );
    metrics::describe_counter!(
        "community_reconciliations_total",
        "Community score reconciliations by outcome"
    );
    metrics::describe_counter!(
        "community_dispatch_tasks_total",
        "Single-user reconciliation tasks enqueued by the dispatcher"
    );
    metrics::describe_histogram!(
        "community_dispatch_duration_seconds",
        "Duration of a full dispatch sweep"
    );
    metrics::describe_counter!("task_executions_total", "Background task executions by outcome");
    metrics::describe_histogram!(
        "task_execution_duration_seconds",
        "Background task execution duration in seconds"
    );
    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last loop iteration of a background worker"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
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

    Ok(server_handle)
}

/// 获取全局 Prometheus handle
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次成功提交的账本事务
#[inline]
pub fn record_order_created(order_type: &str) {
    metrics::counter!(
        "ledger_orders_created_total",
        "type" => order_type.to_string()
    )
    .increment(1);
}

/// 记录一次回滚的账本事务
#[inline]
pub fn record_ledger_failure(order_type: &str) {
    metrics::counter!(
        "ledger_transactions_failed_total",
        "type" => order_type.to_string()
    )
    .increment(1);
}

/// 记录单用户对账结果（updated / unchanged / failed）
#[inline]
pub fn record_reconciliation(outcome: &str) {
    metrics::counter!(
        "community_reconciliations_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录一次分发扫描
#[inline]
pub fn record_dispatch(task_count: u64, duration_secs: f64) {
    metrics::counter!("community_dispatch_tasks_total").increment(task_count);
    metrics::histogram!("community_dispatch_duration_seconds").record(duration_secs);
}

/// 记录后台任务执行
#[inline]
pub fn record_task_execution(task_type: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "task_executions_total",
        "task_type" => task_type.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "task_execution_duration_seconds",
        "task_type" => task_type.to_string()
    )
    .record(duration_secs);
}

/// 记录 Worker 存活时间戳，供告警判断 Worker 是否卡死
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!(
        "worker_last_run_timestamp",
        "worker" => worker.to_string()
    )
    .set(chrono::Utc::now().timestamp() as f64);
}
