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

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    describe_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

fn describe_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!("orders_created_total", "Total number of orders created");
    metrics::describe_counter!(
        "device_sales_total",
        "Device sale rows recorded, by kind and tier"
    );
    metrics::describe_counter!(
        "device_units_total",
        "Device units sold (positive) or returned (negative), by tier"
    );
    metrics::describe_counter!(
        "commission_calculations_total",
        "Monthly commission rows written, by outcome"
    );
    metrics::describe_histogram!(
        "commission_calculation_duration_seconds",
        "Monthly commission batch duration in seconds"
    );
    metrics::describe_counter!(
        "notifications_created_total",
        "Notifications created, by type"
    );
    metrics::describe_gauge!(
        "worker_last_run_timestamp_seconds",
        "Unix timestamp of the last completed worker run"
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

/// 记录 HTTP 请求
///
/// `route` 应为路由模板（如 `/api/orders/{id}`），避免 ID 撑爆标签基数
#[inline]
pub fn record_http_request(method: &str, route: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

#[inline]
pub fn record_order_created(self_shop: bool) {
    metrics::counter!(
        "orders_created_total",
        "self_shop" => self_shop.to_string()
    )
    .increment(1);
}

/// 记录器械销售；quantity 为负表示退货
#[inline]
pub fn record_device_sale(tier: &str, quantity: i32) {
    let kind = if quantity < 0 { "return" } else { "sale" };
    metrics::counter!(
        "device_sales_total",
        "kind" => kind,
        "tier" => tier.to_string()
    )
    .increment(1);

    metrics::counter!("device_units_total", "tier" => tier.to_string())
        .increment(quantity.unsigned_abs() as u64);
}

/// 记录月度佣金计算结果（created / updated / skipped_paid）
#[inline]
pub fn record_commission_calculation(outcome: &str, count: u64) {
    metrics::counter!(
        "commission_calculations_total",
        "outcome" => outcome.to_string()
    )
    .increment(count);
}

#[inline]
pub fn record_commission_batch_duration(duration_secs: f64) {
    metrics::histogram!("commission_calculation_duration_seconds").record(duration_secs);
}

#[inline]
pub fn record_notification_created(notification_type: &str) {
    metrics::counter!(
        "notifications_created_total",
        "type" => notification_type.to_string()
    )
    .increment(1);
}

#[inline]
pub fn set_worker_last_run(worker: &str, timestamp_secs: f64) {
    metrics::gauge!(
        "worker_last_run_timestamp_seconds",
        "worker" => worker.to_string()
    )
    .set(timestamp_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 未安装 recorder 时这些函数为空操作
        record_http_request("GET", "/api/orders/{id}", 200, 0.1);
        record_order_created(false);
        record_device_sale("tier_1_4", 3);
        record_device_sale("tier_5_plus", -1);
        record_commission_calculation("created", 4);
        record_commission_batch_duration(1.5);
        record_notification_created("order_created");
        set_worker_last_run("commission", 1_700_000_000.0);
    }
}
