//! 统一可观测性模块
//!
//! 提供 metrics、tracing、logging 的统一初始化和管理。
//! 服务通过单一入口点配置可观测性，确保一致的指标命名和追踪传播。

pub mod metrics;
pub mod middleware;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;

use crate::config::AppConfig;

/// 运行期可观测性设置
///
/// 由 `AppConfig` 中的 observability 段和服务名组合而成
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// 服务名称，用于标识追踪和指标的来源
    pub service_name: String,
    /// OTLP 端点，为空时不导出分布式追踪
    pub otlp_endpoint: Option<String>,
    /// 为 None 时不启动 Prometheus 导出
    pub metrics_port: Option<u16>,
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            otlp_endpoint: None,
            metrics_port: Some(9090),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        let obs = &config.observability;
        Self {
            service_name: config.service_name.clone(),
            otlp_endpoint: if obs.tracing_enabled {
                obs.tracing_endpoint.clone()
            } else {
                None
            },
            metrics_port: obs.metrics_enabled.then_some(obs.metrics_port),
            log_level: obs.log_level.clone(),
            json_logs: obs.log_format.eq_ignore_ascii_case("json"),
        }
    }
}

/// 可观测性资源守卫
///
/// Drop 时关闭追踪 provider 并刷新待发送的 span。
pub struct ObservabilityGuard {
    _metrics_handle: Option<metrics::MetricsHandle>,
    _tracing_guard: Option<tracing::TracingGuard>,
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!("Shutting down observability...");
    }
}

/// 统一初始化可观测性
///
/// 先初始化 tracing（日志和追踪），再启动 Prometheus 指标导出。
pub async fn init(config: &TelemetryConfig) -> Result<ObservabilityGuard> {
    let tracing_guard = tracing::init(config)?;

    info!(
        service = %config.service_name,
        metrics_port = ?config.metrics_port,
        otlp_endpoint = ?config.otlp_endpoint,
        "Observability initialized"
    );

    let metrics_handle = match config.metrics_port {
        Some(port) => Some(metrics::init(&config.service_name, port).await?),
        None => None,
    };

    Ok(ObservabilityGuard {
        _metrics_handle: metrics_handle,
        _tracing_guard: Some(tracing_guard),
    })
}
