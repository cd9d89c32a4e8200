//! BIOFOX 管理后台服务入口

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::Request, http::HeaderValue, middleware, middleware::Next, response::Response};
use biofox_admin_service::{routes, state::AppState, worker::CommissionWorker};
use biofox_shared::{
    cache::Cache,
    config::AppConfig,
    database::Database,
    observability::{self, TelemetryConfig},
};
use tokio::net::TcpListener;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "biofox-admin-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;
    config.validate()?;

    let _guard = observability::init(&TelemetryConfig::from_app_config(&config)).await?;

    info!(
        environment = %config.environment,
        "Starting {} on {}",
        SERVICE_NAME,
        config.server_addr()
    );
    if config.auth.uses_dev_secret() {
        warn!("Using default JWT secret - set BIOFOX_AUTH__JWT_SECRET outside development");
    }

    let db = Database::connect(&config.database).await?;
    if config.database.run_migrations {
        db.run_migrations().await?;
    }
    let cache = Arc::new(Cache::new(&config.redis)?);

    let state = AppState::from_config(db.pool().clone(), cache.clone(), &config);

    if config.commission.worker_enabled {
        match CommissionWorker::new(db.pool().clone(), cache.clone(), &config.commission) {
            Ok(worker) => {
                tokio::spawn(async move { worker.run().await });
                info!(cron = %config.commission.schedule_cron, "CommissionWorker spawned");
            }
            Err(e) => error!(error = %e, "CommissionWorker disabled: invalid schedule"),
        }
    } else {
        info!("CommissionWorker disabled by configuration");
    }

    let app = routes::app(state)
        .layer(middleware::from_fn(security_headers))
        .layer(cors_layer(&config.server.cors_origins, config.is_production()))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(CompressionLayer::new());

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    info!("Server shutdown complete");

    Ok(())
}

/// 逗号分隔的来源列表；"*" 表示放开全部来源，为空时仅非生产环境放开
fn cors_layer(allowed_origins: &str, production: bool) -> CorsLayer {
    let allowed_origins = allowed_origins.trim();
    if allowed_origins == "*" || (allowed_origins.is_empty() && !production) {
        if production {
            warn!("cors_origins=\"*\" 在生产环境中不安全，请设置为具体域名");
        }
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    info!("CORS allowed_origins: {}", allowed_origins);
    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "strict-transport-security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    response
}

/// 收到 SIGTERM 或 Ctrl+C 后返回，触发优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
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
