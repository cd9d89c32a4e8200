//! 应用状态定义

use std::sync::Arc;
use std::time::Duration;

use biofox_shared::cache::Cache;
use biofox_shared::config::{AppConfig, AuthConfig};
use sqlx::PgPool;

use crate::auth::{JwtConfig, JwtManager};

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL 连接池
    pub pool: PgPool,
    /// Redis 缓存客户端
    pub cache: Arc<Cache>,
    pub jwt_manager: Arc<JwtManager>,
    pub auth: Arc<AuthConfig>,
    /// 看板缓存有效期
    pub dashboard_ttl: Duration,
}

impl AppState {
    pub fn new(pool: PgPool, cache: Arc<Cache>, auth: AuthConfig, dashboard_ttl: Duration) -> Self {
        let jwt_manager = Arc::new(JwtManager::new(JwtConfig::from(&auth)));
        Self {
            pool,
            cache,
            jwt_manager,
            auth: Arc::new(auth),
            dashboard_ttl,
        }
    }

    pub fn from_config(pool: PgPool, cache: Arc<Cache>, config: &AppConfig) -> Self {
        Self::new(
            pool,
            cache,
            config.auth.clone(),
            Duration::from_secs(config.redis.dashboard_ttl_secs),
        )
    }
}
