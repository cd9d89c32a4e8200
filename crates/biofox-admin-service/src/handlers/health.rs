//! 存活与就绪探针

use axum::{Json, extract::State};
use biofox_shared::database::Database;
use serde::Serialize;

use crate::state::AppState;

pub const SERVICE_NAME: &str = "biofox-admin-service";

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub service: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub database: &'static str,
    pub redis: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadinessStatus {
    pub status: &'static str,
    pub service: &'static str,
    pub checks: ReadinessChecks,
}

/// 存活探针
///
/// GET /health
pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        service: SERVICE_NAME,
    })
}

/// 就绪探针：数据库与 Redis 任一不可用即为 degraded
///
/// GET /ready
pub async fn ready(State(state): State<AppState>) -> Json<ReadinessStatus> {
    let db_ok = Database::from_pool(state.pool.clone())
        .health_check()
        .await
        .is_ok();
    let cache_ok = state.cache.health_check().await.is_ok();
    Json(readiness(db_ok, cache_ok))
}

fn readiness(db_ok: bool, cache_ok: bool) -> ReadinessStatus {
    let label = |ok: bool| if ok { "ok" } else { "fail" };
    ReadinessStatus {
        status: if db_ok && cache_ok { "ok" } else { "degraded" },
        service: SERVICE_NAME,
        checks: ReadinessChecks {
            database: label(db_ok),
            redis: label(cache_ok),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_degraded() {
        let r = readiness(true, false);
        assert_eq!(r.status, "degraded");
        assert_eq!(r.checks.database, "ok");
        assert_eq!(r.checks.redis, "fail");

        assert_eq!(readiness(true, true).status, "ok");
    }
}
