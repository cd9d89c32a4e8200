//! 服务层
//!
//! 跨 handler 复用的业务流程：审计、通知、归属关系变更和月度佣金计算。

pub mod audit;
pub mod commission_service;
pub mod dashboard_cache;
pub mod notifier;
pub mod relationship_service;

pub use commission_service::{CalculationSummary, CommissionEstimate, CommissionService};
pub use notifier::NewNotification;

use std::sync::Arc;

use sqlx::PgPool;

use crate::repository::PgCommissionRepository;

/// 基于连接池的佣金服务
pub fn commission_service(pool: &PgPool) -> CommissionService<PgCommissionRepository> {
    CommissionService::new(Arc::new(PgCommissionRepository::new(pool.clone())))
}
