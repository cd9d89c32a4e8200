//! 看板统计
//!
//! 管理员与 KOL 看板写入 Redis，TTL 由配置决定；未读通知数始终实时查询。

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Query, State},
};
use biofox_shared::cache::CacheKey;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::clinical::{ClinicalStats, load_stats};
use super::device_sales::fetch_accumulator;
use super::notifications::count_unread;
use crate::auth::CurrentUser;
use crate::domain::device_tier::DeviceTier;
use crate::domain::monthly_commission::CommissionBreakdown;
use crate::domain::month::Month;
use crate::dto::ApiResponse;
use crate::error::{AdminError, Result};
use crate::models::{ProfileStatus, UserRole};
use crate::service;
use crate::state::AppState;

// ============================================
// 响应 DTO
// ============================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminDashboard {
    pub month: String,
    pub profiles_by_role: HashMap<String, i64>,
    pub pending_approvals: i64,
    pub order_count: i64,
    pub order_sales: i64,
    pub order_commission: i64,
    pub devices_sold: i64,
    pub devices_returned: i64,
    pub net_devices: i64,
    pub tier_5_plus_kols: i64,
    pub commission_total: i64,
    pub commission_paid: i64,
}

/// KOL 看板中可缓存的部分
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KolDashboardStats {
    pub month: String,
    pub shop_count: i64,
    pub subordinate_sales: i64,
    pub self_shop_sales: i64,
    pub estimated_commission: CommissionBreakdown,
    pub net_devices: i32,
    pub current_tier: DeviceTier,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KolDashboard {
    pub kol_id: Uuid,
    #[serde(flatten)]
    pub stats: KolDashboardStats,
    pub unread_notifications: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopDashboard {
    pub shop_id: Uuid,
    pub month: String,
    pub order_count: i64,
    pub order_sales: i64,
    pub clinical: ClinicalStats,
    pub unread_notifications: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardQuery {
    /// 管理员查看指定 KOL / 店铺
    pub user_id: Option<Uuid>,
}

// ============================================
// API 处理器
// ============================================

/// GET /api/dashboard/admin
pub async fn admin_dashboard(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<AdminDashboard>>> {
    user.ensure_admin()?;

    let month = current_month();
    let pool = state.pool.clone();
    let dashboard = state
        .cache
        .get_or_set(&CacheKey::admin_dashboard(), state.dashboard_ttl, || async move {
            debug!(month = %month, "Building admin dashboard");
            load_admin_dashboard(&pool, month).await
        })
        .await?;

    Ok(Json(ApiResponse::success(dashboard)))
}

/// GET /api/dashboard/kol
pub async fn kol_dashboard(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<ApiResponse<KolDashboard>>> {
    let kol_id = user.scope(query.user_id).unwrap_or(user.id);
    if !user.is_admin() && !user.role.is_affiliate() {
        return Err(AdminError::Forbidden("仅 KOL/OL 可查看".to_string()));
    }

    let month = current_month();
    let loader_state = state.clone();
    let stats = state
        .cache
        .get_or_set(
            &CacheKey::kol_dashboard(&kol_id.to_string()),
            state.dashboard_ttl,
            || async move { load_kol_stats(&loader_state, kol_id, month).await },
        )
        .await?;

    let unread_notifications = count_unread(&state.pool, kol_id).await?;
    Ok(Json(ApiResponse::success(KolDashboard {
        kol_id,
        stats,
        unread_notifications,
    })))
}

/// GET /api/dashboard/shop
pub async fn shop_dashboard(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<ApiResponse<ShopDashboard>>> {
    let shop_id = user.scope(query.user_id).unwrap_or(user.id);
    if !user.is_admin() && user.role != UserRole::ShopOwner {
        return Err(AdminError::Forbidden("仅店主可查看".to_string()));
    }

    let month = current_month();
    let (order_count, order_sales): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*), COALESCE(SUM(total_amount), 0)::BIGINT
        FROM orders
        WHERE shop_id = $1 AND order_status <> 'cancelled'
          AND order_date >= $2 AND order_date < $3
        "#,
    )
    .bind(shop_id)
    .bind(month.start())
    .bind(month.end_exclusive())
    .fetch_one(&state.pool)
    .await?;

    let clinical = load_stats(&state.pool, Some(shop_id)).await?;
    let unread_notifications = count_unread(&state.pool, shop_id).await?;

    Ok(Json(ApiResponse::success(ShopDashboard {
        shop_id,
        month: month.to_string(),
        order_count,
        order_sales,
        clinical,
        unread_notifications,
    })))
}

// ============================================
// 辅助函数
// ============================================

fn current_month() -> Month {
    Month::from_date(Utc::now().date_naive())
}

async fn load_admin_dashboard(pool: &sqlx::PgPool, month: Month) -> Result<AdminDashboard> {
    let roles: Vec<(UserRole, ProfileStatus, i64)> =
        sqlx::query_as("SELECT role, status, COUNT(*) FROM profiles GROUP BY role, status")
            .fetch_all(pool)
            .await?;

    let (order_count, order_sales, order_commission): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COALESCE(SUM(total_amount), 0)::BIGINT,
               COALESCE(SUM(commission_amount), 0)::BIGINT
        FROM orders
        WHERE order_status <> 'cancelled' AND order_date >= $1 AND order_date < $2
        "#,
    )
    .bind(month.start())
    .bind(month.end_exclusive())
    .fetch_one(pool)
    .await?;

    let (devices_sold, devices_returned, net_devices, tier_5_plus_kols): (i64, i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(total_devices_sold), 0)::BIGINT,
                   COALESCE(SUM(total_devices_returned), 0)::BIGINT,
                   COALESCE(SUM(net_devices_sold), 0)::BIGINT,
                   COUNT(*) FILTER (WHERE current_tier = $1)
            FROM kol_device_accumulator
            "#,
        )
        .bind(DeviceTier::Tier5Plus)
        .fetch_one(pool)
        .await?;

    let (commission_total, commission_paid): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(total_commission) FILTER (WHERE status <> 'cancelled'), 0)::BIGINT,
               COALESCE(SUM(total_commission) FILTER (WHERE status = 'paid'), 0)::BIGINT
        FROM commission_calculations
        WHERE calculation_month = $1
        "#,
    )
    .bind(month.to_string())
    .fetch_one(pool)
    .await?;

    let (profiles_by_role, pending_approvals) = tally_profiles(&roles);
    Ok(AdminDashboard {
        month: month.to_string(),
        profiles_by_role,
        pending_approvals,
        order_count,
        order_sales,
        order_commission,
        devices_sold,
        devices_returned,
        net_devices,
        tier_5_plus_kols,
        commission_total,
        commission_paid,
    })
}

async fn load_kol_stats(state: &AppState, kol_id: Uuid, month: Month) -> Result<KolDashboardStats> {
    let estimate = service::commission_service(&state.pool)
        .estimate(kol_id, month)
        .await?;

    let shop_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM shop_relationships WHERE parent_id = $1 AND is_active",
    )
    .bind(kol_id)
    .fetch_one(&state.pool)
    .await?;

    let accumulator = fetch_accumulator(state, kol_id).await?;

    Ok(KolDashboardStats {
        month: estimate.month,
        shop_count,
        subordinate_sales: estimate.inputs.subordinate_sales,
        self_shop_sales: estimate.inputs.self_shop_sales,
        estimated_commission: estimate.breakdown,
        net_devices: accumulator.state.net_devices_sold,
        current_tier: accumulator.state.current_tier,
    })
}

/// 按角色汇总人数，并统计待审批数
fn tally_profiles(rows: &[(UserRole, ProfileStatus, i64)]) -> (HashMap<String, i64>, i64) {
    let mut by_role = HashMap::new();
    let mut pending = 0;
    for (role, status, count) in rows {
        *by_role.entry(role.as_str().to_string()).or_insert(0) += count;
        if *status == ProfileStatus::Pending {
            pending += count;
        }
    }
    (by_role, pending)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_profiles() {
        let rows = vec![
            (UserRole::Kol, ProfileStatus::Approved, 4),
            (UserRole::Kol, ProfileStatus::Pending, 2),
            (UserRole::ShopOwner, ProfileStatus::Pending, 3),
            (UserRole::Admin, ProfileStatus::Approved, 1),
        ];
        let (by_role, pending) = tally_profiles(&rows);
        assert_eq!(by_role["kol"], 6);
        assert_eq!(by_role["shop_owner"], 3);
        assert_eq!(by_role["admin"], 1);
        assert_eq!(pending, 5);
    }

    #[test]
    fn test_admin_dashboard_cache_roundtrip() {
        let dashboard = AdminDashboard {
            month: "2026-10".to_string(),
            pending_approvals: 2,
            ..Default::default()
        };
        let json = serde_json::to_string(&dashboard).unwrap();
        assert!(json.contains("\"pendingApprovals\":2"));
        let back: AdminDashboard = serde_json::from_str(&json).unwrap();
        assert_eq!(back.month, "2026-10");
    }

    #[test]
    fn test_kol_dashboard_flattens_stats() {
        let dashboard = KolDashboard {
            kol_id: Uuid::nil(),
            stats: KolDashboardStats {
                month: "2026-10".to_string(),
                shop_count: 3,
                subordinate_sales: 1_000_000,
                self_shop_sales: 0,
                estimated_commission: CommissionBreakdown {
                    subordinate_commission: 100_000,
                    self_shop_commission: 0,
                    device_commission: 0,
                    manual_adjustment: 0,
                    total_commission: 100_000,
                },
                net_devices: 5,
                current_tier: DeviceTier::Tier5Plus,
            },
            unread_notifications: 1,
        };
        let v = serde_json::to_value(&dashboard).unwrap();
        assert_eq!(v["shopCount"], 3);
        assert_eq!(v["currentTier"], "tier_5_plus");
        assert_eq!(v["estimatedCommission"]["totalCommission"], 100_000);
    }
}
