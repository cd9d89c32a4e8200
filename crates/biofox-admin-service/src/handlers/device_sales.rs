//! 器械销售 HTTP 处理器
//!
//! 销售按 KOL 的累计净台数定档；同一 KOL 的并发销售通过锁定累计行串行化

use axum::{
    Json,
    extract::{Path, Query, State},
};
use biofox_shared::observability::metrics;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::auth::CurrentUser;
use crate::domain::device_tier::{MAX_DEVICE_QUANTITY, MIN_DEVICE_QUANTITY};
use crate::domain::{AccumulatorState, TierSimulation, price_device_sale, simulate_tier_change};
use crate::dto::{ApiResponse, DateRangeParams, PageResponse, PaginationParams};
use crate::error::{AdminError, Result};
use crate::models::{
    AuditAction, AuditLogEntry, DeviceSale, NotificationType, UserRole,
};
use crate::service::{NewNotification, audit, dashboard_cache, notifier};
use crate::state::AppState;

use super::shops::ensure_shop_access;

const SALE_COLUMNS: &str = "id, shop_id, kol_id, sale_date, quantity, device_name, serial_numbers, \
     tier_at_sale, standard_commission, actual_commission, commission_status, notes, created_by, \
     created_at, updated_at";

const ACCUMULATOR_COLUMNS: &str = "total_devices_sold, total_devices_returned, net_devices_sold, \
     current_tier, tier_1_4_count, tier_5_plus_count, tier_changed_at";

const DEFAULT_DEVICE_NAME: &str = "마이크로젯";

/// 店铺配货历史条数
const ALLOCATION_HISTORY_LIMIT: i64 = 20;

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeviceSaleRequest {
    pub shop_id: Uuid,
    pub sale_date: NaiveDate,
    /// 负数为退货
    #[validate(range(min = MIN_DEVICE_QUANTITY, max = MAX_DEVICE_QUANTITY, message = "单笔数量需在 -1000 到 1000 之间"))]
    pub quantity: i32,
    #[validate(length(min = 1, max = 100))]
    pub device_name: Option<String>,
    #[serde(default)]
    pub serial_numbers: Vec<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeviceSaleResponse {
    pub sale: DeviceSale,
    pub accumulator: AccumulatorState,
    pub tier_changed: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSaleFilter {
    pub shop_id: Option<Uuid>,
    pub kol_id: Option<Uuid>,
}

#[derive(Debug, Default, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ShopDeviceStats {
    pub total_devices: i64,
    pub total_commission: i64,
    pub tier_1_4_devices: i64,
    pub tier_5_plus_devices: i64,
    pub last_sale_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsQuery {
    pub kol_id: Option<Uuid>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TopKol {
    pub kol_id: Uuid,
    pub name: String,
    pub net_devices_sold: i32,
    pub current_tier: crate::domain::DeviceTier,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatistics {
    pub total_sold: i64,
    pub total_returned: i64,
    pub net_devices: i64,
    pub total_commission: i64,
    /// 有销售记录的店铺的平均净台数
    pub average_per_shop: f64,
    pub top_kols: Vec<TopKol>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulatorView {
    pub kol_id: Uuid,
    #[serde(flatten)]
    pub state: AccumulatorState,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateQuery {
    pub kol_id: Uuid,
    pub additional: i32,
}

// ============================================
// API 处理器
// ============================================

/// 登记器械销售/退货
///
/// POST /api/device-sales
pub async fn create_device_sale(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateDeviceSaleRequest>,
) -> Result<Json<ApiResponse<CreateDeviceSaleResponse>>> {
    req.validate()?;
    if req.quantity == 0 {
        return Err(AdminError::InvalidAmount("数量不能为 0".to_string()));
    }

    let mut tx = state.pool.begin().await?;

    let kol_id: Uuid = sqlx::query_scalar(
        r#"
        SELECT r.parent_id
        FROM shop_relationships r
        JOIN profiles k ON k.id = r.parent_id
        WHERE r.shop_owner_id = $1 AND r.is_active AND k.role IN ('kol', 'ol')
        "#,
    )
    .bind(req.shop_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AdminError::NoActiveRelationship(req.shop_id))?;

    let mut accumulator = lock_accumulator(&mut tx, kol_id).await?;
    let pricing = price_device_sale(accumulator.net_devices_sold, req.quantity)?;

    let sale: DeviceSale = sqlx::query_as(&format!(
        r#"
        INSERT INTO device_sales (shop_id, kol_id, sale_date, quantity, device_name, serial_numbers,
            tier_at_sale, standard_commission, actual_commission, commission_status, notes, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'calculated', $10, $11)
        RETURNING {SALE_COLUMNS}
        "#
    ))
    .bind(req.shop_id)
    .bind(kol_id)
    .bind(req.sale_date)
    .bind(req.quantity)
    .bind(req.device_name.as_deref().unwrap_or(DEFAULT_DEVICE_NAME))
    .bind(&req.serial_numbers)
    .bind(pricing.tier)
    .bind(pricing.standard_commission)
    .bind(pricing.actual_commission)
    .bind(&req.notes)
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await?;

    let tier_changed = accumulator.apply(req.quantity, pricing.tier, Utc::now())?;
    save_accumulator(&mut tx, kol_id, &accumulator).await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("device_sales", sale.id, AuditAction::Insert)
            .with_actor(user.id, user.role)
            .with_values(None, audit::snapshot(&sale))
            .with_metadata(serde_json::json!({ "tier_changed": tier_changed })),
    )
    .await?;

    if tier_changed {
        notifier::send(
            &mut *tx,
            &NewNotification::new(
                kol_id,
                NotificationType::StatusChanged,
                "기기 커미션 등급 변경",
                format!(
                    "누적 순판매 {}대로 커미션 등급이 {}(으)로 변경되었습니다.",
                    accumulator.net_devices_sold,
                    accumulator.current_tier.as_str()
                ),
            )
            .related("device_sale", sale.id),
        )
        .await?;
    }

    tx.commit().await?;
    dashboard_cache::invalidate(&state.cache).await;
    metrics::record_device_sale(pricing.tier.as_str(), req.quantity);

    info!(
        sale_id = %sale.id,
        shop_id = %req.shop_id,
        kol_id = %kol_id,
        quantity = req.quantity,
        tier = %pricing.tier.as_str(),
        tier_changed,
        "Device sale recorded"
    );

    Ok(Json(ApiResponse::success(CreateDeviceSaleResponse {
        sale,
        accumulator,
        tier_changed,
    })))
}

/// 器械销售列表
///
/// GET /api/device-sales
pub async fn list_device_sales(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(pagination): Query<PaginationParams>,
    Query(range): Query<DateRangeParams>,
    Query(filter): Query<DeviceSaleFilter>,
) -> Result<Json<ApiResponse<PageResponse<DeviceSale>>>> {
    range.validate()?;
    let (shop_id, kol_id) = match user.role {
        UserRole::Admin => (filter.shop_id, filter.kol_id),
        UserRole::ShopOwner => (Some(user.id), filter.kol_id),
        UserRole::Kol | UserRole::Ol => (filter.shop_id, Some(user.id)),
    };

    let where_clause = r#"
        ($1::uuid IS NULL OR shop_id = $1)
        AND ($2::uuid IS NULL OR kol_id = $2)
        AND ($3::date IS NULL OR sale_date >= $3)
        AND ($4::date IS NULL OR sale_date <= $4)
    "#;

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM device_sales WHERE {where_clause}"))
            .bind(shop_id)
            .bind(kol_id)
            .bind(range.from)
            .bind(range.to)
            .fetch_one(&state.pool)
            .await?;

    let items: Vec<DeviceSale> = sqlx::query_as(&format!(
        "SELECT {SALE_COLUMNS} FROM device_sales WHERE {where_clause} \
         ORDER BY sale_date DESC, created_at DESC LIMIT $5 OFFSET $6"
    ))
    .bind(shop_id)
    .bind(kol_id)
    .bind(range.from)
    .bind(range.to)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(PageResponse::from_params(
        items,
        total,
        &pagination,
    ))))
}

/// 单条销售
///
/// GET /api/device-sales/{id}
pub async fn get_device_sale(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DeviceSale>>> {
    let sale: DeviceSale =
        sqlx::query_as(&format!("SELECT {SALE_COLUMNS} FROM device_sales WHERE id = $1"))
            .bind(id)
            .fetch_optional(&state.pool)
            .await?
            .ok_or(AdminError::DeviceSaleNotFound(id))?;

    if !user.is_admin() && user.id != sale.shop_id && user.id != sale.kol_id {
        return Err(AdminError::Forbidden("无权查看该销售记录".to_string()));
    }
    Ok(Json(ApiResponse::success(sale)))
}

/// 店铺器械汇总
///
/// GET /api/device-sales/shops/{shop_id}/stats
pub async fn shop_device_stats(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(shop_id): Path<Uuid>,
) -> Result<Json<ApiResponse<ShopDeviceStats>>> {
    ensure_shop_access(&state.pool, &user, shop_id).await?;
    let stats: ShopDeviceStats = sqlx::query_as(
        r#"
        SELECT
            COALESCE(SUM(quantity), 0)::BIGINT AS total_devices,
            COALESCE(SUM(actual_commission), 0)::BIGINT AS total_commission,
            COALESCE(SUM(quantity) FILTER (WHERE tier_at_sale = 'tier_1_4'), 0)::BIGINT AS tier_1_4_devices,
            COALESCE(SUM(quantity) FILTER (WHERE tier_at_sale = 'tier_5_plus'), 0)::BIGINT AS tier_5_plus_devices,
            MAX(sale_date) AS last_sale_date
        FROM device_sales
        WHERE shop_id = $1
        "#,
    )
    .bind(shop_id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(stats)))
}

/// 店铺最近的配货记录
///
/// GET /api/device-sales/shops/{shop_id}/history
pub async fn shop_allocation_history(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(shop_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<DeviceSale>>>> {
    ensure_shop_access(&state.pool, &user, shop_id).await?;
    let items: Vec<DeviceSale> = sqlx::query_as(&format!(
        "SELECT {SALE_COLUMNS} FROM device_sales WHERE shop_id = $1 \
         ORDER BY sale_date DESC, created_at DESC LIMIT $2"
    ))
    .bind(shop_id)
    .bind(ALLOCATION_HISTORY_LIMIT)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(items)))
}

/// 器械销售统计
///
/// GET /api/device-sales/statistics
pub async fn device_statistics(
    State(state): State<AppState>,
    Query(range): Query<DateRangeParams>,
    Query(query): Query<StatisticsQuery>,
) -> Result<Json<ApiResponse<DeviceStatistics>>> {
    range.validate()?;

    let (total_sold, total_returned, total_commission): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COALESCE(SUM(quantity) FILTER (WHERE quantity > 0), 0)::BIGINT,
            COALESCE(-SUM(quantity) FILTER (WHERE quantity < 0), 0)::BIGINT,
            COALESCE(SUM(actual_commission), 0)::BIGINT
        FROM device_sales
        WHERE ($1::uuid IS NULL OR kol_id = $1)
          AND ($2::date IS NULL OR sale_date >= $2)
          AND ($3::date IS NULL OR sale_date <= $3)
        "#,
    )
    .bind(query.kol_id)
    .bind(range.from)
    .bind(range.to)
    .fetch_one(&state.pool)
    .await?;

    let average_per_shop: f64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(AVG(net), 0)::DOUBLE PRECISION FROM (
            SELECT SUM(quantity) AS net
            FROM device_sales
            WHERE ($1::uuid IS NULL OR kol_id = $1)
              AND ($2::date IS NULL OR sale_date >= $2)
              AND ($3::date IS NULL OR sale_date <= $3)
            GROUP BY shop_id
        ) per_shop
        "#,
    )
    .bind(query.kol_id)
    .bind(range.from)
    .bind(range.to)
    .fetch_one(&state.pool)
    .await?;

    let top_kols: Vec<TopKol> = sqlx::query_as(
        r#"
        SELECT a.kol_id, p.name, a.net_devices_sold, a.current_tier
        FROM kol_device_accumulator a
        JOIN profiles p ON p.id = a.kol_id
        WHERE ($1::uuid IS NULL OR a.kol_id = $1)
        ORDER BY a.net_devices_sold DESC, p.name
        LIMIT 10
        "#,
    )
    .bind(query.kol_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(DeviceStatistics {
        total_sold,
        total_returned,
        net_devices: total_sold - total_returned,
        total_commission,
        average_per_shop,
        top_kols,
    })))
}

/// KOL 累计状态，没有销售时返回零值
///
/// GET /api/device-sales/accumulators/{kol_id}
pub async fn get_accumulator(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(kol_id): Path<Uuid>,
) -> Result<Json<ApiResponse<AccumulatorView>>> {
    user.ensure_self_or_admin(kol_id)?;
    Ok(Json(ApiResponse::success(
        fetch_accumulator(&state, kol_id).await?,
    )))
}

/// 按销售日期重放全部记录，重建累计状态（不改动历史佣金）
///
/// POST /api/device-sales/accumulators/{kol_id}/recalculate
pub async fn recalculate_accumulator(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(kol_id): Path<Uuid>,
) -> Result<Json<ApiResponse<AccumulatorView>>> {
    let mut tx = state.pool.begin().await?;
    let before = lock_accumulator(&mut tx, kol_id).await?;

    let quantities: Vec<i32> = sqlx::query_scalar(
        "SELECT quantity FROM device_sales WHERE kol_id = $1 ORDER BY sale_date, created_at",
    )
    .bind(kol_id)
    .fetch_all(&mut *tx)
    .await?;

    let mut rebuilt = AccumulatorState::replay(quantities.iter().copied(), Utc::now())?;
    if rebuilt.current_tier == before.current_tier {
        rebuilt.tier_changed_at = before.tier_changed_at;
    }
    save_accumulator(&mut tx, kol_id, &rebuilt).await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("kol_device_accumulator", kol_id, AuditAction::Update)
            .with_actor(user.id, user.role)
            .with_values(audit::snapshot(&before), audit::snapshot(&rebuilt))
            .with_metadata(serde_json::json!({ "action": "recalculate", "sales": quantities.len() })),
    )
    .await?;
    tx.commit().await?;

    info!(
        kol_id = %kol_id,
        sales = quantities.len(),
        net = rebuilt.net_devices_sold,
        "Device accumulator recalculated"
    );
    Ok(Json(ApiResponse::success(
        fetch_accumulator(&state, kol_id).await?,
    )))
}

/// 模拟追加销售后的阶梯变化
///
/// GET /api/device-sales/simulate
pub async fn simulate(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<SimulateQuery>,
) -> Result<Json<ApiResponse<TierSimulation>>> {
    user.ensure_self_or_admin(query.kol_id)?;
    let current = fetch_accumulator(&state, query.kol_id).await?;
    Ok(Json(ApiResponse::success(simulate_tier_change(
        &current.state,
        query.additional,
    )?)))
}

// ============================================
// 辅助函数
// ============================================

/// 确保累计行存在并加行锁
async fn lock_accumulator(conn: &mut PgConnection, kol_id: Uuid) -> Result<AccumulatorState> {
    sqlx::query("INSERT INTO kol_device_accumulator (kol_id) VALUES ($1) ON CONFLICT (kol_id) DO NOTHING")
        .bind(kol_id)
        .execute(&mut *conn)
        .await?;

    let state = sqlx::query_as(&format!(
        "SELECT {ACCUMULATOR_COLUMNS} FROM kol_device_accumulator WHERE kol_id = $1 FOR UPDATE"
    ))
    .bind(kol_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(state)
}

async fn save_accumulator(conn: &mut PgConnection, kol_id: Uuid, state: &AccumulatorState) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE kol_device_accumulator SET
            total_devices_sold = $2,
            total_devices_returned = $3,
            net_devices_sold = $4,
            current_tier = $5,
            tier_1_4_count = $6,
            tier_5_plus_count = $7,
            tier_changed_at = $8,
            last_updated = NOW()
        WHERE kol_id = $1
        "#,
    )
    .bind(kol_id)
    .bind(state.total_devices_sold)
    .bind(state.total_devices_returned)
    .bind(state.net_devices_sold)
    .bind(state.current_tier)
    .bind(state.tier_1_4_count)
    .bind(state.tier_5_plus_count)
    .bind(state.tier_changed_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn fetch_accumulator(state: &AppState, kol_id: Uuid) -> Result<AccumulatorView> {
    #[derive(FromRow)]
    struct Row {
        #[sqlx(flatten)]
        state: AccumulatorState,
        last_updated: DateTime<Utc>,
    }

    let row: Option<Row> = sqlx::query_as(&format!(
        "SELECT {ACCUMULATOR_COLUMNS}, last_updated FROM kol_device_accumulator WHERE kol_id = $1"
    ))
    .bind(kol_id)
    .fetch_optional(&state.pool)
    .await?;

    Ok(match row {
        Some(row) => AccumulatorView {
            kol_id,
            state: row.state,
            last_updated: Some(row.last_updated),
        },
        None => AccumulatorView {
            kol_id,
            state: AccumulatorState::default(),
            last_updated: None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_parse() {
        let req: CreateDeviceSaleRequest = serde_json::from_value(serde_json::json!({
            "shopId": Uuid::nil(),
            "saleDate": "2026-03-09",
            "quantity": -1,
        }))
        .unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.quantity, -1);
        assert!(req.serial_numbers.is_empty());
        assert!(req.device_name.is_none());
    }

    #[test]
    fn test_accumulator_view_flattens_state() {
        let view = AccumulatorView {
            kol_id: Uuid::nil(),
            state: AccumulatorState::replay([3, 3], Utc::now()).unwrap(),
            last_updated: None,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["netDevicesSold"], 6);
        assert_eq!(json["currentTier"], "tier_5_plus");
        assert_eq!(json["kolId"], Uuid::nil().to_string());
    }
}
