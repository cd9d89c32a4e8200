//! 店铺管理 HTTP 处理器
//!
//! 店铺即 role = shop_owner 的用户档案，上级 KOL 来自生效的归属关系

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{CurrentUser, hash_password, validate_password_strength};
use crate::dto::{ApiResponse, PageResponse, PaginationParams, search_pattern};
use crate::error::{AdminError, Result};
use crate::models::{
    AuditAction, AuditLogEntry, PROFILE_COLUMNS, Profile, ProfileStatus, RelationshipType,
    ShopRelationship, UserRole,
};
use crate::service::relationship_service::{self, AssignParent};
use crate::service::{audit, dashboard_cache};
use crate::state::AppState;

use super::profiles::fetch_profile;

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopFilter {
    pub kol_id: Option<Uuid>,
    pub status: Option<ProfileStatus>,
    pub search: Option<String>,
}

/// 列表行：店铺档案 + 上级与器械汇总
#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ShopListItem {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub shop_name: String,
    pub region: Option<String>,
    pub status: ProfileStatus,
    pub kol_id: Option<Uuid>,
    pub kol_name: Option<String>,
    pub device_count: i64,
    pub latest_sale_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ShopParent {
    pub id: Uuid,
    pub name: String,
    pub role: UserRole,
    /// 合同日期，即关系开始时间
    pub contract_date: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ShopDeviceTotals {
    pub total_devices: i64,
    pub total_commission: i64,
    pub tier_1_4_devices: i64,
    pub tier_5_plus_devices: i64,
    pub latest_sale_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopDetail {
    #[serde(flatten)]
    pub profile: Profile,
    pub parent: Option<ShopParent>,
    pub devices: ShopDeviceTotals,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateShopRequest {
    #[validate(email(message = "邮箱格式不正确"))]
    pub email: String,
    #[validate(length(min = 1, max = 100, message = "姓名长度必须在 1-100 之间"))]
    pub name: String,
    #[validate(length(min = 1, max = 200, message = "店铺名长度必须在 1-200 之间"))]
    pub shop_name: String,
    pub region: Option<String>,
    pub kol_id: Option<Uuid>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShopResponse {
    pub shop: Profile,
    pub relationship: Option<ShopRelationship>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateShopRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub shop_name: Option<String>,
    pub region: Option<String>,
    pub naver_place_link: Option<String>,
    pub status: Option<ProfileStatus>,
}

// ============================================
// API 处理器
// ============================================

/// 店铺列表
///
/// GET /api/shops
pub async fn list_shops(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<ShopFilter>,
) -> Result<Json<ApiResponse<PageResponse<ShopListItem>>>> {
    let search = search_pattern(filter.search.as_deref())?;
    // KOL/OL 只能看到自己名下的店铺
    let kol_id = user.scope(filter.kol_id);

    let from = r#"
        FROM profiles p
        LEFT JOIN shop_relationships r ON r.shop_owner_id = p.id AND r.is_active
        LEFT JOIN profiles k ON k.id = r.parent_id
    "#;
    let filter_sql = r#"
        WHERE p.role = 'shop_owner'
          AND ($1::uuid IS NULL OR r.parent_id = $1)
          AND ($2::varchar IS NULL OR p.status = $2)
          AND ($3::text IS NULL OR p.name ILIKE $3 OR p.shop_name ILIKE $3 OR p.email ILIKE $3)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {from} {filter_sql}"))
        .bind(kol_id)
        .bind(filter.status)
        .bind(&search)
        .fetch_one(&state.pool)
        .await?;

    let items: Vec<ShopListItem> = sqlx::query_as(&format!(
        r#"
        SELECT p.id, p.email, p.name, p.shop_name, p.region, p.status,
               k.id AS kol_id, k.name AS kol_name,
               COALESCE(d.device_count, 0)::BIGINT AS device_count,
               d.latest_sale_date,
               p.created_at
        {from}
        LEFT JOIN LATERAL (
            SELECT SUM(quantity) AS device_count, MAX(sale_date) AS latest_sale_date
            FROM device_sales
            WHERE shop_id = p.id AND commission_status <> 'cancelled'
        ) d ON TRUE
        {filter_sql}
        ORDER BY p.created_at DESC
        LIMIT $4 OFFSET $5
        "#
    ))
    .bind(kol_id)
    .bind(filter.status)
    .bind(&search)
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

/// 店铺详情
///
/// GET /api/shops/{id}
pub async fn get_shop(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ShopDetail>>> {
    let profile = fetch_shop(&state, id).await?;
    ensure_shop_access(&state.pool, &user, id).await?;

    let parent: Option<ShopParent> = sqlx::query_as(
        r#"
        SELECT k.id, k.name, k.role, r.started_at AS contract_date
        FROM shop_relationships r
        JOIN profiles k ON k.id = r.parent_id
        WHERE r.shop_owner_id = $1 AND r.is_active
        "#,
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?;

    let devices: ShopDeviceTotals = sqlx::query_as(
        r#"
        SELECT
            COALESCE(SUM(quantity), 0)::BIGINT AS total_devices,
            COALESCE(SUM(actual_commission), 0)::BIGINT AS total_commission,
            COALESCE(SUM(quantity) FILTER (WHERE tier_at_sale = 'tier_1_4'), 0)::BIGINT AS tier_1_4_devices,
            COALESCE(SUM(quantity) FILTER (WHERE tier_at_sale = 'tier_5_plus'), 0)::BIGINT AS tier_5_plus_devices,
            MAX(sale_date) AS latest_sale_date
        FROM device_sales
        WHERE shop_id = $1 AND commission_status <> 'cancelled'
        "#,
    )
    .bind(id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(ShopDetail {
        profile,
        parent,
        devices,
    })))
}

/// 创建店铺，可同时指定上级 KOL
///
/// POST /api/shops
pub async fn create_shop(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateShopRequest>,
) -> Result<Json<ApiResponse<CreateShopResponse>>> {
    req.validate()?;

    let password_hash = match &req.password {
        Some(password) => {
            validate_password_strength(password)?;
            Some(hash_password(password)?)
        }
        None => None,
    };

    if let Some(kol_id) = req.kol_id {
        let parent = fetch_profile(&state.pool, kol_id).await?;
        if !parent.role.is_affiliate() {
            return Err(AdminError::Validation("上级必须是 KOL 或 OL".to_string()));
        }
    }

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM profiles WHERE lower(email) = lower($1))")
            .bind(req.email.trim())
            .fetch_one(&state.pool)
            .await?;
    if exists {
        return Err(AdminError::AlreadyExists(format!("邮箱 {}", req.email)));
    }

    let mut tx = state.pool.begin().await?;

    let shop: Profile = sqlx::query_as(&format!(
        r#"
        INSERT INTO profiles (email, password_hash, name, role, status, shop_name, region)
        VALUES ($1, $2, $3, 'shop_owner', 'pending', $4, $5)
        RETURNING {PROFILE_COLUMNS}
        "#
    ))
    .bind(req.email.trim())
    .bind(password_hash)
    .bind(req.name.trim())
    .bind(req.shop_name.trim())
    .bind(&req.region)
    .fetch_one(&mut *tx)
    .await?;

    let relationship = match req.kol_id {
        Some(kol_id) => {
            let (created, _) = relationship_service::assign_parent(
                &mut tx,
                &AssignParent {
                    shop_owner_id: shop.id,
                    parent_id: Some(kol_id),
                    relationship_type: RelationshipType::Direct,
                    notes: None,
                    started_at: None,
                    created_by: user.id,
                },
            )
            .await?;
            Some(created)
        }
        None => None,
    };

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("profiles", shop.id, AuditAction::Insert)
            .with_actor(user.id, user.role)
            .with_values(None, audit::snapshot(&shop))
            .with_metadata(serde_json::json!({ "kol_id": req.kol_id })),
    )
    .await?;

    tx.commit().await?;
    dashboard_cache::invalidate(&state.cache).await;

    info!(shop_id = %shop.id, kol_id = ?req.kol_id, "Shop created");
    Ok(Json(ApiResponse::success(CreateShopResponse {
        shop,
        relationship,
    })))
}

/// 修改店铺
///
/// PUT /api/shops/{id}
pub async fn update_shop(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateShopRequest>,
) -> Result<Json<ApiResponse<Profile>>> {
    req.validate()?;
    user.ensure_self_or_admin(id)?;
    if req.status.is_some() {
        user.ensure_admin()?;
    }

    let before = fetch_shop(&state, id).await?;

    let mut tx = state.pool.begin().await?;
    let after: Profile = sqlx::query_as(&format!(
        r#"
        UPDATE profiles SET
            name = COALESCE($2, name),
            shop_name = COALESCE($3, shop_name),
            region = COALESCE($4, region),
            naver_place_link = COALESCE($5, naver_place_link),
            status = COALESCE($6, status),
            approved_at = CASE WHEN $6 = 'approved' AND status <> 'approved' THEN NOW() ELSE approved_at END,
            approved_by = CASE WHEN $6 = 'approved' AND status <> 'approved' THEN $7 ELSE approved_by END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {PROFILE_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(req.name.as_deref().map(str::trim))
    .bind(req.shop_name.as_deref().map(str::trim))
    .bind(&req.region)
    .bind(&req.naver_place_link)
    .bind(req.status)
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("profiles", id, AuditAction::Update)
            .with_actor(user.id, user.role)
            .with_values(audit::snapshot(&before), audit::snapshot(&after)),
    )
    .await?;
    tx.commit().await?;

    if before.status != after.status {
        dashboard_cache::invalidate(&state.cache).await;
    }

    info!(shop_id = %id, "Shop updated");
    Ok(Json(ApiResponse::success(after)))
}

async fn fetch_shop(state: &AppState, id: Uuid) -> Result<Profile> {
    let profile = fetch_profile(&state.pool, id)
        .await
        .map_err(|e| match e {
            AdminError::ProfileNotFound(id) => AdminError::ShopNotFound(id),
            other => other,
        })?;
    if profile.role != UserRole::ShopOwner {
        return Err(AdminError::ShopNotFound(id));
    }
    Ok(profile)
}

/// 店铺数据访问校验：管理员、店主本人或当前生效的上级 KOL/OL
pub(crate) async fn ensure_shop_access(pool: &PgPool, user: &CurrentUser, shop_id: Uuid) -> Result<()> {
    if user.is_admin() || user.id == shop_id {
        return Ok(());
    }
    let is_child: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM shop_relationships WHERE shop_owner_id = $1 AND parent_id = $2 AND is_active)",
    )
    .bind(shop_id)
    .bind(user.id)
    .fetch_one(pool)
    .await?;
    if !is_child {
        return Err(AdminError::Forbidden("无权查看该店铺".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_validation() {
        let req: CreateShopRequest = serde_json::from_value(serde_json::json!({
            "email": "shop@example.com",
            "name": "김원장",
            "shopName": "강남점",
            "kolId": Uuid::nil(),
        }))
        .unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.kol_id, Some(Uuid::nil()));

        let req: CreateShopRequest = serde_json::from_value(serde_json::json!({
            "email": "not-an-email",
            "name": "김원장",
            "shopName": "강남점",
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_device_totals_default() {
        let totals = ShopDeviceTotals::default();
        assert_eq!(totals.total_devices, 0);
        assert!(totals.latest_sale_date.is_none());
    }
}
