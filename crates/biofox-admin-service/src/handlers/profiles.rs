//! 用户档案管理 HTTP 处理器（管理员）
//!
//! 列表、详情、修改、审核通过/拒绝、批量操作和统计

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::auth::CurrentUser;
use crate::domain::order_commission::validate_rate;
use crate::dto::{
    ApiResponse, BulkActionResponse, PageResponse, PaginationParams, SortOrder, search_pattern,
    validate_date_range,
};
use crate::error::{AdminError, Result};
use crate::models::{
    AuditAction, AuditLogEntry, NotificationPriority, NotificationType, PROFILE_COLUMNS, Profile,
    ProfileStatus, ProfileSummary, UserRole,
};
use crate::service::{NewNotification, audit, dashboard_cache, notifier};
use crate::state::AppState;

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSortField {
    #[default]
    CreatedAt,
    Name,
    Email,
    Status,
}

impl ProfileSortField {
    fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::Name => "name",
            Self::Email => "email",
            Self::Status => "status",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileFilter {
    pub role: Option<UserRole>,
    pub status: Option<ProfileStatus>,
    pub search: Option<String>,
    pub created_from: Option<NaiveDate>,
    pub created_to: Option<NaiveDate>,
    #[serde(default)]
    pub sort_by: ProfileSortField,
    #[serde(default)]
    pub sort_order: SortOrder,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDetail {
    #[serde(flatten)]
    pub profile: Profile,
    pub parent: Option<ProfileSummary>,
    pub relationship_started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 100, message = "姓名长度必须在 1-100 之间"))]
    pub name: Option<String>,
    #[validate(email(message = "邮箱格式不正确"))]
    pub email: Option<String>,
    #[validate(length(max = 200))]
    pub shop_name: Option<String>,
    pub region: Option<String>,
    pub naver_place_link: Option<String>,
    pub commission_rate: Option<f64>,
    pub status: Option<ProfileStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub commission_rate: Option<f64>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequest {
    #[validate(length(max = 500, message = "原因最长 500 字符"))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileBulkAction {
    Approve,
    Reject,
    Activate,
    Deactivate,
    Delete,
}

impl ProfileBulkAction {
    pub fn target_status(&self) -> ProfileStatus {
        match self {
            Self::Approve | Self::Activate => ProfileStatus::Approved,
            Self::Reject | Self::Delete => ProfileStatus::Rejected,
            Self::Deactivate => ProfileStatus::Pending,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileBulkRequest {
    #[validate(length(min = 1, max = 100, message = "一次最多处理 100 个用户"))]
    pub user_ids: Vec<Uuid>,
    pub action: ProfileBulkAction,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileStats {
    pub total: i64,
    pub by_status: HashMap<String, i64>,
    pub by_role: HashMap<String, i64>,
    pub recent_signups: i64,
}

#[derive(Debug, FromRow)]
struct ParentRow {
    id: Uuid,
    name: String,
    email: String,
    role: UserRole,
    shop_name: String,
    started_at: DateTime<Utc>,
}

// ============================================
// API 处理器
// ============================================

/// 用户列表
///
/// GET /api/profiles
pub async fn list_profiles(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<ProfileFilter>,
) -> Result<Json<ApiResponse<PageResponse<Profile>>>> {
    validate_date_range(filter.created_from, filter.created_to)?;
    let search = search_pattern(filter.search.as_deref())?;

    let where_clause = r#"
        ($1::varchar IS NULL OR role = $1)
        AND ($2::varchar IS NULL OR status = $2)
        AND ($3::text IS NULL OR name ILIKE $3 OR email ILIKE $3 OR shop_name ILIKE $3)
        AND ($4::date IS NULL OR created_at >= $4)
        AND ($5::date IS NULL OR created_at < $5 + 1)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM profiles WHERE {where_clause}"))
        .bind(filter.role)
        .bind(filter.status)
        .bind(&search)
        .bind(filter.created_from)
        .bind(filter.created_to)
        .fetch_one(&state.pool)
        .await?;

    let list_sql = format!(
        "SELECT {PROFILE_COLUMNS} FROM profiles WHERE {where_clause} \
         ORDER BY {} {}, id LIMIT $6 OFFSET $7",
        filter.sort_by.column(),
        filter.sort_order.as_sql()
    );
    let items: Vec<Profile> = sqlx::query_as(&list_sql)
        .bind(filter.role)
        .bind(filter.status)
        .bind(&search)
        .bind(filter.created_from)
        .bind(filter.created_to)
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

/// 用户详情（含当前上级）
///
/// GET /api/profiles/{id}
pub async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ProfileDetail>>> {
    let profile = fetch_profile(&state.pool, id).await?;

    let parent: Option<ParentRow> = sqlx::query_as(
        r#"
        SELECT p.id, p.name, p.email, p.role, p.shop_name, r.started_at
        FROM shop_relationships r
        JOIN profiles p ON p.id = r.parent_id
        WHERE r.shop_owner_id = $1 AND r.is_active
        "#,
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?;

    let relationship_started_at = parent.as_ref().map(|p| p.started_at);
    Ok(Json(ApiResponse::success(ProfileDetail {
        profile,
        parent: parent.map(|p| ProfileSummary {
            id: p.id,
            name: p.name,
            email: p.email,
            role: p.role,
            shop_name: p.shop_name,
        }),
        relationship_started_at,
    })))
}

/// 修改用户
///
/// PUT /api/profiles/{id}
pub async fn update_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ApiResponse<Profile>>> {
    req.validate()?;
    if let Some(rate) = req.commission_rate {
        validate_rate(rate)?;
    }

    let before = fetch_profile(&state.pool, id).await?;

    if let Some(email) = &req.email {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM profiles WHERE lower(email) = lower($1) AND id <> $2)",
        )
        .bind(email.trim())
        .bind(id)
        .fetch_one(&state.pool)
        .await?;
        if taken {
            return Err(AdminError::AlreadyExists(format!("邮箱 {}", email)));
        }
    }

    let mut tx = state.pool.begin().await?;

    let after: Profile = sqlx::query_as(&format!(
        r#"
        UPDATE profiles SET
            name = COALESCE($2, name),
            email = COALESCE($3, email),
            shop_name = COALESCE($4, shop_name),
            region = COALESCE($5, region),
            naver_place_link = COALESCE($6, naver_place_link),
            commission_rate = COALESCE($7, commission_rate),
            status = COALESCE($8, status),
            approved_at = CASE WHEN $8 = 'approved' AND status <> 'approved' THEN NOW() ELSE approved_at END,
            approved_by = CASE WHEN $8 = 'approved' AND status <> 'approved' THEN $9 ELSE approved_by END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {PROFILE_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(req.name.as_deref().map(str::trim))
    .bind(req.email.as_deref().map(str::trim))
    .bind(&req.shop_name)
    .bind(&req.region)
    .bind(&req.naver_place_link)
    .bind(req.commission_rate)
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

    info!(profile_id = %id, "Profile updated");
    Ok(Json(ApiResponse::success(after)))
}

/// 审核通过
///
/// POST /api/profiles/{id}/approve
pub async fn approve_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    body: Option<Json<ApproveRequest>>,
) -> Result<Json<ApiResponse<Profile>>> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    if let Some(rate) = req.commission_rate {
        validate_rate(rate)?;
    }

    let mut tx = state.pool.begin().await?;
    let before = lock_profile(&mut tx, id).await?;
    if before.status == ProfileStatus::Approved {
        return Err(AdminError::AlreadyApproved);
    }

    let after = set_status(&mut tx, id, ProfileStatus::Approved, user.id, None).await?;
    let after = match req.commission_rate {
        Some(rate) => sqlx::query_as(&format!(
            "UPDATE profiles SET commission_rate = $2 WHERE id = $1 RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(id)
        .bind(rate)
        .fetch_one(&mut *tx)
        .await?,
        None => after,
    };

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("profiles", id, AuditAction::Update)
            .with_actor(user.id, user.role)
            .with_values(audit::snapshot(&before), audit::snapshot(&after))
            .with_metadata(serde_json::json!({ "action": "approve" })),
    )
    .await?;

    notifier::send(
        &mut *tx,
        &NewNotification::new(
            id,
            NotificationType::StatusChanged,
            "계정 승인 완료",
            "계정이 승인되었습니다. 이제 모든 기능을 사용할 수 있습니다.",
        )
        .related("profile", id),
    )
    .await?;

    tx.commit().await?;
    dashboard_cache::invalidate(&state.cache).await;

    info!(profile_id = %id, approved_by = %user.id, "Profile approved");
    Ok(Json(ApiResponse::success(after)))
}

/// 审核拒绝
///
/// POST /api/profiles/{id}/reject
pub async fn reject_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    body: Option<Json<RejectRequest>>,
) -> Result<Json<ApiResponse<Profile>>> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    req.validate()?;

    let mut tx = state.pool.begin().await?;
    let before = lock_profile(&mut tx, id).await?;
    if before.status == ProfileStatus::Rejected {
        return Err(AdminError::AlreadyRejected);
    }

    let metadata = serde_json::json!({ "rejection_reason": req.reason });
    let after = set_status(&mut tx, id, ProfileStatus::Rejected, user.id, Some(&metadata)).await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("profiles", id, AuditAction::Update)
            .with_actor(user.id, user.role)
            .with_values(audit::snapshot(&before), audit::snapshot(&after))
            .with_metadata(serde_json::json!({ "action": "reject", "reason": req.reason })),
    )
    .await?;

    let message = match &req.reason {
        Some(reason) => format!("계정 승인이 거절되었습니다. 사유: {}", reason),
        None => "계정 승인이 거절되었습니다.".to_string(),
    };
    notifier::send(
        &mut *tx,
        &NewNotification::new(id, NotificationType::StatusChanged, "계정 승인 거절", message)
            .related("profile", id)
            .priority(NotificationPriority::High),
    )
    .await?;

    tx.commit().await?;
    dashboard_cache::invalidate(&state.cache).await;

    info!(profile_id = %id, "Profile rejected");
    Ok(Json(ApiResponse::success(after)))
}

/// 批量操作，逐个执行
///
/// POST /api/profiles/bulk
pub async fn bulk_action(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<ProfileBulkRequest>,
) -> Result<Json<ApiResponse<BulkActionResponse>>> {
    req.validate()?;

    let mut result = BulkActionResponse::default();
    for id in &req.user_ids {
        match apply_bulk(&state, &user, *id, req.action, req.reason.as_deref()).await {
            Ok(()) => result.record_ok(*id),
            Err(e) => result.record_err(*id, &e),
        }
    }

    dashboard_cache::invalidate(&state.cache).await;
    info!(
        action = ?req.action,
        processed = result.processed,
        failed = result.failed,
        "Profile bulk action finished"
    );
    Ok(Json(ApiResponse::success(result.finish())))
}

async fn apply_bulk(
    state: &AppState,
    user: &CurrentUser,
    id: Uuid,
    action: ProfileBulkAction,
    reason: Option<&str>,
) -> Result<()> {
    if id == user.id && matches!(action, ProfileBulkAction::Delete | ProfileBulkAction::Deactivate) {
        return Err(AdminError::Forbidden("不能对自己执行该操作".to_string()));
    }

    let mut tx = state.pool.begin().await?;
    let before = lock_profile(&mut tx, id).await?;

    let metadata = match action {
        ProfileBulkAction::Delete => Some(serde_json::json!({
            "deleted_at": Utc::now(),
            "delete_reason": reason,
        })),
        ProfileBulkAction::Reject => Some(serde_json::json!({ "rejection_reason": reason })),
        _ => None,
    };

    let after = set_status(&mut tx, id, action.target_status(), user.id, metadata.as_ref()).await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new(
            "profiles",
            id,
            if action == ProfileBulkAction::Delete {
                AuditAction::Delete
            } else {
                AuditAction::Update
            },
        )
        .with_actor(user.id, user.role)
        .with_values(audit::snapshot(&before), audit::snapshot(&after))
        .with_metadata(serde_json::json!({ "bulk_action": format!("{:?}", action).to_lowercase() })),
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

/// 用户统计
///
/// GET /api/profiles/stats
#[instrument(skip(state))]
pub async fn profile_stats(State(state): State<AppState>) -> Result<Json<ApiResponse<ProfileStats>>> {
    let by_status: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM profiles GROUP BY status")
            .fetch_all(&state.pool)
            .await?;
    let by_role: Vec<(String, i64)> =
        sqlx::query_as("SELECT role, COUNT(*) FROM profiles GROUP BY role")
            .fetch_all(&state.pool)
            .await?;
    let recent_signups: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM profiles WHERE created_at >= NOW() - INTERVAL '7 days'",
    )
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(ProfileStats {
        total: by_status.iter().map(|(_, c)| c).sum(),
        by_status: by_status.into_iter().collect(),
        by_role: by_role.into_iter().collect(),
        recent_signups,
    })))
}

// ============================================
// 辅助函数
// ============================================

pub(crate) async fn fetch_profile<'e, E>(executor: E, id: Uuid) -> Result<Profile>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, Profile>(&format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or(AdminError::ProfileNotFound(id))
}

async fn lock_profile(conn: &mut PgConnection, id: Uuid) -> Result<Profile> {
    sqlx::query_as::<_, Profile>(&format!(
        "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(AdminError::ProfileNotFound(id))
}

/// 修改审核状态并合并 metadata；进入 approved 时记录审核人
async fn set_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: ProfileStatus,
    actor: Uuid,
    metadata: Option<&serde_json::Value>,
) -> Result<Profile> {
    let profile = sqlx::query_as::<_, Profile>(&format!(
        r#"
        UPDATE profiles SET
            status = $2,
            approved_at = CASE WHEN $2 = 'approved' AND status <> 'approved' THEN NOW() ELSE approved_at END,
            approved_by = CASE WHEN $2 = 'approved' AND status <> 'approved' THEN $3 ELSE approved_by END,
            metadata = metadata || COALESCE($4, '{{}}'::jsonb),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {PROFILE_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(status)
    .bind(actor)
    .bind(metadata)
    .fetch_one(&mut *conn)
    .await?;
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_action_targets() {
        assert_eq!(ProfileBulkAction::Approve.target_status(), ProfileStatus::Approved);
        assert_eq!(ProfileBulkAction::Activate.target_status(), ProfileStatus::Approved);
        assert_eq!(ProfileBulkAction::Deactivate.target_status(), ProfileStatus::Pending);
        assert_eq!(ProfileBulkAction::Delete.target_status(), ProfileStatus::Rejected);
    }

    #[test]
    fn test_filter_defaults() {
        let f: ProfileFilter = serde_json::from_str("{}").unwrap();
        assert_eq!(f.sort_by.column(), "created_at");
        assert_eq!(f.sort_order.as_sql(), "DESC");

        let f: ProfileFilter =
            serde_json::from_str(r#"{"role":"shop_owner","sortBy":"name","sortOrder":"asc"}"#)
                .unwrap();
        assert_eq!(f.role, Some(UserRole::ShopOwner));
        assert_eq!(f.sort_by.column(), "name");
    }

    #[test]
    fn test_bulk_request_limits() {
        let req = ProfileBulkRequest {
            user_ids: vec![],
            action: ProfileBulkAction::Approve,
            reason: None,
        };
        assert!(req.validate().is_err());
    }
}
