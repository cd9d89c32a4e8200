//! 站内通知 HTTP 处理器
//!
//! 用户只能操作自己的通知；管理员可以给任意用户发送

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::auth::CurrentUser;
use crate::dto::{ApiResponse, DeletedResponse, PageResponse, PaginationParams};
use crate::error::{AdminError, Result};
use crate::models::{Notification, NotificationPriority, NotificationType};
use crate::service::{NewNotification, notifier};
use crate::state::AppState;

const NOTIFICATION_COLUMNS: &str = "id, user_id, type, title, message, related_type, related_id, \
     action_url, is_read, read_at, priority, expires_at, is_archived, created_at";

/// 未过期条件
const NOT_EXPIRED: &str = "(expires_at IS NULL OR expires_at > NOW())";

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSort {
    #[default]
    CreatedAt,
    Priority,
}

impl NotificationSort {
    fn order_by(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at DESC",
            Self::Priority => {
                "CASE priority WHEN 'urgent' THEN 4 WHEN 'high' THEN 3 WHEN 'normal' THEN 2 ELSE 1 END DESC, \
                 created_at DESC"
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationFilter {
    pub is_read: Option<bool>,
    #[serde(rename = "type")]
    pub notification_type: Option<NotificationType>,
    pub priority: Option<NotificationPriority>,
    #[serde(default)]
    pub include_archived: bool,
    #[serde(default)]
    pub sort_by: NotificationSort,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAllReadResponse {
    pub updated: u64,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[validate(length(min = 1, max = 200, message = "标题长度必须在 1-200 之间"))]
    pub title: String,
    #[validate(length(min = 1, max = 2000, message = "内容长度必须在 1-2000 之间"))]
    pub message: String,
    pub related_type: Option<String>,
    pub related_id: Option<Uuid>,
    #[validate(length(max = 500))]
    pub action_url: Option<String>,
    #[serde(default)]
    pub priority: NotificationPriority,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStats {
    pub total: i64,
    pub unread: i64,
    pub by_type: HashMap<String, i64>,
    pub by_priority: HashMap<String, i64>,
}

// ============================================
// API 处理器
// ============================================

/// 我的通知
///
/// GET /api/notifications
pub async fn list_notifications(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<NotificationFilter>,
) -> Result<Json<ApiResponse<PageResponse<Notification>>>> {
    let where_clause = format!(
        r#"
        user_id = $1
        AND {NOT_EXPIRED}
        AND ($2::boolean IS NULL OR is_read = $2)
        AND ($3::varchar IS NULL OR type = $3)
        AND ($4::varchar IS NULL OR priority = $4)
        AND ($5 OR NOT is_archived)
        "#
    );

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM notifications WHERE {where_clause}"))
            .bind(user.id)
            .bind(filter.is_read)
            .bind(filter.notification_type)
            .bind(filter.priority)
            .bind(filter.include_archived)
            .fetch_one(&state.pool)
            .await?;

    let items: Vec<Notification> = sqlx::query_as(&format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE {where_clause} \
         ORDER BY {} LIMIT $6 OFFSET $7",
        filter.sort_by.order_by()
    ))
    .bind(user.id)
    .bind(filter.is_read)
    .bind(filter.notification_type)
    .bind(filter.priority)
    .bind(filter.include_archived)
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

/// 未读数量
///
/// GET /api/notifications/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<UnreadCount>>> {
    let count = count_unread(&state.pool, user.id).await?;
    Ok(Json(ApiResponse::success(UnreadCount { count })))
}

pub(crate) async fn count_unread(pool: &sqlx::PgPool, user_id: Uuid) -> Result<i64> {
    let count = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM notifications \
         WHERE user_id = $1 AND NOT is_read AND NOT is_archived AND {NOT_EXPIRED}"
    ))
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// 标记已读
///
/// POST /api/notifications/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Notification>>> {
    let notification: Notification = sqlx::query_as(&format!(
        r#"
        UPDATE notifications SET is_read = TRUE, read_at = COALESCE(read_at, NOW())
        WHERE id = $1 AND user_id = $2
        RETURNING {NOTIFICATION_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(user.id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AdminError::NotificationNotFound(id))?;

    Ok(Json(ApiResponse::success(notification)))
}

/// 全部标记已读
///
/// POST /api/notifications/read-all
pub async fn mark_all_read(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<MarkAllReadResponse>>> {
    let result = sqlx::query(
        "UPDATE notifications SET is_read = TRUE, read_at = NOW() WHERE user_id = $1 AND NOT is_read",
    )
    .bind(user.id)
    .execute(&state.pool)
    .await?;

    info!(user_id = %user.id, updated = result.rows_affected(), "Notifications marked read");
    Ok(Json(ApiResponse::success(MarkAllReadResponse {
        updated: result.rows_affected(),
    })))
}

/// 归档
///
/// POST /api/notifications/{id}/archive
pub async fn archive(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Notification>>> {
    let notification: Notification = sqlx::query_as(&format!(
        r#"
        UPDATE notifications SET is_archived = TRUE
        WHERE id = $1 AND user_id = $2
        RETURNING {NOTIFICATION_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(user.id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AdminError::NotificationNotFound(id))?;

    Ok(Json(ApiResponse::success(notification)))
}

/// 删除
///
/// DELETE /api/notifications/{id}
pub async fn delete_notification(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DeletedResponse>>> {
    let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user.id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AdminError::NotificationNotFound(id));
    }
    Ok(Json(ApiResponse::success(DeletedResponse { deleted: true })))
}

/// 管理员发送通知
///
/// POST /api/notifications
pub async fn create_notification(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateNotificationRequest>,
) -> Result<Json<ApiResponse<Notification>>> {
    req.validate()?;
    if let Some(expires_at) = req.expires_at {
        if expires_at <= Utc::now() {
            return Err(AdminError::Validation("过期时间必须晚于当前时间".to_string()));
        }
    }

    let recipient_exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM profiles WHERE id = $1)")
            .bind(req.user_id)
            .fetch_one(&state.pool)
            .await?;
    if !recipient_exists {
        return Err(AdminError::ProfileNotFound(req.user_id));
    }

    let mut n = NewNotification::new(req.user_id, req.notification_type, req.title, req.message)
        .priority(req.priority);
    n.related_type = req.related_type;
    n.related_id = req.related_id;
    n.action_url = req.action_url;
    n.expires_at = req.expires_at;

    let id = notifier::send(&state.pool, &n).await?;
    let notification: Notification = sqlx::query_as(&format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1"
    ))
    .bind(id)
    .fetch_one(&state.pool)
    .await?;

    info!(
        notification_id = %id,
        recipient = %n.user_id,
        sender = %user.id,
        "Notification sent"
    );
    Ok(Json(ApiResponse::success(notification)))
}

/// 我的通知统计
///
/// GET /api/notifications/stats
pub async fn notification_stats(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<NotificationStats>>> {
    let rows: Vec<(NotificationType, NotificationPriority, bool, i64)> = sqlx::query_as(&format!(
        r#"
        SELECT type, priority, is_read, COUNT(*)
        FROM notifications
        WHERE user_id = $1 AND NOT is_archived AND {NOT_EXPIRED}
        GROUP BY type, priority, is_read
        "#
    ))
    .bind(user.id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(aggregate_stats(&rows))))
}

fn aggregate_stats(rows: &[(NotificationType, NotificationPriority, bool, i64)]) -> NotificationStats {
    let mut stats = NotificationStats {
        total: 0,
        unread: 0,
        by_type: HashMap::new(),
        by_priority: HashMap::new(),
    };
    for (kind, priority, is_read, count) in rows {
        stats.total += count;
        if !is_read {
            stats.unread += count;
        }
        *stats.by_type.entry(kind.as_str().to_string()).or_default() += count;
        *stats.by_priority.entry(priority.as_str().to_string()).or_default() += count;
    }
    stats
}
