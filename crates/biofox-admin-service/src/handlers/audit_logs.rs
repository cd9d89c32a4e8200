//! 审计日志查询（仅管理员）

use axum::{
    Json,
    extract::{Query, State},
};
use chrono::{Days, NaiveDate};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::dto::{ApiResponse, DateRangeParams, PageResponse, PaginationParams};
use crate::error::Result;
use crate::models::{AuditAction, AuditLogEntry};
use crate::state::AppState;

const AUDIT_COLUMNS: &str = "id, table_name, record_id, action, user_id, user_role, \
     old_values, new_values, changed_fields, metadata, created_at";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogFilter {
    pub table_name: Option<String>,
    pub record_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub action: Option<AuditAction>,
}

/// 审计日志列表，按时间倒序
///
/// GET /api/audit-logs
pub async fn list_audit_logs(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(pagination): Query<PaginationParams>,
    Query(range): Query<DateRangeParams>,
    Query(filter): Query<AuditLogFilter>,
) -> Result<Json<ApiResponse<PageResponse<AuditLogEntry>>>> {
    user.ensure_admin()?;
    range.validate()?;

    // 截止日期包含当天
    let to_exclusive = range.to.and_then(next_day);

    let where_clause = r#"
        ($1::varchar IS NULL OR table_name = $1)
        AND ($2::text IS NULL OR record_id = $2)
        AND ($3::uuid IS NULL OR user_id = $3)
        AND ($4::varchar IS NULL OR action = $4)
        AND ($5::date IS NULL OR created_at >= $5::date)
        AND ($6::date IS NULL OR created_at < $6::date)
    "#;

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM audit_logs WHERE {where_clause}"))
            .bind(&filter.table_name)
            .bind(&filter.record_id)
            .bind(filter.user_id)
            .bind(filter.action)
            .bind(range.from)
            .bind(to_exclusive)
            .fetch_one(&state.pool)
            .await?;

    let items: Vec<AuditLogEntry> = sqlx::query_as(&format!(
        "SELECT {AUDIT_COLUMNS} FROM audit_logs WHERE {where_clause} \
         ORDER BY created_at DESC, id DESC LIMIT $7 OFFSET $8"
    ))
    .bind(&filter.table_name)
    .bind(&filter.record_id)
    .bind(filter.user_id)
    .bind(filter.action)
    .bind(range.from)
    .bind(to_exclusive)
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

fn next_day(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_add_days(Days::new(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_parse() {
        let f: AuditLogFilter =
            serde_json::from_str(r#"{"tableName":"orders","action":"DELETE"}"#).unwrap();
        assert_eq!(f.table_name.as_deref(), Some("orders"));
        assert_eq!(f.action, Some(AuditAction::Delete));
        assert!(f.user_id.is_none());
    }

    #[test]
    fn test_inclusive_end_date() {
        let d = NaiveDate::from_ymd_opt(2026, 2, 28).unwrap();
        assert_eq!(next_day(d), NaiveDate::from_ymd_opt(2026, 3, 1));
    }
}
