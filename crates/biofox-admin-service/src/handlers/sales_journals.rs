//! KOL 销售日志 HTTP 处理器
//!
//! 每个用户每天一条，重复提交同一天视为更新。

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::auth::CurrentUser;
use crate::domain::journal::{preview, required_field};
use crate::dto::{
    ApiResponse, DeletedResponse, PageResponse, PaginationParams, SortOrder, search_pattern,
    validate_date_range,
};
use crate::error::{AdminError, Result};
use crate::models::{AuditAction, AuditLogEntry, SalesJournal, UserRole};
use crate::service::audit;
use crate::state::AppState;

const JOURNAL_COLUMNS: &str =
    "id, user_id, shop_id, date, shop_name, content, special_notes, created_at, updated_at";

/// 统计接口返回的最近日志条数
const RECENT_ENTRIES: i64 = 5;

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpsertJournalRequest {
    pub date: NaiveDate,
    #[validate(length(max = 200, message = "店铺名称最长 200 字符"))]
    pub shop_name: String,
    #[validate(length(max = 5000, message = "内容最长 5000 字符"))]
    pub content: String,
    #[validate(length(max = 2000))]
    pub special_notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalSortField {
    #[default]
    Date,
    CreatedAt,
}

impl JournalSortField {
    fn column(&self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalFilter {
    pub user_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub shop_name: Option<String>,
    #[serde(default)]
    pub sort_by: JournalSortField,
    #[serde(default)]
    pub sort_order: SortOrder,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalPreview {
    pub id: Uuid,
    pub date: NaiveDate,
    pub shop_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalStats {
    pub total_entries: i64,
    pub unique_dates: i64,
    pub unique_shops: i64,
    pub recent_entries: Vec<JournalPreview>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalStatsQuery {
    pub user_id: Option<Uuid>,
}

// ============================================
// API 处理器
// ============================================

/// 新增或覆盖当天的销售日志
///
/// POST /api/sales-journals
pub async fn upsert_journal(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<UpsertJournalRequest>,
) -> Result<Json<ApiResponse<SalesJournal>>> {
    if !user.role.is_affiliate() {
        return Err(AdminError::Forbidden("仅 KOL/OL 可填写销售日志".to_string()));
    }
    req.validate()?;
    let shop_name = required_field("shopName", &req.shop_name)?;
    let content = required_field("content", &req.content)?;
    let special_notes = req
        .special_notes
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);

    let mut tx = state.pool.begin().await?;

    let shop_id: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM profiles WHERE role = $1 AND shop_name = $2 ORDER BY created_at LIMIT 1",
    )
    .bind(UserRole::ShopOwner)
    .bind(&shop_name)
    .fetch_optional(&mut *tx)
    .await?;

    let previous: Option<SalesJournal> = sqlx::query_as(&format!(
        "SELECT {JOURNAL_COLUMNS} FROM sales_journals WHERE user_id = $1 AND date = $2 FOR UPDATE"
    ))
    .bind(user.id)
    .bind(req.date)
    .fetch_optional(&mut *tx)
    .await?;

    let journal: SalesJournal = sqlx::query_as(&format!(
        r#"
        INSERT INTO sales_journals (user_id, shop_id, date, shop_name, content, special_notes)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (user_id, date) DO UPDATE SET
            shop_id = EXCLUDED.shop_id,
            shop_name = EXCLUDED.shop_name,
            content = EXCLUDED.content,
            special_notes = EXCLUDED.special_notes,
            updated_at = NOW()
        RETURNING {JOURNAL_COLUMNS}
        "#
    ))
    .bind(user.id)
    .bind(shop_id)
    .bind(req.date)
    .bind(&shop_name)
    .bind(&content)
    .bind(&special_notes)
    .fetch_one(&mut *tx)
    .await?;

    let action = if previous.is_some() {
        AuditAction::Update
    } else {
        AuditAction::Insert
    };
    audit::record(
        &mut *tx,
        &AuditLogEntry::new("sales_journals", journal.id, action)
            .with_actor(user.id, user.role)
            .with_values(
                previous.as_ref().and_then(audit::snapshot),
                audit::snapshot(&journal),
            ),
    )
    .await?;

    tx.commit().await?;

    info!(
        journal_id = %journal.id,
        user_id = %user.id,
        date = %journal.date,
        shop_matched = shop_id.is_some(),
        "Sales journal saved"
    );
    Ok(Json(ApiResponse::success(journal)))
}

/// 销售日志列表
///
/// GET /api/sales-journals
pub async fn list_journals(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<JournalFilter>,
) -> Result<Json<ApiResponse<PageResponse<SalesJournal>>>> {
    validate_date_range(filter.date_from, filter.date_to)?;
    let owner = user.scope(filter.user_id);
    let shop_pattern = search_pattern(filter.shop_name.as_deref())?;

    let where_clause = r#"
        ($1::uuid IS NULL OR user_id = $1)
        AND ($2::date IS NULL OR date = $2)
        AND ($3::date IS NULL OR date >= $3)
        AND ($4::date IS NULL OR date <= $4)
        AND ($5::text IS NULL OR shop_name ILIKE $5)
    "#;

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM sales_journals WHERE {where_clause}"
    ))
    .bind(owner)
    .bind(filter.date)
    .bind(filter.date_from)
    .bind(filter.date_to)
    .bind(&shop_pattern)
    .fetch_one(&state.pool)
    .await?;

    let items: Vec<SalesJournal> = sqlx::query_as(&format!(
        "SELECT {JOURNAL_COLUMNS} FROM sales_journals WHERE {where_clause} \
         ORDER BY {} {}, id LIMIT $6 OFFSET $7",
        filter.sort_by.column(),
        filter.sort_order.as_sql()
    ))
    .bind(owner)
    .bind(filter.date)
    .bind(filter.date_from)
    .bind(filter.date_to)
    .bind(&shop_pattern)
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

/// 删除销售日志
///
/// DELETE /api/sales-journals/{id}
pub async fn delete_journal(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DeletedResponse>>> {
    let mut tx = state.pool.begin().await?;

    let journal: SalesJournal = sqlx::query_as(&format!(
        "SELECT {JOURNAL_COLUMNS} FROM sales_journals WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AdminError::JournalNotFound(id))?;
    user.ensure_self_or_admin(journal.user_id)?;

    sqlx::query("DELETE FROM sales_journals WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("sales_journals", id, AuditAction::Delete)
            .with_actor(user.id, user.role)
            .with_values(audit::snapshot(&journal), None)
            .with_metadata(json!({ "owner": journal.user_id })),
    )
    .await?;

    tx.commit().await?;

    info!(journal_id = %id, deleted_by = %user.id, "Sales journal deleted");
    Ok(Json(ApiResponse::success(DeletedResponse { deleted: true })))
}

/// 销售日志统计
///
/// GET /api/sales-journals/stats
pub async fn journal_stats(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<JournalStatsQuery>,
) -> Result<Json<ApiResponse<JournalStats>>> {
    let owner = user.scope(query.user_id).unwrap_or(user.id);

    let (total_entries, unique_dates, unique_shops): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*), COUNT(DISTINCT date), COUNT(DISTINCT shop_name)
        FROM sales_journals
        WHERE user_id = $1
        "#,
    )
    .bind(owner)
    .fetch_one(&state.pool)
    .await?;

    let recent: Vec<SalesJournal> = sqlx::query_as(&format!(
        "SELECT {JOURNAL_COLUMNS} FROM sales_journals WHERE user_id = $1 \
         ORDER BY date DESC, created_at DESC LIMIT $2"
    ))
    .bind(owner)
    .bind(RECENT_ENTRIES)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(JournalStats {
        total_entries,
        unique_dates,
        unique_shops,
        recent_entries: recent.into_iter().map(to_preview).collect(),
    })))
}

// ============================================
// 辅助函数
// ============================================

fn to_preview(journal: SalesJournal) -> JournalPreview {
    JournalPreview {
        id: journal.id,
        date: journal.date,
        content: preview(&journal.content),
        shop_name: journal.shop_name,
        created_at: journal.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn journal(content: &str) -> SalesJournal {
        SalesJournal {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            shop_id: None,
            date: NaiveDate::from_ymd_opt(2026, 4, 2).unwrap(),
            shop_name: "강남점".to_string(),
            content: content.to_string(),
            special_notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_preview_truncates_content() {
        let p = to_preview(journal(&"상".repeat(150)));
        assert_eq!(p.content.chars().count(), 103);
        assert_eq!(p.shop_name, "강남점");

        let p = to_preview(journal("짧은 메모"));
        assert_eq!(p.content, "짧은 메모");
    }

    #[test]
    fn test_filter_defaults() {
        let f: JournalFilter = serde_json::from_str("{}").unwrap();
        assert!(matches!(f.sort_by, JournalSortField::Date));
        assert_eq!(f.sort_order, SortOrder::Desc);

        let f: JournalFilter =
            serde_json::from_str(r#"{"sortBy":"created_at","sortOrder":"asc","dateFrom":"2026-04-01"}"#)
                .unwrap();
        assert_eq!(f.sort_by.column(), "created_at");
        assert_eq!(f.sort_order, SortOrder::Asc);
        assert_eq!(f.date_from, NaiveDate::from_ymd_opt(2026, 4, 1));
    }

    #[test]
    fn test_upsert_request_requires_date() {
        let res: std::result::Result<UpsertJournalRequest, _> = serde_json::from_value(json!({
            "shopName": "강남점",
            "content": "방문",
        }));
        assert!(res.is_err());
    }
}
