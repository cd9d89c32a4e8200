//! 月度佣金 HTTP 处理器
//!
//! 计算、查询、人工调整、状态流转、支付登记、汇总与导出

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::auth::CurrentUser;
use crate::domain::Month;
use crate::domain::monthly_commission::{
    AdjustmentRecord, append_adjustment, check_transition, status_after_adjustment,
};
use crate::dto::{ApiResponse, PageResponse, PaginationParams};
use crate::error::{AdminError, Result};
use crate::models::{
    AuditAction, AuditLogEntry, CalculationStatus, CommissionCalculation, NotificationPriority,
    NotificationType, ProfileSummary,
};
use crate::service::{
    self, CalculationSummary, CommissionEstimate, NewNotification, audit, dashboard_cache, notifier,
};
use crate::state::AppState;

const CALCULATION_COLUMNS: &str = "id, kol_id, calculation_month, subordinate_sales, \
     subordinate_commission, self_shop_sales, self_shop_rate, self_shop_commission, device_count, \
     device_commission, manual_adjustment, total_commission, status, calculation_details, \
     calculated_at, payment_date, payment_reference, paid_at, notes, created_at, updated_at";

/// 自助视图返回的历史月份数
const HISTORY_MONTHS: i64 = 6;

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateRequest {
    pub month: Month,
    pub kol_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionFilter {
    pub month: Option<Month>,
    pub kol_id: Option<Uuid>,
    pub status: Option<CalculationStatus>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CommissionListItem {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub calculation: CommissionCalculation,
    pub kol_name: String,
    pub kol_email: String,
    pub kol_shop_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionDetail {
    #[serde(flatten)]
    pub calculation: CommissionCalculation,
    pub kol: Option<ProfileSummary>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentRequest {
    pub amount: i64,
    #[validate(length(min = 1, max = 500, message = "调整原因不能为空"))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub payment_date: NaiveDate,
    #[validate(length(min = 1, max = 200))]
    pub payment_reference: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCommissionRequest {
    #[validate(nested)]
    pub adjustment: Option<AdjustmentRequest>,
    pub status: Option<CalculationStatus>,
    #[validate(nested)]
    pub payment_info: Option<PaymentInfo>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    pub month: Month,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionSummary {
    pub month: String,
    pub total_count: i64,
    pub total_amount: i64,
    /// calculated + adjusted + reviewed
    pub calculated_amount: i64,
    pub approved_amount: i64,
    pub paid_amount: i64,
    pub pending_amount: i64,
    pub by_status: HashMap<String, i64>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CommissionExportRow {
    pub kol_id: Uuid,
    pub kol_name: String,
    pub kol_email: String,
    pub shop_name: String,
    pub calculation_month: String,
    pub subordinate_sales: i64,
    pub subordinate_commission: i64,
    pub self_shop_sales: i64,
    pub self_shop_commission: i64,
    pub device_count: i32,
    pub device_commission: i64,
    pub manual_adjustment: i64,
    pub total_commission: i64,
    pub status: CalculationStatus,
    pub payment_date: Option<NaiveDate>,
    pub payment_reference: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyCommissions {
    pub current: CommissionEstimate,
    pub history: Vec<CommissionCalculation>,
}

// ============================================
// API 处理器
// ============================================

/// 计算指定月份佣金
///
/// POST /api/commissions/calculate
pub async fn calculate(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CalculateRequest>,
) -> Result<Json<ApiResponse<CalculationSummary>>> {
    let summary = service::commission_service(&state.pool)
        .calculate(req.month, req.kol_id)
        .await?;

    dashboard_cache::invalidate(&state.cache).await;
    info!(month = %req.month, triggered_by = %user.id, "Commission calculation triggered");
    Ok(Json(ApiResponse::success(summary)))
}

/// 佣金列表；KOL 只能看到自己的记录
///
/// GET /api/commissions
pub async fn list_commissions(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<CommissionFilter>,
) -> Result<Json<ApiResponse<PageResponse<CommissionListItem>>>> {
    let kol_id = user.scope(filter.kol_id);
    let month = filter.month.map(|m| m.to_string());

    let where_clause = r#"
        ($1::varchar IS NULL OR c.calculation_month = $1)
        AND ($2::uuid IS NULL OR c.kol_id = $2)
        AND ($3::varchar IS NULL OR c.status = $3)
    "#;

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM commission_calculations c WHERE {where_clause}"
    ))
    .bind(&month)
    .bind(kol_id)
    .bind(filter.status)
    .fetch_one(&state.pool)
    .await?;

    let items: Vec<CommissionListItem> = sqlx::query_as(&format!(
        r#"
        SELECT {}, p.name AS kol_name, p.email AS kol_email, p.shop_name AS kol_shop_name
        FROM commission_calculations c
        JOIN profiles p ON p.id = c.kol_id
        WHERE {where_clause}
        ORDER BY c.total_commission DESC, c.calculated_at DESC
        LIMIT $4 OFFSET $5
        "#,
        prefixed_columns("c")
    ))
    .bind(&month)
    .bind(kol_id)
    .bind(filter.status)
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

/// 佣金详情
///
/// GET /api/commissions/{id}
pub async fn get_commission(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CommissionDetail>>> {
    let calculation = fetch_calculation(&state.pool, id).await?;
    user.ensure_self_or_admin(calculation.kol_id)?;

    let kol: Option<ProfileSummary> =
        sqlx::query_as("SELECT id, name, email, role, shop_name FROM profiles WHERE id = $1")
            .bind(calculation.kol_id)
            .fetch_optional(&state.pool)
            .await?;

    Ok(Json(ApiResponse::success(CommissionDetail { calculation, kol })))
}

/// 人工调整、状态流转、支付登记
///
/// PUT /api/commissions/{id}
pub async fn update_commission(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCommissionRequest>,
) -> Result<Json<ApiResponse<CommissionCalculation>>> {
    req.validate()?;

    let mut tx = state.pool.begin().await?;
    let before: CommissionCalculation = sqlx::query_as(&format!(
        "SELECT {CALCULATION_COLUMNS} FROM commission_calculations WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AdminError::CommissionNotFound(id))?;

    let mut status = before.status;
    let mut manual_adjustment = before.manual_adjustment;
    let mut total = before.total_commission;
    let mut details = before.calculation_details.clone();

    if let Some(adj) = &req.adjustment {
        status = status_after_adjustment(status)?;
        append_adjustment(
            &mut details,
            &AdjustmentRecord {
                amount: adj.amount,
                reason: adj.reason.trim().to_string(),
                adjusted_by: user.id,
                adjusted_at: Utc::now(),
            },
        )?;
        manual_adjustment += adj.amount;
        total += adj.amount;
    }

    if let Some(next) = req.status {
        if next != status {
            check_transition(status, next)?;
            status = next;
        }
    }

    let (payment_date, payment_reference) = match &req.payment_info {
        Some(info) => {
            if status != CalculationStatus::Paid {
                check_transition(status, CalculationStatus::Paid)?;
                status = CalculationStatus::Paid;
            }
            (Some(info.payment_date), Some(info.payment_reference.clone()))
        }
        None => (None, None),
    };
    let newly_paid = status == CalculationStatus::Paid && before.status != CalculationStatus::Paid;

    let after: CommissionCalculation = sqlx::query_as(&format!(
        r#"
        UPDATE commission_calculations SET
            manual_adjustment = $2,
            total_commission = $3,
            status = $4,
            calculation_details = $5,
            payment_date = COALESCE($6, payment_date),
            payment_reference = COALESCE($7, payment_reference),
            paid_at = CASE WHEN $8 THEN NOW() ELSE paid_at END,
            notes = COALESCE($9, notes),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {CALCULATION_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(manual_adjustment)
    .bind(total)
    .bind(status)
    .bind(&details)
    .bind(payment_date)
    .bind(&payment_reference)
    .bind(newly_paid)
    .bind(&req.notes)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("commission_calculations", id, AuditAction::Update)
            .with_actor(user.id, user.role)
            .with_values(audit::snapshot(&before), audit::snapshot(&after)),
    )
    .await?;

    if newly_paid {
        notifier::send(
            &mut *tx,
            &NewNotification::new(
                after.kol_id,
                NotificationType::CommissionPaid,
                "커미션 지급 완료",
                format!(
                    "{} 커미션 {}원이 지급되었습니다.",
                    after.calculation_month, after.total_commission
                ),
            )
            .related("commission", id)
            .priority(NotificationPriority::High),
        )
        .await?;
    }

    tx.commit().await?;
    dashboard_cache::invalidate(&state.cache).await;

    info!(
        commission_id = %id,
        status = %after.status,
        adjusted = req.adjustment.is_some(),
        "Commission updated"
    );
    Ok(Json(ApiResponse::success(after)))
}

/// 月度汇总
///
/// GET /api/commissions/summary
pub async fn commission_summary(
    State(state): State<AppState>,
    Query(query): Query<MonthQuery>,
) -> Result<Json<ApiResponse<CommissionSummary>>> {
    let rows: Vec<(CalculationStatus, i64, i64)> = sqlx::query_as(
        r#"
        SELECT status, COUNT(*), COALESCE(SUM(total_commission), 0)::BIGINT
        FROM commission_calculations
        WHERE calculation_month = $1
        GROUP BY status
        "#,
    )
    .bind(query.month.to_string())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(summarize(query.month, &rows))))
}

/// 导出某月全部记录
///
/// GET /api/commissions/export
pub async fn export_commissions(
    State(state): State<AppState>,
    Query(query): Query<MonthQuery>,
) -> Result<Json<ApiResponse<Vec<CommissionExportRow>>>> {
    let rows: Vec<CommissionExportRow> = sqlx::query_as(
        r#"
        SELECT c.kol_id, p.name AS kol_name, p.email AS kol_email, p.shop_name,
               c.calculation_month, c.subordinate_sales, c.subordinate_commission,
               c.self_shop_sales, c.self_shop_commission, c.device_count, c.device_commission,
               c.manual_adjustment, c.total_commission, c.status, c.payment_date,
               c.payment_reference
        FROM commission_calculations c
        JOIN profiles p ON p.id = c.kol_id
        WHERE c.calculation_month = $1
        ORDER BY c.total_commission DESC, p.name
        "#,
    )
    .bind(query.month.to_string())
    .fetch_all(&state.pool)
    .await?;

    info!(month = %query.month, rows = rows.len(), "Commissions exported");
    Ok(Json(ApiResponse::success(rows)))
}

/// KOL 自助视图：当月实时估算 + 最近 6 条已结算记录
///
/// GET /api/commissions/me
pub async fn my_commissions(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<MyCommissions>>> {
    if !user.role.is_affiliate() {
        return Err(AdminError::Forbidden("仅 KOL/OL 可查看".to_string()));
    }

    let month = Month::from_date(Utc::now().date_naive());
    let current = service::commission_service(&state.pool)
        .estimate(user.id, month)
        .await?;

    let history: Vec<CommissionCalculation> = sqlx::query_as(&format!(
        "SELECT {CALCULATION_COLUMNS} FROM commission_calculations WHERE kol_id = $1 \
         ORDER BY calculation_month DESC LIMIT $2"
    ))
    .bind(user.id)
    .bind(HISTORY_MONTHS)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(MyCommissions { current, history })))
}

// ============================================
// 辅助函数
// ============================================

fn summarize(month: Month, rows: &[(CalculationStatus, i64, i64)]) -> CommissionSummary {
    let amount_where = |pred: fn(CalculationStatus) -> bool| -> i64 {
        rows.iter().filter(|(s, _, _)| pred(*s)).map(|(_, _, a)| a).sum()
    };

    let total_amount = amount_where(|_| true);
    let paid_amount = amount_where(|s| s == CalculationStatus::Paid);

    CommissionSummary {
        month: month.to_string(),
        total_count: rows.iter().map(|(_, c, _)| c).sum(),
        total_amount,
        calculated_amount: amount_where(|s| {
            matches!(
                s,
                CalculationStatus::Calculated
                    | CalculationStatus::Adjusted
                    | CalculationStatus::Reviewed
            )
        }),
        approved_amount: amount_where(|s| s == CalculationStatus::Approved),
        paid_amount,
        pending_amount: total_amount - paid_amount,
        by_status: rows
            .iter()
            .map(|(s, c, _)| (s.as_str().to_string(), *c))
            .collect(),
    }
}

async fn fetch_calculation<'e, E>(executor: E, id: Uuid) -> Result<CommissionCalculation>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, CommissionCalculation>(&format!(
        "SELECT {CALCULATION_COLUMNS} FROM commission_calculations WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or(AdminError::CommissionNotFound(id))
}

fn prefixed_columns(alias: &str) -> String {
    CALCULATION_COLUMNS
        .split(',')
        .map(|c| format!("{}.{}", alias, c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month() -> Month {
        "2026-09".parse().unwrap()
    }

    #[test]
    fn test_summary_amounts() {
        let rows = vec![
            (CalculationStatus::Calculated, 2, 3_000_000),
            (CalculationStatus::Adjusted, 1, 500_000),
            (CalculationStatus::Approved, 1, 1_000_000),
            (CalculationStatus::Paid, 3, 6_000_000),
        ];
        let s = summarize(month(), &rows);
        assert_eq!(s.month, "2026-09");
        assert_eq!(s.total_count, 7);
        assert_eq!(s.total_amount, 10_500_000);
        assert_eq!(s.calculated_amount, 3_500_000);
        assert_eq!(s.approved_amount, 1_000_000);
        assert_eq!(s.paid_amount, 6_000_000);
        assert_eq!(s.pending_amount, 4_500_000);
        assert_eq!(s.by_status["paid"], 3);
    }

    #[test]
    fn test_summary_empty_month() {
        let s = summarize(month(), &[]);
        assert_eq!(s.total_amount, 0);
        assert_eq!(s.pending_amount, 0);
        assert!(s.by_status.is_empty());
    }

    #[test]
    fn test_update_request_parse() {
        let req: UpdateCommissionRequest = serde_json::from_value(serde_json::json!({
            "adjustment": { "amount": -50000, "reason": "반품 정산" },
            "paymentInfo": { "paymentDate": "2026-10-10", "paymentReference": "TX-1" },
        }))
        .unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.adjustment.as_ref().unwrap().amount, -50_000);

        let req: UpdateCommissionRequest = serde_json::from_value(serde_json::json!({
            "adjustment": { "amount": 1, "reason": "" },
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_calculate_request_rejects_bad_month() {
        let res: std::result::Result<CalculateRequest, _> =
            serde_json::from_value(serde_json::json!({ "month": "2026-13" }));
        assert!(res.is_err());
    }
}
