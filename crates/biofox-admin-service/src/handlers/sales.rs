//! KOL 销售分析
//!
//! 统计范围为 KOL 当前生效的直属店铺，取消订单不计入。管理员需通过 kolId 指定 KOL。

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

use super::shops::ensure_shop_access;
use crate::auth::CurrentUser;
use crate::domain::Month;
use crate::domain::sales_analytics::{
    DEFAULT_TREND_MONTHS, MonthlySalesPoint, ProductRatio, ProductSales, RankingSort,
    ShopMonthSales, ShopRanking, fill_trend, product_ratios, rank_shops, ranking_limit,
    trend_window,
};
use crate::dto::ApiResponse;
use crate::error::Result;
use crate::state::AppState;

// ============================================
// 请求参数
// ============================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingQuery {
    pub kol_id: Option<Uuid>,
    /// 默认当月
    pub month: Option<Month>,
    #[serde(default)]
    pub sort_by: RankingSort,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendQuery {
    pub kol_id: Option<Uuid>,
    pub months: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatioQuery {
    pub kol_id: Option<Uuid>,
    pub month: Option<Month>,
}

#[derive(FromRow)]
struct ShopMonthRow {
    shop_id: Uuid,
    shop_name: String,
    owner_name: String,
    month: Option<NaiveDate>,
    sales: i64,
}

#[derive(FromRow)]
struct ProductRow {
    product_id: Option<Uuid>,
    product_name: String,
    sales_amount: i64,
    quantity: i64,
    shop_count: i64,
}

impl From<ProductRow> for ProductSales {
    fn from(row: ProductRow) -> Self {
        Self {
            product_id: row.product_id,
            product_name: row.product_name,
            sales_amount: row.sales_amount,
            quantity: row.quantity,
            shop_count: row.shop_count,
        }
    }
}

// ============================================
// API 处理器
// ============================================

/// 直属店铺销售排名
///
/// GET /api/sales/shop-ranking
pub async fn shop_ranking(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<RankingQuery>,
) -> Result<Json<ApiResponse<Vec<ShopRanking>>>> {
    let kol_id = user.kol_target(query.kol_id)?;
    let limit = ranking_limit(query.limit)?;
    let month = query.month.unwrap_or_else(current_month);

    let rows: Vec<ShopMonthRow> = sqlx::query_as(
        r#"
        SELECT p.id AS shop_id, p.shop_name, p.name AS owner_name,
               date_trunc('month', o.order_date)::date AS month,
               COALESCE(SUM(o.total_amount), 0)::BIGINT AS sales
        FROM shop_relationships r
        JOIN profiles p ON p.id = r.shop_owner_id
        LEFT JOIN orders o ON o.shop_id = p.id
             AND o.order_status <> 'cancelled'
             AND o.order_date < $2
        WHERE r.parent_id = $1 AND r.is_active
        GROUP BY p.id, p.shop_name, p.name, date_trunc('month', o.order_date)
        "#,
    )
    .bind(kol_id)
    .bind(month.end_exclusive())
    .fetch_all(&state.pool)
    .await?;

    let rows: Vec<ShopMonthSales> = rows
        .into_iter()
        .map(|r| ShopMonthSales {
            shop_id: r.shop_id,
            shop_name: r.shop_name,
            owner_name: r.owner_name,
            month: r.month.map(Month::from_date),
            sales: r.sales,
        })
        .collect();

    debug!(kol_id = %kol_id, month = %month, sort = ?query.sort_by, "Ranking shops");
    Ok(Json(ApiResponse::success(rank_shops(
        &rows,
        month,
        query.sort_by,
        limit,
    ))))
}

/// 月度销售额与佣金趋势，旧月在前
///
/// GET /api/sales/monthly
pub async fn monthly_sales(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<TrendQuery>,
) -> Result<Json<ApiResponse<Vec<MonthlySalesPoint>>>> {
    let kol_id = user.kol_target(query.kol_id)?;
    let window = trend_window(
        current_month(),
        query.months.unwrap_or(DEFAULT_TREND_MONTHS),
    )?;
    let (Some(first), Some(last)) = (window.first(), window.last()) else {
        return Ok(Json(ApiResponse::success(Vec::new())));
    };

    // 与月度佣金一致：下级店铺订单加本人自营店订单
    let sales_rows: Vec<(NaiveDate, i64)> = sqlx::query_as(
        r#"
        SELECT date_trunc('month', o.order_date)::date,
               COALESCE(SUM(o.total_amount), 0)::BIGINT
        FROM orders o
        WHERE o.order_status <> 'cancelled'
          AND o.order_date >= $2 AND o.order_date < $3
          AND (
              o.shop_id IN (
                  SELECT shop_owner_id FROM shop_relationships
                  WHERE parent_id = $1 AND is_active
              )
              OR (o.shop_id = $1 AND o.is_self_shop_order)
          )
        GROUP BY 1
        "#,
    )
    .bind(kol_id)
    .bind(first.start())
    .bind(last.end_exclusive())
    .fetch_all(&state.pool)
    .await?;

    let labels: Vec<String> = window.iter().map(|m| m.to_string()).collect();
    let allowance_rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT calculation_month, total_commission
        FROM commission_calculations
        WHERE kol_id = $1 AND calculation_month = ANY($2) AND status <> 'cancelled'
        "#,
    )
    .bind(kol_id)
    .bind(&labels)
    .fetch_all(&state.pool)
    .await?;

    let sales: HashMap<Month, i64> = sales_rows
        .into_iter()
        .map(|(date, total)| (Month::from_date(date), total))
        .collect();
    let mut allowance = HashMap::new();
    for (label, total) in allowance_rows {
        allowance.insert(label.parse::<Month>()?, total);
    }

    Ok(Json(ApiResponse::success(fill_trend(
        &window, &sales, &allowance,
    ))))
}

/// KOL 全部直属店铺的商品销售占比
///
/// GET /api/sales/product-ratio
pub async fn product_ratio(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<RatioQuery>,
) -> Result<Json<ApiResponse<Vec<ProductRatio>>>> {
    let kol_id = user.kol_target(query.kol_id)?;
    let month = query.month.unwrap_or_else(current_month);
    let rows = load_product_sales(&state.pool, ProductScope::Kol(kol_id), month).await?;
    Ok(Json(ApiResponse::success(product_ratios(&rows))))
}

/// 单个店铺的商品销售占比
///
/// GET /api/sales/shops/{id}/product-ratio
pub async fn shop_product_ratio(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(shop_id): Path<Uuid>,
    Query(query): Query<RatioQuery>,
) -> Result<Json<ApiResponse<Vec<ProductRatio>>>> {
    ensure_shop_access(&state.pool, &user, shop_id).await?;
    let month = query.month.unwrap_or_else(current_month);
    let rows = load_product_sales(&state.pool, ProductScope::Shop(shop_id), month).await?;
    Ok(Json(ApiResponse::success(product_ratios(&rows))))
}

// ============================================
// 辅助函数
// ============================================

fn current_month() -> Month {
    Month::from_date(Utc::now().date_naive())
}

enum ProductScope {
    Kol(Uuid),
    Shop(Uuid),
}

async fn load_product_sales(
    pool: &PgPool,
    scope: ProductScope,
    month: Month,
) -> Result<Vec<ProductSales>> {
    let (shop_filter, id) = match scope {
        ProductScope::Kol(kol_id) => (
            "o.shop_id IN (SELECT shop_owner_id FROM shop_relationships WHERE parent_id = $1 AND is_active)",
            kol_id,
        ),
        ProductScope::Shop(shop_id) => ("o.shop_id = $1", shop_id),
    };

    let rows: Vec<ProductRow> = sqlx::query_as(&format!(
        r#"
        SELECT i.product_id,
               COALESCE(MAX(pr.name), MAX(i.product_name)) AS product_name,
               COALESCE(SUM(i.subtotal), 0)::BIGINT AS sales_amount,
               COALESCE(SUM(i.quantity), 0)::BIGINT AS quantity,
               COUNT(DISTINCT o.shop_id) AS shop_count
        FROM order_items i
        JOIN orders o ON o.id = i.order_id
        LEFT JOIN products pr ON pr.id = i.product_id
        WHERE {shop_filter}
          AND o.order_status <> 'cancelled'
          AND o.order_date >= $2 AND o.order_date < $3
        GROUP BY i.product_id
        "#
    ))
    .bind(id)
    .bind(month.start())
    .bind(month.end_exclusive())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ProductSales::from).collect())
}
