//! 商品管理 HTTP 处理器

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::auth::CurrentUser;
use crate::domain::order_commission::{validate_amount, validate_rate};
use crate::dto::{ApiResponse, PageResponse, PaginationParams, search_pattern};
use crate::error::{AdminError, Result};
use crate::models::{AuditAction, AuditLogEntry, Product, ProductCategory};
use crate::service::audit;
use crate::state::AppState;

const PRODUCT_COLUMNS: &str = "id, name, code, category, price, is_active, description, \
     default_commission_rate, min_commission_rate, max_commission_rate, created_at, updated_at";

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductFilter {
    pub category: Option<ProductCategory>,
    pub is_active: Option<bool>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 200, message = "商品名长度必须在 1-200 之间"))]
    pub name: String,
    #[validate(length(max = 50))]
    pub code: Option<String>,
    pub category: ProductCategory,
    pub price: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub description: Option<String>,
    pub default_commission_rate: Option<f64>,
    pub min_commission_rate: Option<f64>,
    pub max_commission_rate: Option<f64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 50))]
    pub code: Option<String>,
    pub category: Option<ProductCategory>,
    pub price: Option<i64>,
    pub is_active: Option<bool>,
    pub description: Option<String>,
    pub default_commission_rate: Option<f64>,
    pub min_commission_rate: Option<f64>,
    pub max_commission_rate: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteProductResponse {
    pub deleted: bool,
    /// 被订单引用时只停用
    pub deactivated: bool,
}

/// 商品费率区间
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateBounds {
    pub default: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl RateBounds {
    /// 每个费率在 [0, 1]，且 min <= default <= max（已给出的部分）
    pub fn validate(&self) -> Result<()> {
        for rate in [self.default, self.min, self.max].into_iter().flatten() {
            validate_rate(rate)?;
        }

        let ordered = |lo: Option<f64>, hi: Option<f64>| match (lo, hi) {
            (Some(lo), Some(hi)) => lo <= hi,
            _ => true,
        };
        if !ordered(self.min, self.default)
            || !ordered(self.default, self.max)
            || !ordered(self.min, self.max)
        {
            return Err(AdminError::Validation(
                "佣金费率需满足 min <= default <= max".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================
// API 处理器
// ============================================

/// 商品列表
///
/// GET /api/products
pub async fn list_products(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<ProductFilter>,
) -> Result<Json<ApiResponse<PageResponse<Product>>>> {
    let search = search_pattern(filter.search.as_deref())?;
    let where_clause = r#"
        ($1::varchar IS NULL OR category = $1)
        AND ($2::boolean IS NULL OR is_active = $2)
        AND ($3::text IS NULL OR name ILIKE $3 OR code ILIKE $3)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM products WHERE {where_clause}"))
        .bind(filter.category)
        .bind(filter.is_active)
        .bind(&search)
        .fetch_one(&state.pool)
        .await?;

    let items: Vec<Product> = sqlx::query_as(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE {where_clause} \
         ORDER BY created_at DESC LIMIT $4 OFFSET $5"
    ))
    .bind(filter.category)
    .bind(filter.is_active)
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

/// 商品详情
///
/// GET /api/products/{id}
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Product>>> {
    Ok(Json(ApiResponse::success(fetch_product(&state, id).await?)))
}

/// 创建商品
///
/// POST /api/products
pub async fn create_product(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateProductRequest>,
) -> Result<Json<ApiResponse<Product>>> {
    req.validate()?;
    validate_amount(req.price)?;
    RateBounds {
        default: req.default_commission_rate,
        min: req.min_commission_rate,
        max: req.max_commission_rate,
    }
    .validate()?;
    ensure_code_available(&state, req.code.as_deref(), None).await?;

    let mut tx = state.pool.begin().await?;
    let product: Product = sqlx::query_as(&format!(
        r#"
        INSERT INTO products (name, code, category, price, is_active, description,
            default_commission_rate, min_commission_rate, max_commission_rate)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {PRODUCT_COLUMNS}
        "#
    ))
    .bind(req.name.trim())
    .bind(&req.code)
    .bind(req.category)
    .bind(req.price)
    .bind(req.is_active)
    .bind(&req.description)
    .bind(req.default_commission_rate)
    .bind(req.min_commission_rate)
    .bind(req.max_commission_rate)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("products", product.id, AuditAction::Insert)
            .with_actor(user.id, user.role)
            .with_values(None, audit::snapshot(&product)),
    )
    .await?;
    tx.commit().await?;

    info!(product_id = %product.id, name = %product.name, "Product created");
    Ok(Json(ApiResponse::success(product)))
}

/// 修改商品
///
/// PUT /api/products/{id}
pub async fn update_product(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateProductRequest>,
) -> Result<Json<ApiResponse<Product>>> {
    req.validate()?;
    if let Some(price) = req.price {
        validate_amount(price)?;
    }

    let before = fetch_product(&state, id).await?;
    // 与现有值合并后再校验区间
    RateBounds {
        default: req.default_commission_rate.or(before.default_commission_rate),
        min: req.min_commission_rate.or(before.min_commission_rate),
        max: req.max_commission_rate.or(before.max_commission_rate),
    }
    .validate()?;
    ensure_code_available(&state, req.code.as_deref(), Some(id)).await?;

    let mut tx = state.pool.begin().await?;
    let after: Product = sqlx::query_as(&format!(
        r#"
        UPDATE products SET
            name = COALESCE($2, name),
            code = COALESCE($3, code),
            category = COALESCE($4, category),
            price = COALESCE($5, price),
            is_active = COALESCE($6, is_active),
            description = COALESCE($7, description),
            default_commission_rate = COALESCE($8, default_commission_rate),
            min_commission_rate = COALESCE($9, min_commission_rate),
            max_commission_rate = COALESCE($10, max_commission_rate),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {PRODUCT_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(req.name.as_deref().map(str::trim))
    .bind(&req.code)
    .bind(req.category)
    .bind(req.price)
    .bind(req.is_active)
    .bind(&req.description)
    .bind(req.default_commission_rate)
    .bind(req.min_commission_rate)
    .bind(req.max_commission_rate)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("products", id, AuditAction::Update)
            .with_actor(user.id, user.role)
            .with_values(audit::snapshot(&before), audit::snapshot(&after)),
    )
    .await?;
    tx.commit().await?;

    info!(product_id = %id, "Product updated");
    Ok(Json(ApiResponse::success(after)))
}

/// 删除商品；已被订单引用的商品改为停用
///
/// DELETE /api/products/{id}
pub async fn delete_product(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DeleteProductResponse>>> {
    let before = fetch_product(&state, id).await?;

    let mut tx = state.pool.begin().await?;
    let referenced: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM order_items WHERE product_id = $1)")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

    let response = if referenced {
        sqlx::query("UPDATE products SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        audit::record(
            &mut *tx,
            &AuditLogEntry::new("products", id, AuditAction::Update)
                .with_actor(user.id, user.role)
                .with_values(
                    audit::snapshot(&before),
                    Some(serde_json::json!({ "is_active": false })),
                )
                .with_metadata(serde_json::json!({ "reason": "referenced_by_orders" })),
        )
        .await?;
        DeleteProductResponse {
            deleted: false,
            deactivated: true,
        }
    } else {
        sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        audit::record(
            &mut *tx,
            &AuditLogEntry::new("products", id, AuditAction::Delete)
                .with_actor(user.id, user.role)
                .with_values(audit::snapshot(&before), None),
        )
        .await?;
        DeleteProductResponse {
            deleted: true,
            deactivated: false,
        }
    };
    tx.commit().await?;

    info!(product_id = %id, deactivated = response.deactivated, "Product removed");
    Ok(Json(ApiResponse::success(response)))
}

async fn fetch_product(state: &AppState, id: Uuid) -> Result<Product> {
    sqlx::query_as::<_, Product>(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AdminError::ProductNotFound(id))
}

async fn ensure_code_available(state: &AppState, code: Option<&str>, exclude: Option<Uuid>) -> Result<()> {
    let Some(code) = code else {
        return Ok(());
    };
    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM products WHERE code = $1 AND ($2::uuid IS NULL OR id <> $2))",
    )
    .bind(code)
    .bind(exclude)
    .fetch_one(&state.pool)
    .await?;
    if taken {
        return Err(AdminError::AlreadyExists(format!("商品编码 {}", code)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_bounds_ordering() {
        let ok = RateBounds {
            default: Some(0.1),
            min: Some(0.05),
            max: Some(0.2),
        };
        assert!(ok.validate().is_ok());

        let bad = RateBounds {
            default: Some(0.3),
            min: Some(0.05),
            max: Some(0.2),
        };
        assert!(matches!(bad.validate(), Err(AdminError::Validation(_))));

        // 只给出部分值时只比较已给出的部分
        let partial = RateBounds {
            default: None,
            min: Some(0.5),
            max: Some(0.4),
        };
        assert!(partial.validate().is_err());
        assert!(RateBounds::default().validate().is_ok());
    }

    #[test]
    fn test_rate_bounds_range() {
        let bad = RateBounds {
            default: Some(1.5),
            ..Default::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(AdminError::InvalidCommissionRate(_))
        ));
    }

    #[test]
    fn test_create_request_defaults_active() {
        let req: CreateProductRequest = serde_json::from_value(serde_json::json!({
            "name": "마이크로젯 앰플",
            "category": "skincare",
            "price": 55000,
        }))
        .unwrap();
        assert!(req.is_active);
        assert_eq!(req.category, ProductCategory::Skincare);
    }
}
