//! 订单 HTTP 处理器
//!
//! 订单佣金在创建和修改时按费率即时计算，取消为软删除

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use biofox_shared::observability::metrics;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::CurrentUser;
use crate::domain::order_commission::{
    self, MAX_AMOUNT, MAX_ITEM_QUANTITY, OrderAmendment, OrderBulkAction, OrderState,
    commission_amount, ensure_creator_may_price, order_shop_rate, plan_amendment, price_item,
    resolve_rate, validate_amount, validate_rate,
};
use crate::dto::{
    ApiResponse, BulkActionResponse, DateRangeParams, PageResponse, PaginationParams,
    search_pattern,
};
use crate::error::{AdminError, Result};
use crate::models::{
    AuditAction, AuditLogEntry, CommissionStatus, NotificationPriority, NotificationType, Order,
    OrderItem, OrderStatus, ProfileStatus, ProfileSummary, UserRole,
};
use crate::service::{NewNotification, audit, dashboard_cache, notifier};
use crate::state::AppState;

const ORDER_COLUMNS: &str = "id, shop_id, order_date, order_number, total_amount, commission_rate, \
     commission_amount, commission_status, order_status, is_self_shop_order, notes, metadata, \
     created_by, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, order_id, product_id, product_name, quantity, unit_price, subtotal, \
     item_commission_rate, item_commission_amount, created_at, updated_at";

/// 自动生成订单号的重试次数
const ORDER_NUMBER_ATTEMPTS: usize = 3;

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    pub product_id: Option<Uuid>,
    #[validate(length(min = 1, max = 200))]
    pub product_name: Option<String>,
    #[validate(range(min = 1, max = MAX_ITEM_QUANTITY, message = "数量需在 1 到 100000 之间"))]
    pub quantity: i32,
    #[validate(range(min = 0, max = MAX_AMOUNT, message = "单价超出范围"))]
    pub unit_price: i64,
    pub item_commission_rate: Option<f64>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub shop_id: Uuid,
    pub order_date: NaiveDate,
    #[validate(length(min = 1, max = 50))]
    pub order_number: Option<String>,
    pub total_amount: i64,
    pub commission_rate: Option<f64>,
    pub order_status: Option<OrderStatus>,
    #[serde(default)]
    pub is_self_shop_order: bool,
    pub notes: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub items: Vec<OrderItemRequest>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilter {
    pub shop_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub commission_status: Option<CommissionStatus>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub shop: Option<ProfileSummary>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderRequest {
    pub order_status: Option<OrderStatus>,
    pub total_amount: Option<i64>,
    pub commission_rate: Option<f64>,
    pub notes: Option<String>,
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub recalculate_commission: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderQuery {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderBulkRequest {
    #[validate(length(min = 1, max = 100, message = "一次最多处理 100 个订单"))]
    pub order_ids: Vec<Uuid>,
    pub action: OrderBulkAction,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderItemRequest {
    #[validate(range(min = 1, max = MAX_ITEM_QUANTITY, message = "数量需在 1 到 100000 之间"))]
    pub quantity: Option<i32>,
    #[validate(range(min = 0, max = MAX_AMOUNT, message = "单价超出范围"))]
    pub unit_price: Option<i64>,
    pub item_commission_rate: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderItemResponse {
    pub item: OrderItem,
    pub order: Order,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStats {
    pub total_orders: i64,
    pub total_sales: i64,
    pub total_commission: i64,
    pub by_status: HashMap<String, i64>,
}

// ============================================
// API 处理器
// ============================================

/// 创建订单
///
/// POST /api/orders
pub async fn create_order(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<ApiResponse<OrderDetail>>> {
    req.validate()?;
    user.ensure_self_or_admin(req.shop_id)?;
    validate_amount(req.total_amount)?;
    if let Some(rate) = req.commission_rate {
        validate_rate(rate)?;
    }

    ensure_creator_may_price(
        user.is_admin(),
        req.commission_rate,
        req.order_status,
        req.items.iter().any(|i| i.item_commission_rate.is_some()),
    )?;

    let shop: Option<(UserRole, ProfileStatus, Option<f64>)> =
        sqlx::query_as("SELECT role, status, commission_rate FROM profiles WHERE id = $1")
            .bind(req.shop_id)
            .fetch_optional(&state.pool)
            .await?;
    let Some((shop_role, shop_status, profile_rate)) = shop else {
        return Err(AdminError::Forbidden("店铺不存在".to_string()));
    };
    if shop_status != ProfileStatus::Approved {
        return Err(AdminError::Forbidden("店铺尚未通过审核".to_string()));
    }
    let shop_rate = order_shop_rate(shop_role, req.is_self_shop_order, profile_rate)?;

    let rate = resolve_rate(req.commission_rate, shop_rate)?;

    let mut tx = state.pool.begin().await?;
    let order_number = allocate_order_number(&mut tx, req.order_number.as_deref(), req.order_date).await?;

    let order: Order = sqlx::query_as(&format!(
        r#"
        INSERT INTO orders (shop_id, order_date, order_number, total_amount, commission_rate,
            commission_amount, commission_status, order_status, is_self_shop_order, notes,
            metadata, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, 'calculated', $7, $8, $9, COALESCE($10, '{{}}'::jsonb), $11)
        RETURNING {ORDER_COLUMNS}
        "#
    ))
    .bind(req.shop_id)
    .bind(req.order_date)
    .bind(&order_number)
    .bind(req.total_amount)
    .bind(rate)
    .bind(commission_amount(req.total_amount, rate))
    .bind(req.order_status.unwrap_or_default())
    .bind(req.is_self_shop_order)
    .bind(&req.notes)
    .bind(&req.metadata)
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        AdminError::on_unique_violation(e, || AdminError::AlreadyExists(format!("订单号 {}", order_number)))
    })?;

    let mut items = Vec::with_capacity(req.items.len());
    for item in &req.items {
        items.push(insert_item(&mut tx, order.id, item, rate).await?);
    }

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("orders", order.id, AuditAction::Insert)
            .with_actor(user.id, user.role)
            .with_values(None, audit::snapshot(&order))
            .with_metadata(serde_json::json!({ "items": items.len() })),
    )
    .await?;

    if user.is_admin() {
        notifier::send(
            &mut *tx,
            &NewNotification::new(
                order.shop_id,
                NotificationType::OrderCreated,
                "새 주문 등록",
                format!(
                    "주문 {}이(가) 등록되었습니다. 금액: {}원",
                    order.order_number, order.total_amount
                ),
            )
            .related("order", order.id)
            .action_url(format!("/orders/{}", order.id)),
        )
        .await?;
    }

    tx.commit().await?;
    dashboard_cache::invalidate(&state.cache).await;
    metrics::record_order_created(order.is_self_shop_order);

    info!(
        order_id = %order.id,
        order_number = %order.order_number,
        shop_id = %order.shop_id,
        total = order.total_amount,
        "Order created"
    );

    let shop = fetch_shop_summary(&state, order.shop_id).await?;
    Ok(Json(ApiResponse::success(OrderDetail { order, items, shop })))
}

/// 订单列表
///
/// GET /api/orders
pub async fn list_orders(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(pagination): Query<PaginationParams>,
    Query(range): Query<DateRangeParams>,
    Query(filter): Query<OrderFilter>,
) -> Result<Json<ApiResponse<PageResponse<Order>>>> {
    range.validate()?;
    let search = search_pattern(filter.search.as_deref())?;
    let shop_id = user.scope(filter.shop_id);

    let where_clause = r#"
        ($1::uuid IS NULL OR shop_id = $1)
        AND ($2::varchar IS NULL OR order_status = $2)
        AND ($3::varchar IS NULL OR commission_status = $3)
        AND ($4::date IS NULL OR order_date >= $4)
        AND ($5::date IS NULL OR order_date <= $5)
        AND ($6::text IS NULL OR order_number ILIKE $6)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM orders WHERE {where_clause}"))
        .bind(shop_id)
        .bind(filter.status)
        .bind(filter.commission_status)
        .bind(range.from)
        .bind(range.to)
        .bind(&search)
        .fetch_one(&state.pool)
        .await?;

    let items: Vec<Order> = sqlx::query_as(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE {where_clause} \
         ORDER BY order_date DESC, created_at DESC LIMIT $7 OFFSET $8"
    ))
    .bind(shop_id)
    .bind(filter.status)
    .bind(filter.commission_status)
    .bind(range.from)
    .bind(range.to)
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

/// 订单详情
///
/// GET /api/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderDetail>>> {
    let order = fetch_order(&state.pool, id).await?;
    user.ensure_self_or_admin(order.shop_id)?;

    let items: Vec<OrderItem> = sqlx::query_as(&format!(
        "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY created_at"
    ))
    .bind(id)
    .fetch_all(&state.pool)
    .await?;

    let shop = fetch_shop_summary(&state, order.shop_id).await?;
    Ok(Json(ApiResponse::success(OrderDetail { order, items, shop })))
}

/// 修改订单
///
/// 店主只能修改自己订单的备注与扩展信息；金额、费率、状态与重算由管理员操作。
///
/// PUT /api/orders/{id}
pub async fn update_order(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateOrderRequest>,
) -> Result<Json<ApiResponse<Order>>> {
    let amendment = OrderAmendment {
        order_status: req.order_status,
        total_amount: req.total_amount,
        commission_rate: req.commission_rate,
        recalculate: req.recalculate_commission,
    };

    let mut tx = state.pool.begin().await?;
    let before = lock_order(&mut tx, id).await?;
    user.ensure_self_or_admin(before.shop_id)?;

    let plan = plan_amendment(
        user.is_admin(),
        OrderState {
            order_status: before.order_status,
            commission_status: before.commission_status,
        },
        before.total_amount,
        before.commission_rate,
        &amendment,
    )?;
    let (total_amount, rate, recalculate, completing) =
        (plan.total_amount, plan.rate, plan.recalculate, plan.completing);

    let (commission, commission_status) = if recalculate || completing {
        (commission_amount(total_amount, rate), CommissionStatus::Calculated)
    } else {
        (before.commission_amount, before.commission_status)
    };

    let after: Order = sqlx::query_as(&format!(
        r#"
        UPDATE orders SET
            order_status = COALESCE($2, order_status),
            total_amount = $3,
            commission_rate = $4,
            commission_amount = $5,
            commission_status = $6,
            notes = COALESCE($7, notes),
            metadata = metadata || COALESCE($8, '{{}}'::jsonb),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {ORDER_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(req.order_status)
    .bind(total_amount)
    .bind(rate)
    .bind(commission)
    .bind(commission_status)
    .bind(&req.notes)
    .bind(&req.metadata)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("orders", id, AuditAction::Update)
            .with_actor(user.id, user.role)
            .with_values(audit::snapshot(&before), audit::snapshot(&after)),
    )
    .await?;

    if completing {
        notifier::send(
            &mut *tx,
            &NewNotification::new(
                after.shop_id,
                NotificationType::StatusChanged,
                "주문 완료",
                format!("주문 {}이(가) 완료 처리되었습니다.", after.order_number),
            )
            .related("order", id),
        )
        .await?;
    }

    tx.commit().await?;
    dashboard_cache::invalidate(&state.cache).await;

    info!(order_id = %id, recalculated = recalculate, "Order updated");
    Ok(Json(ApiResponse::success(after)))
}

/// 取消订单（软删除）
///
/// DELETE /api/orders/{id}
pub async fn delete_order(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Query(query): Query<CancelOrderQuery>,
) -> Result<Json<ApiResponse<Order>>> {
    let mut tx = state.pool.begin().await?;
    let before = lock_order(&mut tx, id).await?;
    let after = cancel_order(&mut tx, &user, &before, query.reason.as_deref()).await?;
    tx.commit().await?;

    dashboard_cache::invalidate(&state.cache).await;
    info!(order_id = %id, "Order cancelled");
    Ok(Json(ApiResponse::success(after)))
}

/// 批量操作
///
/// POST /api/orders/bulk
pub async fn bulk_action(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<OrderBulkRequest>,
) -> Result<Json<ApiResponse<BulkActionResponse>>> {
    req.validate()?;

    let mut result = BulkActionResponse::default();
    for id in &req.order_ids {
        match apply_bulk(&state, &user, *id, req.action, req.reason.as_deref()).await {
            Ok(()) => result.record_ok(*id),
            Err(e) => {
                warn!(order_id = %id, error = %e, "Bulk order action failed");
                result.record_err(*id, &e)
            }
        }
    }

    dashboard_cache::invalidate(&state.cache).await;
    info!(
        action = ?req.action,
        processed = result.processed,
        failed = result.failed,
        "Order bulk action finished"
    );
    Ok(Json(ApiResponse::success(result.finish())))
}

async fn apply_bulk(
    state: &AppState,
    user: &CurrentUser,
    id: Uuid,
    action: OrderBulkAction,
    reason: Option<&str>,
) -> Result<()> {
    let mut tx = state.pool.begin().await?;
    let before = lock_order(&mut tx, id).await?;

    if action == OrderBulkAction::Cancel {
        cancel_order(&mut tx, user, &before, reason).await?;
        tx.commit().await?;
        return Ok(());
    }

    let next = OrderState {
        order_status: before.order_status,
        commission_status: before.commission_status,
    }
    .apply(action)?;

    let after: Order = sqlx::query_as(&format!(
        r#"
        UPDATE orders SET order_status = $2, commission_status = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING {ORDER_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(next.order_status)
    .bind(next.commission_status)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("orders", id, AuditAction::Update)
            .with_actor(user.id, user.role)
            .with_values(audit::snapshot(&before), audit::snapshot(&after))
            .with_metadata(serde_json::json!({ "bulk_action": action, "reason": reason })),
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

/// 修改订单明细并重算订单合计（管理员）
///
/// PUT /api/orders/{id}/items/{item_id}
pub async fn update_order_item(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((order_id, item_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateOrderItemRequest>,
) -> Result<Json<ApiResponse<UpdateOrderItemResponse>>> {
    req.validate()?;

    let mut tx = state.pool.begin().await?;
    let order = lock_order(&mut tx, order_id).await?;
    OrderState {
        order_status: order.order_status,
        commission_status: order.commission_status,
    }
    .ensure_recalculable()?;

    let before: OrderItem = sqlx::query_as(&format!(
        "SELECT {ITEM_COLUMNS} FROM order_items WHERE id = $1 AND order_id = $2 FOR UPDATE"
    ))
    .bind(item_id)
    .bind(order_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AdminError::OrderItemNotFound(item_id))?;

    let pricing = price_item(
        req.quantity.unwrap_or(before.quantity),
        req.unit_price.unwrap_or(before.unit_price),
        req.item_commission_rate.or(Some(before.item_commission_rate)),
        order.commission_rate,
    )?;

    let item: OrderItem = sqlx::query_as(&format!(
        r#"
        UPDATE order_items SET
            quantity = $2, unit_price = $3, subtotal = $4,
            item_commission_rate = $5, item_commission_amount = $6, updated_at = NOW()
        WHERE id = $1
        RETURNING {ITEM_COLUMNS}
        "#
    ))
    .bind(item_id)
    .bind(req.quantity.unwrap_or(before.quantity))
    .bind(req.unit_price.unwrap_or(before.unit_price))
    .bind(pricing.subtotal)
    .bind(pricing.rate)
    .bind(pricing.commission)
    .fetch_one(&mut *tx)
    .await?;

    let order: Order = sqlx::query_as(&format!(
        r#"
        UPDATE orders o SET
            total_amount = t.total,
            commission_amount = t.commission,
            commission_status = 'calculated',
            updated_at = NOW()
        FROM (
            SELECT COALESCE(SUM(subtotal), 0)::BIGINT AS total,
                   COALESCE(SUM(item_commission_amount), 0)::BIGINT AS commission
            FROM order_items WHERE order_id = $1
        ) t
        WHERE o.id = $1
        RETURNING {}
        "#,
        prefixed_order_columns("o")
    ))
    .bind(order_id)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("order_items", item_id, AuditAction::Update)
            .with_actor(user.id, user.role)
            .with_values(audit::snapshot(&before), audit::snapshot(&item))
            .with_metadata(serde_json::json!({ "order_id": order_id })),
    )
    .await?;
    tx.commit().await?;

    dashboard_cache::invalidate(&state.cache).await;
    info!(order_id = %order_id, item_id = %item_id, "Order item updated");
    Ok(Json(ApiResponse::success(UpdateOrderItemResponse { item, order })))
}

/// 订单统计（店主仅统计自己的订单）
///
/// GET /api/orders/stats
pub async fn order_stats(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(range): Query<DateRangeParams>,
) -> Result<Json<ApiResponse<OrderStats>>> {
    range.validate()?;
    let shop_id = user.scope(None);

    let (total_orders, total_sales, total_commission): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COALESCE(SUM(total_amount) FILTER (WHERE order_status <> 'cancelled'), 0)::BIGINT,
               COALESCE(SUM(commission_amount) FILTER (WHERE order_status <> 'cancelled'), 0)::BIGINT
        FROM orders
        WHERE ($1::uuid IS NULL OR shop_id = $1)
          AND ($2::date IS NULL OR order_date >= $2)
          AND ($3::date IS NULL OR order_date <= $3)
        "#,
    )
    .bind(shop_id)
    .bind(range.from)
    .bind(range.to)
    .fetch_one(&state.pool)
    .await?;

    let by_status: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT order_status, COUNT(*) FROM orders
        WHERE ($1::uuid IS NULL OR shop_id = $1)
          AND ($2::date IS NULL OR order_date >= $2)
          AND ($3::date IS NULL OR order_date <= $3)
        GROUP BY order_status
        "#,
    )
    .bind(shop_id)
    .bind(range.from)
    .bind(range.to)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(OrderStats {
        total_orders,
        total_sales,
        total_commission,
        by_status: by_status.into_iter().collect(),
    })))
}

// ============================================
// 辅助函数
// ============================================

/// 软取消：订单与佣金状态置为 cancelled，明细佣金清零并通知店铺
async fn cancel_order(
    conn: &mut PgConnection,
    user: &CurrentUser,
    before: &Order,
    reason: Option<&str>,
) -> Result<Order> {
    OrderState {
        order_status: before.order_status,
        commission_status: before.commission_status,
    }
    .apply(OrderBulkAction::Cancel)?;

    let metadata = serde_json::json!({
        "cancelled_at": Utc::now(),
        "cancelled_by": user.id,
        "cancel_reason": reason,
    });

    let after: Order = sqlx::query_as(&format!(
        r#"
        UPDATE orders SET
            order_status = 'cancelled',
            commission_status = 'cancelled',
            metadata = metadata || $2,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {ORDER_COLUMNS}
        "#
    ))
    .bind(before.id)
    .bind(&metadata)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query(
        "UPDATE order_items SET item_commission_amount = 0, updated_at = NOW() WHERE order_id = $1",
    )
    .bind(before.id)
    .execute(&mut *conn)
    .await?;

    audit::record(
        &mut *conn,
        &AuditLogEntry::new("orders", before.id, AuditAction::Delete)
            .with_actor(user.id, user.role)
            .with_values(audit::snapshot(before), audit::snapshot(&after))
            .with_metadata(serde_json::json!({ "soft_delete": true, "reason": reason })),
    )
    .await?;

    let message = match reason {
        Some(reason) => format!("주문 {}이(가) 취소되었습니다. 사유: {}", after.order_number, reason),
        None => format!("주문 {}이(가) 취소되었습니다.", after.order_number),
    };
    notifier::send(
        &mut *conn,
        &NewNotification::new(after.shop_id, NotificationType::StatusChanged, "주문 취소", message)
            .related("order", after.id)
            .priority(NotificationPriority::High),
    )
    .await?;

    Ok(after)
}

/// 确定订单号：指定的需唯一，自动生成的在冲突时重试
async fn allocate_order_number(
    conn: &mut PgConnection,
    requested: Option<&str>,
    order_date: NaiveDate,
) -> Result<String> {
    if let Some(number) = requested {
        let number = number.trim();
        if order_number_taken(conn, number).await? {
            return Err(AdminError::AlreadyExists(format!("订单号 {}", number)));
        }
        return Ok(number.to_string());
    }

    for _ in 0..ORDER_NUMBER_ATTEMPTS {
        let candidate = order_commission::generate_order_number(order_date, &mut rand::rng());
        if !order_number_taken(conn, &candidate).await? {
            return Ok(candidate);
        }
        warn!(order_number = %candidate, "Generated order number collided, retrying");
    }
    Err(AdminError::Internal("订单号生成失败，请重试".to_string()))
}

async fn order_number_taken(conn: &mut PgConnection, number: &str) -> Result<bool> {
    let taken = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE order_number = $1)")
        .bind(number)
        .fetch_one(&mut *conn)
        .await?;
    Ok(taken)
}

async fn insert_item(
    conn: &mut PgConnection,
    order_id: Uuid,
    item: &OrderItemRequest,
    order_rate: f64,
) -> Result<OrderItem> {
    let pricing = price_item(item.quantity, item.unit_price, item.item_commission_rate, order_rate)?;

    let product_name = match (&item.product_name, item.product_id) {
        (Some(name), _) => name.trim().to_string(),
        (None, Some(product_id)) => sqlx::query_scalar("SELECT name FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(AdminError::ProductNotFound(product_id))?,
        (None, None) => {
            return Err(AdminError::Validation(
                "明细需提供 productId 或 productName".to_string(),
            ));
        }
    };

    let row = sqlx::query_as(&format!(
        r#"
        INSERT INTO order_items (order_id, product_id, product_name, quantity, unit_price,
            subtotal, item_commission_rate, item_commission_amount)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {ITEM_COLUMNS}
        "#
    ))
    .bind(order_id)
    .bind(item.product_id)
    .bind(product_name)
    .bind(item.quantity)
    .bind(item.unit_price)
    .bind(pricing.subtotal)
    .bind(pricing.rate)
    .bind(pricing.commission)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

pub(crate) async fn fetch_order<'e, E>(executor: E, id: Uuid) -> Result<Order>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, Order>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or(AdminError::OrderNotFound(id))
}

async fn lock_order(conn: &mut PgConnection, id: Uuid) -> Result<Order> {
    sqlx::query_as::<_, Order>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(AdminError::OrderNotFound(id))
}

async fn fetch_shop_summary(state: &AppState, shop_id: Uuid) -> Result<Option<ProfileSummary>> {
    let shop = sqlx::query_as("SELECT id, name, email, role, shop_name FROM profiles WHERE id = $1")
        .bind(shop_id)
        .fetch_optional(&state.pool)
        .await?;
    Ok(shop)
}

fn prefixed_order_columns(alias: &str) -> String {
    ORDER_COLUMNS
        .split(',')
        .map(|c| format!("{}.{}", alias, c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_columns() {
        let cols = prefixed_order_columns("o");
        assert!(cols.starts_with("o.id, o.shop_id"));
        assert!(cols.ends_with("o.updated_at"));
        assert_eq!(cols.matches("o.").count(), ORDER_COLUMNS.split(',').count());
    }

    #[test]
    fn test_create_request_defaults() {
        let req: CreateOrderRequest = serde_json::from_value(serde_json::json!({
            "shopId": Uuid::nil(),
            "orderDate": "2026-03-09",
            "totalAmount": 150000,
            "items": [{ "productName": "앰플", "quantity": 3, "unitPrice": 50000 }],
        }))
        .unwrap();
        assert!(req.validate().is_ok());
        assert!(!req.is_self_shop_order);
        assert!(req.order_status.is_none());
        assert_eq!(req.items.len(), 1);
    }

    #[test]
    fn test_item_quantity_validated() {
        let req: CreateOrderRequest = serde_json::from_value(serde_json::json!({
            "shopId": Uuid::nil(),
            "orderDate": "2026-03-09",
            "totalAmount": 0,
            "items": [{ "productName": "앰플", "quantity": 0, "unitPrice": 50000 }],
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_bulk_action_parse() {
        let req: OrderBulkRequest = serde_json::from_value(serde_json::json!({
            "orderIds": [Uuid::nil()],
            "action": "approve_commission",
        }))
        .unwrap();
        assert_eq!(req.action, OrderBulkAction::ApproveCommission);
    }
}
