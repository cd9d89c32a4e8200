//! 路由配置模块
//!
//! 定义所有 REST API 端点的路由映射。角色限制通过 `route_layer` 挂在各分组上，
//! 资源归属（本人/下级）由处理器自行校验。

use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};
use biofox_shared::observability::middleware as obs_middleware;

use crate::middleware::{auth_middleware, require_roles};
use crate::models::UserRole;
use crate::{handlers, state::AppState};

const ADMIN: &[UserRole] = &[UserRole::Admin];
const AFFILIATE: &[UserRole] = &[UserRole::Kol, UserRole::Ol];

/// 认证路由（login/register 为公开路径）
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/refresh", post(handlers::auth::refresh_token))
        .route("/auth/change-password", post(handlers::auth::change_password))
}

/// 账号审核（仅管理员）
fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/profiles", get(handlers::profiles::list_profiles))
        .route("/profiles/stats", get(handlers::profiles::profile_stats))
        .route("/profiles/bulk", post(handlers::profiles::bulk_action))
        .route("/profiles/{id}", get(handlers::profiles::get_profile))
        .route("/profiles/{id}", put(handlers::profiles::update_profile))
        .route("/profiles/{id}/approve", post(handlers::profiles::approve_profile))
        .route("/profiles/{id}/reject", post(handlers::profiles::reject_profile))
        .route_layer(middleware::from_fn(require_roles(ADMIN)))
}

fn shop_routes() -> Router<AppState> {
    let affiliate = Router::new()
        .route("/shops", get(handlers::shops::list_shops))
        .route_layer(middleware::from_fn(require_roles(AFFILIATE)));

    let admin = Router::new()
        .route("/shops", post(handlers::shops::create_shop))
        .route_layer(middleware::from_fn(require_roles(ADMIN)));

    Router::new()
        .route("/shops/{id}", get(handlers::shops::get_shop))
        .route("/shops/{id}", put(handlers::shops::update_shop))
        .merge(affiliate)
        .merge(admin)
}

fn relationship_routes() -> Router<AppState> {
    let admin = Router::new()
        .route("/relationships", post(handlers::relationships::create_relationship))
        .route("/relationships/tree", get(handlers::relationships::organization_tree))
        .route(
            "/relationships/history/{id}",
            get(handlers::relationships::relationship_history),
        )
        .route("/relationships/{id}/end", post(handlers::relationships::end_relationship))
        .route("/relationships/{id}/chain", get(handlers::relationships::parent_chain))
        .route_layer(middleware::from_fn(require_roles(ADMIN)));

    let affiliate = Router::new()
        .route(
            "/relationships/{id}/subordinates",
            get(handlers::relationships::list_subordinates),
        )
        .route_layer(middleware::from_fn(require_roles(AFFILIATE)));

    admin.merge(affiliate)
}

fn product_routes() -> Router<AppState> {
    let admin = Router::new()
        .route("/products", post(handlers::products::create_product))
        .route("/products/{id}", put(handlers::products::update_product))
        .route("/products/{id}", delete(handlers::products::delete_product))
        .route_layer(middleware::from_fn(require_roles(ADMIN)));

    Router::new()
        .route("/products", get(handlers::products::list_products))
        .route("/products/{id}", get(handlers::products::get_product))
        .merge(admin)
}

fn order_routes() -> Router<AppState> {
    let admin = Router::new()
        .route("/orders/bulk", post(handlers::orders::bulk_action))
        .route("/orders/{id}", delete(handlers::orders::delete_order))
        .route(
            "/orders/{id}/items/{item_id}",
            put(handlers::orders::update_order_item),
        )
        .route_layer(middleware::from_fn(require_roles(ADMIN)));

    Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/stats", get(handlers::orders::order_stats))
        .route("/orders/{id}", get(handlers::orders::get_order))
        .route("/orders/{id}", put(handlers::orders::update_order))
        .merge(admin)
}

fn device_sale_routes() -> Router<AppState> {
    let admin = Router::new()
        .route("/device-sales", post(handlers::device_sales::create_device_sale))
        .route("/device-sales/statistics", get(handlers::device_sales::device_statistics))
        .route(
            "/device-sales/accumulators/{kol_id}/recalculate",
            post(handlers::device_sales::recalculate_accumulator),
        )
        .route_layer(middleware::from_fn(require_roles(ADMIN)));

    let affiliate = Router::new()
        .route(
            "/device-sales/shops/{shop_id}/stats",
            get(handlers::device_sales::shop_device_stats),
        )
        .route(
            "/device-sales/shops/{shop_id}/history",
            get(handlers::device_sales::shop_allocation_history),
        )
        .route(
            "/device-sales/accumulators/{kol_id}",
            get(handlers::device_sales::get_accumulator),
        )
        .route("/device-sales/simulate", get(handlers::device_sales::simulate))
        .route_layer(middleware::from_fn(require_roles(AFFILIATE)));

    Router::new()
        .route("/device-sales", get(handlers::device_sales::list_device_sales))
        .route("/device-sales/{id}", get(handlers::device_sales::get_device_sale))
        .merge(admin)
        .merge(affiliate)
}

fn commission_routes() -> Router<AppState> {
    let admin = Router::new()
        .route("/commissions/calculate", post(handlers::commissions::calculate))
        .route("/commissions/summary", get(handlers::commissions::commission_summary))
        .route("/commissions/export", get(handlers::commissions::export_commissions))
        .route("/commissions/{id}", put(handlers::commissions::update_commission))
        .route_layer(middleware::from_fn(require_roles(ADMIN)));

    let affiliate = Router::new()
        .route("/commissions", get(handlers::commissions::list_commissions))
        .route("/commissions/me", get(handlers::commissions::my_commissions))
        .route("/commissions/{id}", get(handlers::commissions::get_commission))
        .route_layer(middleware::from_fn(require_roles(AFFILIATE)));

    admin.merge(affiliate)
}

/// 临床案例：店主管理自己的案例，管理员可管理全部
fn clinical_routes() -> Router<AppState> {
    Router::new()
        .route("/clinical/stats", get(handlers::clinical::clinical_stats))
        .route("/clinical/cases", get(handlers::clinical::list_cases))
        .route("/clinical/cases", post(handlers::clinical::create_case))
        .route("/clinical/cases/{id}", get(handlers::clinical::get_case))
        .route("/clinical/cases/{id}", put(handlers::clinical::update_case))
        .route("/clinical/cases/{id}", delete(handlers::clinical::delete_case))
        .route(
            "/clinical/cases/{id}/status",
            put(handlers::clinical::update_case_status),
        )
        .route("/clinical/cases/{id}/photos", get(handlers::clinical::list_photos))
        .route("/clinical/cases/{id}/photos", post(handlers::clinical::upload_photo))
        .route(
            "/clinical/cases/{id}/photos/{photo_id}",
            delete(handlers::clinical::delete_photo),
        )
        .route("/clinical/cases/{id}/consent", get(handlers::clinical::get_consent))
        .route("/clinical/cases/{id}/consent", put(handlers::clinical::save_consent))
        .route(
            "/clinical/cases/{id}/consent",
            delete(handlers::clinical::delete_consent),
        )
        .route_layer(middleware::from_fn(require_roles(&[UserRole::ShopOwner])))
}

fn notification_routes() -> Router<AppState> {
    let admin = Router::new()
        .route("/notifications", post(handlers::notifications::create_notification))
        .route_layer(middleware::from_fn(require_roles(ADMIN)));

    Router::new()
        .route("/notifications", get(handlers::notifications::list_notifications))
        .route(
            "/notifications/unread-count",
            get(handlers::notifications::unread_count),
        )
        .route("/notifications/stats", get(handlers::notifications::notification_stats))
        .route("/notifications/read-all", post(handlers::notifications::mark_all_read))
        .route("/notifications/{id}/read", post(handlers::notifications::mark_read))
        .route("/notifications/{id}/archive", post(handlers::notifications::archive))
        .route(
            "/notifications/{id}",
            delete(handlers::notifications::delete_notification),
        )
        .merge(admin)
}

fn log_routes() -> Router<AppState> {
    let admin = Router::new()
        .route("/audit-logs", get(handlers::audit_logs::list_audit_logs))
        .route_layer(middleware::from_fn(require_roles(ADMIN)));

    let affiliate = Router::new()
        .route("/sales-journals", post(handlers::sales_journals::upsert_journal))
        .route("/sales-journals", get(handlers::sales_journals::list_journals))
        .route("/sales-journals/stats", get(handlers::sales_journals::journal_stats))
        .route(
            "/sales-journals/{id}",
            delete(handlers::sales_journals::delete_journal),
        )
        .route_layer(middleware::from_fn(require_roles(AFFILIATE)));

    admin.merge(affiliate)
}

/// KOL 销售分析
fn sales_routes() -> Router<AppState> {
    Router::new()
        .route("/sales/shop-ranking", get(handlers::sales::shop_ranking))
        .route("/sales/monthly", get(handlers::sales::monthly_sales))
        .route("/sales/product-ratio", get(handlers::sales::product_ratio))
        .route(
            "/sales/shops/{id}/product-ratio",
            get(handlers::sales::shop_product_ratio),
        )
        .route_layer(middleware::from_fn(require_roles(AFFILIATE)))
}

fn dashboard_routes() -> Router<AppState> {
    Router::new()
        .route("/dashboard/admin", get(handlers::dashboard::admin_dashboard))
        .route("/dashboard/kol", get(handlers::dashboard::kol_dashboard))
        .route("/dashboard/shop", get(handlers::dashboard::shop_dashboard))
}

/// 组合所有 API 路由（挂载在 /api 下）
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(auth_routes())
        .merge(profile_routes())
        .merge(shop_routes())
        .merge(relationship_routes())
        .merge(product_routes())
        .merge(order_routes())
        .merge(device_sale_routes())
        .merge(commission_routes())
        .merge(clinical_routes())
        .merge(notification_routes())
        .merge(log_routes())
        .merge(sales_routes())
        .merge(dashboard_routes())
}

/// 构建完整应用：API、探针、认证与可观测性中间件
///
/// CORS、超时和压缩由二进制入口按部署配置追加。
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}
