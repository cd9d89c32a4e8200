//! 角色检查中间件

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use futures::future::BoxFuture;

use super::auth::error_response;
use crate::auth::Claims;
use crate::models::UserRole;

/// 角色检查中间件工厂，管理员总是放行
///
/// ```ignore
/// .route("/api/products", post(create_product))
/// .route_layer(axum::middleware::from_fn(require_roles(&[UserRole::Admin])))
/// ```
pub fn require_roles(
    roles: &'static [UserRole],
) -> impl Fn(Request<Body>, Next) -> BoxFuture<'static, Response> + Clone + Send {
    move |request: Request<Body>, next: Next| Box::pin(check_roles(request, next, roles))
}

async fn check_roles(request: Request<Body>, next: Next, roles: &'static [UserRole]) -> Response {
    let role = match request.extensions().get::<Claims>() {
        Some(claims) => claims.role,
        None => return error_response(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "未认证"),
    };

    if role_allowed(role, roles) {
        next.run(request).await
    } else {
        error_response(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            &format!("角色 {} 无权访问该接口", role),
        )
    }
}

pub(crate) fn role_allowed(role: UserRole, allowed: &[UserRole]) -> bool {
    role == UserRole::Admin || allowed.contains(&role)
}
