//! JWT 认证中间件
//!
//! 验证请求中的 Bearer Token 并将 Claims 注入请求扩展

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde_json::json;

use crate::models::{ProfileStatus, UserRole};
use crate::state::AppState;

/// 无需认证的路径
pub const PUBLIC_PATHS: [&str; 4] = ["/api/auth/login", "/api/auth/register", "/health", "/ready"];

/// 未审核账号仍可访问的路径
const UNAPPROVED_ALLOWED: [&str; 1] = ["/api/auth/me"];

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();

    if PUBLIC_PATHS.iter().any(|p| path == *p) {
        return next.run(request).await;
    }

    let token = match request.headers().typed_get::<Authorization<Bearer>>() {
        Some(Authorization(bearer)) => bearer.token().to_string(),
        None => return error_response(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "缺少认证 Token"),
    };

    let claims = match state.jwt_manager.verify_token(&token) {
        Ok(claims) => claims,
        Err(e) => return error_response(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", &e.to_string()),
    };

    // 管理员不受审核状态限制
    if claims.role != UserRole::Admin
        && claims.status != ProfileStatus::Approved
        && !UNAPPROVED_ALLOWED.contains(&path)
    {
        return error_response(
            StatusCode::FORBIDDEN,
            "ACCOUNT_NOT_APPROVED",
            "账号尚未通过审核",
        );
    }

    request.extensions_mut().insert(claims);
    next.run(request).await
}

pub(super) fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = json!({
        "success": false,
        "code": code,
        "message": message,
        "data": null
    });

    (status, axum::Json(body)).into_response()
}
