//! 认证相关的 HTTP 处理器
//!
//! 登录、注册、当前用户、刷新 Token、修改密码

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{
    CurrentUser, hash_password, login_limit, validate_password_strength, verify_password,
};
use crate::dto::ApiResponse;
use crate::error::{AdminError, Result};
use crate::models::{NotificationType, PROFILE_COLUMNS, Profile, ProfileStatus, UserRole};
use crate::service::{NewNotification, dashboard_cache, notifier};
use crate::state::AppState;

use super::profiles::fetch_profile;

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(email(message = "邮箱格式不正确"))]
    pub email: String,
    #[validate(length(min = 1, max = 100, message = "密码长度必须在 1-100 之间"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: i64,
    pub user: Profile,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(email(message = "邮箱格式不正确"))]
    pub email: String,
    #[validate(length(min = 8, max = 100, message = "密码长度必须在 8-100 之间"))]
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "姓名长度必须在 1-100 之间"))]
    pub name: String,
    pub role: UserRole,
    #[validate(length(max = 200, message = "店铺名称最长 200 字符"))]
    pub shop_name: Option<String>,
    pub region: Option<String>,
    pub naver_place_link: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub token: String,
    pub expires_at: i64,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, max = 100))]
    pub current_password: String,
    #[validate(length(min = 8, max = 100, message = "密码长度必须在 8-100 之间"))]
    pub new_password: String,
}

#[derive(Debug, FromRow)]
struct CredentialRow {
    id: Uuid,
    password_hash: Option<String>,
}

// ============================================
// API 处理器
// ============================================

/// 登录
///
/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>> {
    req.validate()?;
    login_limit::ensure_not_locked(&state, &req.email).await?;

    let credential: Option<CredentialRow> = sqlx::query_as(
        "SELECT id, password_hash FROM profiles WHERE lower(email) = lower($1)",
    )
    .bind(req.email.trim())
    .fetch_optional(&state.pool)
    .await?;

    let verified = match &credential {
        Some(CredentialRow {
            password_hash: Some(hash),
            ..
        }) => verify_password(&req.password, hash)?,
        _ => false,
    };

    let Some(credential) = credential.filter(|_| verified) else {
        login_limit::record_failure(&state, &req.email).await;
        warn!(email = %req.email, "Login failed");
        return Err(AdminError::InvalidCredentials);
    };

    let profile = fetch_profile(&state.pool, credential.id).await?;
    if profile.role != UserRole::Admin && profile.status != ProfileStatus::Approved {
        return Err(AdminError::AccountNotApproved);
    }

    login_limit::reset(&state.cache, &req.email).await;

    let (token, expires_at) = state.jwt_manager.generate_token(
        profile.id,
        &profile.email,
        &profile.name,
        profile.role,
        profile.status,
    )?;

    info!(user_id = %profile.id, role = %profile.role, "User logged in");

    Ok(Json(ApiResponse::success(LoginResponse {
        token,
        expires_at,
        user: profile,
    })))
}

/// 注册（待审核）
///
/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<ApiResponse<Profile>>> {
    req.validate()?;
    validate_password_strength(&req.password)?;

    if req.role == UserRole::Admin {
        return Err(AdminError::Forbidden("不能注册管理员账号".to_string()));
    }

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM profiles WHERE lower(email) = lower($1))")
            .bind(req.email.trim())
            .fetch_one(&state.pool)
            .await?;
    if exists {
        return Err(AdminError::AlreadyExists(format!("邮箱 {}", req.email)));
    }

    let password_hash = hash_password(&req.password)?;

    let profile: Profile = sqlx::query_as(&format!(
        r#"
        INSERT INTO profiles (email, password_hash, name, role, status, shop_name, region, naver_place_link)
        VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7)
        RETURNING {PROFILE_COLUMNS}
        "#
    ))
    .bind(req.email.trim())
    .bind(&password_hash)
    .bind(req.name.trim())
    .bind(req.role)
    .bind(req.shop_name.as_deref().map(str::trim).unwrap_or_default())
    .bind(&req.region)
    .bind(&req.naver_place_link)
    .fetch_one(&state.pool)
    .await?;

    notify_admins_of_signup(&state, &profile).await;
    dashboard_cache::invalidate(&state.cache).await;

    info!(user_id = %profile.id, role = %profile.role, "Profile registered, awaiting approval");

    Ok(Json(ApiResponse::success_with_message(
        profile,
        "注册成功，请等待管理员审核",
    )))
}

/// 当前用户
///
/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<Profile>>> {
    let profile = fetch_profile(&state.pool, user.id).await?;
    Ok(Json(ApiResponse::success(profile)))
}

/// 刷新 Token，角色与状态以数据库为准
///
/// POST /api/auth/refresh
pub async fn refresh_token(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<RefreshResponse>>> {
    let profile = fetch_profile(&state.pool, user.id).await?;
    let (token, expires_at) = state.jwt_manager.generate_token(
        profile.id,
        &profile.email,
        &profile.name,
        profile.role,
        profile.status,
    )?;

    Ok(Json(ApiResponse::success(RefreshResponse {
        token,
        expires_at,
    })))
}

/// 修改密码
///
/// POST /api/auth/change-password
pub async fn change_password(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<()>>> {
    req.validate()?;
    validate_password_strength(&req.new_password)?;

    let current_hash: Option<String> =
        sqlx::query_scalar("SELECT password_hash FROM profiles WHERE id = $1")
            .bind(user.id)
            .fetch_optional(&state.pool)
            .await?
            .ok_or(AdminError::ProfileNotFound(user.id))?;

    let valid = match current_hash {
        Some(hash) => verify_password(&req.current_password, &hash)?,
        None => false,
    };
    if !valid {
        return Err(AdminError::InvalidCredentials);
    }

    let new_hash = hash_password(&req.new_password)?;
    sqlx::query("UPDATE profiles SET password_hash = $1, updated_at = NOW() WHERE id = $2")
        .bind(&new_hash)
        .bind(user.id)
        .execute(&state.pool)
        .await?;

    info!(user_id = %user.id, "Password changed");
    Ok(Json(ApiResponse::<()>::success_empty()))
}

/// 新注册待审核时通知全部管理员，失败不影响注册
async fn notify_admins_of_signup(state: &AppState, profile: &Profile) {
    let admins: Vec<Uuid> = match sqlx::query_scalar(
        "SELECT id FROM profiles WHERE role = 'admin' AND status = 'approved'",
    )
    .fetch_all(&state.pool)
    .await
    {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "Failed to load admins for signup notification");
            return;
        }
    };

    for admin_id in admins {
        notifier::send_best_effort(
            &state.pool,
            NewNotification::new(
                admin_id,
                NotificationType::ApprovalRequired,
                "신규 가입 승인 요청",
                format!("{}({}) 님이 가입 승인을 기다리고 있습니다.", profile.name, profile.role),
            )
            .related("profile", profile.id)
            .action_url(format!("/admin/users/{}", profile.id)),
        )
        .await;
    }
}
