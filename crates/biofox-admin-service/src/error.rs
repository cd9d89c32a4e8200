//! 管理后台错误类型定义
//!
//! 所有 handler 统一返回 `AdminError`，由 `IntoResponse` 转换为
//! `{ success, code, message, data }` 结构的 JSON 响应。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use biofox_shared::SharedError;
use serde_json::json;
use uuid::Uuid;

/// 管理后台错误类型
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    // 认证错误
    #[error("未授权: {0}")]
    Unauthorized(String),
    #[error("邮箱或密码错误")]
    InvalidCredentials,
    #[error("账号尚未通过审核")]
    AccountNotApproved,
    #[error("登录尝试过于频繁，请稍后重试")]
    TooManyLoginAttempts,
    #[error("禁止访问: {0}")]
    Forbidden(String),

    // 验证错误
    #[error("参数验证失败: {0}")]
    Validation(String),
    #[error("金额无效: {0}")]
    InvalidAmount(String),
    #[error("佣金费率必须在 0 到 1 之间: {0}")]
    InvalidCommissionRate(f64),
    #[error("起始日期不能晚于结束日期")]
    InvalidDateRange,

    // 资源不存在
    #[error("用户不存在: {0}")]
    ProfileNotFound(Uuid),
    #[error("店铺不存在: {0}")]
    ShopNotFound(Uuid),
    #[error("商品不存在: {0}")]
    ProductNotFound(Uuid),
    #[error("订单不存在: {0}")]
    OrderNotFound(Uuid),
    #[error("订单明细不存在: {0}")]
    OrderItemNotFound(Uuid),
    #[error("器械销售记录不存在: {0}")]
    DeviceSaleNotFound(Uuid),
    #[error("归属关系不存在: {0}")]
    RelationshipNotFound(Uuid),
    #[error("佣金记录不存在: {0}")]
    CommissionNotFound(Uuid),
    #[error("临床案例不存在: {0}")]
    CaseNotFound(Uuid),
    #[error("临床照片不存在: {0}")]
    PhotoNotFound(Uuid),
    #[error("同意书文件不存在: case={0}")]
    ConsentFileNotFound(Uuid),
    #[error("通知不存在: {0}")]
    NotificationNotFound(Uuid),
    #[error("销售日志不存在: {0}")]
    JournalNotFound(Uuid),
    #[error("资源不存在: {0}")]
    NotFound(String),

    // 业务冲突
    #[error("记录已存在: {0}")]
    AlreadyExists(String),
    #[error("用户已审核通过")]
    AlreadyApproved,
    #[error("用户已被拒绝")]
    AlreadyRejected,
    #[error("店铺没有生效的上级 KOL: {0}")]
    NoActiveRelationship(Uuid),
    #[error("该归属关系会形成循环")]
    CircularRelationship,
    #[error("已完成且已结算的订单不能删除")]
    CannotDeletePaidOrder,
    #[error("状态不允许从 {from} 变更为 {to}")]
    InvalidStatusTransition { from: String, to: String },

    // 系统错误
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Redis错误: {0}")]
    Redis(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

impl AdminError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::AccountNotApproved | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::TooManyLoginAttempts => StatusCode::TOO_MANY_REQUESTS,

            Self::Validation(_)
            | Self::InvalidAmount(_)
            | Self::InvalidCommissionRate(_)
            | Self::InvalidDateRange => StatusCode::BAD_REQUEST,

            Self::ProfileNotFound(_)
            | Self::ShopNotFound(_)
            | Self::ProductNotFound(_)
            | Self::OrderNotFound(_)
            | Self::OrderItemNotFound(_)
            | Self::DeviceSaleNotFound(_)
            | Self::RelationshipNotFound(_)
            | Self::CommissionNotFound(_)
            | Self::CaseNotFound(_)
            | Self::PhotoNotFound(_)
            | Self::ConsentFileNotFound(_)
            | Self::NotificationNotFound(_)
            | Self::JournalNotFound(_)
            | Self::NotFound(_) => StatusCode::NOT_FOUND,

            Self::AlreadyExists(_)
            | Self::AlreadyApproved
            | Self::AlreadyRejected
            | Self::NoActiveRelationship(_)
            | Self::CircularRelationship
            | Self::CannotDeletePaidOrder
            | Self::InvalidStatusTransition { .. } => StatusCode::CONFLICT,

            Self::Database(_) | Self::Redis(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::AccountNotApproved => "ACCOUNT_NOT_APPROVED",
            Self::TooManyLoginAttempts => "TOO_MANY_LOGIN_ATTEMPTS",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::InvalidCommissionRate(_) => "INVALID_COMMISSION_RATE",
            Self::InvalidDateRange => "INVALID_DATE_RANGE",
            Self::ProfileNotFound(_) => "PROFILE_NOT_FOUND",
            Self::ShopNotFound(_) => "SHOP_NOT_FOUND",
            Self::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::OrderItemNotFound(_) => "ORDER_ITEM_NOT_FOUND",
            Self::DeviceSaleNotFound(_) => "DEVICE_SALE_NOT_FOUND",
            Self::RelationshipNotFound(_) => "RELATIONSHIP_NOT_FOUND",
            Self::CommissionNotFound(_) => "COMMISSION_NOT_FOUND",
            Self::CaseNotFound(_) => "CASE_NOT_FOUND",
            Self::PhotoNotFound(_) => "PHOTO_NOT_FOUND",
            Self::ConsentFileNotFound(_) => "CONSENT_FILE_NOT_FOUND",
            Self::NotificationNotFound(_) => "NOTIFICATION_NOT_FOUND",
            Self::JournalNotFound(_) => "JOURNAL_NOT_FOUND",
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::AlreadyApproved => "ALREADY_APPROVED",
            Self::AlreadyRejected => "ALREADY_REJECTED",
            Self::NoActiveRelationship(_) => "NO_ACTIVE_RELATIONSHIP",
            Self::CircularRelationship => "CIRCULAR_RELATIONSHIP",
            Self::CannotDeletePaidOrder => "CANNOT_DELETE_PAID_ORDER",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 便捷构造：状态流转非法
    pub fn transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStatusTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// 唯一约束冲突转为 409，其余数据库错误原样保留
    pub fn on_unique_violation(err: sqlx::Error, conflict: impl FnOnce() -> AdminError) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => conflict(),
            _ => Self::Database(err),
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = match &self {
            Self::Database(e) => {
                tracing::error!(error = %e, "数据库操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Redis(e) => {
                tracing::error!(error = %e, "Redis 操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for AdminError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl From<serde_json::Error> for AdminError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON 处理错误: {}", err))
    }
}

/// 从共享库基础设施错误转换
impl From<SharedError> for AdminError {
    fn from(err: SharedError) -> Self {
        match err {
            SharedError::Database(e) => Self::Database(e),
            SharedError::Redis(e) => Self::Redis(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// 服务层 Result 类型别名
pub type Result<T> = std::result::Result<T, AdminError>;
