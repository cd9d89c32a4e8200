//! 用户档案

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{ProfileStatus, UserRole};

/// profiles 行（不含密码哈希）
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub status: ProfileStatus,
    pub shop_name: String,
    pub region: Option<String>,
    pub naver_place_link: Option<String>,
    pub commission_rate: Option<f64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Uuid>,
    pub total_subordinates: i32,
    pub active_subordinates: i32,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 查询 Profile 时统一使用的列
pub const PROFILE_COLUMNS: &str = "id, email, name, role, status, shop_name, region, \
     naver_place_link, commission_rate, approved_at, approved_by, total_subordinates, \
     active_subordinates, metadata, created_at, updated_at";

/// 列表与关联展示用的精简信息
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub shop_name: String,
}
