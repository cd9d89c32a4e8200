//! 商品

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::ProductCategory;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub code: Option<String>,
    pub category: ProductCategory,
    pub price: i64,
    pub is_active: bool,
    pub description: Option<String>,
    pub default_commission_rate: Option<f64>,
    pub min_commission_rate: Option<f64>,
    pub max_commission_rate: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
