//! 月度佣金结算

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::CalculationStatus;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CommissionCalculation {
    pub id: Uuid,
    pub kol_id: Uuid,
    /// YYYY-MM
    pub calculation_month: String,
    pub subordinate_sales: i64,
    pub subordinate_commission: i64,
    pub self_shop_sales: i64,
    pub self_shop_rate: f64,
    pub self_shop_commission: i64,
    pub device_count: i32,
    pub device_commission: i64,
    pub manual_adjustment: i64,
    pub total_commission: i64,
    pub status: CalculationStatus,
    pub calculation_details: serde_json::Value,
    pub calculated_at: DateTime<Utc>,
    pub payment_date: Option<NaiveDate>,
    pub payment_reference: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
