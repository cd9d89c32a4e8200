//! 器械销售记录

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::CommissionStatus;
use crate::domain::DeviceTier;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSale {
    pub id: Uuid,
    pub shop_id: Uuid,
    pub kol_id: Uuid,
    pub sale_date: NaiveDate,
    /// 负数表示退货
    pub quantity: i32,
    pub device_name: String,
    pub serial_numbers: Vec<String>,
    pub tier_at_sale: DeviceTier,
    pub standard_commission: i64,
    pub actual_commission: i64,
    pub commission_status: CommissionStatus,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
