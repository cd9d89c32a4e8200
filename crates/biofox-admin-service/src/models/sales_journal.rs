//! KOL 销售日志

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SalesJournal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub shop_id: Option<Uuid>,
    pub date: NaiveDate,
    pub shop_name: String,
    pub content: String,
    pub special_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
