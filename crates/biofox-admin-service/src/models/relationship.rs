//! 店铺归属关系

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::RelationshipType;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ShopRelationship {
    pub id: Uuid,
    pub shop_owner_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub relationship_type: RelationshipType,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
