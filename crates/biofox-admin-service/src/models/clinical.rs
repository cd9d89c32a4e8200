//! 临床案例、照片与同意书

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{CaseStatus, ConsentStatus, Gender, PhotoType, SubjectType};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalCase {
    pub id: Uuid,
    pub shop_id: Uuid,
    pub subject_type: SubjectType,
    pub name: String,
    pub gender: Option<Gender>,
    pub age: Option<i32>,
    pub status: CaseStatus,
    pub treatment_item: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub total_sessions: i32,
    pub consent_status: ConsentStatus,
    pub consent_date: Option<NaiveDate>,
    pub marketing_consent: bool,
    pub notes: Option<String>,
    pub tags: Vec<String>,
    pub custom_fields: serde_json::Value,
    pub photo_count: i32,
    pub latest_session: i32,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalPhoto {
    pub id: Uuid,
    pub clinical_case_id: Uuid,
    pub session_number: i32,
    pub photo_type: PhotoType,
    pub file_path: String,
    pub file_size: Option<i64>,
    pub metadata: serde_json::Value,
    pub uploaded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ConsentFile {
    pub id: Uuid,
    pub clinical_case_id: Uuid,
    pub file_path: String,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub file_type: Option<String>,
    pub uploaded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
