//! 临床案例 HTTP 处理器
//!
//! 案例、照片与同意书；只有所属店铺和管理员可以访问。
//! 文件本身存放在外部存储，这里只记录路径。

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::auth::CurrentUser;
use crate::domain::clinical::{parse_case_status, resolve_case_name, resolve_consent, validate_age};
use crate::dto::{ApiResponse, PageResponse, PaginationParams, search_pattern};
use crate::error::{AdminError, Result};
use crate::models::{
    AuditAction, AuditLogEntry, CaseStatus, ClinicalCase, ClinicalPhoto, ConsentFile,
    ConsentStatus, Gender, NotificationType, PhotoType, SubjectType,
};
use crate::service::{NewNotification, audit, notifier};
use crate::state::AppState;

const CASE_COLUMNS: &str = "id, shop_id, subject_type, name, gender, age, status, treatment_item, \
     start_date, end_date, total_sessions, consent_status, consent_date, marketing_consent, notes, \
     tags, custom_fields, photo_count, latest_session, created_by, created_at, updated_at";

const PHOTO_COLUMNS: &str = "id, clinical_case_id, session_number, photo_type, file_path, file_size, \
     metadata, uploaded_by, created_at, updated_at";

const CONSENT_COLUMNS: &str =
    "id, clinical_case_id, file_path, file_name, file_size, file_type, uploaded_by, created_at";

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseFilter {
    pub shop_id: Option<Uuid>,
    /// 兼容 `active`
    pub status: Option<String>,
    pub subject_type: Option<SubjectType>,
    pub consent_status: Option<ConsentStatus>,
    pub treatment_item: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCaseRequest {
    /// 仅管理员可指定
    pub shop_id: Option<Uuid>,
    pub subject_type: SubjectType,
    #[validate(length(max = 100))]
    pub name: Option<String>,
    pub gender: Option<Gender>,
    pub age: Option<i32>,
    pub status: Option<String>,
    #[validate(length(max = 200))]
    pub treatment_item: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub total_sessions: Option<i32>,
    pub consent_status: Option<ConsentStatus>,
    pub consent_received: Option<bool>,
    #[serde(default)]
    pub marketing_consent: bool,
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub custom_fields: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCaseRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    pub gender: Option<Gender>,
    pub age: Option<i32>,
    #[validate(length(max = 200))]
    pub treatment_item: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub total_sessions: Option<i32>,
    pub consent_status: Option<ConsentStatus>,
    pub consent_received: Option<bool>,
    pub marketing_consent: Option<bool>,
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
    pub custom_fields: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseDetail {
    #[serde(flatten)]
    pub case: ClinicalCase,
    pub photos: Vec<ClinicalPhoto>,
    pub consent_file: Option<ConsentFile>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCaseResponse {
    pub deleted: bool,
    /// 调用方据此清理存储
    pub removed_files: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UploadPhotoRequest {
    #[validate(range(min = 0, message = "回次不能为负数"))]
    pub session_number: i32,
    pub photo_type: PhotoType,
    #[validate(length(min = 1, max = 500))]
    pub file_path: String,
    pub file_size: Option<i64>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SaveConsentRequest {
    #[validate(length(min = 1, max = 500))]
    pub file_path: String,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub file_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub shop_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalStats {
    pub total: i64,
    pub by_status: HashMap<String, i64>,
    pub by_consent: HashMap<String, i64>,
    pub personal_cases: i64,
    pub customer_cases: i64,
    pub total_photos: i64,
}

// ============================================
// 案例
// ============================================

/// 案例列表
///
/// GET /api/clinical/cases
pub async fn list_cases(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<CaseFilter>,
) -> Result<Json<ApiResponse<PageResponse<ClinicalCase>>>> {
    let shop_id = user.scope(filter.shop_id);
    let status = filter.status.as_deref().map(parse_case_status).transpose()?;
    let search = search_pattern(filter.search.as_deref())?;
    let treatment = search_pattern(filter.treatment_item.as_deref())?;

    let where_clause = r#"
        ($1::uuid IS NULL OR shop_id = $1)
        AND ($2::varchar IS NULL OR status = $2)
        AND ($3::varchar IS NULL OR subject_type = $3)
        AND ($4::varchar IS NULL OR consent_status = $4)
        AND ($5::text IS NULL OR treatment_item ILIKE $5)
        AND ($6::text IS NULL OR name ILIKE $6)
    "#;

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM clinical_cases WHERE {where_clause}"))
            .bind(shop_id)
            .bind(status)
            .bind(filter.subject_type)
            .bind(filter.consent_status)
            .bind(&treatment)
            .bind(&search)
            .fetch_one(&state.pool)
            .await?;

    let items: Vec<ClinicalCase> = sqlx::query_as(&format!(
        "SELECT {CASE_COLUMNS} FROM clinical_cases WHERE {where_clause} \
         ORDER BY created_at DESC LIMIT $7 OFFSET $8"
    ))
    .bind(shop_id)
    .bind(status)
    .bind(filter.subject_type)
    .bind(filter.consent_status)
    .bind(&treatment)
    .bind(&search)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(PageResponse::from_params(
        items,
        total,
        &pagination,
    ))))
}

/// 案例详情（含照片与同意书）
///
/// GET /api/clinical/cases/{id}
pub async fn get_case(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CaseDetail>>> {
    let case = load_case(&state, &user, id).await?;
    let photos = fetch_photos(&state, id).await?;
    let consent_file = fetch_consent(&state, id).await?;

    Ok(Json(ApiResponse::success(CaseDetail {
        case,
        photos,
        consent_file,
    })))
}

/// 创建案例
///
/// POST /api/clinical/cases
pub async fn create_case(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateCaseRequest>,
) -> Result<Json<ApiResponse<ClinicalCase>>> {
    req.validate()?;
    validate_age(req.age)?;
    validate_sessions(req.total_sessions)?;

    let shop_id = if user.is_admin() {
        req.shop_id
            .ok_or_else(|| AdminError::Validation("管理员创建案例需指定 shopId".to_string()))?
    } else {
        user.id
    };
    let status = req.status.as_deref().map(parse_case_status).transpose()?.unwrap_or_default();
    let consent = resolve_consent(req.consent_status, req.consent_received);
    let today = Utc::now().date_naive();

    let mut tx = state.pool.begin().await?;
    let case: ClinicalCase = sqlx::query_as(&format!(
        r#"
        INSERT INTO clinical_cases (shop_id, subject_type, name, gender, age, status,
            treatment_item, start_date, total_sessions, consent_status, consent_date,
            marketing_consent, notes, tags, custom_fields, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
            COALESCE($15, '{{}}'::jsonb), $16)
        RETURNING {CASE_COLUMNS}
        "#
    ))
    .bind(shop_id)
    .bind(req.subject_type)
    .bind(resolve_case_name(req.subject_type, req.name.as_deref()))
    .bind(req.gender)
    .bind(req.age)
    .bind(status)
    .bind(&req.treatment_item)
    .bind(req.start_date.unwrap_or(today))
    .bind(req.total_sessions.unwrap_or(0))
    .bind(consent)
    .bind((consent == ConsentStatus::Consented).then_some(today))
    .bind(req.marketing_consent)
    .bind(&req.notes)
    .bind(&req.tags)
    .bind(&req.custom_fields)
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("clinical_cases", case.id, AuditAction::Insert)
            .with_actor(user.id, user.role)
            .with_values(None, audit::snapshot(&case)),
    )
    .await?;
    tx.commit().await?;

    info!(case_id = %case.id, shop_id = %shop_id, "Clinical case created");
    Ok(Json(ApiResponse::success(case)))
}

/// 修改案例
///
/// PUT /api/clinical/cases/{id}
pub async fn update_case(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCaseRequest>,
) -> Result<Json<ApiResponse<ClinicalCase>>> {
    req.validate()?;
    validate_age(req.age)?;
    validate_sessions(req.total_sessions)?;

    let before = load_case(&state, &user, id).await?;
    let consent = match (req.consent_status, req.consent_received) {
        (None, None) => None,
        (explicit, received) => Some(resolve_consent(explicit, received)),
    };

    let mut tx = state.pool.begin().await?;
    let after: ClinicalCase = sqlx::query_as(&format!(
        r#"
        UPDATE clinical_cases SET
            name = COALESCE($2, name),
            gender = COALESCE($3, gender),
            age = COALESCE($4, age),
            treatment_item = COALESCE($5, treatment_item),
            start_date = COALESCE($6, start_date),
            end_date = COALESCE($7, end_date),
            total_sessions = COALESCE($8, total_sessions),
            consent_status = COALESCE($9, consent_status),
            consent_date = CASE
                WHEN $9 = 'consented' AND consent_date IS NULL THEN CURRENT_DATE
                ELSE consent_date END,
            marketing_consent = COALESCE($10, marketing_consent),
            notes = COALESCE($11, notes),
            tags = COALESCE($12, tags),
            custom_fields = COALESCE($13, custom_fields),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {CASE_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(req.name.as_deref().map(str::trim))
    .bind(req.gender)
    .bind(req.age)
    .bind(&req.treatment_item)
    .bind(req.start_date)
    .bind(req.end_date)
    .bind(req.total_sessions)
    .bind(consent)
    .bind(req.marketing_consent)
    .bind(&req.notes)
    .bind(&req.tags)
    .bind(&req.custom_fields)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("clinical_cases", id, AuditAction::Update)
            .with_actor(user.id, user.role)
            .with_values(audit::snapshot(&before), audit::snapshot(&after)),
    )
    .await?;
    tx.commit().await?;

    info!(case_id = %id, "Clinical case updated");
    Ok(Json(ApiResponse::success(after)))
}

/// 修改案例状态
///
/// PUT /api/clinical/cases/{id}/status
pub async fn update_case_status(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<ApiResponse<ClinicalCase>>> {
    let status = parse_case_status(&req.status)?;
    let before = load_case(&state, &user, id).await?;

    let mut tx = state.pool.begin().await?;
    let after: ClinicalCase = sqlx::query_as(&format!(
        r#"
        UPDATE clinical_cases SET
            status = $2,
            end_date = CASE WHEN $2 = 'completed' AND end_date IS NULL THEN CURRENT_DATE ELSE end_date END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {CASE_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(status)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("clinical_cases", id, AuditAction::Update)
            .with_actor(user.id, user.role)
            .with_values(audit::snapshot(&before), audit::snapshot(&after)),
    )
    .await?;

    if before.status != status || user.is_admin() {
        notifier::send(
            &mut *tx,
            &NewNotification::new(
                after.shop_id,
                NotificationType::ClinicalProgress,
                "임상 케이스 상태 변경",
                format!(
                    "'{}' 케이스 상태가 {}(으)로 변경되었습니다.",
                    after.name,
                    status.as_str()
                ),
            )
            .related("clinical_case", id),
        )
        .await?;
    }
    tx.commit().await?;

    info!(case_id = %id, from = %before.status, to = %status, "Clinical case status changed");
    Ok(Json(ApiResponse::success(after)))
}

/// 删除案例及其照片、同意书
///
/// DELETE /api/clinical/cases/{id}
pub async fn delete_case(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DeleteCaseResponse>>> {
    let before = load_case(&state, &user, id).await?;

    let mut tx = state.pool.begin().await?;
    let mut removed_files: Vec<String> =
        sqlx::query_scalar("DELETE FROM clinical_photos WHERE clinical_case_id = $1 RETURNING file_path")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
    let consent: Vec<String> =
        sqlx::query_scalar("DELETE FROM consent_files WHERE clinical_case_id = $1 RETURNING file_path")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
    removed_files.extend(consent);

    sqlx::query("DELETE FROM clinical_cases WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("clinical_cases", id, AuditAction::Delete)
            .with_actor(user.id, user.role)
            .with_values(audit::snapshot(&before), None)
            .with_metadata(serde_json::json!({ "removed_files": &removed_files })),
    )
    .await?;
    tx.commit().await?;

    info!(case_id = %id, files = removed_files.len(), "Clinical case deleted");
    Ok(Json(ApiResponse::success(DeleteCaseResponse {
        deleted: true,
        removed_files,
    })))
}

/// 店铺案例统计
///
/// GET /api/clinical/stats
pub async fn clinical_stats(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<StatsQuery>,
) -> Result<Json<ApiResponse<ClinicalStats>>> {
    let shop_id = user.scope(query.shop_id);
    Ok(Json(ApiResponse::success(
        load_stats(&state.pool, shop_id).await?,
    )))
}

/// 案例统计，shop_id 为空时统计全部
pub(crate) async fn load_stats(pool: &sqlx::PgPool, shop_id: Option<Uuid>) -> Result<ClinicalStats> {
    let rows: Vec<(CaseStatus, ConsentStatus, SubjectType, i64, i64)> = sqlx::query_as(
        r#"
        SELECT status, consent_status, subject_type, COUNT(*),
               COALESCE(SUM(photo_count), 0)::BIGINT
        FROM clinical_cases
        WHERE ($1::uuid IS NULL OR shop_id = $1)
        GROUP BY status, consent_status, subject_type
        "#,
    )
    .bind(shop_id)
    .fetch_all(pool)
    .await?;

    Ok(aggregate_stats(&rows))
}

fn aggregate_stats(rows: &[(CaseStatus, ConsentStatus, SubjectType, i64, i64)]) -> ClinicalStats {
    let mut stats = ClinicalStats {
        total: 0,
        by_status: HashMap::new(),
        by_consent: HashMap::new(),
        personal_cases: 0,
        customer_cases: 0,
        total_photos: 0,
    };
    for (status, consent, subject, count, photos) in rows {
        stats.total += count;
        stats.total_photos += photos;
        *stats.by_status.entry(status.as_str().to_string()).or_default() += count;
        *stats.by_consent.entry(consent.as_str().to_string()).or_default() += count;
        match subject {
            SubjectType::Personal => stats.personal_cases += count,
            SubjectType::Customer => stats.customer_cases += count,
        }
    }
    stats
}

// ============================================
// 照片
// ============================================

/// 照片列表
///
/// GET /api/clinical/cases/{id}/photos
pub async fn list_photos(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<ClinicalPhoto>>>> {
    load_case(&state, &user, id).await?;
    Ok(Json(ApiResponse::success(fetch_photos(&state, id).await?)))
}

/// 上传照片，同一回次同一角度覆盖
///
/// POST /api/clinical/cases/{id}/photos
pub async fn upload_photo(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UploadPhotoRequest>,
) -> Result<Json<ApiResponse<ClinicalPhoto>>> {
    req.validate()?;
    load_case(&state, &user, id).await?;

    let mut tx = state.pool.begin().await?;
    let photo: ClinicalPhoto = sqlx::query_as(&format!(
        r#"
        INSERT INTO clinical_photos (clinical_case_id, session_number, photo_type, file_path,
            file_size, metadata, uploaded_by)
        VALUES ($1, $2, $3, $4, $5, COALESCE($6, '{{}}'::jsonb), $7)
        ON CONFLICT (clinical_case_id, session_number, photo_type) DO UPDATE SET
            file_path = EXCLUDED.file_path,
            file_size = EXCLUDED.file_size,
            metadata = EXCLUDED.metadata,
            uploaded_by = EXCLUDED.uploaded_by,
            updated_at = NOW()
        RETURNING {PHOTO_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(req.session_number)
    .bind(req.photo_type)
    .bind(&req.file_path)
    .bind(req.file_size)
    .bind(&req.metadata)
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await?;

    refresh_photo_counters(&mut tx, id).await?;
    audit::record(
        &mut *tx,
        &AuditLogEntry::new("clinical_photos", photo.id, AuditAction::Insert)
            .with_actor(user.id, user.role)
            .with_values(None, audit::snapshot(&photo)),
    )
    .await?;
    tx.commit().await?;

    info!(
        case_id = %id,
        session = req.session_number,
        photo_type = %req.photo_type.as_str(),
        "Clinical photo saved"
    );
    Ok(Json(ApiResponse::success(photo)))
}

/// 删除照片
///
/// DELETE /api/clinical/cases/{id}/photos/{photo_id}
pub async fn delete_photo(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, photo_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<DeleteCaseResponse>>> {
    load_case(&state, &user, id).await?;

    let mut tx = state.pool.begin().await?;
    let removed: ClinicalPhoto = sqlx::query_as(&format!(
        "DELETE FROM clinical_photos WHERE id = $1 AND clinical_case_id = $2 RETURNING {PHOTO_COLUMNS}"
    ))
    .bind(photo_id)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AdminError::PhotoNotFound(photo_id))?;

    refresh_photo_counters(&mut tx, id).await?;
    audit::record(
        &mut *tx,
        &AuditLogEntry::new("clinical_photos", photo_id, AuditAction::Delete)
            .with_actor(user.id, user.role)
            .with_values(audit::snapshot(&removed), None),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(ApiResponse::success(DeleteCaseResponse {
        deleted: true,
        removed_files: vec![removed.file_path],
    })))
}

// ============================================
// 同意书
// ============================================

/// 获取同意书
///
/// GET /api/clinical/cases/{id}/consent
pub async fn get_consent(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Option<ConsentFile>>>> {
    load_case(&state, &user, id).await?;
    Ok(Json(ApiResponse::success(fetch_consent(&state, id).await?)))
}

/// 保存同意书，替换已有文件
///
/// PUT /api/clinical/cases/{id}/consent
pub async fn save_consent(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<SaveConsentRequest>,
) -> Result<Json<ApiResponse<ConsentFile>>> {
    req.validate()?;
    load_case(&state, &user, id).await?;

    let mut tx = state.pool.begin().await?;
    let file: ConsentFile = sqlx::query_as(&format!(
        r#"
        INSERT INTO consent_files (clinical_case_id, file_path, file_name, file_size, file_type, uploaded_by)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (clinical_case_id) DO UPDATE SET
            file_path = EXCLUDED.file_path,
            file_name = EXCLUDED.file_name,
            file_size = EXCLUDED.file_size,
            file_type = EXCLUDED.file_type,
            uploaded_by = EXCLUDED.uploaded_by,
            created_at = NOW()
        RETURNING {CONSENT_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(&req.file_path)
    .bind(&req.file_name)
    .bind(req.file_size)
    .bind(&req.file_type)
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE clinical_cases SET
            consent_status = 'consented',
            consent_date = COALESCE(consent_date, CURRENT_DATE),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("consent_files", file.id, AuditAction::Insert)
            .with_actor(user.id, user.role)
            .with_values(None, audit::snapshot(&file)),
    )
    .await?;
    tx.commit().await?;

    info!(case_id = %id, "Consent file saved");
    Ok(Json(ApiResponse::success(file)))
}

/// 删除同意书，案例回到 pending
///
/// DELETE /api/clinical/cases/{id}/consent
pub async fn delete_consent(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DeleteCaseResponse>>> {
    load_case(&state, &user, id).await?;

    let mut tx = state.pool.begin().await?;
    let removed: ConsentFile = sqlx::query_as(&format!(
        "DELETE FROM consent_files WHERE clinical_case_id = $1 RETURNING {CONSENT_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AdminError::ConsentFileNotFound(id))?;

    sqlx::query(
        "UPDATE clinical_cases SET consent_status = 'pending', updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("consent_files", removed.id, AuditAction::Delete)
            .with_actor(user.id, user.role)
            .with_values(audit::snapshot(&removed), None),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(ApiResponse::success(DeleteCaseResponse {
        deleted: true,
        removed_files: vec![removed.file_path],
    })))
}

// ============================================
// 辅助函数
// ============================================

/// 加载案例并校验访问权限
async fn load_case(state: &AppState, user: &CurrentUser, id: Uuid) -> Result<ClinicalCase> {
    let case: ClinicalCase =
        sqlx::query_as(&format!("SELECT {CASE_COLUMNS} FROM clinical_cases WHERE id = $1"))
            .bind(id)
            .fetch_optional(&state.pool)
            .await?
            .ok_or(AdminError::CaseNotFound(id))?;
    user.ensure_self_or_admin(case.shop_id)?;
    Ok(case)
}

async fn fetch_photos(state: &AppState, case_id: Uuid) -> Result<Vec<ClinicalPhoto>> {
    let photos = sqlx::query_as(&format!(
        r#"
        SELECT {PHOTO_COLUMNS} FROM clinical_photos
        WHERE clinical_case_id = $1
        ORDER BY session_number,
                 CASE photo_type WHEN 'front' THEN 0 WHEN 'left_side' THEN 1 ELSE 2 END
        "#
    ))
    .bind(case_id)
    .fetch_all(&state.pool)
    .await?;
    Ok(photos)
}

async fn fetch_consent(state: &AppState, case_id: Uuid) -> Result<Option<ConsentFile>> {
    let file = sqlx::query_as(&format!(
        "SELECT {CONSENT_COLUMNS} FROM consent_files WHERE clinical_case_id = $1"
    ))
    .bind(case_id)
    .fetch_optional(&state.pool)
    .await?;
    Ok(file)
}

/// 重算 photo_count 与 latest_session
async fn refresh_photo_counters(conn: &mut PgConnection, case_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE clinical_cases c SET
            photo_count = p.cnt,
            latest_session = p.latest,
            updated_at = NOW()
        FROM (
            SELECT COUNT(*)::INTEGER AS cnt, COALESCE(MAX(session_number), 0) AS latest
            FROM clinical_photos WHERE clinical_case_id = $1
        ) p
        WHERE c.id = $1
        "#,
    )
    .bind(case_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn validate_sessions(sessions: Option<i32>) -> Result<()> {
    match sessions {
        Some(n) if n < 0 => Err(AdminError::Validation("总回次不能为负数".to_string())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_stats() {
        let rows = vec![
            (CaseStatus::InProgress, ConsentStatus::Consented, SubjectType::Customer, 3, 9),
            (CaseStatus::InProgress, ConsentStatus::Pending, SubjectType::Personal, 1, 0),
            (CaseStatus::Completed, ConsentStatus::Consented, SubjectType::Customer, 2, 12),
        ];
        let stats = aggregate_stats(&rows);
        assert_eq!(stats.total, 6);
        assert_eq!(stats.by_status["in_progress"], 4);
        assert_eq!(stats.by_status["completed"], 2);
        assert_eq!(stats.by_consent["consented"], 5);
        assert_eq!(stats.personal_cases, 1);
        assert_eq!(stats.customer_cases, 5);
        assert_eq!(stats.total_photos, 21);
    }

    #[test]
    fn test_negative_sessions_rejected() {
        assert!(validate_sessions(Some(-1)).is_err());
        assert!(validate_sessions(Some(0)).is_ok());
        assert!(validate_sessions(None).is_ok());
    }

    #[test]
    fn test_create_request_parse() {
        let req: CreateCaseRequest = serde_json::from_value(serde_json::json!({
            "subjectType": "self",
            "status": "active",
            "consentReceived": true,
        }))
        .unwrap();
        assert_eq!(req.subject_type, SubjectType::Personal);
        assert!(req.tags.is_empty());
        assert!(!req.marketing_consent);
        assert_eq!(
            resolve_consent(req.consent_status, req.consent_received),
            ConsentStatus::Consented
        );
    }

    #[test]
    fn test_photo_request_rejects_negative_session() {
        let req: UploadPhotoRequest = serde_json::from_value(serde_json::json!({
            "sessionNumber": -1,
            "photoType": "front",
            "filePath": "cases/1/front.jpg",
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }
}
