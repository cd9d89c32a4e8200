//! 店铺归属关系 HTTP 处理器

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::auth::CurrentUser;
use crate::domain::hierarchy::{self, TreeNode, TreeProfile};
use crate::dto::ApiResponse;
use crate::error::{AdminError, Result};
use crate::models::{
    AuditAction, AuditLogEntry, ProfileStatus, RelationshipType, ShopRelationship, UserRole,
};
use crate::service::relationship_service::{self, AssignParent};
use crate::service::{audit, dashboard_cache};
use crate::state::AppState;

use super::profiles::fetch_profile;

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRelationshipRequest {
    pub shop_owner_id: Uuid,
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub relationship_type: RelationshipType,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRelationshipResponse {
    pub relationship: ShopRelationship,
    /// 被关闭的旧关系
    pub previous: Option<ShopRelationship>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipHistoryItem {
    pub id: Uuid,
    pub shop_owner_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub parent_name: Option<String>,
    pub parent_role: Option<UserRole>,
    pub relationship_type: RelationshipType,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Subordinate {
    pub relationship_id: Uuid,
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub shop_name: String,
    pub region: Option<String>,
    pub status: ProfileStatus,
    pub relationship_type: RelationshipType,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChainLink {
    pub id: Uuid,
    pub name: String,
    pub role: UserRole,
    pub shop_name: String,
}

// ============================================
// API 处理器
// ============================================

/// 建立归属关系，旧关系自动关闭
///
/// POST /api/relationships
pub async fn create_relationship(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateRelationshipRequest>,
) -> Result<Json<ApiResponse<CreateRelationshipResponse>>> {
    req.validate()?;
    if req.parent_id == Some(req.shop_owner_id) {
        return Err(AdminError::CircularRelationship);
    }

    fetch_profile(&state.pool, req.shop_owner_id).await?;
    if let Some(parent_id) = req.parent_id {
        fetch_profile(&state.pool, parent_id).await?;
    }

    let mut tx = state.pool.begin().await?;
    let (relationship, previous) = relationship_service::assign_parent(
        &mut tx,
        &AssignParent {
            shop_owner_id: req.shop_owner_id,
            parent_id: req.parent_id,
            relationship_type: req.relationship_type,
            notes: req.notes.clone(),
            started_at: req.started_at,
            created_by: user.id,
        },
    )
    .await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("shop_relationships", relationship.id, AuditAction::Insert)
            .with_actor(user.id, user.role)
            .with_values(
                previous.as_ref().and_then(audit::snapshot),
                audit::snapshot(&relationship),
            ),
    )
    .await?;
    tx.commit().await?;

    dashboard_cache::invalidate(&state.cache).await;

    info!(
        shop_id = %req.shop_owner_id,
        parent_id = ?req.parent_id,
        replaced = previous.is_some(),
        "Relationship created"
    );
    Ok(Json(ApiResponse::success(CreateRelationshipResponse {
        relationship,
        previous,
    })))
}

/// 结束关系
///
/// POST /api/relationships/{id}/end
pub async fn end_relationship(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ShopRelationship>>> {
    let mut tx = state.pool.begin().await?;
    let ended = relationship_service::end_relationship(&mut tx, id).await?;

    audit::record(
        &mut *tx,
        &AuditLogEntry::new("shop_relationships", id, AuditAction::Update)
            .with_actor(user.id, user.role)
            .with_values(None, audit::snapshot(&ended))
            .with_metadata(serde_json::json!({ "action": "end" })),
    )
    .await?;
    tx.commit().await?;

    dashboard_cache::invalidate(&state.cache).await;

    info!(relationship_id = %id, "Relationship ended");
    Ok(Json(ApiResponse::success(ended)))
}

/// 店铺归属历史，最新在前
///
/// GET /api/relationships/history/{shop_id}
pub async fn relationship_history(
    State(state): State<AppState>,
    Path(shop_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<RelationshipHistoryItem>>>> {
    let items: Vec<RelationshipHistoryItem> = sqlx::query_as(
        r#"
        SELECT r.id, r.shop_owner_id, r.parent_id,
               p.name AS parent_name, p.role AS parent_role,
               r.relationship_type, r.started_at, r.ended_at, r.is_active, r.notes
        FROM shop_relationships r
        LEFT JOIN profiles p ON p.id = r.parent_id
        WHERE r.shop_owner_id = $1
        ORDER BY r.started_at DESC, r.created_at DESC
        "#,
    )
    .bind(shop_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(items)))
}

/// 直属下级
///
/// GET /api/relationships/{id}/subordinates
pub async fn list_subordinates(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(parent_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<Subordinate>>>> {
    user.ensure_self_or_admin(parent_id)?;

    let items: Vec<Subordinate> = sqlx::query_as(
        r#"
        SELECT r.id AS relationship_id, p.id, p.name, p.email, p.role, p.shop_name,
               p.region, p.status, r.relationship_type, r.started_at
        FROM shop_relationships r
        JOIN profiles p ON p.id = r.shop_owner_id
        WHERE r.parent_id = $1 AND r.is_active
        ORDER BY r.started_at DESC
        "#,
    )
    .bind(parent_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(items)))
}

/// 上级链：直属上级在前，根在最后
///
/// GET /api/relationships/{id}/chain
pub async fn parent_chain(
    State(state): State<AppState>,
    Path(shop_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<ChainLink>>>> {
    let mut conn = state.pool.acquire().await?;
    let chain = relationship_service::parent_chain(&mut conn, shop_id).await?;
    if chain.is_empty() {
        return Ok(Json(ApiResponse::success(Vec::new())));
    }

    let rows: Vec<ChainLink> =
        sqlx::query_as("SELECT id, name, role, shop_name FROM profiles WHERE id = ANY($1)")
            .bind(&chain)
            .fetch_all(&mut *conn)
            .await?;
    let mut by_id: HashMap<Uuid, ChainLink> = rows.into_iter().map(|r| (r.id, r)).collect();
    let links = chain.iter().filter_map(|id| by_id.remove(id)).collect();

    Ok(Json(ApiResponse::success(links)))
}

/// 组织树
///
/// GET /api/relationships/tree
pub async fn organization_tree(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<TreeNode>>>> {
    let roots: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT p.id FROM profiles p
        WHERE p.role IN ('kol', 'ol') AND p.status = 'approved'
          AND NOT EXISTS (
              SELECT 1 FROM shop_relationships r
              WHERE r.shop_owner_id = p.id AND r.is_active AND r.parent_id IS NOT NULL
          )
        ORDER BY p.name
        "#,
    )
    .fetch_all(&state.pool)
    .await?;

    let edges: Vec<(Uuid, Uuid)> = sqlx::query_as(
        r#"
        SELECT r.parent_id, r.shop_owner_id
        FROM shop_relationships r
        JOIN profiles p ON p.id = r.shop_owner_id
        WHERE r.is_active AND r.parent_id IS NOT NULL
        ORDER BY p.name
        "#,
    )
    .fetch_all(&state.pool)
    .await?;

    let profiles: Vec<TreeProfile> = sqlx::query_as(
        r#"
        SELECT id, name, role, shop_name, status FROM profiles
        WHERE id = ANY($1)
           OR id IN (SELECT shop_owner_id FROM shop_relationships WHERE is_active)
        "#,
    )
    .bind(&roots)
    .fetch_all(&state.pool)
    .await?;
    let profiles: HashMap<Uuid, TreeProfile> = profiles.into_iter().map(|p| (p.id, p)).collect();

    Ok(Json(ApiResponse::success(hierarchy::build_tree(
        &roots, &profiles, &edges,
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_defaults() {
        let req: CreateRelationshipRequest = serde_json::from_value(serde_json::json!({
            "shopOwnerId": Uuid::nil(),
        }))
        .unwrap();
        assert_eq!(req.relationship_type, RelationshipType::Direct);
        assert!(req.parent_id.is_none());
        assert!(req.started_at.is_none());
    }

    #[test]
    fn test_create_request_parses_type() {
        let req: CreateRelationshipRequest = serde_json::from_value(serde_json::json!({
            "shopOwnerId": Uuid::nil(),
            "parentId": Uuid::nil(),
            "relationshipType": "transferred",
            "startedAt": "2026-03-01T00:00:00Z",
        }))
        .unwrap();
        assert_eq!(req.relationship_type, RelationshipType::Transferred);
        assert!(req.started_at.is_some());
    }
}
