//! 归属关系变更
//!
//! 店铺同一时间只有一条生效关系；变更时关闭旧关系并维护上级的下级计数。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::hierarchy::{self, CYCLE_CHECK_MAX_DEPTH, TREE_MAX_DEPTH};
use crate::error::{AdminError, Result};
use crate::models::{RelationshipType, ShopRelationship};

/// 新建关系参数
#[derive(Debug, Clone)]
pub struct AssignParent {
    pub shop_owner_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub relationship_type: RelationshipType,
    pub notes: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
}

const RELATIONSHIP_COLUMNS: &str = "id, shop_owner_id, parent_id, started_at, ended_at, \
     is_active, relationship_type, notes, created_by, created_at, updated_at";

/// 从 `start` 向上加载生效上级，返回 node -> parent
pub async fn load_parent_map(
    conn: &mut PgConnection,
    start: Uuid,
    max_depth: usize,
) -> Result<HashMap<Uuid, Uuid>> {
    let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
        r#"
        WITH RECURSIVE chain (node, parent, depth) AS (
            SELECT shop_owner_id, parent_id, 1
            FROM shop_relationships
            WHERE shop_owner_id = $1 AND is_active AND parent_id IS NOT NULL
            UNION ALL
            SELECT r.shop_owner_id, r.parent_id, c.depth + 1
            FROM shop_relationships r
            JOIN chain c ON r.shop_owner_id = c.parent
            WHERE r.is_active AND r.parent_id IS NOT NULL AND c.depth < $2
        )
        SELECT node, parent FROM chain
        "#,
    )
    .bind(start)
    .bind(max_depth as i32)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().collect())
}

/// 上级链，近者在前
pub async fn parent_chain(conn: &mut PgConnection, shop_id: Uuid) -> Result<Vec<Uuid>> {
    let parents = load_parent_map(conn, shop_id, TREE_MAX_DEPTH + 1).await?;
    Ok(hierarchy::parent_chain(shop_id, |id| parents.get(&id).copied()))
}

/// 关闭店铺当前生效的关系，返回被关闭的行
async fn close_active(conn: &mut PgConnection, shop_owner_id: Uuid) -> Result<Option<ShopRelationship>> {
    let closed: Option<ShopRelationship> = sqlx::query_as(&format!(
        r#"
        UPDATE shop_relationships
        SET is_active = FALSE, ended_at = NOW(), updated_at = NOW()
        WHERE shop_owner_id = $1 AND is_active
        RETURNING {RELATIONSHIP_COLUMNS}
        "#
    ))
    .bind(shop_owner_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(parent_id) = closed.as_ref().and_then(|r| r.parent_id) {
        decrement_active(conn, parent_id).await?;
    }
    Ok(closed)
}

async fn decrement_active(conn: &mut PgConnection, parent_id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE profiles SET active_subordinates = GREATEST(active_subordinates - 1, 0), \
         updated_at = NOW() WHERE id = $1",
    )
    .bind(parent_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// 为店铺指定新上级（需在事务内调用）
///
/// 返回新关系与被关闭的旧关系。
pub async fn assign_parent(
    conn: &mut PgConnection,
    req: &AssignParent,
) -> Result<(ShopRelationship, Option<ShopRelationship>)> {
    if let Some(parent_id) = req.parent_id {
        let parents = load_parent_map(conn, parent_id, CYCLE_CHECK_MAX_DEPTH).await?;
        hierarchy::ensure_no_cycle(req.shop_owner_id, parent_id, |id| parents.get(&id).copied())?;
    }

    let closed = close_active(conn, req.shop_owner_id).await?;

    let created: ShopRelationship = sqlx::query_as(&format!(
        r#"
        INSERT INTO shop_relationships
            (shop_owner_id, parent_id, started_at, relationship_type, notes, created_by)
        VALUES ($1, $2, COALESCE($3, NOW()), $4, $5, $6)
        RETURNING {RELATIONSHIP_COLUMNS}
        "#
    ))
    .bind(req.shop_owner_id)
    .bind(req.parent_id)
    .bind(req.started_at)
    .bind(req.relationship_type)
    .bind(&req.notes)
    .bind(req.created_by)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        // 并发变更同一店铺时，后提交的一方撞上"一店一条生效关系"的唯一索引
        AdminError::on_unique_violation(e, || {
            AdminError::AlreadyExists(format!("店铺 {} 的归属关系正在被修改", req.shop_owner_id))
        })
    })?;

    if let Some(parent_id) = req.parent_id {
        sqlx::query(
            "UPDATE profiles SET total_subordinates = total_subordinates + 1, \
             active_subordinates = active_subordinates + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(parent_id)
        .execute(&mut *conn)
        .await?;
    }

    Ok((created, closed))
}

/// 结束指定关系
pub async fn end_relationship(conn: &mut PgConnection, id: Uuid) -> Result<ShopRelationship> {
    let ended: ShopRelationship = sqlx::query_as(&format!(
        r#"
        UPDATE shop_relationships
        SET is_active = FALSE, ended_at = NOW(), updated_at = NOW()
        WHERE id = $1 AND is_active
        RETURNING {RELATIONSHIP_COLUMNS}
        "#
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(AdminError::RelationshipNotFound(id))?;

    if let Some(parent_id) = ended.parent_id {
        decrement_active(conn, parent_id).await?;
    }
    Ok(ended)
}

pub fn columns() -> &'static str {
    RELATIONSHIP_COLUMNS
}
