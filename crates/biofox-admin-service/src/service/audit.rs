//! 审计日志写入

use serde::Serialize;
use sqlx::PgExecutor;

use crate::error::Result;
use crate::models::AuditLogEntry;

/// 写入一条审计日志，可在事务内调用
pub async fn record<'e, E>(executor: E, entry: &AuditLogEntry) -> Result<i64>
where
    E: PgExecutor<'e>,
{
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO audit_logs
            (table_name, record_id, action, user_id, user_role,
             old_values, new_values, changed_fields, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id
        "#,
    )
    .bind(&entry.table_name)
    .bind(&entry.record_id)
    .bind(entry.action)
    .bind(entry.user_id)
    .bind(entry.user_role)
    .bind(&entry.old_values)
    .bind(&entry.new_values)
    .bind(&entry.changed_fields)
    .bind(&entry.metadata)
    .fetch_one(executor)
    .await?;

    Ok(id)
}

/// 序列化行快照
pub fn snapshot<T: Serialize>(row: &T) -> Option<serde_json::Value> {
    serde_json::to_value(row).ok()
}
