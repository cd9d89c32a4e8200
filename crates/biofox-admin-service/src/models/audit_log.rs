//! 审计日志实体
//!
//! 业务变更在同一事务内显式写入 audit_logs，记录变更前后快照与变更字段。

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{AuditAction, UserRole};

/// 审计日志条目
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: i64,
    /// 被修改的表
    pub table_name: String,
    pub record_id: String,
    pub action: AuditAction,
    pub user_id: Option<Uuid>,
    pub user_role: Option<UserRole>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    /// 仅 UPDATE 有意义
    pub changed_fields: Vec<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(table_name: &str, record_id: impl ToString, action: AuditAction) -> Self {
        Self {
            id: 0,
            table_name: table_name.to_string(),
            record_id: record_id.to_string(),
            action,
            user_id: None,
            user_role: None,
            old_values: None,
            new_values: None,
            changed_fields: Vec::new(),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    /// 设置操作人
    pub fn with_actor(mut self, user_id: Uuid, role: UserRole) -> Self {
        self.user_id = Some(user_id);
        self.user_role = Some(role);
        self
    }

    /// 设置变更前后快照，并计算变更字段
    pub fn with_values(
        mut self,
        old: Option<serde_json::Value>,
        new: Option<serde_json::Value>,
    ) -> Self {
        self.changed_fields = changed_fields(old.as_ref(), new.as_ref());
        self.old_values = old;
        self.new_values = new;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// 对比两个 JSON 对象的顶层字段，返回值不同的字段名（有序）
pub fn changed_fields(
    old: Option<&serde_json::Value>,
    new: Option<&serde_json::Value>,
) -> Vec<String> {
    let (Some(old), Some(new)) = (
        old.and_then(|v| v.as_object()),
        new.and_then(|v| v.as_object()),
    ) else {
        return Vec::new();
    };

    let mut fields: Vec<String> = old
        .keys()
        .chain(new.keys())
        .filter(|k| old.get(*k) != new.get(*k))
        .cloned()
        .collect();
    fields.sort();
    fields.dedup();
    fields
}
