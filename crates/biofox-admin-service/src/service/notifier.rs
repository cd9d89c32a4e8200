//! 业务事件通知

use chrono::{DateTime, Utc};
use biofox_shared::observability::metrics;
use sqlx::{PgExecutor, PgPool};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{NotificationPriority, NotificationType};

/// 待创建的通知
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub related_type: Option<String>,
    pub related_id: Option<Uuid>,
    pub action_url: Option<String>,
    pub priority: NotificationPriority,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewNotification {
    pub fn new(
        user_id: Uuid,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            notification_type,
            title: title.into(),
            message: message.into(),
            related_type: None,
            related_id: None,
            action_url: None,
            priority: NotificationPriority::Normal,
            expires_at: None,
        }
    }

    pub fn related(mut self, related_type: &str, related_id: Uuid) -> Self {
        self.related_type = Some(related_type.to_string());
        self.related_id = Some(related_id);
        self
    }

    pub fn priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }
}

pub async fn send<'e, E>(executor: E, n: &NewNotification) -> Result<Uuid>
where
    E: PgExecutor<'e>,
{
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO notifications
            (user_id, type, title, message, related_type, related_id,
             action_url, priority, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id
        "#,
    )
    .bind(n.user_id)
    .bind(n.notification_type)
    .bind(&n.title)
    .bind(&n.message)
    .bind(&n.related_type)
    .bind(n.related_id)
    .bind(&n.action_url)
    .bind(n.priority)
    .bind(n.expires_at)
    .fetch_one(executor)
    .await?;

    metrics::record_notification_created(n.notification_type.as_str());
    Ok(id)
}

/// 业务主流程已提交后发送，失败只记录日志
pub async fn send_best_effort(pool: &PgPool, n: NewNotification) {
    if let Err(e) = send(pool, &n).await {
        warn!(
            user_id = %n.user_id,
            notification_type = %n.notification_type,
            error = %e,
            "Failed to create notification"
        );
    }
}
