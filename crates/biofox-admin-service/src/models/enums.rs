//! 业务枚举
//!
//! 数据库中以 VARCHAR 存储，取值与 JSON 序列化保持一致（snake_case）。

use serde::{Deserialize, Serialize};

/// 为枚举生成 `as_str` 与 `Display`
macro_rules! impl_as_str {
    ($ty:ty { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// 用户角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum UserRole {
    /// 管理员
    Admin,
    /// 一级分销（KOL）
    Kol,
    /// 二级分销（OL）
    Ol,
    /// 店主
    ShopOwner,
}

impl_as_str!(UserRole {
    Admin => "admin",
    Kol => "kol",
    Ol => "ol",
    ShopOwner => "shop_owner",
});

impl UserRole {
    /// 是否为可拥有下级店铺的分销角色
    pub fn is_affiliate(&self) -> bool {
        matches!(self, Self::Kol | Self::Ol)
    }

    /// 自营店铺佣金默认费率
    pub fn default_self_shop_rate(&self) -> f64 {
        match self {
            Self::Kol => 0.30,
            Self::Ol => 0.20,
            _ => 0.0,
        }
    }
}

/// 账号审核状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum ProfileStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl_as_str!(ProfileStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

/// 店铺归属关系类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum RelationshipType {
    #[default]
    Direct,
    /// 从其他 KOL 转入
    Transferred,
    Temporary,
}

impl_as_str!(RelationshipType {
    Direct => "direct",
    Transferred => "transferred",
    Temporary => "temporary",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum ProductCategory {
    Skincare,
    Device,
    Supplement,
    Cosmetic,
    Accessory,
}

impl_as_str!(ProductCategory {
    Skincare => "skincare",
    Device => "device",
    Supplement => "supplement",
    Cosmetic => "cosmetic",
    Accessory => "accessory",
});

/// 订单状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Completed,
    Cancelled,
    Refunded,
}

impl_as_str!(OrderStatus {
    Pending => "pending",
    Completed => "completed",
    Cancelled => "cancelled",
    Refunded => "refunded",
});

/// 订单 / 器械销售的佣金状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum CommissionStatus {
    #[default]
    Calculated,
    Adjusted,
    Approved,
    Paid,
    Cancelled,
}

impl_as_str!(CommissionStatus {
    Calculated => "calculated",
    Adjusted => "adjusted",
    Approved => "approved",
    Paid => "paid",
    Cancelled => "cancelled",
});

/// 月度佣金结算状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum CalculationStatus {
    #[default]
    Calculated,
    /// 人工调整过
    Adjusted,
    Reviewed,
    Approved,
    Paid,
    Cancelled,
}

impl_as_str!(CalculationStatus {
    Calculated => "calculated",
    Adjusted => "adjusted",
    Reviewed => "reviewed",
    Approved => "approved",
    Paid => "paid",
    Cancelled => "cancelled",
});

/// 临床案例对象
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum SubjectType {
    /// 店主本人
    #[serde(rename = "self")]
    #[sqlx(rename = "self")]
    Personal,
    Customer,
}

impl_as_str!(SubjectType {
    Personal => "self",
    Customer => "customer",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum CaseStatus {
    #[default]
    InProgress,
    Completed,
    Paused,
    Cancelled,
    Archived,
}

impl_as_str!(CaseStatus {
    InProgress => "in_progress",
    Completed => "completed",
    Paused => "paused",
    Cancelled => "cancelled",
    Archived => "archived",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum ConsentStatus {
    NoConsent,
    Consented,
    #[default]
    Pending,
}

impl_as_str!(ConsentStatus {
    NoConsent => "no_consent",
    Consented => "consented",
    Pending => "pending",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

/// 临床照片角度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum PhotoType {
    Front,
    LeftSide,
    RightSide,
}

impl_as_str!(PhotoType {
    Front => "front",
    LeftSide => "left_side",
    RightSide => "right_side",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum NotificationType {
    System,
    CrmUpdate,
    OrderCreated,
    CommissionPaid,
    ClinicalProgress,
    ApprovalRequired,
    StatusChanged,
    Reminder,
}

impl_as_str!(NotificationType {
    System => "system",
    CrmUpdate => "crm_update",
    OrderCreated => "order_created",
    CommissionPaid => "commission_paid",
    ClinicalProgress => "clinical_progress",
    ApprovalRequired => "approval_required",
    StatusChanged => "status_changed",
    Reminder => "reminder",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl_as_str!(NotificationPriority {
    Low => "low",
    Normal => "normal",
    High => "high",
    Urgent => "urgent",
});

impl NotificationPriority {
    /// 排序权重，越大越靠前
    pub fn rank(&self) -> i32 {
        match self {
            Self::Urgent => 4,
            Self::High => 3,
            Self::Normal => 2,
            Self::Low => 1,
        }
    }
}

/// 审计动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "varchar", rename_all = "UPPERCASE")]
pub enum AuditAction {
    Insert,
    Update,
    Delete,
}

impl_as_str!(AuditAction {
    Insert => "INSERT",
    Update => "UPDATE",
    Delete => "DELETE",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_matches_as_str() {
        assert_eq!(serde_json::to_string(&UserRole::ShopOwner).unwrap(), "\"shop_owner\"");
        assert_eq!(serde_json::to_string(&SubjectType::Personal).unwrap(), "\"self\"");
        assert_eq!(serde_json::to_string(&CaseStatus::InProgress).unwrap(), "\"in_progress\"");
        assert_eq!(serde_json::to_string(&AuditAction::Insert).unwrap(), "\"INSERT\"");
        assert_eq!(
            serde_json::to_string(&NotificationType::CommissionPaid).unwrap(),
            format!("\"{}\"", NotificationType::CommissionPaid.as_str())
        );
    }

    #[test]
    fn test_parse_from_json() {
        let s: SubjectType = serde_json::from_str("\"self\"").unwrap();
        assert_eq!(s, SubjectType::Personal);
        let p: PhotoType = serde_json::from_str("\"left_side\"").unwrap();
        assert_eq!(p, PhotoType::LeftSide);
        assert!(serde_json::from_str::<UserRole>("\"superuser\"").is_err());
    }

    #[test]
    fn test_role_helpers() {
        assert!(UserRole::Kol.is_affiliate());
        assert!(UserRole::Ol.is_affiliate());
        assert!(!UserRole::ShopOwner.is_affiliate());
        assert_eq!(UserRole::Kol.default_self_shop_rate(), 0.30);
        assert_eq!(UserRole::Ol.default_self_shop_rate(), 0.20);
    }

    #[test]
    fn test_priority_rank_order() {
        assert!(NotificationPriority::Urgent.rank() > NotificationPriority::High.rank());
        assert!(NotificationPriority::High.rank() > NotificationPriority::Normal.rank());
        assert!(NotificationPriority::Normal.rank() > NotificationPriority::Low.rank());
    }

    #[test]
    fn test_defaults() {
        assert_eq!(ProfileStatus::default(), ProfileStatus::Pending);
        assert_eq!(ConsentStatus::default(), ConsentStatus::Pending);
        assert_eq!(CalculationStatus::default().to_string(), "calculated");
    }
}
