//! 业务实体与枚举

pub mod audit_log;
pub mod clinical;
pub mod commission;
pub mod device_sale;
pub mod enums;
pub mod notification;
pub mod order;
pub mod product;
pub mod profile;
pub mod relationship;
pub mod sales_journal;

pub use audit_log::AuditLogEntry;
pub use clinical::{ClinicalCase, ClinicalPhoto, ConsentFile};
pub use commission::CommissionCalculation;
pub use device_sale::DeviceSale;
pub use enums::{
    AuditAction, CalculationStatus, CaseStatus, CommissionStatus, ConsentStatus, Gender,
    NotificationPriority, NotificationType, OrderStatus, PhotoType, ProductCategory,
    ProfileStatus, RelationshipType, SubjectType, UserRole,
};
pub use notification::Notification;
pub use order::{Order, OrderItem};
pub use product::Product;
pub use profile::{PROFILE_COLUMNS, Profile, ProfileSummary};
pub use relationship::ShopRelationship;
pub use sales_journal::SalesJournal;
