//! HTTP 请求处理器
//!
//! 按业务领域拆分，每个模块对应一组 REST 端点

pub mod audit_logs;
pub mod auth;
pub mod clinical;
pub mod commissions;
pub mod dashboard;
pub mod device_sales;
pub mod health;
pub mod notifications;
pub mod orders;
pub mod products;
pub mod profiles;
pub mod relationships;
pub mod sales;
pub mod sales_journals;
pub mod shops;
