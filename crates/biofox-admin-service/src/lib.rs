//! BIOFOX 多角色管理后台服务
//!
//! 为管理员、KOL/OL 分销商和店主提供 REST API。
//!
//! ## 核心功能
//!
//! - **账号与店铺**：注册审核、店铺档案、上下级归属关系与组织树
//! - **订单与器械**：订单佣金、器械销售阶梯佣金与 KOL 累计台数
//! - **月度佣金**：按月汇总计算、人工调整、审批与支付
//! - **临床案例**：案例、照片与知情同意书
//! - **运营支撑**：站内通知、审计日志、销售日志与看板
//!
//! ## 模块结构
//!
//! - `auth`: JWT 与密码处理、当前用户提取器
//! - `domain`: 纯业务计算（阶梯、佣金、月份、层级）
//! - `handlers`: HTTP 请求处理器
//! - `repository` / `service`: 数据访问与跨处理器的业务流程
//! - `worker`: 定时佣金计算

pub mod auth;
pub mod domain;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod service;
pub mod state;
pub mod worker;

pub use dto::{ApiResponse, PageResponse, PaginationParams};
pub use error::{AdminError, Result};
pub use state::AppState;
