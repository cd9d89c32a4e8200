//! 认证模块
//!
//! 提供 JWT Token 生成、验证、密码处理以及当前用户提取器

mod current_user;
pub mod login_limit;
mod jwt;
mod password;

pub use current_user::CurrentUser;
pub use jwt::{Claims, JwtConfig, JwtManager};
pub use password::{hash_password, validate_password_strength, verify_password};
