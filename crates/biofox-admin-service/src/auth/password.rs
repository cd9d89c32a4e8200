//! 密码处理

use bcrypt::{DEFAULT_COST, hash, verify};

use crate::error::AdminError;

pub const MIN_PASSWORD_LEN: usize = 8;

/// 使用 bcrypt 生成密码哈希
pub fn hash_password(password: &str) -> Result<String, AdminError> {
    hash(password, DEFAULT_COST).map_err(|e| AdminError::Internal(format!("密码哈希失败: {}", e)))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AdminError> {
    verify(password, hash).map_err(|e| AdminError::Internal(format!("密码验证失败: {}", e)))
}

/// 至少 8 位，且同时包含字母和数字
pub fn validate_password_strength(password: &str) -> Result<(), AdminError> {
    let long_enough = password.chars().count() >= MIN_PASSWORD_LEN;
    let has_letter = password.chars().any(|c| c.is_ascii_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    if long_enough && has_letter && has_digit {
        Ok(())
    } else {
        Err(AdminError::Validation(format!(
            "密码至少 {} 位，且需同时包含字母和数字",
            MIN_PASSWORD_LEN
        )))
    }
}
