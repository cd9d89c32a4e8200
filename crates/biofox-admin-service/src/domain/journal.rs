//! 销售日志内容处理

use crate::error::{AdminError, Result};

/// 统计接口中最近日志的内容截断长度（字符）
pub const PREVIEW_CHARS: usize = 100;

/// 去除首尾空白，空串视为缺失
pub fn required_field(name: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AdminError::Validation(format!("{} 不能为空", name)));
    }
    Ok(trimmed.to_string())
}

/// 按字符截断，超长时追加省略号
pub fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_string();
    }
    let mut s: String = content.chars().take(PREVIEW_CHARS).collect();
    s.push_str("...");
    s
}
