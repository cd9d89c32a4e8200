//! 临床案例入参规整

use crate::error::{AdminError, Result};
use crate::models::{CaseStatus, ConsentStatus, SubjectType};

pub const MAX_AGE: i32 = 150;

/// 解析案例状态，兼容旧客户端的 `active`
pub fn parse_case_status(raw: &str) -> Result<CaseStatus> {
    match raw.trim() {
        "active" | "in_progress" => Ok(CaseStatus::InProgress),
        "completed" => Ok(CaseStatus::Completed),
        "paused" => Ok(CaseStatus::Paused),
        "cancelled" => Ok(CaseStatus::Cancelled),
        "archived" => Ok(CaseStatus::Archived),
        other => Err(AdminError::Validation(format!("未知的案例状态: {}", other))),
    }
}

/// 显式 consentStatus 优先，其次 consentReceived
pub fn resolve_consent(
    explicit: Option<ConsentStatus>,
    consent_received: Option<bool>,
) -> ConsentStatus {
    match (explicit, consent_received) {
        (Some(status), _) => status,
        (None, Some(true)) => ConsentStatus::Consented,
        (None, Some(false)) => ConsentStatus::NoConsent,
        (None, None) => ConsentStatus::Pending,
    }
}

/// 未填写姓名时的默认值
pub fn default_case_name(subject: SubjectType) -> &'static str {
    match subject {
        SubjectType::Personal => "본인",
        SubjectType::Customer => "고객",
    }
}

pub fn resolve_case_name(subject: SubjectType, name: Option<&str>) -> String {
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .map(String::from)
        .unwrap_or_else(|| default_case_name(subject).to_string())
}

pub fn validate_age(age: Option<i32>) -> Result<()> {
    match age {
        Some(a) if !(0..=MAX_AGE).contains(&a) => {
            Err(AdminError::Validation(format!("年龄必须在 0 到 {} 之间", MAX_AGE)))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_alias() {
        assert_eq!(parse_case_status("active").unwrap(), CaseStatus::InProgress);
        assert_eq!(parse_case_status("archived").unwrap(), CaseStatus::Archived);
        assert_eq!(parse_case_status(" completed ").unwrap(), CaseStatus::Completed);
        assert!(parse_case_status("done").is_err());
    }

    #[test]
    fn test_consent_resolution() {
        assert_eq!(
            resolve_consent(Some(ConsentStatus::Pending), Some(true)),
            ConsentStatus::Pending
        );
        assert_eq!(resolve_consent(None, Some(true)), ConsentStatus::Consented);
        assert_eq!(resolve_consent(None, Some(false)), ConsentStatus::NoConsent);
        assert_eq!(resolve_consent(None, None), ConsentStatus::Pending);
    }

    #[test]
    fn test_default_names() {
        assert_eq!(resolve_case_name(SubjectType::Personal, None), "본인");
        assert_eq!(resolve_case_name(SubjectType::Customer, Some("  ")), "고객");
        assert_eq!(resolve_case_name(SubjectType::Customer, Some(" 김민지 ")), "김민지");
    }

    #[test]
    fn test_age_bounds() {
        assert!(validate_age(None).is_ok());
        assert!(validate_age(Some(0)).is_ok());
        assert!(validate_age(Some(150)).is_ok());
        assert!(validate_age(Some(151)).is_err());
        assert!(validate_age(Some(-1)).is_err());
    }
}
