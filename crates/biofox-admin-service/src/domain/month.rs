//! 结算月份（YYYY-MM）

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Datelike, Months, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AdminError;

static MONTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(0[1-9]|1[0-2])$").expect("valid month regex"));

/// 结算月份，区间为 [当月 1 日, 次月 1 日)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    first_day: NaiveDate,
}

impl Month {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            first_day: date.with_day(1).unwrap_or(date),
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.first_day
    }

    /// 次月 1 日（不含）
    pub fn end_exclusive(&self) -> NaiveDate {
        self.first_day
            .checked_add_months(Months::new(1))
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn previous(&self) -> Self {
        Self {
            first_day: self
                .first_day
                .checked_sub_months(Months::new(1))
                .unwrap_or(self.first_day),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start() && date < self.end_exclusive()
    }
}

impl FromStr for Month {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AdminError::Validation(format!("月份格式应为 YYYY-MM: {}", s));
        let caps = MONTH_RE.captures(s.trim()).ok_or_else(invalid)?;
        let year: i32 = caps[1].parse().map_err(|_| invalid())?;
        let month: u32 = caps[2].parse().map_err(|_| invalid())?;
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(|first_day| Self { first_day })
            .ok_or_else(invalid)
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first_day.format("%Y-%m"))
    }
}

impl Serialize for Month {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Month {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_parse_and_range() {
        let m: Month = "2026-02".parse().unwrap();
        assert_eq!(m.start(), date("2026-02-01"));
        assert_eq!(m.end_exclusive(), date("2026-03-01"));
        assert!(m.contains(date("2026-02-28")));
        assert!(!m.contains(date("2026-03-01")));
        assert_eq!(m.to_string(), "2026-02");
    }

    #[test]
    fn test_december_rolls_over() {
        let m: Month = "2025-12".parse().unwrap();
        assert_eq!(m.end_exclusive(), date("2026-01-01"));
    }

    #[test]
    fn test_previous() {
        let m: Month = "2026-01".parse().unwrap();
        assert_eq!(m.previous().to_string(), "2025-12");
        assert_eq!(Month::from_date(date("2026-10-16")).previous().to_string(), "2026-09");
    }

    #[test]
    fn test_invalid_formats() {
        for s in ["2026-13", "2026-1", "26-01", "2026/01", "", "2026-00"] {
            assert!(s.parse::<Month>().is_err(), "should reject {s:?}");
        }
    }

    #[test]
    fn test_serde() {
        let m: Month = serde_json::from_str("\"2026-07\"").unwrap();
        assert_eq!(serde_json::to_string(&m).unwrap(), "\"2026-07\"");
        assert!(serde_json::from_str::<Month>("\"July\"").is_err());
    }
}
