//! 月度佣金汇总与结算状态流转

use serde::{Deserialize, Serialize};

use super::order_commission::{commission_amount, validate_rate};
use crate::error::{AdminError, Result};
use crate::models::{CalculationStatus, UserRole};

/// 单个 KOL 当月的计算输入
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionInputs {
    pub subordinate_sales: i64,
    pub subordinate_commission: i64,
    pub self_shop_sales: i64,
    pub self_shop_rate: f64,
    pub device_count: i64,
    pub device_commission: i64,
    pub manual_adjustment: i64,
}

/// 计算结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionBreakdown {
    pub subordinate_commission: i64,
    pub self_shop_commission: i64,
    pub device_commission: i64,
    pub manual_adjustment: i64,
    pub total_commission: i64,
}

impl CommissionInputs {
    pub fn compute(&self) -> CommissionBreakdown {
        let self_shop_commission = commission_amount(self.self_shop_sales, self.self_shop_rate);
        CommissionBreakdown {
            subordinate_commission: self.subordinate_commission,
            self_shop_commission,
            device_commission: self.device_commission,
            manual_adjustment: self.manual_adjustment,
            total_commission: self.subordinate_commission
                + self_shop_commission
                + self.device_commission
                + self.manual_adjustment,
        }
    }
}

/// 自营店铺费率：档案费率优先，否则按角色默认
pub fn self_shop_rate(role: UserRole, profile_rate: Option<f64>) -> f64 {
    profile_rate
        .filter(|r| validate_rate(*r).is_ok())
        .unwrap_or_else(|| role.default_self_shop_rate())
}

/// 校验结算状态流转
pub fn check_transition(from: CalculationStatus, to: CalculationStatus) -> Result<()> {
    use CalculationStatus::*;

    let allowed = match from {
        Calculated | Adjusted => matches!(to, Reviewed | Approved | Cancelled),
        Reviewed => matches!(to, Approved | Cancelled),
        Approved => matches!(to, Paid | Cancelled),
        Paid | Cancelled => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(AdminError::transition(from, to))
    }
}

/// 人工调整后状态；终态不可调整
pub fn status_after_adjustment(current: CalculationStatus) -> Result<CalculationStatus> {
    match current {
        CalculationStatus::Paid | CalculationStatus::Cancelled | CalculationStatus::Approved => {
            Err(AdminError::transition(current, CalculationStatus::Adjusted))
        }
        _ => Ok(CalculationStatus::Adjusted),
    }
}

/// 人工调整记录，追加到 calculation_details.adjustments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    pub amount: i64,
    pub reason: String,
    pub adjusted_by: uuid::Uuid,
    pub adjusted_at: chrono::DateTime<chrono::Utc>,
}

/// 向 details 追加调整记录，details 不是对象时重建
pub fn append_adjustment(details: &mut serde_json::Value, record: &AdjustmentRecord) -> Result<()> {
    if !details.is_object() {
        *details = serde_json::json!({});
    }
    let entry = serde_json::to_value(record)?;
    if let Some(obj) = details.as_object_mut() {
        let list = obj
            .entry("adjustments")
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        if !list.is_array() {
            *list = serde_json::Value::Array(Vec::new());
        }
        if let Some(arr) = list.as_array_mut() {
            arr.push(entry);
        }
    }
    Ok(())
}
