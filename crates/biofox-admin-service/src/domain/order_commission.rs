//! 订单佣金计算
//!
//! 订单费率优先级：请求显式给出 > 店铺档案费率 > 默认 10%。
//! 明细费率未给出时沿用订单费率。

use chrono::NaiveDate;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{AdminError, Result};
use crate::models::{CommissionStatus, OrderStatus, UserRole};

pub const DEFAULT_ORDER_COMMISSION_RATE: f64 = 0.1;

/// 单笔金额上限（KRW）
pub const MAX_AMOUNT: i64 = 100_000_000_000;
/// 单条明细数量上限
pub const MAX_ITEM_QUANTITY: i32 = 100_000;

/// 校验费率位于 [0, 1]
pub fn validate_rate(rate: f64) -> Result<f64> {
    if rate.is_finite() && (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(AdminError::InvalidCommissionRate(rate))
    }
}

pub fn validate_amount(amount: i64) -> Result<i64> {
    if amount < 0 {
        return Err(AdminError::InvalidAmount(format!("金额不能为负数: {}", amount)));
    }
    if amount > MAX_AMOUNT {
        return Err(AdminError::InvalidAmount(format!("金额超出上限: {}", amount)));
    }
    Ok(amount)
}

/// 解析订单费率
pub fn resolve_rate(requested: Option<f64>, shop_rate: Option<f64>) -> Result<f64> {
    match requested {
        Some(rate) => validate_rate(rate),
        None => Ok(shop_rate
            .filter(|r| validate_rate(*r).is_ok())
            .unwrap_or(DEFAULT_ORDER_COMMISSION_RATE)),
    }
}

/// 订单归属档案可用的费率来源
///
/// 普通订单记在店主名下；KOL/OL 名下只允许自营订单，且档案费率是自营结算费率，
/// 不参与订单费率的回落。
pub fn order_shop_rate(role: UserRole, is_self_shop_order: bool, profile_rate: Option<f64>) -> Result<Option<f64>> {
    match role {
        UserRole::ShopOwner => Ok(profile_rate),
        UserRole::Kol | UserRole::Ol if is_self_shop_order => Ok(None),
        UserRole::Kol | UserRole::Ol => Err(AdminError::Validation(
            "KOL/OL 名下只能登记自营订单".to_string(),
        )),
        UserRole::Admin => Err(AdminError::Forbidden("订单必须记在店铺名下".to_string())),
    }
}

/// 非管理员创建订单时只能按默认费率登记待处理订单
pub fn ensure_creator_may_price(
    is_admin: bool,
    requested_rate: Option<f64>,
    status: Option<OrderStatus>,
    item_rates_given: bool,
) -> Result<()> {
    if is_admin {
        return Ok(());
    }
    let custom_status = status.is_some_and(|s| s != OrderStatus::Pending);
    if requested_rate.is_some() || item_rates_given || custom_status {
        return Err(AdminError::Forbidden(
            "只有管理员可以指定佣金费率和订单状态".to_string(),
        ));
    }
    Ok(())
}

/// 金额 × 费率，四舍五入到韩元
pub fn commission_amount(amount: i64, rate: f64) -> i64 {
    (amount as f64 * rate).round() as i64
}

/// 订单明细计价结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemPricing {
    pub subtotal: i64,
    pub rate: f64,
    pub commission: i64,
}

pub fn price_item(quantity: i32, unit_price: i64, item_rate: Option<f64>, order_rate: f64) -> Result<ItemPricing> {
    if !(1..=MAX_ITEM_QUANTITY).contains(&quantity) {
        return Err(AdminError::InvalidAmount(format!("明细数量需在 1 到 {} 之间: {}", MAX_ITEM_QUANTITY, quantity)));
    }
    validate_amount(unit_price)?;
    let rate = match item_rate {
        Some(r) => validate_rate(r)?,
        None => order_rate,
    };
    let subtotal = i64::from(quantity)
        .checked_mul(unit_price)
        .filter(|s| *s <= MAX_AMOUNT)
        .ok_or_else(|| AdminError::InvalidAmount(format!("明细小计超出上限: {} × {}", quantity, unit_price)))?;
    Ok(ItemPricing {
        subtotal,
        rate,
        commission: commission_amount(subtotal, rate),
    })
}

/// 订单批量操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBulkAction {
    Complete,
    Cancel,
    ApproveCommission,
    PayCommission,
}

/// 订单与佣金状态组合
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderState {
    pub order_status: OrderStatus,
    pub commission_status: CommissionStatus,
}

impl OrderState {
    /// 已完成且已结算的订单不可取消
    pub fn can_cancel(&self) -> Result<()> {
        if self.order_status == OrderStatus::Completed
            && self.commission_status == CommissionStatus::Paid
        {
            return Err(AdminError::CannotDeletePaidOrder);
        }
        Ok(())
    }

    /// 已结算或已取消的订单不再重算佣金
    pub fn ensure_recalculable(&self) -> Result<()> {
        let settled = matches!(
            self.commission_status,
            CommissionStatus::Paid | CommissionStatus::Cancelled
        );
        if settled || self.order_status == OrderStatus::Cancelled {
            return Err(AdminError::transition(
                self.commission_status,
                CommissionStatus::Calculated,
            ));
        }
        Ok(())
    }

    /// 计算批量操作后的状态
    pub fn apply(&self, action: OrderBulkAction) -> Result<OrderState> {
        match action {
            OrderBulkAction::Complete => match self.order_status {
                OrderStatus::Pending => Ok(OrderState {
                    order_status: OrderStatus::Completed,
                    commission_status: CommissionStatus::Calculated,
                }),
                other => Err(AdminError::transition(other, OrderStatus::Completed)),
            },
            OrderBulkAction::Cancel => {
                self.can_cancel()?;
                Ok(OrderState {
                    order_status: OrderStatus::Cancelled,
                    commission_status: CommissionStatus::Cancelled,
                })
            }
            OrderBulkAction::ApproveCommission => match self.commission_status {
                CommissionStatus::Calculated | CommissionStatus::Adjusted
                    if self.order_status != OrderStatus::Cancelled =>
                {
                    Ok(OrderState {
                        commission_status: CommissionStatus::Approved,
                        ..*self
                    })
                }
                other => Err(AdminError::transition(other, CommissionStatus::Approved)),
            },
            OrderBulkAction::PayCommission => match self.commission_status {
                CommissionStatus::Approved => Ok(OrderState {
                    commission_status: CommissionStatus::Paid,
                    ..*self
                }),
                other => Err(AdminError::transition(other, CommissionStatus::Paid)),
            },
        }
    }
}

/// 订单修改中影响佣金的字段
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrderAmendment {
    pub order_status: Option<OrderStatus>,
    pub total_amount: Option<i64>,
    pub commission_rate: Option<f64>,
    pub recalculate: bool,
}

impl OrderAmendment {
    pub fn touches_commission(&self) -> bool {
        self.order_status.is_some()
            || self.total_amount.is_some()
            || self.commission_rate.is_some()
            || self.recalculate
    }
}

/// 修改计划
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmendmentPlan {
    pub total_amount: i64,
    pub rate: f64,
    pub recalculate: bool,
    pub completing: bool,
}

/// 校验并规划一次订单修改
///
/// 金额、费率、状态和重算只允许管理员修改，店主只能改备注与扩展信息。
/// 取消走 DELETE / 批量 cancel，不经过这里。
pub fn plan_amendment(
    is_admin: bool,
    state: OrderState,
    current_amount: i64,
    current_rate: f64,
    amendment: &OrderAmendment,
) -> Result<AmendmentPlan> {
    if !is_admin && amendment.touches_commission() {
        return Err(AdminError::Forbidden(
            "只有管理员可以修改订单金额、费率和状态".to_string(),
        ));
    }
    if let Some(status) = amendment.order_status {
        if status == OrderStatus::Cancelled && state.order_status != OrderStatus::Cancelled {
            return Err(AdminError::Validation(
                "取消订单请使用 DELETE /api/orders/{id}".to_string(),
            ));
        }
        if state.order_status == OrderStatus::Cancelled && status != OrderStatus::Cancelled {
            return Err(AdminError::transition(state.order_status, status));
        }
    }

    let total_amount = match amendment.total_amount {
        Some(amount) => validate_amount(amount)?,
        None => current_amount,
    };
    let rate = match amendment.commission_rate {
        Some(rate) => validate_rate(rate)?,
        None => current_rate,
    };
    let recalculate =
        amendment.recalculate || total_amount != current_amount || rate != current_rate;
    let completing = amendment.order_status == Some(OrderStatus::Completed)
        && state.order_status != OrderStatus::Completed;

    if recalculate || completing {
        state.ensure_recalculable()?;
    }

    Ok(AmendmentPlan {
        total_amount,
        rate,
        recalculate,
        completing,
    })
}

/// 生成订单号：ORD-YYYYMMDD-NNNN
pub fn generate_order_number<R: Rng>(date: NaiveDate, rng: &mut R) -> String {
    format!("ORD-{}-{:04}", date.format("%Y%m%d"), rng.random_range(0..10_000))
}
