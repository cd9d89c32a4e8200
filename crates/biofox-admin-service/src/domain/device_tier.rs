//! 器械佣金阶梯
//!
//! KOL 名下净销售台数达到 5 台后进入高阶梯，单台佣金由 150 万提升到 250 万韩元。
//! 销售按售前净台数定档，退货按退货后的净台数定档，退货佣金为负。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AdminError, Result};

/// 进入高阶梯所需的净台数
pub const TIER_THRESHOLD: i32 = 5;
pub const TIER_1_4_UNIT_COMMISSION: i64 = 1_500_000;
pub const TIER_5_PLUS_UNIT_COMMISSION: i64 = 2_500_000;
/// 单笔销售/退货的台数上限
pub const MAX_DEVICE_QUANTITY: i32 = 1_000;
pub const MIN_DEVICE_QUANTITY: i32 = -MAX_DEVICE_QUANTITY;

/// 佣金阶梯
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
pub enum DeviceTier {
    /// 1-4 台
    #[default]
    #[serde(rename = "tier_1_4")]
    #[sqlx(rename = "tier_1_4")]
    Tier1To4,
    /// 5 台及以上
    #[serde(rename = "tier_5_plus")]
    #[sqlx(rename = "tier_5_plus")]
    Tier5Plus,
}

impl DeviceTier {
    pub fn for_net_devices(net_devices: i32) -> Self {
        if net_devices >= TIER_THRESHOLD {
            Self::Tier5Plus
        } else {
            Self::Tier1To4
        }
    }

    /// 单台佣金（KRW）
    pub fn unit_commission(&self) -> i64 {
        match self {
            Self::Tier1To4 => TIER_1_4_UNIT_COMMISSION,
            Self::Tier5Plus => TIER_5_PLUS_UNIT_COMMISSION,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tier1To4 => "tier_1_4",
            Self::Tier5Plus => "tier_5_plus",
        }
    }
}

/// 单笔器械销售的定价结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevicePricing {
    pub tier: DeviceTier,
    /// |quantity| × 单价
    pub standard_commission: i64,
    /// quantity × 单价，退货为负
    pub actual_commission: i64,
}

/// 按当前净台数为一笔销售（quantity > 0）或退货（quantity < 0）定价
pub fn price_device_sale(current_net: i32, quantity: i32) -> Result<DevicePricing> {
    if quantity == 0 {
        return Err(AdminError::InvalidAmount("数量不能为 0".to_string()));
    }
    if !(MIN_DEVICE_QUANTITY..=MAX_DEVICE_QUANTITY).contains(&quantity) {
        return Err(AdminError::InvalidAmount(format!(
            "单笔数量需在 {} 到 {} 之间: {}",
            MIN_DEVICE_QUANTITY, MAX_DEVICE_QUANTITY, quantity
        )));
    }

    let tier = if quantity > 0 {
        DeviceTier::for_net_devices(current_net)
    } else {
        // 退货超过净台数时按 0 台定档
        DeviceTier::for_net_devices(current_net.saturating_add(quantity).max(0))
    };

    let unit = tier.unit_commission();
    Ok(DevicePricing {
        tier,
        standard_commission: i64::from(quantity.unsigned_abs()) * unit,
        actual_commission: i64::from(quantity) * unit,
    })
}

/// KOL 器械累计状态（kol_device_accumulator 行）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AccumulatorState {
    pub total_devices_sold: i32,
    pub total_devices_returned: i32,
    pub net_devices_sold: i32,
    pub current_tier: DeviceTier,
    /// 按 1-4 档计价的净台数
    pub tier_1_4_count: i32,
    /// 按 5+ 档计价的净台数
    pub tier_5_plus_count: i32,
    pub tier_changed_at: Option<DateTime<Utc>>,
}

impl AccumulatorState {
    /// 应用一笔已定价的销售/退货，返回阶梯是否变化
    ///
    /// 计数溢出时返回 `InvalidAmount`，状态保持不变。
    pub fn apply(&mut self, quantity: i32, priced_tier: DeviceTier, now: DateTime<Utc>) -> Result<bool> {
        let overflow = || AdminError::InvalidAmount(format!("器械累计台数溢出: {}", quantity));

        let (sold, returned) = if quantity > 0 {
            (
                self.total_devices_sold.checked_add(quantity).ok_or_else(overflow)?,
                self.total_devices_returned,
            )
        } else {
            let magnitude = i32::try_from(quantity.unsigned_abs()).map_err(|_| overflow())?;
            (
                self.total_devices_sold,
                self.total_devices_returned.checked_add(magnitude).ok_or_else(overflow)?,
            )
        };
        let net = sold.checked_sub(returned).ok_or_else(overflow)?;
        let (tier_1_4, tier_5_plus) = match priced_tier {
            DeviceTier::Tier1To4 => (
                self.tier_1_4_count.checked_add(quantity).ok_or_else(overflow)?,
                self.tier_5_plus_count,
            ),
            DeviceTier::Tier5Plus => (
                self.tier_1_4_count,
                self.tier_5_plus_count.checked_add(quantity).ok_or_else(overflow)?,
            ),
        };

        self.total_devices_sold = sold;
        self.total_devices_returned = returned;
        self.net_devices_sold = net;
        self.tier_1_4_count = tier_1_4;
        self.tier_5_plus_count = tier_5_plus;

        let new_tier = DeviceTier::for_net_devices(net);
        let changed = new_tier != self.current_tier;
        if changed {
            self.current_tier = new_tier;
            self.tier_changed_at = Some(now);
        }
        Ok(changed)
    }

    /// 按销售日期顺序重放全部记录，重建累计状态
    ///
    /// 数量为 0 的脏数据跳过。
    pub fn replay<I>(quantities: I, now: DateTime<Utc>) -> Result<Self>
    where
        I: IntoIterator<Item = i32>,
    {
        let mut state = Self::default();
        for quantity in quantities {
            if quantity == 0 {
                continue;
            }
            let pricing = price_device_sale(state.net_devices_sold, quantity)?;
            state.apply(quantity, pricing.tier, now)?;
        }
        Ok(state)
    }
}

/// 阶梯变化模拟结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSimulation {
    pub current_net_devices: i32,
    pub current_tier: DeviceTier,
    pub current_unit_commission: i64,
    pub new_net_devices: i32,
    pub new_tier: DeviceTier,
    pub new_unit_commission: i64,
    pub tier_changed: bool,
    /// (新单价 - 现单价) × |additional|
    pub commission_difference: i64,
}

pub fn simulate_tier_change(state: &AccumulatorState, additional: i32) -> Result<TierSimulation> {
    if additional == 0 {
        return Err(AdminError::Validation("additional 不能为 0".to_string()));
    }

    let current_tier = state.current_tier;
    let new_net = state
        .net_devices_sold
        .checked_add(additional)
        .ok_or_else(|| AdminError::Validation(format!("additional 超出范围: {}", additional)))?;
    let new_tier = DeviceTier::for_net_devices(new_net);

    Ok(TierSimulation {
        current_net_devices: state.net_devices_sold,
        current_tier,
        current_unit_commission: current_tier.unit_commission(),
        new_net_devices: new_net,
        new_tier,
        new_unit_commission: new_tier.unit_commission(),
        tier_changed: current_tier != new_tier,
        commission_difference: (new_tier.unit_commission() - current_tier.unit_commission())
            * i64::from(additional.unsigned_abs()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_threshold() {
        assert_eq!(DeviceTier::for_net_devices(0), DeviceTier::Tier1To4);
        assert_eq!(DeviceTier::for_net_devices(4), DeviceTier::Tier1To4);
        assert_eq!(DeviceTier::for_net_devices(5), DeviceTier::Tier5Plus);
        assert_eq!(DeviceTier::for_net_devices(120), DeviceTier::Tier5Plus);
    }

    #[test]
    fn test_sale_uses_pre_sale_count() {
        // 售前 4 台，这一笔 3 台仍按低档计价
        let p = price_device_sale(4, 3).unwrap();
        assert_eq!(p.tier, DeviceTier::Tier1To4);
        assert_eq!(p.standard_commission, 4_500_000);
        assert_eq!(p.actual_commission, 4_500_000);

        let p = price_device_sale(5, 1).unwrap();
        assert_eq!(p.tier, DeviceTier::Tier5Plus);
        assert_eq!(p.actual_commission, 2_500_000);
    }

    #[test]
    fn test_return_uses_post_return_count() {
        // 6 台退 1 台 -> 5 台，仍是高档
        let p = price_device_sale(6, -1).unwrap();
        assert_eq!(p.tier, DeviceTier::Tier5Plus);
        assert_eq!(p.standard_commission, 2_500_000);
        assert_eq!(p.actual_commission, -2_500_000);

        // 5 台退 1 台 -> 4 台，按低档冲回
        let p = price_device_sale(5, -1).unwrap();
        assert_eq!(p.tier, DeviceTier::Tier1To4);
        assert_eq!(p.actual_commission, -1_500_000);
    }

    #[test]
    fn test_return_exceeding_net_clamps_to_zero() {
        let p = price_device_sale(1, -3).unwrap();
        assert_eq!(p.tier, DeviceTier::Tier1To4);
        assert_eq!(p.actual_commission, -4_500_000);
    }

    #[test]
    fn test_zero_quantity_rejected() {
        assert!(matches!(
            price_device_sale(3, 0),
            Err(AdminError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_accumulator_crosses_threshold() {
        let now = Utc::now();
        let mut state = AccumulatorState::default();

        let p = price_device_sale(state.net_devices_sold, 4).unwrap();
        assert!(!state.apply(4, p.tier, now).unwrap());
        assert_eq!(state.tier_1_4_count, 4);

        let p = price_device_sale(state.net_devices_sold, 2).unwrap();
        assert_eq!(p.tier, DeviceTier::Tier1To4);
        assert!(state.apply(2, p.tier, now).unwrap());
        assert_eq!(state.current_tier, DeviceTier::Tier5Plus);
        assert_eq!(state.net_devices_sold, 6);
        assert_eq!(state.tier_changed_at, Some(now));

        let p = price_device_sale(state.net_devices_sold, 1).unwrap();
        state.apply(1, p.tier, now).unwrap();
        assert_eq!(state.tier_5_plus_count, 1);
        assert_eq!(state.tier_1_4_count, 6);
    }

    #[test]
    fn test_accumulator_return_drops_tier() {
        let now = Utc::now();
        let mut state = AccumulatorState::replay([3, 2], now).unwrap();
        assert_eq!(state.net_devices_sold, 5);
        assert_eq!(state.current_tier, DeviceTier::Tier5Plus);

        let p = price_device_sale(state.net_devices_sold, -1).unwrap();
        assert!(state.apply(-1, p.tier, now).unwrap());
        assert_eq!(state.total_devices_returned, 1);
        assert_eq!(state.net_devices_sold, 4);
        assert_eq!(state.current_tier, DeviceTier::Tier1To4);
        assert_eq!(state.tier_1_4_count, 4);
    }

    #[test]
    fn test_replay_skips_zero_quantities() {
        let state = AccumulatorState::replay([2, 0, 1], Utc::now()).unwrap();
        assert_eq!(state.total_devices_sold, 3);
        assert_eq!(state.net_devices_sold, 3);
    }

    #[test]
    fn test_quantity_out_of_range_rejected() {
        for quantity in [MAX_DEVICE_QUANTITY + 1, MIN_DEVICE_QUANTITY - 1, i32::MAX, i32::MIN] {
            assert!(matches!(
                price_device_sale(0, quantity),
                Err(AdminError::InvalidAmount(_))
            ));
        }
        assert!(price_device_sale(0, MAX_DEVICE_QUANTITY).is_ok());
        assert!(price_device_sale(i32::MAX, MIN_DEVICE_QUANTITY).is_ok());
    }

    #[test]
    fn test_accumulator_overflow_leaves_state_untouched() {
        let now = Utc::now();
        let mut state = AccumulatorState::default();
        assert!(state.apply(i32::MAX, DeviceTier::Tier1To4, now).is_ok());
        let snapshot = state.clone();

        assert!(matches!(
            state.apply(1, DeviceTier::Tier5Plus, now),
            Err(AdminError::InvalidAmount(_))
        ));
        assert_eq!(state, snapshot);

        let mut state = AccumulatorState::default();
        assert!(matches!(
            state.apply(i32::MIN, DeviceTier::Tier1To4, now),
            Err(AdminError::InvalidAmount(_))
        ));
        assert_eq!(state, AccumulatorState::default());
    }

    #[test]
    fn test_simulation() {
        let state = AccumulatorState::replay([4], Utc::now()).unwrap();
        let sim = simulate_tier_change(&state, 2).unwrap();
        assert!(sim.tier_changed);
        assert_eq!(sim.new_net_devices, 6);
        assert_eq!(sim.new_tier, DeviceTier::Tier5Plus);
        assert_eq!(sim.commission_difference, 2_000_000);

        let sim = simulate_tier_change(&state, -1).unwrap();
        assert!(!sim.tier_changed);
        assert_eq!(sim.commission_difference, 0);

        assert!(simulate_tier_change(&state, 0).is_err());
        assert!(simulate_tier_change(&state, i32::MAX).is_err());
    }

    #[test]
    fn test_tier_serde() {
        assert_eq!(
            serde_json::to_string(&DeviceTier::Tier5Plus).unwrap(),
            "\"tier_5_plus\""
        );
        let t: DeviceTier = serde_json::from_str("\"tier_1_4\"").unwrap();
        assert_eq!(t, DeviceTier::Tier1To4);
    }
}
