//! 纯业务规则
//!
//! 不依赖数据库，供 handler 与 worker 复用。

pub mod clinical;
pub mod device_tier;
pub mod hierarchy;
pub mod journal;
pub mod month;
pub mod monthly_commission;
pub mod order_commission;
pub mod sales_analytics;

pub use device_tier::{
    AccumulatorState, DevicePricing, DeviceTier, TierSimulation, price_device_sale,
    simulate_tier_change,
};
pub use month::Month;
pub use monthly_commission::{CommissionBreakdown, CommissionInputs};
pub use order_commission::{OrderBulkAction, OrderState};
