//! 数据访问层
//!
//! 以 trait 抽象月度佣金计算所需的查询，便于服务层 mock 测试。

mod commission_repo;
mod traits;

pub use commission_repo::{
    Affiliate, CalculationRecord, ExistingCalculation, MonthlyFigures, PgCommissionRepository,
    SaveOutcome,
};
pub use traits::CommissionRepositoryTrait;

#[cfg(test)]
pub use traits::MockCommissionRepositoryTrait;
