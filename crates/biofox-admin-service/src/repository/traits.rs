//! 仓储 Trait 定义

use async_trait::async_trait;
use uuid::Uuid;

use super::{Affiliate, CalculationRecord, ExistingCalculation, MonthlyFigures, SaveOutcome};
use crate::domain::Month;
use crate::error::Result;

/// 月度佣金仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommissionRepositoryTrait: Send + Sync {
    /// 已审核的 KOL / OL；指定 id 时只返回该用户
    async fn list_affiliates(&self, kol_id: Option<Uuid>) -> Result<Vec<Affiliate>>;

    /// 汇总某 KOL 当月订单与器械数据
    async fn load_figures(&self, kol_id: Uuid, month: Month) -> Result<MonthlyFigures>;

    async fn find_calculation(&self, kol_id: Uuid, month: Month) -> Result<Option<ExistingCalculation>>;

    /// 按 (kol_id, month) 写入，已支付的行不覆盖
    async fn save_calculation(&self, record: &CalculationRecord) -> Result<SaveOutcome>;
}
