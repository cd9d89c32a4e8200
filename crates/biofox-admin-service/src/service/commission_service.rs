//! 月度佣金计算服务
//!
//! 管理员手动触发与定时任务共用。

use std::sync::Arc;
use std::time::Instant;

use biofox_shared::observability::metrics;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::Month;
use crate::domain::monthly_commission::{self, CommissionBreakdown, CommissionInputs};
use crate::error::{AdminError, Result};
use crate::models::CalculationStatus;
use crate::repository::{
    Affiliate, CalculationRecord, CommissionRepositoryTrait, MonthlyFigures, SaveOutcome,
};

/// 一次批量计算的汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationSummary {
    pub month: String,
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped_paid: usize,
    /// 合计不为正且此前没有记录、因此未写入的人数
    pub skipped_empty: usize,
    pub total_amount: i64,
}

/// 实时估算结果（不落库）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionEstimate {
    pub month: String,
    pub kol_id: Uuid,
    pub inputs: CommissionInputs,
    pub breakdown: CommissionBreakdown,
}

pub struct CommissionService<R: CommissionRepositoryTrait> {
    repo: Arc<R>,
}

impl<R: CommissionRepositoryTrait> CommissionService<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    fn build_inputs(affiliate: &Affiliate, figures: MonthlyFigures, manual_adjustment: i64) -> CommissionInputs {
        CommissionInputs {
            subordinate_sales: figures.subordinate_sales,
            subordinate_commission: figures.subordinate_commission,
            self_shop_sales: figures.self_shop_sales,
            self_shop_rate: monthly_commission::self_shop_rate(affiliate.role, affiliate.commission_rate),
            device_count: figures.device_count,
            device_commission: figures.device_commission,
            manual_adjustment,
        }
    }

    /// 计算并写入指定月份的佣金
    #[instrument(skip(self, month), fields(month = %month))]
    pub async fn calculate(&self, month: Month, kol_id: Option<Uuid>) -> Result<CalculationSummary> {
        let started = Instant::now();
        let affiliates = self.repo.list_affiliates(kol_id).await?;
        if let (Some(id), true) = (kol_id, affiliates.is_empty()) {
            return Err(AdminError::ProfileNotFound(id));
        }

        let mut summary = CalculationSummary {
            month: month.to_string(),
            ..Default::default()
        };

        for affiliate in &affiliates {
            summary.processed += 1;

            let existing = self.repo.find_calculation(affiliate.id, month).await?;
            if existing.is_some_and(|e| e.status == CalculationStatus::Paid) {
                summary.skipped_paid += 1;
                continue;
            }

            let figures = self.repo.load_figures(affiliate.id, month).await?;
            let manual = existing.map(|e| e.manual_adjustment).unwrap_or(0);
            let inputs = Self::build_inputs(affiliate, figures, manual);
            let breakdown = inputs.compute();

            // 已有未支付的行必须跟着归零，否则会保留过期的应付金额
            if breakdown.total_commission <= 0 && existing.is_none() {
                summary.skipped_empty += 1;
                continue;
            }

            let record = CalculationRecord {
                kol_id: affiliate.id,
                month,
                details: serde_json::json!({
                    "inputs": &inputs,
                    "breakdown": &breakdown,
                    "calculatedAt": Utc::now(),
                }),
                inputs,
                breakdown,
            };

            match self.repo.save_calculation(&record).await? {
                SaveOutcome::Created => summary.created += 1,
                SaveOutcome::Updated => summary.updated += 1,
                SaveOutcome::SkippedPaid => {
                    warn!(kol_id = %affiliate.id, "Calculation became paid during recalculation");
                    summary.skipped_paid += 1;
                    continue;
                }
            }
            summary.total_amount += breakdown.total_commission;
        }

        metrics::record_commission_calculation("created", summary.created as u64);
        metrics::record_commission_calculation("updated", summary.updated as u64);
        metrics::record_commission_calculation("skipped_paid", summary.skipped_paid as u64);
        metrics::record_commission_batch_duration(started.elapsed().as_secs_f64());

        info!(
            processed = summary.processed,
            created = summary.created,
            updated = summary.updated,
            skipped_paid = summary.skipped_paid,
            total_amount = summary.total_amount,
            "Monthly commission calculated"
        );

        Ok(summary)
    }

    /// 实时估算某 KOL 当月佣金
    pub async fn estimate(&self, kol_id: Uuid, month: Month) -> Result<CommissionEstimate> {
        let affiliate = self
            .repo
            .list_affiliates(Some(kol_id))
            .await?
            .into_iter()
            .next()
            .ok_or(AdminError::ProfileNotFound(kol_id))?;

        let figures = self.repo.load_figures(kol_id, month).await?;
        let manual = self
            .repo
            .find_calculation(kol_id, month)
            .await?
            .map(|e| e.manual_adjustment)
            .unwrap_or(0);
        let inputs = Self::build_inputs(&affiliate, figures, manual);

        Ok(CommissionEstimate {
            month: month.to_string(),
            kol_id,
            breakdown: inputs.compute(),
            inputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRole;
    use crate::repository::{ExistingCalculation, MockCommissionRepositoryTrait};
    use mockall::predicate::eq;

    fn affiliate(role: UserRole) -> Affiliate {
        Affiliate {
            id: Uuid::new_v4(),
            name: "코엘".into(),
            role,
            commission_rate: None,
        }
    }

    fn month() -> Month {
        "2026-09".parse().unwrap()
    }

    #[tokio::test]
    async fn test_calculate_creates_rows() {
        let kol = affiliate(UserRole::Kol);
        let kol_id = kol.id;
        let mut repo = MockCommissionRepositoryTrait::new();

        repo.expect_list_affiliates()
            .with(eq(None))
            .returning(move |_| Ok(vec![kol.clone()]));
        repo.expect_find_calculation().returning(|_, _| Ok(None));
        repo.expect_load_figures().with(eq(kol_id), eq(month())).returning(|_, _| {
            Ok(MonthlyFigures {
                subordinate_sales: 10_000_000,
                subordinate_commission: 1_000_000,
                self_shop_sales: 1_000_000,
                device_count: 1,
                device_commission: 1_500_000,
            })
        });
        repo.expect_save_calculation()
            .withf(|r| r.breakdown.self_shop_commission == 300_000 && r.details.get("inputs").is_some())
            .times(1)
            .returning(|_| Ok(SaveOutcome::Created));

        let service = CommissionService::new(Arc::new(repo));
        let summary = service.calculate(month(), None).await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.total_amount, 2_800_000);
        assert_eq!(summary.month, "2026-09");
    }

    #[tokio::test]
    async fn test_paid_rows_are_skipped() {
        let kol = affiliate(UserRole::Ol);
        let mut repo = MockCommissionRepositoryTrait::new();

        repo.expect_list_affiliates().returning(move |_| Ok(vec![kol.clone()]));
        repo.expect_find_calculation().returning(|_, _| {
            Ok(Some(ExistingCalculation {
                id: Uuid::new_v4(),
                status: CalculationStatus::Paid,
                manual_adjustment: 0,
            }))
        });
        repo.expect_load_figures().never();
        repo.expect_save_calculation().never();

        let summary = CommissionService::new(Arc::new(repo))
            .calculate(month(), None)
            .await
            .unwrap();
        assert_eq!(summary.skipped_paid, 1);
        assert_eq!(summary.total_amount, 0);
    }

    #[tokio::test]
    async fn test_zero_total_not_written_and_adjustment_kept() {
        let empty = affiliate(UserRole::Kol);
        let adjusted = affiliate(UserRole::Kol);
        let adjusted_id = adjusted.id;
        let mut repo = MockCommissionRepositoryTrait::new();

        repo.expect_list_affiliates()
            .returning(move |_| Ok(vec![empty.clone(), adjusted.clone()]));
        repo.expect_find_calculation().returning(move |id, _| {
            Ok((id == adjusted_id).then(|| ExistingCalculation {
                id: Uuid::new_v4(),
                status: CalculationStatus::Adjusted,
                manual_adjustment: 50_000,
            }))
        });
        repo.expect_load_figures().returning(|_, _| Ok(MonthlyFigures::default()));
        repo.expect_save_calculation()
            .withf(|r| r.breakdown.total_commission == 50_000)
            .times(1)
            .returning(|_| Ok(SaveOutcome::Updated));

        let summary = CommissionService::new(Arc::new(repo))
            .calculate(month(), None)
            .await
            .unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.skipped_empty, 1);
        assert_eq!(summary.updated, 1);
    }

    #[tokio::test]
    async fn test_existing_row_zeroed_when_orders_cancelled() {
        let kol = affiliate(UserRole::Kol);
        let kol_id = kol.id;
        let mut repo = MockCommissionRepositoryTrait::new();

        repo.expect_list_affiliates().returning(move |_| Ok(vec![kol.clone()]));
        repo.expect_find_calculation().returning(|_, _| {
            Ok(Some(ExistingCalculation {
                id: Uuid::new_v4(),
                status: CalculationStatus::Calculated,
                manual_adjustment: 0,
            }))
        });
        // 当月订单全部取消后汇总为 0
        repo.expect_load_figures().returning(|_, _| Ok(MonthlyFigures::default()));
        repo.expect_save_calculation()
            .withf(move |r| r.kol_id == kol_id && r.breakdown.total_commission == 0)
            .times(1)
            .returning(|_| Ok(SaveOutcome::Updated));

        let summary = CommissionService::new(Arc::new(repo))
            .calculate(month(), None)
            .await
            .unwrap();
        assert_eq!(summary.skipped_empty, 0);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.total_amount, 0);
    }

    #[tokio::test]
    async fn test_negative_total_overwrites_existing_row() {
        let kol = affiliate(UserRole::Kol);
        let mut repo = MockCommissionRepositoryTrait::new();

        repo.expect_list_affiliates().returning(move |_| Ok(vec![kol.clone()]));
        repo.expect_find_calculation().returning(|_, _| {
            Ok(Some(ExistingCalculation {
                id: Uuid::new_v4(),
                status: CalculationStatus::Approved,
                manual_adjustment: 0,
            }))
        });
        // 当月只有一笔退货
        repo.expect_load_figures().returning(|_, _| {
            Ok(MonthlyFigures {
                device_count: -1,
                device_commission: -1_500_000,
                ..Default::default()
            })
        });
        repo.expect_save_calculation()
            .withf(|r| r.breakdown.total_commission == -1_500_000)
            .times(1)
            .returning(|_| Ok(SaveOutcome::Updated));

        let summary = CommissionService::new(Arc::new(repo))
            .calculate(month(), None)
            .await
            .unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.total_amount, -1_500_000);
    }

    #[tokio::test]
    async fn test_unknown_kol() {
        let mut repo = MockCommissionRepositoryTrait::new();
        repo.expect_list_affiliates().returning(|_| Ok(vec![]));

        let id = Uuid::new_v4();
        let res = CommissionService::new(Arc::new(repo))
            .calculate(month(), Some(id))
            .await;
        assert!(matches!(res, Err(AdminError::ProfileNotFound(x)) if x == id));
    }

    #[tokio::test]
    async fn test_estimate_uses_role_default_rate() {
        let ol = affiliate(UserRole::Ol);
        let ol_id = ol.id;
        let mut repo = MockCommissionRepositoryTrait::new();
        repo.expect_list_affiliates().returning(move |_| Ok(vec![ol.clone()]));
        repo.expect_find_calculation().returning(|_, _| Ok(None));
        repo.expect_load_figures().returning(|_, _| {
            Ok(MonthlyFigures {
                self_shop_sales: 1_000_000,
                ..Default::default()
            })
        });

        let est = CommissionService::new(Arc::new(repo))
            .estimate(ol_id, month())
            .await
            .unwrap();
        assert_eq!(est.inputs.self_shop_rate, 0.20);
        assert_eq!(est.breakdown.total_commission, 200_000);
    }
}
