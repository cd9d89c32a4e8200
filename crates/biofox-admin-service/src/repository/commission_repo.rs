//! 月度佣金仓储（PostgreSQL）

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::CommissionRepositoryTrait;
use crate::domain::monthly_commission::{CommissionBreakdown, CommissionInputs};
use crate::domain::Month;
use crate::error::Result;
use crate::models::{CalculationStatus, UserRole};

/// 参与结算的分销用户
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Affiliate {
    pub id: Uuid,
    pub name: String,
    pub role: UserRole,
    pub commission_rate: Option<f64>,
}

/// 当月原始汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct MonthlyFigures {
    pub subordinate_sales: i64,
    pub subordinate_commission: i64,
    pub self_shop_sales: i64,
    pub device_count: i64,
    pub device_commission: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, sqlx::FromRow)]
pub struct ExistingCalculation {
    pub id: Uuid,
    pub status: CalculationStatus,
    pub manual_adjustment: i64,
}

/// 待写入的计算结果
#[derive(Debug, Clone, PartialEq)]
pub struct CalculationRecord {
    pub kol_id: Uuid,
    pub month: Month,
    pub inputs: CommissionInputs,
    pub breakdown: CommissionBreakdown,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    Updated,
    SkippedPaid,
}

#[derive(Clone)]
pub struct PgCommissionRepository {
    pool: PgPool,
}

impl PgCommissionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommissionRepositoryTrait for PgCommissionRepository {
    async fn list_affiliates(&self, kol_id: Option<Uuid>) -> Result<Vec<Affiliate>> {
        let rows = sqlx::query_as::<_, Affiliate>(
            r#"
            SELECT id, name, role, commission_rate
            FROM profiles
            WHERE role IN ('kol', 'ol') AND status = 'approved'
              AND ($1::uuid IS NULL OR id = $1)
            ORDER BY created_at
            "#,
        )
        .bind(kol_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn load_figures(&self, kol_id: Uuid, month: Month) -> Result<MonthlyFigures> {
        let (subordinate_sales, subordinate_commission, self_shop_sales): (i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    COALESCE(SUM(o.total_amount) FILTER (WHERE NOT o.is_self_shop_order), 0)::BIGINT,
                    COALESCE(SUM(o.commission_amount) FILTER (WHERE NOT o.is_self_shop_order), 0)::BIGINT,
                    COALESCE(SUM(o.total_amount) FILTER (WHERE o.is_self_shop_order), 0)::BIGINT
                FROM orders o
                WHERE o.order_status <> 'cancelled'
                  AND o.order_date >= $2 AND o.order_date < $3
                  AND (
                      o.shop_id IN (
                          SELECT shop_owner_id FROM shop_relationships
                          WHERE parent_id = $1 AND is_active
                      )
                      OR (o.shop_id = $1 AND o.is_self_shop_order)
                  )
                "#,
            )
            .bind(kol_id)
            .bind(month.start())
            .bind(month.end_exclusive())
            .fetch_one(&self.pool)
            .await?;

        let (device_count, device_commission): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT,
                   COALESCE(SUM(actual_commission), 0)::BIGINT
            FROM device_sales
            WHERE kol_id = $1 AND commission_status <> 'cancelled'
              AND sale_date >= $2 AND sale_date < $3
            "#,
        )
        .bind(kol_id)
        .bind(month.start())
        .bind(month.end_exclusive())
        .fetch_one(&self.pool)
        .await?;

        Ok(MonthlyFigures {
            subordinate_sales,
            subordinate_commission,
            self_shop_sales,
            device_count,
            device_commission,
        })
    }

    async fn find_calculation(&self, kol_id: Uuid, month: Month) -> Result<Option<ExistingCalculation>> {
        let row = sqlx::query_as::<_, ExistingCalculation>(
            r#"
            SELECT id, status, manual_adjustment
            FROM commission_calculations
            WHERE kol_id = $1 AND calculation_month = $2
            "#,
        )
        .bind(kol_id)
        .bind(month.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn save_calculation(&self, record: &CalculationRecord) -> Result<SaveOutcome> {
        let device_count = i32::try_from(record.inputs.device_count).unwrap_or(i32::MAX);

        // 人工调整与调整历史保留在原行上
        let inserted: Option<bool> = sqlx::query_scalar(
            r#"
            INSERT INTO commission_calculations
                (kol_id, calculation_month, subordinate_sales, subordinate_commission,
                 self_shop_sales, self_shop_rate, self_shop_commission,
                 device_count, device_commission, manual_adjustment, total_commission,
                 status, calculation_details, calculated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, $10, 'calculated', $11, NOW())
            ON CONFLICT (kol_id, calculation_month) DO UPDATE SET
                subordinate_sales = EXCLUDED.subordinate_sales,
                subordinate_commission = EXCLUDED.subordinate_commission,
                self_shop_sales = EXCLUDED.self_shop_sales,
                self_shop_rate = EXCLUDED.self_shop_rate,
                self_shop_commission = EXCLUDED.self_shop_commission,
                device_count = EXCLUDED.device_count,
                device_commission = EXCLUDED.device_commission,
                total_commission = EXCLUDED.subordinate_commission
                    + EXCLUDED.self_shop_commission
                    + EXCLUDED.device_commission
                    + commission_calculations.manual_adjustment,
                status = CASE WHEN commission_calculations.manual_adjustment <> 0
                              THEN 'adjusted' ELSE 'calculated' END,
                calculation_details = EXCLUDED.calculation_details || jsonb_build_object(
                    'adjustments',
                    COALESCE(commission_calculations.calculation_details -> 'adjustments', '[]'::jsonb)
                ),
                calculated_at = NOW(),
                updated_at = NOW()
            WHERE commission_calculations.status <> 'paid'
            RETURNING (xmax = 0)
            "#,
        )
        .bind(record.kol_id)
        .bind(record.month.to_string())
        .bind(record.inputs.subordinate_sales)
        .bind(record.breakdown.subordinate_commission)
        .bind(record.inputs.self_shop_sales)
        .bind(record.inputs.self_shop_rate)
        .bind(record.breakdown.self_shop_commission)
        .bind(device_count)
        .bind(record.breakdown.device_commission)
        .bind(record.breakdown.total_commission - record.breakdown.manual_adjustment)
        .bind(&record.details)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match inserted {
            Some(true) => SaveOutcome::Created,
            Some(false) => SaveOutcome::Updated,
            None => SaveOutcome::SkippedPaid,
        })
    }
}
