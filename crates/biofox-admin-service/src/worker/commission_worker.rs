//! 月度佣金计算 Worker
//!
//! 按 cron 表达式触发，为上一个自然月计算全部 KOL/OL 的佣金。
//! 多实例部署时通过 Redis SET NX 锁保证同一月份同一时间只有一个实例在计算；
//! 计算本身是 upsert，重复执行结果一致。

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use biofox_shared::cache::{Cache, CacheKey};
use biofox_shared::config::CommissionConfig;
use biofox_shared::observability::metrics;
use chrono::{DateTime, Utc};
use cron::Schedule;
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::domain::month::Month;
use crate::error::{AdminError, Result};
use crate::service::{self, CalculationSummary, dashboard_cache};

const WORKER_NAME: &str = "commission_worker";

/// 计算锁有效期，超过后视为持锁实例已失效
const LOCK_TTL: Duration = Duration::from_secs(3600);

pub struct CommissionWorker {
    pool: PgPool,
    cache: Arc<Cache>,
    schedule: Schedule,
    poll_interval: Duration,
}

impl CommissionWorker {
    pub fn new(pool: PgPool, cache: Arc<Cache>, config: &CommissionConfig) -> Result<Self> {
        let schedule = parse_schedule(&config.schedule_cron)?;
        Ok(Self {
            pool,
            cache,
            schedule,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
        })
    }

    /// 主循环：持续检查调度时间直到进程退出
    pub async fn run(&self) {
        let mut next_run = self.schedule.upcoming(Utc).next();
        info!(
            poll_interval = ?self.poll_interval,
            next_run = ?next_run,
            "CommissionWorker started"
        );

        loop {
            tokio::time::sleep(self.poll_interval).await;

            let now = Utc::now();
            if !is_due(next_run, now) {
                continue;
            }

            let month = target_month(now);
            match self.run_once(month).await {
                Ok(Some(summary)) => info!(
                    month = %month,
                    processed = summary.processed,
                    total_amount = summary.total_amount,
                    "Scheduled commission calculation finished"
                ),
                Ok(None) => info!(month = %month, "Commission calculation held by another instance"),
                // 失败留到下一次调度重试
                Err(e) => error!(month = %month, error = %e, "Scheduled commission calculation failed"),
            }

            metrics::set_worker_last_run(WORKER_NAME, now.timestamp() as f64);
            next_run = self.schedule.after(&now).next();
        }
    }

    /// 执行一次计算；未抢到锁时返回 None
    pub async fn run_once(&self, month: Month) -> Result<Option<CalculationSummary>> {
        let lock_key = CacheKey::commission_lock(&month.to_string());
        let acquired = match self.cache.set_nx(&lock_key, &WORKER_NAME, LOCK_TTL).await {
            Ok(acquired) => acquired,
            Err(e) => {
                // Redis 不可用时仍执行，依赖 upsert 保证幂等
                warn!(error = %e, "Failed to acquire commission lock");
                true
            }
        };
        if !acquired {
            return Ok(None);
        }

        let summary = service::commission_service(&self.pool)
            .calculate(month, None)
            .await;

        if let Err(e) = self.cache.delete(&lock_key).await {
            warn!(error = %e, "Failed to release commission lock");
        }

        let summary = summary?;
        dashboard_cache::invalidate(&self.cache).await;
        Ok(Some(summary))
    }
}

pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    Schedule::from_str(expression).map_err(|e| {
        AdminError::Validation(format!("无效的 cron 表达式 {}: {}", expression, e))
    })
}

fn is_due(next_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    next_run.is_some_and(|at| at <= now)
}

/// 调度触发时结算上一个自然月
fn target_month(now: DateTime<Utc>) -> Month {
    Month::from_date(now.date_naive()).previous()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_schedule_fires_on_first_of_month() {
        let schedule = parse_schedule(&CommissionConfig::default().schedule_cron).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 2, 14, 8, 0, 0).unwrap();
        let next = schedule.after(&after).next().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_schedule_rejected() {
        assert!(matches!(
            parse_schedule("every month"),
            Err(AdminError::Validation(_))
        ));
    }

    #[test]
    fn test_target_month_is_previous() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 3, 0, 0).unwrap();
        assert_eq!(target_month(now).to_string(), "2025-12");
    }

    #[test]
    fn test_is_due() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 30).unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap();
        assert!(is_due(Some(at), now));
        assert!(!is_due(Some(now + chrono::Duration::seconds(1)), now));
        assert!(!is_due(None, now));
    }
}
