//! KOL 销售分析：店铺排名、月度趋势、商品占比

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::month::Month;
use crate::error::{AdminError, Result};

pub const DEFAULT_RANKING_LIMIT: usize = 10;
pub const MAX_RANKING_LIMIT: usize = 100;
pub const DEFAULT_TREND_MONTHS: u32 = 6;
pub const MAX_TREND_MONTHS: u32 = 24;

/// 排名依据
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingSort {
    /// 指定月份销售额
    #[default]
    Current,
    /// 有销售月份的月均销售额
    Average,
    /// 历史累计销售额
    Cumulative,
}

/// 单店某月的销售额（已排除取消订单）
#[derive(Debug, Clone)]
pub struct ShopMonthSales {
    pub shop_id: Uuid,
    pub shop_name: String,
    pub owner_name: String,
    /// 无销售的店铺为 None
    pub month: Option<Month>,
    pub sales: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopRanking {
    pub rank: usize,
    pub shop_id: Uuid,
    pub shop_name: String,
    pub owner_name: String,
    pub current_sales: i64,
    pub average_sales: i64,
    pub cumulative_sales: i64,
}

impl ShopRanking {
    fn key(&self, sort: RankingSort) -> i64 {
        match sort {
            RankingSort::Current => self.current_sales,
            RankingSort::Average => self.average_sales,
            RankingSort::Cumulative => self.cumulative_sales,
        }
    }
}

/// 汇总每店的当月/月均/累计销售额并排名
///
/// 月均只计有销售记录的月份。同分按店名排序，名次连续。
pub fn rank_shops(
    rows: &[ShopMonthSales],
    current: Month,
    sort: RankingSort,
    limit: usize,
) -> Vec<ShopRanking> {
    let mut shops: HashMap<Uuid, (ShopRanking, i64)> = HashMap::new();
    for row in rows {
        let (entry, months) = shops.entry(row.shop_id).or_insert_with(|| {
            (
                ShopRanking {
                    rank: 0,
                    shop_id: row.shop_id,
                    shop_name: row.shop_name.clone(),
                    owner_name: row.owner_name.clone(),
                    current_sales: 0,
                    average_sales: 0,
                    cumulative_sales: 0,
                },
                0,
            )
        });
        let Some(month) = row.month else { continue };
        entry.cumulative_sales = entry.cumulative_sales.saturating_add(row.sales);
        *months += 1;
        if month == current {
            entry.current_sales = entry.current_sales.saturating_add(row.sales);
        }
    }

    let mut ranked: Vec<ShopRanking> = shops
        .into_values()
        .map(|(mut shop, months)| {
            if months > 0 {
                shop.average_sales = (shop.cumulative_sales as f64 / months as f64).round() as i64;
            }
            shop
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.key(sort)
            .cmp(&a.key(sort))
            .then_with(|| a.shop_name.cmp(&b.shop_name))
            .then_with(|| a.shop_id.cmp(&b.shop_id))
    });
    ranked.truncate(limit);
    for (i, shop) in ranked.iter_mut().enumerate() {
        shop.rank = i + 1;
    }
    ranked
}

pub fn ranking_limit(requested: Option<usize>) -> Result<usize> {
    match requested {
        None => Ok(DEFAULT_RANKING_LIMIT),
        Some(n) if (1..=MAX_RANKING_LIMIT).contains(&n) => Ok(n),
        Some(n) => Err(AdminError::Validation(format!(
            "limit 需在 1 到 {} 之间: {}",
            MAX_RANKING_LIMIT, n
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySalesPoint {
    pub month: Month,
    pub sales: i64,
    /// 当月结算的佣金总额
    pub allowance: i64,
}

/// 截至 `end` 的连续 `months` 个月，旧月在前
pub fn trend_window(end: Month, months: u32) -> Result<Vec<Month>> {
    if !(1..=MAX_TREND_MONTHS).contains(&months) {
        return Err(AdminError::Validation(format!(
            "months 需在 1 到 {} 之间: {}",
            MAX_TREND_MONTHS, months
        )));
    }
    let mut window = Vec::with_capacity(months as usize);
    let mut month = end;
    for _ in 0..months {
        window.push(month);
        month = month.previous();
    }
    window.reverse();
    Ok(window)
}

/// 缺失月份补零
pub fn fill_trend(
    window: &[Month],
    sales: &HashMap<Month, i64>,
    allowance: &HashMap<Month, i64>,
) -> Vec<MonthlySalesPoint> {
    window
        .iter()
        .map(|month| MonthlySalesPoint {
            month: *month,
            sales: sales.get(month).copied().unwrap_or(0),
            allowance: allowance.get(month).copied().unwrap_or(0),
        })
        .collect()
}

/// 某商品在统计范围内的销售汇总
#[derive(Debug, Clone)]
pub struct ProductSales {
    pub product_id: Option<Uuid>,
    pub product_name: String,
    pub sales_amount: i64,
    pub quantity: i64,
    pub shop_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRatio {
    pub product_id: Option<Uuid>,
    pub product_name: String,
    pub total_sales_amount: i64,
    /// 占总销售额的比例，保留 4 位小数
    pub sales_ratio: f64,
    pub usage_quantity: i64,
    pub used_shops_count: i64,
}

/// 按销售额降序计算各商品占比；总额为 0 时占比全部为 0
pub fn product_ratios(rows: &[ProductSales]) -> Vec<ProductRatio> {
    let total: i64 = rows.iter().map(|r| r.sales_amount.max(0)).sum();
    let mut ratios: Vec<ProductRatio> = rows
        .iter()
        .map(|r| ProductRatio {
            product_id: r.product_id,
            product_name: r.product_name.clone(),
            total_sales_amount: r.sales_amount,
            sales_ratio: if total > 0 {
                (r.sales_amount.max(0) as f64 / total as f64 * 10_000.0).round() / 10_000.0
            } else {
                0.0
            },
            usage_quantity: r.quantity,
            used_shops_count: r.shop_count,
        })
        .collect();
    ratios.sort_by(|a, b| {
        b.total_sales_amount
            .cmp(&a.total_sales_amount)
            .then_with(|| a.product_name.cmp(&b.product_name))
    });
    ratios
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month(s: &str) -> Month {
        s.parse().unwrap()
    }

    fn sale(shop: u128, name: &str, m: Option<&str>, sales: i64) -> ShopMonthSales {
        ShopMonthSales {
            shop_id: Uuid::from_u128(shop),
            shop_name: name.to_string(),
            owner_name: format!("{name} 원장"),
            month: m.map(month),
            sales,
        }
    }

    fn sample() -> Vec<ShopMonthSales> {
        vec![
            // 강남점：本月 100 万，之前两个月各 500 万
            sale(1, "강남점", Some("2026-10"), 1_000_000),
            sale(1, "강남점", Some("2026-09"), 5_000_000),
            sale(1, "강남점", Some("2026-08"), 5_000_000),
            // 홍대점：仅本月 300 万
            sale(2, "홍대점", Some("2026-10"), 3_000_000),
            // 부산점：无销售
            sale(3, "부산점", None, 0),
        ]
    }

    #[test]
    fn test_rank_by_current_month() {
        let ranked = rank_shops(&sample(), month("2026-10"), RankingSort::Current, 10);
        let names: Vec<_> = ranked.iter().map(|r| r.shop_name.as_str()).collect();
        assert_eq!(names, ["홍대점", "강남점", "부산점"]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[2].rank, 3);
        assert_eq!(ranked[2].cumulative_sales, 0);
    }

    #[test]
    fn test_rank_by_average_and_cumulative() {
        let by_avg = rank_shops(&sample(), month("2026-10"), RankingSort::Average, 10);
        assert_eq!(by_avg[0].shop_name, "강남점");
        assert_eq!(by_avg[0].average_sales, 3_666_667);
        assert_eq!(by_avg[1].average_sales, 3_000_000);

        let by_total = rank_shops(&sample(), month("2026-10"), RankingSort::Cumulative, 1);
        assert_eq!(by_total.len(), 1);
        assert_eq!(by_total[0].cumulative_sales, 11_000_000);
        assert_eq!(by_total[0].current_sales, 1_000_000);
    }

    #[test]
    fn test_sort_param_parsing() {
        let sort: RankingSort = serde_json::from_value(serde_json::json!("cumulative")).unwrap();
        assert_eq!(sort, RankingSort::Cumulative);
        assert!(serde_json::from_value::<RankingSort>(serde_json::json!("total")).is_err());
        assert_eq!(RankingSort::default(), RankingSort::Current);
    }

    #[test]
    fn test_ranking_limit_bounds() {
        assert_eq!(ranking_limit(None).unwrap(), DEFAULT_RANKING_LIMIT);
        assert_eq!(ranking_limit(Some(100)).unwrap(), 100);
        assert!(ranking_limit(Some(0)).is_err());
        assert!(ranking_limit(Some(101)).is_err());
    }

    #[test]
    fn test_trend_window_crosses_year() {
        let window = trend_window(month("2026-02"), 4).unwrap();
        let labels: Vec<_> = window.iter().map(|m| m.to_string()).collect();
        assert_eq!(labels, ["2025-11", "2025-12", "2026-01", "2026-02"]);
        assert!(trend_window(month("2026-02"), 0).is_err());
        assert!(trend_window(month("2026-02"), MAX_TREND_MONTHS + 1).is_err());
    }

    #[test]
    fn test_fill_trend_zeroes_missing_months() {
        let window = trend_window(month("2026-10"), 3).unwrap();
        let sales = HashMap::from([(month("2026-09"), 2_000_000)]);
        let allowance = HashMap::from([(month("2026-10"), 150_000)]);
        let points = fill_trend(&window, &sales, &allowance);
        assert_eq!(points.len(), 3);
        assert_eq!((points[0].sales, points[0].allowance), (0, 0));
        assert_eq!(points[1].sales, 2_000_000);
        assert_eq!(points[2].allowance, 150_000);
        assert_eq!(serde_json::to_value(&points[2]).unwrap()["month"], "2026-10");
    }

    #[test]
    fn test_product_ratios() {
        let rows = vec![
            ProductSales {
                product_id: Some(Uuid::from_u128(1)),
                product_name: "앰플".to_string(),
                sales_amount: 1_000_000,
                quantity: 20,
                shop_count: 2,
            },
            ProductSales {
                product_id: Some(Uuid::from_u128(2)),
                product_name: "크림".to_string(),
                sales_amount: 2_000_000,
                quantity: 10,
                shop_count: 1,
            },
        ];
        let ratios = product_ratios(&rows);
        assert_eq!(ratios[0].product_name, "크림");
        assert_eq!(ratios[0].sales_ratio, 0.6667);
        assert_eq!(ratios[1].sales_ratio, 0.3333);
        assert_eq!(ratios[1].used_shops_count, 2);
    }

    #[test]
    fn test_product_ratios_zero_total() {
        let rows = vec![ProductSales {
            product_id: None,
            product_name: "샘플".to_string(),
            sales_amount: 0,
            quantity: 5,
            shop_count: 1,
        }];
        assert_eq!(product_ratios(&rows)[0].sales_ratio, 0.0);
        assert!(product_ratios(&[]).is_empty());
    }
}
