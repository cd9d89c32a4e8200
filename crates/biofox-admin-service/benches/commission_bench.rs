//! 佣金计算基准测试
//!
//! 覆盖器械阶梯定价、累计状态重放、月度汇总和组织树构建。

use std::collections::HashMap;
use std::hint::black_box;

use biofox_admin_service::domain::hierarchy::{TreeProfile, build_tree};
use biofox_admin_service::domain::{AccumulatorState, CommissionInputs, price_device_sale};
use biofox_admin_service::models::{ProfileStatus, UserRole};
use chrono::Utc;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use uuid::Uuid;

/// 模拟一个 KOL 的销售流水：每 7 笔出现一次退货
fn sale_stream(len: usize) -> Vec<i32> {
    (0..len)
        .map(|i| if i % 7 == 6 { -1 } else { (i % 3) as i32 + 1 })
        .collect()
}

fn bench_device_pricing(c: &mut Criterion) {
    let mut group = c.benchmark_group("device_pricing");

    group.bench_function("sale_below_threshold", |b| {
        b.iter(|| price_device_sale(black_box(3), black_box(1)))
    });
    group.bench_function("return_crossing_threshold", |b| {
        b.iter(|| price_device_sale(black_box(5), black_box(-2)))
    });

    group.finish();
}

fn bench_accumulator_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulator_replay");
    let now = Utc::now();

    for len in [10, 100, 1_000] {
        let stream = sale_stream(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &stream, |b, stream| {
            b.iter(|| AccumulatorState::replay(black_box(stream.iter().copied()), now))
        });
    }

    group.finish();
}

fn bench_monthly_compute(c: &mut Criterion) {
    let inputs = CommissionInputs {
        subordinate_sales: 48_000_000,
        subordinate_commission: 4_800_000,
        self_shop_sales: 12_345_678,
        self_shop_rate: 0.3,
        device_count: 7,
        device_commission: 13_500_000,
        manual_adjustment: -150_000,
    };

    c.bench_function("monthly_compute", |b| b.iter(|| black_box(&inputs).compute()));
}

fn bench_organization_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("organization_tree");

    for kols in [10, 100] {
        let mut profiles = HashMap::new();
        let mut roots = Vec::new();
        let mut edges = Vec::new();
        for k in 0..kols {
            let kol = Uuid::new_v4();
            roots.push(kol);
            profiles.insert(kol, profile(kol, UserRole::Kol, k));
            for s in 0..20 {
                let shop = Uuid::new_v4();
                profiles.insert(shop, profile(shop, UserRole::ShopOwner, s));
                edges.push((kol, shop));
            }
        }

        group.bench_with_input(BenchmarkId::from_parameter(kols), &kols, |b, _| {
            b.iter(|| build_tree(black_box(&roots), black_box(&profiles), black_box(&edges)))
        });
    }

    group.finish();
}

fn profile(id: Uuid, role: UserRole, n: usize) -> TreeProfile {
    TreeProfile {
        id,
        name: format!("{} {}", role, n),
        role,
        shop_name: format!("매장 {}", n),
        status: ProfileStatus::Approved,
    }
}

criterion_group!(
    benches,
    bench_device_pricing,
    bench_accumulator_replay,
    bench_monthly_compute,
    bench_organization_tree
);
criterion_main!(benches);
