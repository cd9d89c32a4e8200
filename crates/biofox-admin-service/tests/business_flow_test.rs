//! 归属关系、订单、佣金、临床案例与销售分析的端到端流程
//!
//! 需要真实 PostgreSQL：
//!
//! ```bash
//! DATABASE_URL=postgres://... cargo test --test business_flow_test -- --ignored
//! ```

mod common;

use axum::http::StatusCode;
use biofox_admin_service::{domain::Month, models::UserRole, service};
use chrono::Utc;
use common::TestApp;
use serde_json::{Value, json};
use uuid::Uuid;

fn id_of(body: &Value, pointer: &str) -> Uuid {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| panic!("{} missing in {}", pointer, body))
}

// ==================== 归属关系 ====================

#[tokio::test]
#[ignore]
async fn test_reassignment_closes_previous_relationship() {
    let t = TestApp::new().await;
    let admin = t.admin_token().await;
    let kol_a = t.seed_profile(UserRole::Kol, None).await;
    let kol_b = t.seed_profile(UserRole::Kol, None).await;
    let shop = t.seed_profile(UserRole::ShopOwner, Some(0.1)).await;

    let (status, body) = t
        .post(&admin, "/api/relationships", json!({ "shopOwnerId": shop, "parentId": kol_a }))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let (status, body) = t
        .post(
            &admin,
            "/api/relationships",
            json!({ "shopOwnerId": shop, "parentId": kol_b, "relationshipType": "transferred" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(id_of(&body, "/data/previous/parentId"), kol_a);
    assert_eq!(body["data"]["previous"]["isActive"], false);
    assert!(!body["data"]["previous"]["endedAt"].is_null());

    let active: Vec<Option<Uuid>> = sqlx::query_scalar(
        "SELECT parent_id FROM shop_relationships WHERE shop_owner_id = $1 AND is_active",
    )
    .bind(shop)
    .fetch_all(&t.pool)
    .await
    .unwrap();
    assert_eq!(active, vec![Some(kol_b)]);

    let counters = |id: Uuid| {
        let pool = t.pool.clone();
        async move {
            sqlx::query_as::<_, (i32, i32)>(
                "SELECT total_subordinates, active_subordinates FROM profiles WHERE id = $1",
            )
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap()
        }
    };
    assert_eq!(counters(kol_a).await, (1, 0));
    assert_eq!(counters(kol_b).await, (1, 1));

    // 唯一索引保证同一店铺只有一条生效关系
    let duplicate = sqlx::query("INSERT INTO shop_relationships (shop_owner_id, parent_id) VALUES ($1, $2)")
        .bind(shop)
        .bind(kol_a)
        .execute(&t.pool)
        .await;
    assert!(duplicate.is_err());
}

#[tokio::test]
#[ignore]
async fn test_shop_created_under_kol_is_visible_only_to_that_kol() {
    let t = TestApp::new().await;
    let admin = t.admin_token().await;
    let kol = t.seed_profile(UserRole::Kol, None).await;
    let other_kol = t.seed_profile(UserRole::Kol, None).await;

    let (status, body) = t
        .post(
            &admin,
            "/api/shops",
            json!({
                "email": format!("shop-{}@it.biofox.kr", Uuid::new_v4().simple()),
                "name": "김원장",
                "shopName": "강남점",
                "kolId": kol,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let shop = id_of(&body, "/data/shop/id");
    assert_eq!(id_of(&body, "/data/relationship/parentId"), kol);
    assert_eq!(body["data"]["relationship"]["isActive"], true);

    let kol_token = t.token_for(kol, UserRole::Kol);
    let (status, body) = t.get(&kol_token, &format!("/api/shops/{}", shop)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(id_of(&body, "/data/parent/id"), kol);

    let other_token = t.token_for(other_kol, UserRole::Kol);
    for uri in [
        format!("/api/shops/{}", shop),
        format!("/api/device-sales/shops/{}/stats", shop),
        format!("/api/device-sales/shops/{}/history", shop),
        format!("/api/sales/shops/{}/product-ratio", shop),
    ] {
        let (status, body) = t.get(&other_token, &uri).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{} -> {}", uri, body);
    }

    let (status, _) = t.get(&kol_token, &format!("/api/device-sales/shops/{}/stats", shop)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = t.get(&kol_token, &format!("/api/device-sales/shops/{}/history", shop)).await;
    assert_eq!(status, StatusCode::OK);
}

// ==================== 订单 ====================

#[tokio::test]
#[ignore]
async fn test_order_lifecycle_and_settled_protection() {
    let t = TestApp::new().await;
    let admin = t.admin_token().await;
    let kol = t.seed_profile(UserRole::Kol, None).await;
    let shop = t.seed_profile(UserRole::ShopOwner, Some(0.1)).await;
    t.link(shop, kol).await;
    let owner = t.token_for(shop, UserRole::ShopOwner);
    let today = Utc::now().date_naive();

    // 店主不能自定费率
    let (status, _) = t
        .post(
            &owner,
            "/api/orders",
            json!({ "shopId": shop, "orderDate": today, "totalAmount": 100_000, "commissionRate": 0.9 }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t
        .post(
            &owner,
            "/api/orders",
            json!({
                "shopId": shop,
                "orderDate": today,
                "totalAmount": 1_000_000,
                "items": [{ "productName": "앰플", "quantity": 2, "unitPrice": 500_000 }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let paid_order = id_of(&body, "/data/id");
    let item = id_of(&body, "/data/items/0/id");
    assert_eq!(body["data"]["commissionAmount"], 100_000);

    let (_, body) = t
        .post(&owner, "/api/orders", json!({ "shopId": shop, "orderDate": today, "totalAmount": 300_000 }))
        .await;
    let open_order = id_of(&body, "/data/id");

    for action in ["complete", "approve_commission", "pay_commission"] {
        let (status, body) = t
            .post(&admin, "/api/orders/bulk", json!({ "orderIds": [paid_order], "action": action }))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["data"]["processed"], 1, "{} -> {}", action, body);
    }

    // 结算后店主只能改备注
    let uri = format!("/api/orders/{}", paid_order);
    let (status, _) = t.put(&owner, &uri, json!({ "commissionRate": 0.5 })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = t.put(&owner, &uri, json!({ "recalculateCommission": true })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = t.put(&owner, &uri, json!({ "notes": "택배 발송" })).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["commissionStatus"], "paid");
    assert_eq!(body["data"]["notes"], "택배 발송");

    let (status, _) = t
        .put(&owner, &format!("{}/items/{}", uri, item), json!({ "quantity": 3 }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t.put(&admin, &uri, json!({ "recalculateCommission": true })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_STATUS_TRANSITION");
    let (status, body) = t
        .put(&admin, &format!("{}/items/{}", uri, item), json!({ "quantity": 3 }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_STATUS_TRANSITION");

    let (status, body) = t.delete(&admin, &uri).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CANNOT_DELETE_PAID_ORDER");

    // 批量取消：已结算的失败，未结算的成功
    let (status, body) = t
        .post(
            &admin,
            "/api/orders/bulk",
            json!({ "orderIds": [paid_order, open_order], "action": "cancel", "reason": "중복" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["processed"], 1);
    assert_eq!(body["data"]["failed"], 1);
    assert_eq!(body["data"]["errors"][0]["code"], "CANNOT_DELETE_PAID_ORDER");

    let (order_status, commission_status): (String, String) =
        sqlx::query_as("SELECT order_status, commission_status FROM orders WHERE id = $1")
            .bind(open_order)
            .fetch_one(&t.pool)
            .await
            .unwrap();
    assert_eq!((order_status.as_str(), commission_status.as_str()), ("cancelled", "cancelled"));

    // 已取消的订单不能重新打开
    let (status, _) = t
        .put(&admin, &format!("/api/orders/{}", open_order), json!({ "orderStatus": "pending" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// ==================== 月度佣金 ====================

#[tokio::test]
#[ignore]
async fn test_commission_adjustment_approval_and_payment() {
    let t = TestApp::new().await;
    let admin = t.admin_token().await;
    let kol = t.seed_profile(UserRole::Kol, Some(0.3)).await;
    let month: Month = "2026-04".parse().unwrap();

    // 只有器械佣金的 KOL 也会生成记录
    let shop = t.seed_profile(UserRole::ShopOwner, Some(0.1)).await;
    t.link(shop, kol).await;
    let (status, body) = t
        .post(&admin, "/api/device-sales", json!({ "shopId": shop, "saleDate": "2026-04-03", "quantity": 1 }))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let svc = service::commission_service(&t.pool);
    svc.calculate(month, Some(kol)).await.unwrap();
    let id: Uuid = sqlx::query_scalar(
        "SELECT id FROM commission_calculations WHERE kol_id = $1 AND calculation_month = $2",
    )
    .bind(kol)
    .bind(month.to_string())
    .fetch_one(&t.pool)
    .await
    .unwrap();
    let uri = format!("/api/commissions/{}", id);

    let (status, body) = t.put(&admin, &uri, json!({ "status": "paid" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_STATUS_TRANSITION");

    let (status, body) = t
        .put(&admin, &uri, json!({ "adjustment": { "amount": 50_000, "reason": "교육비 보전" } }))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["status"], "adjusted");
    assert_eq!(body["data"]["manualAdjustment"], 50_000);
    assert_eq!(body["data"]["totalCommission"], 1_550_000);

    // 重算保留人工调整
    svc.calculate(month, Some(kol)).await.unwrap();
    let (_, body) = t.get(&admin, &uri).await;
    assert_eq!(body["data"]["totalCommission"], 1_550_000);

    let (status, _) = t.put(&admin, &uri, json!({ "status": "approved" })).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = t
        .put(&admin, &uri, json!({ "adjustment": { "amount": 1, "reason": "추가" } }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);

    let (status, body) = t
        .put(
            &admin,
            &uri,
            json!({ "paymentInfo": { "paymentDate": "2026-05-10", "paymentReference": "TX-0510" } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["status"], "paid");
    assert_eq!(body["data"]["paymentReference"], "TX-0510");
    assert!(!body["data"]["paidAt"].is_null());

    let summary = svc.calculate(month, Some(kol)).await.unwrap();
    assert_eq!(summary.skipped_paid, 1);

    let kol_token = t.token_for(kol, UserRole::Kol);
    let (status, body) = t.get(&kol_token, "/api/commissions/me").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
}

// ==================== 临床案例 ====================

#[tokio::test]
#[ignore]
async fn test_clinical_photo_counters_and_consent_reset() {
    let t = TestApp::new().await;
    let shop = t.seed_profile(UserRole::ShopOwner, Some(0.1)).await;
    let owner = t.token_for(shop, UserRole::ShopOwner);

    let (status, body) = t
        .post(&owner, "/api/clinical/cases", json!({ "subjectType": "customer", "name": "이고객" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let case = id_of(&body, "/data/id");
    assert_eq!(body["data"]["consentStatus"], "pending");
    let base = format!("/api/clinical/cases/{}", case);

    let photos = format!("{}/photos", base);
    let (status, _) = t
        .post(&owner, &photos, json!({ "sessionNumber": 1, "photoType": "front", "filePath": "c/1/front.jpg" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = t
        .post(&owner, &photos, json!({ "sessionNumber": 3, "photoType": "left_side", "filePath": "c/3/left.jpg" }))
        .await;
    let latest_photo = id_of(&body, "/data/id");
    // 同一回次同一角度覆盖，不增加计数
    t.post(&owner, &photos, json!({ "sessionNumber": 1, "photoType": "front", "filePath": "c/1/front-v2.jpg" }))
        .await;

    let (_, body) = t.get(&owner, &base).await;
    assert_eq!(body["data"]["photoCount"], 2);
    assert_eq!(body["data"]["latestSession"], 3);

    let (status, body) = t.delete(&owner, &format!("{}/{}", photos, latest_photo)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["removedFiles"][0], "c/3/left.jpg");
    let (_, body) = t.get(&owner, &base).await;
    assert_eq!(body["data"]["photoCount"], 1);
    assert_eq!(body["data"]["latestSession"], 1);

    let consent = format!("{}/consent", base);
    let (status, _) = t.put(&owner, &consent, json!({ "filePath": "c/consent.pdf" })).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = t.get(&owner, &base).await;
    assert_eq!(body["data"]["consentStatus"], "consented");
    assert!(!body["data"]["consentDate"].is_null());

    let (status, _) = t.delete(&owner, &consent).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = t.get(&owner, &base).await;
    assert_eq!(body["data"]["consentStatus"], "pending");
    assert!(body["data"]["consentFile"].is_null());

    let (status, body) = t.delete(&owner, &consent).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "CONSENT_FILE_NOT_FOUND");
}

// ==================== 销售分析 ====================

#[tokio::test]
#[ignore]
async fn test_kol_sales_analytics() {
    let t = TestApp::new().await;
    let admin = t.admin_token().await;
    let kol = t.seed_profile(UserRole::Kol, None).await;
    let other_kol = t.seed_profile(UserRole::Kol, None).await;
    let busy = t.seed_profile(UserRole::ShopOwner, Some(0.1)).await;
    let quiet = t.seed_profile(UserRole::ShopOwner, Some(0.1)).await;
    t.link(busy, kol).await;
    t.link(quiet, kol).await;

    let this_month = Month::from_date(Utc::now().date_naive());
    let last_month = this_month.previous();
    let orders = [
        (busy, this_month, "앰플", 2, 100_000),
        (busy, last_month, "앰플", 10, 100_000),
        (quiet, this_month, "크림", 1, 300_000),
    ];
    for (shop, month, product, quantity, unit_price) in orders {
        let (status, body) = t
            .post(
                &admin,
                "/api/orders",
                json!({
                    "shopId": shop,
                    "orderDate": month.start(),
                    "totalAmount": quantity * unit_price,
                    "items": [{ "productName": product, "quantity": quantity, "unitPrice": unit_price }],
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
    }

    let kol_token = t.token_for(kol, UserRole::Kol);

    let (status, body) = t.get(&kol_token, "/api/sales/shop-ranking").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(id_of(&body, "/data/0/shopId"), quiet);
    assert_eq!(body["data"][0]["currentSales"], 300_000);

    let (_, body) = t.get(&kol_token, "/api/sales/shop-ranking?sortBy=cumulative").await;
    assert_eq!(id_of(&body, "/data/0/shopId"), busy);
    assert_eq!(body["data"][0]["cumulativeSales"], 1_200_000);
    assert_eq!(body["data"][0]["averageSales"], 600_000);
    assert_eq!(body["data"][1]["rank"], 2);

    let (status, body) = t.get(&kol_token, "/api/sales/monthly?months=3").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let points = body["data"].as_array().unwrap();
    assert_eq!(points.len(), 3);
    assert_eq!(points[2]["month"], this_month.to_string());
    assert_eq!(points[2]["sales"], 500_000);
    assert_eq!(points[1]["sales"], 1_000_000);
    assert_eq!(points[0]["sales"], 0);

    let (_, body) = t.get(&kol_token, "/api/sales/product-ratio").await;
    assert_eq!(body["data"][0]["productName"], "크림");
    assert_eq!(body["data"][0]["salesRatio"], 0.6);
    assert_eq!(body["data"][1]["usageQuantity"], 2);

    let (_, body) = t
        .get(&kol_token, &format!("/api/sales/shops/{}/product-ratio?month={}", busy, last_month))
        .await;
    assert_eq!(body["data"][0]["totalSalesAmount"], 1_000_000);
    assert_eq!(body["data"][0]["salesRatio"], 1.0);

    // 只能查看自己的数据；管理员需指定 kolId
    let (status, _) = t
        .get(&t.token_for(other_kol, UserRole::Kol), &format!("/api/sales/monthly?kolId={}", kol))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = t.get(&admin, "/api/sales/shop-ranking").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = t.get(&admin, &format!("/api/sales/shop-ranking?kolId={}", kol)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let shop_token = t.token_for(busy, UserRole::ShopOwner);
    let (status, _) = t.get(&shop_token, "/api/sales/shop-ranking").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
