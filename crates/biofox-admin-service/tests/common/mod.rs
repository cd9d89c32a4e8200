//! 集成测试公共工具
//!
//! 连接 DATABASE_URL 指向的 PostgreSQL 并执行迁移；档案带随机后缀，测试可重复运行。

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use biofox_admin_service::{
    auth::JwtManager,
    models::{ProfileStatus, UserRole},
    routes,
    state::AppState,
};
use biofox_shared::cache::Cache;
use biofox_shared::config::{AuthConfig, RedisConfig};
use biofox_shared::database::Database;
use fake::Fake;
use fake::faker::name::en::Name;
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

fn database_url() -> String {
    std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests")
}

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

/// 已初始化的应用与连接池
pub struct TestApp {
    pub pool: PgPool,
    pub state: AppState,
    pub app: Router,
    jwt: Arc<JwtManager>,
}

impl TestApp {
    pub async fn new() -> Self {
        let pool = PgPool::connect(&database_url()).await.expect("数据库连接失败");
        Database::from_pool(pool.clone())
            .run_migrations()
            .await
            .expect("迁移失败");

        let cache = Cache::new(&RedisConfig {
            url: redis_url(),
            ..Default::default()
        })
        .expect("Redis 客户端创建失败");
        let state = AppState::new(
            pool.clone(),
            Arc::new(cache),
            AuthConfig::default(),
            Duration::from_secs(60),
        );
        let jwt = state.jwt_manager.clone();
        let app = routes::app(state.clone());
        Self { pool, state, app, jwt }
    }

    /// 插入一个已审核的档案
    pub async fn seed_profile(&self, role: UserRole, commission_rate: Option<f64>) -> Uuid {
        let tag = Uuid::new_v4().simple().to_string();
        let name: String = Name().fake();
        sqlx::query_scalar(
            r#"
            INSERT INTO profiles (email, name, role, status, shop_name, commission_rate)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(format!("{}-{}@it.biofox.kr", role, tag))
        .bind(name)
        .bind(role)
        .bind(ProfileStatus::Approved)
        .bind(format!("IT Shop {}", &tag[..8]))
        .bind(commission_rate)
        .fetch_one(&self.pool)
        .await
        .expect("插入测试档案失败")
    }

    /// 为已存在的档案签发 Token；created_by 等外键要求 id 真实存在
    pub fn token_for(&self, id: Uuid, role: UserRole) -> String {
        self.jwt
            .generate_token(id, "it@biofox.kr", "IT", role, ProfileStatus::Approved)
            .expect("签发 Token 失败")
            .0
    }

    /// 插入管理员档案并返回其 Token
    pub async fn admin_token(&self) -> String {
        let admin = self.seed_profile(UserRole::Admin, None).await;
        self.token_for(admin, UserRole::Admin)
    }

    /// 直接写入生效关系（不更新下级计数）
    pub async fn link(&self, shop_id: Uuid, parent_id: Uuid) {
        sqlx::query("INSERT INTO shop_relationships (shop_owner_id, parent_id) VALUES ($1, $2)")
            .bind(shop_id)
            .bind(parent_id)
            .execute(&self.pool)
            .await
            .expect("插入归属关系失败");
    }

    pub async fn get(&self, token: &str, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, token, uri, None).await
    }

    pub async fn post(&self, token: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, token, uri, Some(body)).await
    }

    pub async fn put(&self, token: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::PUT, token, uri, Some(body)).await
    }

    pub async fn delete(&self, token: &str, uri: &str) -> (StatusCode, Value) {
        self.send(Method::DELETE, token, uri, None).await
    }

    async fn send(
        &self,
        method: Method,
        token: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token));
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }
}
