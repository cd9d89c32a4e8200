//! Redis 缓存管理模块
//!
//! 提供 Redis 连接管理和常用缓存操作封装，值统一以 JSON 存储。

use crate::config::RedisConfig;
use crate::error::{Result, SharedError};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::{info, instrument};

/// Redis 缓存客户端
#[derive(Clone)]
pub struct Cache {
    client: Client,
}

impl Cache {
    /// 创建 Redis 客户端（惰性连接，首次操作时才建立连接）
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!("Redis client created");
        Ok(Self { client })
    }

    async fn get_conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(SharedError::from)
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(SharedError::from)
    }

    /// 获取值
    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.get_conn().await?;
        let value: Option<String> = conn.get(key).await?;

        match value {
            Some(v) => Ok(Some(serde_json::from_str(&v)?)),
            None => Ok(None),
        }
    }

    /// 设置值
    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let serialized = serde_json::to_string(value)?;

        let _: () = conn.set_ex(key, serialized, ttl.as_secs()).await?;
        Ok(())
    }

    /// 删除值
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// 按模式批量删除
    ///
    /// 使用 SCAN 遍历，避免 KEYS 阻塞 Redis
    #[instrument(skip(self))]
    pub async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.get_conn().await?;
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let count: u64 = conn.del(keys).await?;
                deleted += count;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(deleted)
    }

    /// 原子性地仅在 key 不存在时设置值，并指定 TTL
    ///
    /// 返回 true 表示设置成功（key 不存在），false 表示 key 已存在。
    pub async fn set_nx<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<bool> {
        let mut conn = self.get_conn().await?;
        let serialized = serde_json::to_string(value)?;

        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(serialized)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    /// 获取或设置
    #[instrument(skip(self, loader))]
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<SharedError>,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, E>>,
    {
        if let Some(cached) = self.get::<T>(key).await? {
            return Ok(cached);
        }

        let value = loader().await?;
        self.set(key, &value, ttl).await?;

        Ok(value)
    }

    /// 计数器自增，首次创建时设置过期时间（固定窗口计数）
    pub async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut conn = self.get_conn().await?;
        let count: i64 = conn.incr(key, 1).await?;
        if count == 1 {
            let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        }
        Ok(count)
    }
}

/// 缓存键生成器
pub struct CacheKey;

impl CacheKey {
    /// 所有看板缓存的匹配模式
    pub const DASHBOARD_PATTERN: &'static str = "dashboard:*";

    pub fn admin_dashboard() -> String {
        "dashboard:admin".to_string()
    }

    pub fn kol_dashboard(kol_id: &str) -> String {
        format!("dashboard:kol:{}", kol_id)
    }

    pub fn login_attempts(email: &str) -> String {
        format!("auth:login:{}", email.trim().to_lowercase())
    }

    /// 月度佣金计算互斥锁
    pub fn commission_lock(month: &str) -> String {
        format!("lock:commission:{}", month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_generation() {
        assert_eq!(CacheKey::admin_dashboard(), "dashboard:admin");
        assert_eq!(CacheKey::kol_dashboard("abc"), "dashboard:kol:abc");
        assert_eq!(CacheKey::commission_lock("2026-09"), "lock:commission:2026-09");
    }

    #[test]
    fn test_login_key_normalizes_email() {
        assert_eq!(
            CacheKey::login_attempts("  Kol@Example.COM "),
            "auth:login:kol@example.com"
        );
    }

    #[test]
    fn test_dashboard_keys_match_pattern() {
        let prefix = CacheKey::DASHBOARD_PATTERN.trim_end_matches('*');
        assert!(CacheKey::admin_dashboard().starts_with(prefix));
        assert!(CacheKey::kol_dashboard("x").starts_with(prefix));
    }

    #[tokio::test]
    #[ignore] // 需要 Redis
    async fn test_set_get_roundtrip() {
        let cache = Cache::new(&RedisConfig::default()).unwrap();
        cache
            .set("test:biofox:value", &42i64, Duration::from_secs(5))
            .await
            .unwrap();
        let v: Option<i64> = cache.get("test:biofox:value").await.unwrap();
        assert_eq!(v, Some(42));
        cache.delete("test:biofox:value").await.unwrap();
    }
}
