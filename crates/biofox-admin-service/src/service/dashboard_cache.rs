//! 看板缓存失效

use biofox_shared::cache::{Cache, CacheKey};
use tracing::{debug, warn};

/// 清除全部看板缓存；失败时仅等待 TTL 过期
pub async fn invalidate(cache: &Cache) {
    match cache.delete_pattern(CacheKey::DASHBOARD_PATTERN).await {
        Ok(n) => debug!(deleted = n, "Dashboard cache invalidated"),
        Err(e) => warn!(error = %e, "Failed to invalidate dashboard cache"),
    }
}
