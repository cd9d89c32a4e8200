//! 登录失败计数
//!
//! 以邮箱为键在 Redis 中做固定窗口计数，Redis 不可用时放行。

use std::time::Duration;

use biofox_shared::cache::{Cache, CacheKey};
use tracing::warn;

use crate::error::{AdminError, Result};
use crate::state::AppState;

/// 登录前检查：窗口内失败次数已达上限则拒绝
pub async fn ensure_not_locked(state: &AppState, email: &str) -> Result<()> {
    let key = CacheKey::login_attempts(email);
    match state.cache.get::<i64>(&key).await {
        Ok(Some(count)) if count >= state.auth.login_max_attempts => {
            Err(AdminError::TooManyLoginAttempts)
        }
        Ok(_) => Ok(()),
        Err(e) => {
            warn!(error = %e, "读取登录失败计数失败，跳过限流");
            Ok(())
        }
    }
}

pub async fn record_failure(state: &AppState, email: &str) {
    let key = CacheKey::login_attempts(email);
    let window = Duration::from_secs(state.auth.login_window_secs);
    if let Err(e) = state.cache.incr_with_ttl(&key, window).await {
        warn!(error = %e, "记录登录失败次数失败");
    }
}

pub async fn reset(cache: &Cache, email: &str) {
    if let Err(e) = cache.delete(&CacheKey::login_attempts(email)).await {
        warn!(error = %e, "清除登录失败计数失败");
    }
}
