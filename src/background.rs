//! 后台任务：定期清理过期会话与登录失败记录。

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::auth::{AuthConfig, prune_expired_sessions, prune_login_attempts};
use crate::config::SESSION_PRUNE_INTERVAL_SECS;

pub fn spawn_background_tasks(auth: Arc<AuthConfig>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SESSION_PRUNE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            prune_expired_sessions(&auth).await;
            prune_login_attempts(&auth).await;
            debug!("pruned sessions and login attempts");
        }
    });
}
