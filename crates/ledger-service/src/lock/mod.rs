//! 用户级互斥锁
//!
//! 同一用户的对账必须串行执行。`LockProvider` 抽象锁的来源：
//!
//! - `LockManager`: Redis `SET NX PX` 优先，Redis 不可用时降级到 `distributed_locks` 表
//! - `LocalLockProvider`: 进程内锁，用于单进程运行和测试
//!
//! 获取失败不阻塞等待，由调用方决定是否稍后重试。

mod guard;
mod local;
mod lock_manager;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use guard::LockGuard;
pub use local::LocalLockProvider;
pub use lock_manager::LockManager;

/// 对账锁的 key
pub fn reconcile_lock_key(user_id: i64) -> String {
    format!("community:reconcile:{user_id}")
}

#[async_trait]
pub trait LockProvider: Send + Sync {
    /// 尝试获取锁，已被占用时返回 `Ok(None)`
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>>;
}
