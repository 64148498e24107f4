//! 锁守卫

use std::sync::Arc;

use dashmap::DashMap;
use redis::Client as RedisClient;
use sqlx::PgPool;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::error::Result;

/// 持有锁的守卫
///
/// Redis 与数据库锁需要异步释放，应显式调用 [`release`](Self::release)；
/// 未释放就 drop 时只记录警告，锁依赖 TTL 过期。进程内锁在 drop 时直接释放。
pub struct LockGuard {
    key: String,
    owner: String,
    backend: LockBackend,
    released: bool,
}

pub(super) enum LockBackend {
    Redis(RedisClient),
    Database(PgPool),
    Local(Arc<DashMap<String, (String, Instant)>>),
}

/// 仅当持有者匹配时才删除，避免误删已过期后被他人重新获取的锁
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

pub(super) fn redis_lock_key(key: &str) -> String {
    format!("lock:{key}")
}

impl LockGuard {
    pub(super) fn new(key: String, owner: String, backend: LockBackend) -> Self {
        Self {
            key,
            owner,
            backend,
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// 显式释放锁
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let released = match &self.backend {
            LockBackend::Redis(client) => {
                let mut conn = client.get_multiplexed_async_connection().await?;
                let deleted: i32 = redis::Script::new(RELEASE_SCRIPT)
                    .key(redis_lock_key(&self.key))
                    .arg(&self.owner)
                    .invoke_async(&mut conn)
                    .await?;
                deleted > 0
            }
            LockBackend::Database(pool) => {
                sqlx::query("DELETE FROM distributed_locks WHERE lock_key = $1 AND owner_id = $2")
                    .bind(&self.key)
                    .bind(&self.owner)
                    .execute(pool)
                    .await?
                    .rows_affected()
                    > 0
            }
            LockBackend::Local(locks) => locks
                .remove_if(&self.key, |_, (owner, _)| *owner == self.owner)
                .is_some(),
        };

        if released {
            debug!("锁已释放");
        } else {
            warn!(owner = %self.owner, "锁已过期或被其他持有者获取");
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match &self.backend {
            LockBackend::Local(locks) => {
                locks.remove_if(&self.key, |_, (owner, _)| *owner == self.owner);
            }
            _ => {
                warn!(
                    lock_key = %self.key,
                    owner = %self.owner,
                    "锁守卫未显式释放，等待 TTL 过期"
                );
            }
        }
    }
}
