//! 分布式锁管理器
//!
//! Redis 优先、数据库后备。Redis 调用出错（而不是锁被占用）时才降级到数据库锁，
//! 避免两套锁同时生效却互不可见。

use std::time::Duration;

use async_trait::async_trait;
use redis::Client as RedisClient;
use sqlx::PgPool;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::LockProvider;
use super::guard::{LockBackend, LockGuard, redis_lock_key};
use crate::error::{LedgerError, Result};

pub struct LockManager {
    redis_client: Option<RedisClient>,
    pool: PgPool,
    /// 实例标识，写入 owner 便于排查是哪个进程持有锁
    instance_id: String,
}

impl LockManager {
    /// `redis_client` 为 None 时只使用数据库锁
    pub fn new(redis_client: Option<RedisClient>, pool: PgPool) -> Self {
        Self {
            redis_client,
            pool,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    fn new_owner(&self) -> String {
        format!("{}:{}", self.instance_id, Uuid::new_v4())
    }

    /// SET NX PX，成功返回 true，已被占用返回 false
    async fn try_redis_lock(
        client: &RedisClient,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = client.get_multiplexed_async_connection().await?;

        let result: Option<String> = redis::cmd("SET")
            .arg(redis_lock_key(key))
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    async fn try_db_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let expires_at = chrono::Utc::now()
            + chrono::Duration::from_std(ttl).map_err(|e| LedgerError::Internal(e.to_string()))?;

        let expired = sqlx::query(
            "DELETE FROM distributed_locks WHERE lock_key = $1 AND expires_at < NOW()",
        )
        .bind(key)
        .execute(&self.pool)
        .await?;
        if expired.rows_affected() > 0 {
            debug!(key = %key, "已清理过期的数据库锁");
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO distributed_locks (lock_key, owner_id, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (lock_key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(owner)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(inserted.rows_affected() > 0)
    }
}

#[async_trait]
impl LockProvider for LockManager {
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        let owner = self.new_owner();

        if let Some(client) = &self.redis_client {
            match Self::try_redis_lock(client, key, &owner, ttl).await {
                Ok(true) => {
                    debug!(key = %key, "Redis 锁已获取");
                    return Ok(Some(LockGuard::new(
                        key.to_string(),
                        owner,
                        LockBackend::Redis(client.clone()),
                    )));
                }
                Ok(false) => return Ok(None),
                Err(e) => {
                    warn!(key = %key, error = %e, "Redis 锁失败，降级到数据库锁");
                }
            }
        }

        if self.try_db_lock(key, &owner, ttl).await? {
            debug!(key = %key, "数据库锁已获取");
            Ok(Some(LockGuard::new(
                key.to_string(),
                owner,
                LockBackend::Database(self.pool.clone()),
            )))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_key_is_namespaced() {
        assert_eq!(
            redis_lock_key("community:reconcile:7"),
            "lock:community:reconcile:7"
        );
    }

    #[tokio::test]
    #[ignore = "需要 DATABASE_URL 与 Redis"]
    async fn test_lock_is_exclusive_across_managers() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");
        let pool = PgPool::connect(&url).await.unwrap();
        let redis = RedisClient::open("redis://localhost:6379").ok();

        let a = LockManager::new(redis.clone(), pool.clone());
        let b = LockManager::new(redis, pool);
        let ttl = Duration::from_secs(5);

        let guard = a.try_acquire("test:exclusive", ttl).await.unwrap().unwrap();
        assert!(b.try_acquire("test:exclusive", ttl).await.unwrap().is_none());

        guard.release().await.unwrap();
        let again = b.try_acquire("test:exclusive", ttl).await.unwrap().unwrap();
        again.release().await.unwrap();
    }
}
