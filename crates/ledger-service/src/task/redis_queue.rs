//! Redis 任务队列
//!
//! 键布局（`{prefix}` 默认为 `ledger:tasks`）：
//!
//! - `{prefix}:scheduled`  ZSET，成员为任务 ID，分数为到期时间（毫秒）
//! - `{prefix}:payloads`   HASH，任务 ID -> 任务 JSON
//! - `{prefix}:unique:{k}` STRING，去重键，值为持有它的任务 ID
//! - `{prefix}:dead`       LIST，死信 JSON
//!
//! 领取通过 Lua 脚本原子完成：取出到期成员并把分数推后一个租约时长，
//! 处理者崩溃时任务会在租约到期后重新可见。

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ledger_shared::dlq::DeadLetterMessage;
use ledger_shared::redis_client::RedisStore;
use redis::aio::MultiplexedConnection;
use tracing::{debug, instrument, warn};

use super::{EnqueueOptions, EnqueueOutcome, TaskMessage, TaskQueue};
use crate::error::Result;

const FETCH_DUE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
local out = {}
for _, id in ipairs(ids) do
    local body = redis.call('HGET', KEYS[2], id)
    if body then
        redis.call('ZADD', KEYS[1], ARGV[3], id)
        table.insert(out, body)
    else
        redis.call('ZREM', KEYS[1], id)
    end
end
return out
"#;

/// 只删除仍由该任务持有的去重键
const RELEASE_UNIQUE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

pub struct RedisTaskQueue {
    store: RedisStore,
    prefix: String,
    visibility_timeout: Duration,
    source_service: String,
}

impl RedisTaskQueue {
    pub fn new(store: RedisStore, visibility_timeout: Duration) -> Self {
        Self {
            store,
            prefix: "ledger:tasks".to_string(),
            visibility_timeout,
            source_service: "community-ledger".to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn scheduled_key(&self) -> String {
        format!("{}:scheduled", self.prefix)
    }

    fn payloads_key(&self) -> String {
        format!("{}:payloads", self.prefix)
    }

    fn dead_key(&self) -> String {
        format!("{}:dead", self.prefix)
    }

    fn unique_key(&self, key: &str) -> String {
        format!("{}:unique:{}", self.prefix, key)
    }

    async fn conn(&self) -> Result<MultiplexedConnection> {
        Ok(self.store.conn().await?)
    }

    async fn release_unique(&self, conn: &mut MultiplexedConnection, task: &TaskMessage) -> Result<()> {
        if let Some(key) = &task.unique_key {
            let _: i32 = redis::Script::new(RELEASE_UNIQUE_SCRIPT)
                .key(self.unique_key(key))
                .arg(&task.id)
                .invoke_async(conn)
                .await?;
        }
        Ok(())
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    #[instrument(skip(self, payload, options), fields(delay_ms = options.delay.as_millis() as u64))]
    async fn enqueue(
        &self,
        task_type: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<EnqueueOutcome> {
        let mut conn = self.conn().await?;
        let task = TaskMessage::new(task_type, payload, &options);

        if let Some(key) = &options.unique_key {
            let claimed: Option<String> = redis::cmd("SET")
                .arg(self.unique_key(key))
                .arg(&task.id)
                .arg("NX")
                .arg("PX")
                .arg(options.effective_unique_ttl().as_millis() as u64)
                .query_async(&mut conn)
                .await?;
            if claimed.is_none() {
                debug!(unique_key = %key, "已有同键任务待执行，跳过入队");
                return Ok(EnqueueOutcome::Duplicate);
            }
        }

        let due = now_ms() + options.delay.as_millis() as i64;
        let body = serde_json::to_string(&task)?;
        let _: () = redis::pipe()
            .atomic()
            .hset(self.payloads_key(), &task.id, body)
            .ignore()
            .zadd(self.scheduled_key(), &task.id, due)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(EnqueueOutcome::Enqueued { task_id: task.id })
    }

    async fn fetch_due(&self, limit: usize) -> Result<Vec<TaskMessage>> {
        let mut conn = self.conn().await?;
        let now = now_ms();
        let lease_until = now + self.visibility_timeout.as_millis() as i64;

        let bodies: Vec<String> = redis::Script::new(FETCH_DUE_SCRIPT)
            .key(self.scheduled_key())
            .key(self.payloads_key())
            .arg(now)
            .arg(limit)
            .arg(lease_until)
            .invoke_async(&mut conn)
            .await?;

        let mut tasks = Vec::with_capacity(bodies.len());
        for body in bodies {
            match serde_json::from_str::<TaskMessage>(&body) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(error = %e, "跳过无法解析的任务"),
            }
        }
        Ok(tasks)
    }

    async fn ack(&self, task: &TaskMessage) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .zrem(self.scheduled_key(), &task.id)
            .ignore()
            .hdel(self.payloads_key(), &task.id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        self.release_unique(&mut conn, task).await
    }

    async fn retry(&self, mut task: TaskMessage, error: &str, delay: Duration) -> Result<()> {
        task.retried += 1;
        task.last_error = Some(error.to_string());

        let mut conn = self.conn().await?;
        let due = now_ms() + delay.as_millis() as i64;
        let body = serde_json::to_string(&task)?;
        let _: () = redis::pipe()
            .atomic()
            .hset(self.payloads_key(), &task.id, body)
            .ignore()
            .zadd(self.scheduled_key(), &task.id, due)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn dead_letter(&self, task: TaskMessage, error: &str) -> Result<()> {
        let record = DeadLetterMessage::new(
            &task.id,
            &task.task_type,
            task.payload.to_string(),
            error,
            task.retried,
            task.max_retry,
            &self.source_service,
        );
        let body = serde_json::to_string(&record)?;

        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .lpush(self.dead_key(), body)
            .ignore()
            .zrem(self.scheduled_key(), &task.id)
            .ignore()
            .hdel(self.payloads_key(), &task.id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        self.release_unique(&mut conn, &task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_shared::config::RedisConfig;
    use redis::AsyncCommands;
    use serde_json::json;

    fn queue(prefix: &str) -> RedisTaskQueue {
        let store = RedisStore::new(&RedisConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
        })
        .unwrap();
        RedisTaskQueue::new(store, Duration::from_secs(30)).with_prefix(prefix)
    }

    #[test]
    fn test_key_layout() {
        let q = queue("test:layout");
        assert_eq!(q.scheduled_key(), "test:layout:scheduled");
        assert_eq!(q.payloads_key(), "test:layout:payloads");
        assert_eq!(q.unique_key("community:reconcile:1"), "test:layout:unique:community:reconcile:1");
        assert_eq!(q.dead_key(), "test:layout:dead");
    }

    #[tokio::test]
    #[ignore = "需要 Redis"]
    async fn test_enqueue_fetch_ack_roundtrip() {
        let prefix = format!("test:{}", uuid::Uuid::new_v4());
        let q = queue(&prefix);
        let options = EnqueueOptions::default().with_unique_key("u1").with_max_retry(1);

        assert!(q.enqueue("t", json!({"user_id": 1}), options.clone()).await.unwrap().is_enqueued());
        assert_eq!(
            q.enqueue("t", json!({"user_id": 1}), options.clone()).await.unwrap(),
            EnqueueOutcome::Duplicate
        );

        let tasks = q.fetch_due(10).await.unwrap();
        assert_eq!(tasks.len(), 1);
        // 租约期内不可再次领取
        assert!(q.fetch_due(10).await.unwrap().is_empty());

        q.dead_letter(tasks[0].clone(), "boom").await.unwrap();
        let mut conn = q.conn().await.unwrap();
        let dead: Vec<String> = conn.lrange(q.dead_key(), 0, -1).await.unwrap();
        assert_eq!(dead.len(), 1);
        let record: DeadLetterMessage = serde_json::from_str(&dead[0]).unwrap();
        assert_eq!(record.error, "boom");

        assert!(q.enqueue("t", json!({"user_id": 1}), options).await.unwrap().is_enqueued());
    }
}
