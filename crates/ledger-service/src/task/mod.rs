//! 后台任务队列
//!
//! 任务按到期时间调度，至少投递一次：领取后在租约期内未确认的任务会重新出现。
//! 可选的唯一键保证同一时刻同一键只有一个待执行任务。
//!
//! - `RedisTaskQueue`: 多实例共享的 Redis 实现
//! - `MemoryTaskQueue`: 单进程实现
//! - `registry` / `runner`: 按任务类型路由到处理器并执行

mod memory_queue;
mod redis_queue;
pub mod registry;
pub mod runner;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, Result};

pub use memory_queue::MemoryTaskQueue;
pub use redis_queue::RedisTaskQueue;
pub use registry::{TaskHandler, TaskHandlerRegistry};
pub use runner::{TaskRunner, TaskRunnerConfig};

/// 任务类型
pub mod task_types {
    /// 全量分发扫描
    pub const DISPATCH_SWEEP: &str = "community:dispatch_sweep";
    /// 单用户社区积分对账
    pub const RECONCILE_USER: &str = "community:reconcile_user";
}

/// 队列中的任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: String,
    pub task_type: String,
    pub payload: serde_json::Value,
    /// 已重试次数
    pub retried: u32,
    pub max_retry: u32,
    pub unique_key: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl TaskMessage {
    pub fn new(task_type: &str, payload: serde_json::Value, options: &EnqueueOptions) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.to_string(),
            payload,
            retried: 0,
            max_retry: options.max_retry,
            unique_key: options.unique_key.clone(),
            enqueued_at: Utc::now(),
            last_error: None,
        }
    }

    /// 把负载反序列化为具体类型，失败视为不可重试的负载错误
    pub fn parse_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            LedgerError::InvalidPayload(format!("{} 负载解析失败: {e}", self.task_type))
        })
    }

    pub fn can_retry(&self) -> bool {
        self.retried < self.max_retry
    }
}

/// 单用户对账任务负载
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileUserPayload {
    pub user_id: i64,
}

/// 入队选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// 延迟多久后可被领取
    pub delay: Duration,
    pub max_retry: u32,
    /// 去重键，已有同键任务未完成时入队返回 `Duplicate`
    pub unique_key: Option<String>,
    /// 去重键的最长保留时间，防止任务丢失后永远无法再入队
    pub unique_ttl: Duration,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            max_retry: 0,
            unique_key: None,
            unique_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

impl EnqueueOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn with_unique_key(mut self, key: impl Into<String>) -> Self {
        self.unique_key = Some(key.into());
        self
    }

    /// 去重键至少要覆盖延迟时长
    pub(crate) fn effective_unique_ttl(&self) -> Duration {
        self.unique_ttl.max(self.delay + Duration::from_secs(3600))
    }
}

/// 入队结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued { task_id: String },
    Duplicate,
}

impl EnqueueOutcome {
    pub fn is_enqueued(&self) -> bool {
        matches!(self, Self::Enqueued { .. })
    }
}

/// 任务队列
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(
        &self,
        task_type: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<EnqueueOutcome>;

    /// 领取最多 `limit` 个到期任务，领取后进入租约期
    async fn fetch_due(&self, limit: usize) -> Result<Vec<TaskMessage>>;

    /// 确认完成并释放去重键
    async fn ack(&self, task: &TaskMessage) -> Result<()>;

    /// 记录错误、重试计数加一，并在 `delay` 后重新投递
    async fn retry(&self, task: TaskMessage, error: &str, delay: Duration) -> Result<()>;

    /// 移入死信并释放去重键
    async fn dead_letter(&self, task: TaskMessage, error: &str) -> Result<()>;
}
