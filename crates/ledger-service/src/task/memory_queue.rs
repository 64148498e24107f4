//! 单进程内存任务队列

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_shared::dlq::DeadLetterMessage;
use parking_lot::Mutex;

use super::{EnqueueOptions, EnqueueOutcome, TaskMessage, TaskQueue};
use crate::error::{LedgerError, Result};

/// 入队记录，按入队顺序保存
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueRecord {
    pub task_id: String,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub delay: Duration,
    pub max_retry: u32,
    pub unique_key: Option<String>,
}

#[derive(Default)]
struct Inner {
    scheduled: HashMap<String, (DateTime<Utc>, TaskMessage)>,
    unique: HashMap<String, String>,
    dead: Vec<DeadLetterMessage>,
    history: Vec<EnqueueRecord>,
    clock_offset: chrono::Duration,
}

impl Inner {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.clock_offset
    }

    fn release_unique(&mut self, task: &TaskMessage) {
        if let Some(key) = &task.unique_key
            && self.unique.get(key) == Some(&task.id)
        {
            self.unique.remove(key);
        }
    }
}

/// 内存任务队列
///
/// 语义与 Redis 实现一致：到期调度、领取租约、去重键、死信。
pub struct MemoryTaskQueue {
    inner: Mutex<Inner>,
    visibility_timeout: Duration,
    source_service: String,
}

impl Default for MemoryTaskQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

fn to_chrono(d: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(d).map_err(|e| LedgerError::Internal(e.to_string()))
}

impl MemoryTaskQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            visibility_timeout,
            source_service: "community-ledger".to_string(),
        }
    }

    /// 全部入队记录（含被去重拒绝之外的所有成功入队）
    pub fn history(&self) -> Vec<EnqueueRecord> {
        self.inner.lock().history.clone()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterMessage> {
        self.inner.lock().dead.clone()
    }

    /// 尚未确认的任务数（含租约中的任务）
    pub fn pending_len(&self) -> usize {
        self.inner.lock().scheduled.len()
    }

    /// 拨快队列时钟，让延迟任务提前到期
    pub fn advance(&self, by: Duration) -> Result<()> {
        let by = to_chrono(by)?;
        let mut inner = self.inner.lock();
        inner.clock_offset += by;
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(
        &self,
        task_type: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<EnqueueOutcome> {
        let delay = to_chrono(options.delay)?;
        let mut inner = self.inner.lock();

        if let Some(key) = &options.unique_key
            && inner.unique.contains_key(key)
        {
            return Ok(EnqueueOutcome::Duplicate);
        }

        let task = TaskMessage::new(task_type, payload, &options);
        let due = inner.now() + delay;
        if let Some(key) = &options.unique_key {
            inner.unique.insert(key.clone(), task.id.clone());
        }
        inner.history.push(EnqueueRecord {
            task_id: task.id.clone(),
            task_type: task.task_type.clone(),
            payload: task.payload.clone(),
            delay: options.delay,
            max_retry: options.max_retry,
            unique_key: options.unique_key.clone(),
        });
        let task_id = task.id.clone();
        inner.scheduled.insert(task_id.clone(), (due, task));

        Ok(EnqueueOutcome::Enqueued { task_id })
    }

    async fn fetch_due(&self, limit: usize) -> Result<Vec<TaskMessage>> {
        let lease = to_chrono(self.visibility_timeout)?;
        let mut inner = self.inner.lock();
        let now = inner.now();

        let mut due: Vec<(DateTime<Utc>, String)> = inner
            .scheduled
            .iter()
            .filter(|(_, (at, _))| *at <= now)
            .map(|(id, (at, _))| (*at, id.clone()))
            .collect();
        due.sort();
        due.truncate(limit);

        let mut fetched = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(entry) = inner.scheduled.get_mut(&id) {
                entry.0 = now + lease;
                fetched.push(entry.1.clone());
            }
        }
        Ok(fetched)
    }

    async fn ack(&self, task: &TaskMessage) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.scheduled.remove(&task.id);
        inner.release_unique(task);
        Ok(())
    }

    async fn retry(&self, mut task: TaskMessage, error: &str, delay: Duration) -> Result<()> {
        let delay = to_chrono(delay)?;
        task.retried += 1;
        task.last_error = Some(error.to_string());

        let mut inner = self.inner.lock();
        let due = inner.now() + delay;
        inner.scheduled.insert(task.id.clone(), (due, task));
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

        let mut inner = self.inner.lock();
        inner.scheduled.remove(&task.id);
        inner.release_unique(&task);
        inner.dead.push(record);
        Ok(())
    }
}
