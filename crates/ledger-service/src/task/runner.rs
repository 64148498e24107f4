//! 任务执行器
//!
//! 轮询到期任务，按批次并发执行。失败处理：
//!
//! - 可重试错误且未超过任务的最大重试次数：按指数退避重新投递
//! - 其他情况：写入死信并记录 error 日志
//!
//! 没有注册处理器的任务类型直接进入死信。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use ledger_shared::config::WorkerConfig;
use ledger_shared::observability::metrics;
use ledger_shared::retry::RetryPolicy;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::registry::TaskHandlerRegistry;
use super::{TaskMessage, TaskQueue};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct TaskRunnerConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub concurrency: usize,
}

impl Default for TaskRunnerConfig {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for TaskRunnerConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
        }
    }
}

/// 单个任务的执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Retried,
    DeadLettered,
}

impl TaskOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "success",
            Self::Retried => "retried",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

pub struct TaskRunner {
    queue: Arc<dyn TaskQueue>,
    registry: Arc<TaskHandlerRegistry>,
    retry_policy: RetryPolicy,
    config: TaskRunnerConfig,
}

impl TaskRunner {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        registry: Arc<TaskHandlerRegistry>,
        retry_policy: RetryPolicy,
        config: TaskRunnerConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            retry_policy,
            config,
        }
    }

    /// 主循环，直到收到关闭信号
    ///
    /// 关闭信号只在批次之间检查，正在执行的任务会自然完成。
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval = ?self.config.poll_interval,
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            handlers = ?self.registry.registered_types(),
            "TaskRunner 已启动"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let processed = match self.run_once().await {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "领取任务失败");
                    0
                }
            };
            metrics::set_worker_last_run("task_runner");

            // 满批次说明可能还有积压，立即继续
            if processed >= self.config.batch_size {
                continue;
            }

            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!("TaskRunner 已停止");
    }

    /// 领取并执行一批到期任务，返回领取数量
    pub async fn run_once(&self) -> Result<usize> {
        let tasks = self.queue.fetch_due(self.config.batch_size).await?;
        let count = tasks.len();
        if count > 0 {
            debug!(count, "领取到期任务");
        }

        futures::stream::iter(tasks)
            .for_each_concurrent(self.config.concurrency, |task| async move {
                self.execute(task).await;
            })
            .await;

        Ok(count)
    }

    /// 执行单个任务并处理结果，队列操作失败只记录日志
    pub async fn execute(&self, task: TaskMessage) -> TaskOutcome {
        let span = info_span!(
            "task",
            task_id = %task.id,
            task_type = %task.task_type,
            retried = task.retried
        );
        self.execute_inner(task).instrument(span).await
    }

    async fn execute_inner(&self, task: TaskMessage) -> TaskOutcome {
        let started = Instant::now();
        let task_type = task.task_type.clone();

        let Some(handler) = self.registry.get(&task.task_type) else {
            let message = format!("未注册的任务类型: {}", task.task_type);
            error!(%message, "任务无法路由，移入死信");
            self.dead_letter(task, &message).await;
            metrics::record_task_execution(&task_type, "dead_lettered", 0.0);
            return TaskOutcome::DeadLettered;
        };

        let outcome = match handler.handle(&task).await {
            Ok(()) => {
                if let Err(e) = self.queue.ack(&task).await {
                    warn!(error = %e, "任务确认失败，租约到期后会重新投递");
                }
                TaskOutcome::Succeeded
            }
            Err(e) if e.is_retryable() && task.can_retry() => {
                let delay = self.retry_policy.delay_for_attempt(task.retried);
                warn!(
                    error = %e,
                    code = e.error_code(),
                    retry_in = ?delay,
                    max_retry = task.max_retry,
                    "任务失败，稍后重试"
                );
                if let Err(queue_err) = self.queue.retry(task, &e.to_string(), delay).await {
                    error!(error = %queue_err, "任务重新投递失败");
                }
                TaskOutcome::Retried
            }
            Err(e) => {
                error!(
                    error = %e,
                    code = e.error_code(),
                    retryable = e.is_retryable(),
                    max_retry = task.max_retry,
                    "任务失败，移入死信"
                );
                self.dead_letter(task, &e.to_string()).await;
                TaskOutcome::DeadLettered
            }
        };

        metrics::record_task_execution(
            &task_type,
            outcome.as_str(),
            started.elapsed().as_secs_f64(),
        );
        outcome
    }

    async fn dead_letter(&self, task: TaskMessage, error: &str) {
        if let Err(e) = self.queue.dead_letter(task, error).await {
            error!(error = %e, "写入死信失败");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::task::registry::TaskHandler;
    use crate::task::{EnqueueOptions, MemoryTaskQueue};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 按预设顺序返回结果的处理器
    struct ScriptedHandler {
        calls: AtomicU32,
        fail_with: fn(u32) -> Option<LedgerError>,
    }

    #[async_trait]
    impl TaskHandler for ScriptedHandler {
        fn task_type(&self) -> &'static str {
            "test:scripted"
        }

        async fn handle(&self, _task: &TaskMessage) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match (self.fail_with)(call) {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    fn setup(fail_with: fn(u32) -> Option<LedgerError>) -> (Arc<MemoryTaskQueue>, Arc<ScriptedHandler>, TaskRunner) {
        let queue = Arc::new(MemoryTaskQueue::default());
        let handler = Arc::new(ScriptedHandler {
            calls: AtomicU32::new(0),
            fail_with,
        });
        let mut registry = TaskHandlerRegistry::new();
        registry.register(handler.clone());

        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(1),
            ..RetryPolicy::default()
        };
        let runner = TaskRunner::new(
            queue.clone(),
            Arc::new(registry),
            policy,
            TaskRunnerConfig::default(),
        );
        (queue, handler, runner)
    }

    fn timeout() -> LedgerError {
        LedgerError::ExternalServiceTimeout {
            service: "score_source".to_string(),
        }
    }

    async fn enqueue(queue: &MemoryTaskQueue, task_type: &str, max_retry: u32) {
        queue
            .enqueue(
                task_type,
                json!({"user_id": 1}),
                EnqueueOptions::default().with_max_retry(max_retry),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_success_acks_task() {
        let (queue, handler, runner) = setup(|_| None);
        enqueue(&queue, "test:scripted", 3).await;

        assert_eq!(runner.run_once().await.unwrap(), 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending_len(), 0);
        assert!(queue.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_succeeds() {
        let (queue, handler, runner) = setup(|call| (call == 0).then(timeout));
        enqueue(&queue, "test:scripted", 3).await;

        runner.run_once().await.unwrap();
        assert_eq!(queue.pending_len(), 1);

        // 退避期间不会被领取
        assert_eq!(runner.run_once().await.unwrap(), 0);

        queue.advance(Duration::from_secs(1)).unwrap();
        runner.run_once().await.unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(queue.pending_len(), 0);
        assert!(queue.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let (queue, handler, runner) = setup(|_| Some(timeout()));
        enqueue(&queue, "test:scripted", 2).await;

        for _ in 0..3 {
            runner.run_once().await.unwrap();
            queue.advance(Duration::from_secs(600)).unwrap();
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].retry_count, 2);
        assert!(dead[0].error.contains("外部服务超时"));
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_retry_limit_comes_from_task() {
        let (queue, handler, runner) = setup(|_| Some(timeout()));
        enqueue(&queue, "test:scripted", 5).await;

        for _ in 0..6 {
            runner.run_once().await.unwrap();
            queue.advance(Duration::from_secs(600)).unwrap();
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), 6);
        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].retry_count, 5);
    }

    #[tokio::test]
    async fn test_zero_max_retry_dead_letters_transient_failure() {
        let (queue, handler, runner) = setup(|_| Some(timeout()));
        enqueue(&queue, "test:scripted", 0).await;

        let task = queue.fetch_due(1).await.unwrap().remove(0);
        assert_eq!(runner.execute(task).await, TaskOutcome::DeadLettered);

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_fatal_error_dead_letters_immediately() {
        let (queue, handler, runner) =
            setup(|_| Some(LedgerError::UserNotFound("1".to_string())));
        enqueue(&queue, "test:scripted", 3).await;

        runner.run_once().await.unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.dead_letters().len(), 1);
        assert_eq!(queue.dead_letters()[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_unknown_task_type_dead_letters() {
        let (queue, handler, runner) = setup(|_| None);
        enqueue(&queue, "test:unknown", 3).await;

        let task = queue.fetch_due(1).await.unwrap().remove(0);
        assert_eq!(runner.execute(task).await, TaskOutcome::DeadLettered);

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert!(queue.dead_letters()[0].error.contains("test:unknown"));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (_queue, _handler, runner) = setup(|_| None);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { runner.run(rx).await });
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("runner did not stop")
            .unwrap();
    }
}
