//! 分发扫描定时器
//!
//! 按 cron 表达式触发，到点时向队列投递一个 `community:dispatch_sweep` 任务。
//! 去重键带上触发时间，多个实例同时触发时只有一个任务入队。

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone};
use cron::Schedule;
use ledger_shared::observability::metrics;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{LedgerError, Result};
use crate::task::{EnqueueOptions, EnqueueOutcome, TaskQueue, task_types};

pub struct SweepScheduler {
    queue: Arc<dyn TaskQueue>,
    schedule: Schedule,
}

impl SweepScheduler {
    pub fn new(queue: Arc<dyn TaskQueue>, cron_expression: &str) -> Result<Self> {
        let schedule = Schedule::from_str(cron_expression).map_err(|e| {
            LedgerError::Validation(format!("cron 表达式无效 {cron_expression}: {e}"))
        })?;
        Ok(Self { queue, schedule })
    }

    /// `after` 之后的下一次触发时间
    pub fn next_fire<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.schedule.after(after).next()
    }

    pub fn sweep_unique_key<Tz: TimeZone>(fire_at: &DateTime<Tz>) -> String {
        format!("{}:{}", task_types::DISPATCH_SWEEP, fire_at.timestamp())
    }

    /// 投递一次分发扫描任务
    ///
    /// 扫描失败时不重试，等待下一次触发。
    pub async fn trigger<Tz: TimeZone>(&self, fire_at: &DateTime<Tz>) -> Result<EnqueueOutcome> {
        let options = EnqueueOptions::default()
            .with_max_retry(0)
            .with_unique_key(Self::sweep_unique_key(fire_at));
        self.queue
            .enqueue(task_types::DISPATCH_SWEEP, serde_json::json!({}), options)
            .await
    }

    /// 主循环，直到收到关闭信号
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("SweepScheduler 已启动");

        loop {
            let now = Local::now();
            let Some(next) = self.next_fire(&now) else {
                warn!("cron 表达式没有后续触发时间，定时器退出");
                break;
            };
            let wait = (next.clone() - now).to_std().unwrap_or_default();
            info!(next = %next, "下一次分发扫描");

            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            match self.trigger(&next).await {
                Ok(EnqueueOutcome::Enqueued { task_id }) => {
                    info!(task_id = %task_id, fire_at = %next, "已投递分发扫描任务");
                }
                Ok(EnqueueOutcome::Duplicate) => {
                    info!(fire_at = %next, "其他实例已投递本次分发扫描");
                }
                Err(e) => error!(error = %e, "投递分发扫描任务失败"),
            }
            metrics::set_worker_last_run("sweep_scheduler");
        }

        info!("SweepScheduler 已停止");
    }
}
