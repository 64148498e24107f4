//! 分发扫描
//!
//! 按 `last_login_at` 倒序分页读取活跃窗口内的用户，每个用户入队一个单用户对账任务。
//! 第 k 个任务的延迟为 k 倍的分发间隔，把外部接口的调用摊平。任何一页查询或入队失败
//! 都会中止本次扫描，已入队的任务保留。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use ledger_shared::config::AppConfig;
use ledger_shared::observability::metrics;
use tracing::{debug, error, info, instrument};

use crate::error::Result;
use crate::lock::reconcile_lock_key;
use crate::repository::UserRepositoryTrait;
use crate::task::{EnqueueOptions, ReconcileUserPayload, TaskQueue, task_types};

/// 活跃窗口起点：本地当天零点往前推 `window_days` 个自然日
pub fn activity_window_start<Tz: TimeZone>(now: &DateTime<Tz>, window_days: u64) -> DateTime<Utc> {
    let today = now.date_naive();
    let start_date = today.checked_sub_days(Days::new(window_days)).unwrap_or(today);
    let midnight = start_date.and_time(NaiveTime::MIN);

    now.timezone()
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        // 零点恰好落在夏令时跳变里时，按 UTC 零点处理
        .unwrap_or_else(|| midnight.and_utc())
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub page_size: u32,
    pub interval: Duration,
    pub max_retry: u32,
    pub window_days: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            page_size: 200,
            interval: Duration::from_secs(1),
            max_retry: 3,
            window_days: 7,
        }
    }
}

impl From<&AppConfig> for DispatchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            page_size: config.schedule.dispatch_page_size.max(1),
            interval: config.schedule.dispatch_interval(),
            max_retry: config.schedule.task_max_retry,
            window_days: config.activity_window_days(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// 发起的分页查询次数（含最后一次空页）
    pub page_queries: u32,
    pub users_seen: u64,
    pub enqueued: u64,
    /// 因已有待执行任务而跳过的用户数
    pub duplicates: u64,
    pub last_delay: Duration,
}

pub struct CommunityDispatcher {
    users: Arc<dyn UserRepositoryTrait>,
    queue: Arc<dyn TaskQueue>,
    config: DispatchConfig,
}

impl CommunityDispatcher {
    pub fn new(
        users: Arc<dyn UserRepositoryTrait>,
        queue: Arc<dyn TaskQueue>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            users,
            queue,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// 以 `since` 为活跃窗口起点执行一次扫描
    #[instrument(skip(self), fields(page_size = self.config.page_size))]
    pub async fn dispatch(&self, since: DateTime<Utc>) -> Result<DispatchSummary> {
        let started = Instant::now();
        let page_size = i64::from(self.config.page_size);
        let mut summary = DispatchSummary::default();
        let mut delay = Duration::ZERO;
        let mut page: i64 = 0;

        loop {
            summary.page_queries += 1;
            let users = self
                .users
                .list_active_since(since, page_size, page * page_size)
                .await
                .inspect_err(|e| error!(page, error = %e, "查询活跃用户失败，中止分发"))?;

            if users.is_empty() {
                break;
            }

            for user in &users {
                summary.users_seen += 1;
                delay += self.config.interval;

                let payload = serde_json::to_value(ReconcileUserPayload { user_id: user.id })?;
                let options = EnqueueOptions::delayed(delay)
                    .with_max_retry(self.config.max_retry)
                    .with_unique_key(reconcile_lock_key(user.id));

                let outcome = self
                    .queue
                    .enqueue(task_types::RECONCILE_USER, payload, options)
                    .await
                    .inspect_err(|e| {
                        error!(user_id = user.id, username = %user.username, error = %e, "下发用户积分任务失败，中止分发")
                    })?;

                if outcome.is_enqueued() {
                    summary.enqueued += 1;
                    debug!(user_id = user.id, username = %user.username, delay = ?delay, "已下发用户积分任务");
                } else {
                    summary.duplicates += 1;
                    debug!(user_id = user.id, username = %user.username, "用户已有待执行的积分任务");
                }
            }

            page += 1;
        }

        summary.last_delay = delay;
        metrics::record_dispatch(summary.enqueued, started.elapsed().as_secs_f64());
        info!(
            since = %since,
            pages = summary.page_queries,
            enqueued = summary.enqueued,
            duplicates = summary.duplicates,
            spread = ?delay,
            "分发扫描完成"
        );
        Ok(summary)
    }
}
