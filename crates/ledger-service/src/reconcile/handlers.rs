//! 对账任务处理器

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;

use super::dispatcher::{CommunityDispatcher, activity_window_start};
use super::worker::CommunityReconciler;
use crate::error::Result;
use crate::task::{ReconcileUserPayload, TaskHandler, TaskMessage, task_types};

/// `community:dispatch_sweep`：以本地当天零点为基准计算活跃窗口并执行分发
pub struct DispatchSweepHandler {
    dispatcher: Arc<CommunityDispatcher>,
}

impl DispatchSweepHandler {
    pub fn new(dispatcher: Arc<CommunityDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl TaskHandler for DispatchSweepHandler {
    fn task_type(&self) -> &'static str {
        task_types::DISPATCH_SWEEP
    }

    async fn handle(&self, _task: &TaskMessage) -> Result<()> {
        let since = activity_window_start(&Local::now(), self.dispatcher.config().window_days);
        self.dispatcher.dispatch(since).await.map(|_| ())
    }
}

/// `community:reconcile_user`：负载为 `{"user_id": <id>}`
pub struct ReconcileUserHandler {
    reconciler: Arc<CommunityReconciler>,
}

impl ReconcileUserHandler {
    pub fn new(reconciler: Arc<CommunityReconciler>) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl TaskHandler for ReconcileUserHandler {
    fn task_type(&self) -> &'static str {
        task_types::RECONCILE_USER
    }

    async fn handle(&self, task: &TaskMessage) -> Result<()> {
        let payload: ReconcileUserPayload = task.parse_payload()?;
        self.reconciler.reconcile(payload.user_id).await.map(|_| ())
    }
}
