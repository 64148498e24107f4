//! 社区积分对账
//!
//! - `dispatcher`: 分页扫描近期活跃用户，为每个用户投递一个延迟递增的对账任务
//! - `worker`: 单用户对账，把外部积分同步到 `total_community` 并记账
//! - `handlers`: 把上面两者接到任务执行器上

pub mod dispatcher;
pub mod handlers;
pub mod worker;

pub use dispatcher::{CommunityDispatcher, DispatchConfig, DispatchSummary, activity_window_start};
pub use handlers::{DispatchSweepHandler, ReconcileUserHandler};
pub use worker::{CommunityReconciler, ReconcileOutcome, build_community_entry};
