//! 社区积分账本服务
//!
//! 维护用户余额与订单流水，定期把外部社区积分同步到账本。
//!
//! ## 核心功能
//!
//! - **账本事务**：余额变更与订单写入在同一事务内完成，条件 UPDATE 保证余额不为负
//! - **转账**：用户之间的可用余额转移
//! - **交易查询**：按用户分页查询订单，支持类型、状态、时间范围过滤
//! - **社区积分对账**：定时扫描活跃用户，逐个拉取外部积分并记账
//! - **后台任务**：基于 Redis 的延迟任务队列，带唯一键去重、重试与死信
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `repository`: 数据库仓储层
//! - `ledger`: 账本事务与转账
//! - `query`: 交易记录查询
//! - `lock`: 用户级互斥锁
//! - `score`: 外部积分来源
//! - `task`: 任务队列与执行器
//! - `reconcile`: 分发与单用户对账
//! - `scheduler`: 定时触发分发扫描

pub mod error;
pub mod ledger;
pub mod lock;
pub mod models;
pub mod query;
pub mod reconcile;
pub mod repository;
pub mod scheduler;
pub mod score;
pub mod task;

pub use error::{LedgerError, Result};
pub use ledger::{
    BalanceMutation, FieldChange, LedgerService, MemoryLedger, OrderLedger, PgOrderLedger,
    TransferRequest,
};
pub use lock::{LocalLockProvider, LockGuard, LockManager, LockProvider};
pub use models::*;
pub use query::{OrderQueryService, TransactionListRequest, TransactionListResponse};
pub use reconcile::{
    CommunityDispatcher, CommunityReconciler, DispatchConfig, DispatchSummary,
    DispatchSweepHandler, ReconcileOutcome, ReconcileUserHandler,
};
pub use repository::{OrderFilter, OrderRepository, UserRepository};
pub use scheduler::SweepScheduler;
pub use score::{HttpScoreSource, ScoreSource};
pub use task::{
    EnqueueOptions, EnqueueOutcome, MemoryTaskQueue, RedisTaskQueue, TaskHandler,
    TaskHandlerRegistry, TaskMessage, TaskQueue, TaskRunner, TaskRunnerConfig,
};
