//! 社区积分账本服务
//!
//! 后台进程入口：定时投递分发扫描，执行分发与单用户对账任务。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ledger_shared::{
    config::AppConfig, database::Database, observability, redis_client::RedisStore,
    retry::RetryPolicy,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use community_ledger::{
    lock::LockManager,
    reconcile::{
        CommunityDispatcher, CommunityReconciler, DispatchConfig, DispatchSweepHandler,
        ReconcileUserHandler,
    },
    repository::UserRepository,
    scheduler::SweepScheduler,
    score::HttpScoreSource,
    task::{RedisTaskQueue, TaskHandlerRegistry, TaskRunner, TaskRunnerConfig},
    PgOrderLedger,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置：config/default.toml -> 环境配置 -> 服务配置 -> LEDGER_ 环境变量
    let config = AppConfig::load("community-ledger").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig::default()
    });

    let obs_config = config.observability.clone().with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting community-ledger...");
    info!(environment = %config.environment, "Configuration loaded");

    // 2. 数据库
    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;
    let pool = db.pool().clone();
    info!("Database connection established");

    // 3. Redis
    let redis = RedisStore::new(&config.redis)?;
    redis.health_check().await?;
    info!("Redis connection established");

    // 4. 仓储与账本
    let users = Arc::new(UserRepository::new(pool.clone()));
    let ledger = Arc::new(PgOrderLedger::new(pool.clone()));
    let queue = Arc::new(RedisTaskQueue::new(
        redis.clone(),
        Duration::from_secs(config.worker.visibility_timeout_seconds),
    ));
    let locks = Arc::new(LockManager::new(Some(redis.client().clone()), pool.clone()));
    let scores = Arc::new(HttpScoreSource::new(&config.score_source)?);

    // 5. 对账组件
    let dispatcher = Arc::new(CommunityDispatcher::new(
        users.clone(),
        queue.clone(),
        DispatchConfig::from(&config),
    ));
    let reconciler = Arc::new(CommunityReconciler::new(
        users.clone(),
        scores,
        ledger,
        locks,
        config.score_source.system_payer.clone(),
        Duration::from_secs(config.worker.lock_ttl_seconds),
    ));

    let mut registry = TaskHandlerRegistry::new();
    registry
        .register(Arc::new(DispatchSweepHandler::new(dispatcher)))
        .register(Arc::new(ReconcileUserHandler::new(reconciler)));

    let runner = TaskRunner::new(
        queue.clone(),
        Arc::new(registry),
        RetryPolicy::default(),
        TaskRunnerConfig::from(&config.worker),
    );
    let scheduler = SweepScheduler::new(queue, &config.schedule.community_sweep_cron)?;
    info!(cron = %config.schedule.community_sweep_cron, "Services initialized");

    // 6. 启动后台循环
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runner_handle = {
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { runner.run(rx).await })
    };
    let scheduler_handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        warn!("后台循环已全部退出");
    }

    for (name, handle) in [("task_runner", runner_handle), ("sweep_scheduler", scheduler_handle)] {
        if let Err(e) = handle.await {
            error!(worker = name, error = %e, "后台循环异常退出");
        }
    }

    db.close().await;
    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
