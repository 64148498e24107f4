//! 账本服务错误类型
//!
//! 按处理策略划分：瞬时错误（外部服务、数据库、锁竞争）交给任务队列重试，
//! 数据完整性错误和参数错误直接上报，不做重试。

use ledger_shared::error::SharedError;
use rust_decimal::Decimal;
use thiserror::Error;

/// 账本服务错误类型
#[derive(Debug, Error)]
pub enum LedgerError {
    // === 数据完整性 ===
    #[error("用户不存在: {0}")]
    UserNotFound(String),

    #[error("订单不存在: {0}")]
    OrderNotFound(i64),

    // === 业务规则 ===
    #[error("可用余额不足: user_id={user_id}, 需要 {required}, 可用 {available}")]
    InsufficientBalance {
        user_id: i64,
        required: Decimal,
        available: Decimal,
    },

    #[error("账本并发冲突: user_id={user_id}")]
    ConcurrencyConflict { user_id: i64 },

    #[error("用户对账正在进行: user_id={user_id}")]
    ReconcileInProgress { user_id: i64 },

    #[error("获取锁失败: {resource}")]
    LockConflict { resource: String },

    // === 参数与配置 ===
    #[error("任务参数无效: {0}")]
    InvalidPayload(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    // === 外部服务 ===
    #[error("外部服务错误: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error("外部服务超时: {service}")]
    ExternalServiceTimeout { service: String },

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis 错误: {0}")]
    Redis(String),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 账本服务 Result 类型别名
pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    /// 是否值得交给任务队列重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Redis(_)
                | Self::ExternalService { .. }
                | Self::ExternalServiceTimeout { .. }
                | Self::ConcurrencyConflict { .. }
                | Self::ReconcileInProgress { .. }
                | Self::LockConflict { .. }
        )
    }

    /// 获取错误码（用于日志与死信记录）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            Self::ReconcileInProgress { .. } => "RECONCILE_IN_PROGRESS",
            Self::LockConflict { .. } => "LOCK_CONFLICT",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::ExternalServiceTimeout { .. } => "EXTERNAL_SERVICE_TIMEOUT",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<redis::RedisError> for LedgerError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(err.to_string())
    }
}

impl From<SharedError> for LedgerError {
    fn from(err: SharedError) -> Self {
        match err {
            SharedError::Database(e) => Self::Database(e),
            SharedError::Redis(e) => Self::Redis(e.to_string()),
            SharedError::Serialization(e) => Self::Serialization(e),
            other => Self::Internal(other.to_string()),
        }
    }
}
