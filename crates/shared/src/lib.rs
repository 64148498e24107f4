//! 共享库
//!
//! 包含账本服务共用的配置、错误处理、数据库连接、Redis 连接、可观测性、重试与死信等基础设施代码。

pub mod config;
pub mod database;
pub mod dlq;
pub mod error;
pub mod observability;
pub mod redis_client;
pub mod retry;
