//! Redis 连接管理模块
//!
//! 提供 Redis 客户端创建、复用连接获取和健康检查，
//! 任务队列与分布式锁都基于这里的连接。

use crate::config::RedisConfig;
use crate::error::{Result, SharedError};
use redis::Client;
use redis::aio::MultiplexedConnection;
use tracing::info;

/// Redis 客户端包装
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
}

impl RedisStore {
    /// 创建 Redis 客户端（不会立即建立连接）
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!("Redis client created");
        Ok(Self { client })
    }

    /// 底层客户端
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// 获取多路复用连接
    pub async fn conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(SharedError::from)
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(SharedError::from)
    }
}
