//! 仓储 Trait 定义
//!
//! 服务层依赖这些抽象而非具体实现，便于 mock 测试

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Order, User, UserRef};

use super::order_repo::OrderFilter;

/// 用户仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepositoryTrait: Send + Sync {
    async fn get_user(&self, id: i64) -> Result<Option<User>>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    /// 按最近登录时间倒序分页列出 `since` 之后登录过的用户
    async fn list_active_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UserRef>>;
}

/// 订单仓储接口（只读，写入只能走账本事务）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    async fn get_order(&self, id: i64) -> Result<Option<Order>>;
    async fn count_orders(&self, filter: &OrderFilter) -> Result<i64>;
    async fn list_orders(&self, filter: &OrderFilter, limit: i64, offset: i64)
    -> Result<Vec<Order>>;
}
