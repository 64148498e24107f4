//! 账本模块
//!
//! 所有余额变动都必须通过 [`OrderLedger::apply`] 完成：在同一个事务里应用若干用户的
//! 余额变更并写入一条订单，要么全部生效，要么全部回滚。
//!
//! - `mutation`: 余额变更描述与条件 UPDATE 构造
//! - `transaction`: PostgreSQL 事务实现
//! - `memory`: 单进程内存实现
//! - `service`: 基于账本事务的业务操作（转账）

pub mod memory;
pub mod mutation;
pub mod service;
pub mod transaction;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{NewOrder, Order};

pub use memory::MemoryLedger;
pub use mutation::{BalanceMutation, FieldChange};
pub use service::{LedgerService, TransferRequest};
pub use transaction::PgOrderLedger;

/// 订单创建事务
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// 原子地应用余额变更并创建订单
    ///
    /// 任一变更的前置条件不成立或订单写入失败时，整个事务回滚，返回对应错误。
    async fn apply(&self, mutations: &[BalanceMutation], order: &NewOrder) -> Result<Order>;
}
