//! 单进程内存账本
//!
//! 与 [`PgOrderLedger`](super::PgOrderLedger) 语义一致：变更先作用在副本上，
//! 订单写入成功后才整体替换，任何一步失败都不留下痕迹。同时实现用户与订单的只读仓储接口。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::OrderLedger;
use super::mutation::BalanceMutation;
use crate::error::{LedgerError, Result};
use crate::models::{Order, NewOrder, User, UserRef};
use crate::repository::{OrderFilter, OrderRepositoryTrait, UserRepositoryTrait};

#[derive(Default)]
struct State {
    users: BTreeMap<i64, User>,
    orders: Vec<Order>,
    next_order_id: i64,
}

#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
    fail_order_insert: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        self.state.lock().users.insert(user.id, user);
    }

    pub fn user(&self, id: i64) -> Option<User> {
        self.state.lock().users.get(&id).cloned()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().orders.clone()
    }

    /// 让后续的订单写入失败，模拟余额更新之后、订单插入之前的故障
    pub fn fail_order_insert(&self, fail: bool) {
        self.fail_order_insert.store(fail, Ordering::SeqCst);
    }

    fn matches(filter: &OrderFilter, order: &Order) -> bool {
        (order.payee_username() == filter.username || order.payer_username() == filter.username)
            && filter.order_type.is_none_or(|t| t == order.order_type())
            && filter.status.is_none_or(|s| s == order.status())
            && filter.start_time.is_none_or(|t| order.created_at() >= t)
            && filter.end_time.is_none_or(|t| order.created_at() <= t)
    }

    fn filtered(&self, filter: &OrderFilter) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .state
            .lock()
            .orders
            .iter()
            .filter(|o| Self::matches(filter, o))
            .cloned()
            .collect();
        orders.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().cmp(&a.id()))
        });
        orders
    }
}

#[async_trait]
impl OrderLedger for MemoryLedger {
    async fn apply(&self, mutations: &[BalanceMutation], order: &NewOrder) -> Result<Order> {
        for mutation in mutations {
            mutation.validate()?;
        }

        let mut state = self.state.lock();
        let mut staged = state.users.clone();

        for mutation in mutations {
            let user = staged
                .get_mut(&mutation.user_id())
                .ok_or_else(|| LedgerError::UserNotFound(mutation.user_id().to_string()))?;
            let mut snapshot = user.balances();
            mutation.apply_to(&mut snapshot)?;
            user.set_balances(&snapshot);
        }

        if self.fail_order_insert.load(Ordering::SeqCst) {
            return Err(LedgerError::Internal("订单写入失败".to_string()));
        }

        state.next_order_id += 1;
        let created = Order::from_new(state.next_order_id, order, Utc::now());
        state.orders.push(created.clone());
        state.users = staged;

        Ok(created)
    }
}

#[async_trait]
impl UserRepositoryTrait for MemoryLedger {
    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        Ok(self.user(id))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .state
            .lock()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn list_active_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UserRef>> {
        let state = self.state.lock();
        let mut active: Vec<&User> = state
            .users
            .values()
            .filter(|u| u.last_login_at >= since)
            .collect();
        active.sort_by(|a, b| {
            b.last_login_at
                .cmp(&a.last_login_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        Ok(active
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|u| UserRef {
                id: u.id,
                username: u.username.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl OrderRepositoryTrait for MemoryLedger {
    async fn get_order(&self, id: i64) -> Result<Option<Order>> {
        Ok(self
            .state
            .lock()
            .orders
            .iter()
            .find(|o| o.id() == id)
            .cloned())
    }

    async fn count_orders(&self, filter: &OrderFilter) -> Result<i64> {
        Ok(self.filtered(filter).len() as i64)
    }

    async fn list_orders(
        &self,
        filter: &OrderFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>> {
        Ok(self
            .filtered(filter)
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}
