//! 订单仓储
//!
//! 订单只能通过账本事务插入（`insert_in_tx`），这里的公开查询全部是只读的。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use super::traits::OrderRepositoryTrait;
use crate::error::Result;
use crate::models::{NewOrder, Order, OrderStatus, OrderType};

const ORDER_COLUMNS: &str = "id, order_name, merchant_order_no, client_id, payer_username, \
     payee_username, amount, status, type, remark, trade_time, expires_at, created_at, updated_at";

/// 用户交易记录筛选条件
///
/// 用户既可以是付款方也可以是收款方。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderFilter {
    pub username: String,
    pub order_type: Option<OrderType>,
    pub status: Option<OrderStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl OrderFilter {
    pub fn for_user(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    fn push_where<'a>(&self, qb: &mut QueryBuilder<'a, Postgres>) {
        qb.push(" WHERE (payee_username = ");
        qb.push_bind(self.username.clone());
        qb.push(" OR payer_username = ");
        qb.push_bind(self.username.clone());
        qb.push(")");

        if let Some(order_type) = self.order_type {
            qb.push(" AND type = ");
            qb.push_bind(order_type);
        }
        if let Some(status) = self.status {
            qb.push(" AND status = ");
            qb.push_bind(status);
        }
        if let Some(start) = self.start_time {
            qb.push(" AND created_at >= ");
            qb.push_bind(start);
        }
        if let Some(end) = self.end_time {
            qb.push(" AND created_at <= ");
            qb.push_bind(end);
        }
    }

    pub(crate) fn build_count(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM orders");
        self.push_where(&mut qb);
        qb
    }

    pub(crate) fn build_list(&self, limit: i64, offset: i64) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new(format!("SELECT {ORDER_COLUMNS} FROM orders"));
        self.push_where(&mut qb);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);
        qb
    }
}

pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中插入订单并返回完整记录
    pub async fn insert_in_tx(conn: &mut PgConnection, order: &NewOrder) -> Result<Order> {
        let sql = format!(
            r#"
            INSERT INTO orders (order_name, merchant_order_no, client_id, payer_username,
                                payee_username, amount, status, type, remark, trade_time, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {ORDER_COLUMNS}
            "#
        );

        let created = sqlx::query_as::<_, Order>(&sql)
            .bind(&order.order_name)
            .bind(&order.merchant_order_no)
            .bind(&order.client_id)
            .bind(&order.payer_username)
            .bind(&order.payee_username)
            .bind(order.amount)
            .bind(order.status)
            .bind(order.order_type)
            .bind(&order.remark)
            .bind(order.trade_time)
            .bind(order.expires_at)
            .fetch_one(conn)
            .await?;

        Ok(created)
    }
}

#[async_trait]
impl OrderRepositoryTrait for OrderRepository {
    async fn get_order(&self, id: i64) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(order)
    }

    async fn count_orders(&self, filter: &OrderFilter) -> Result<i64> {
        let mut qb = filter.build_count();
        let total: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(total)
    }

    async fn list_orders(
        &self,
        filter: &OrderFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>> {
        let mut qb = filter.build_list(limit, offset);
        let orders = qb.build_query_as::<Order>().fetch_all(&self.pool).await?;
        Ok(orders)
    }
}
