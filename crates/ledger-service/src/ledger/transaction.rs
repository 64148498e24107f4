//! PostgreSQL 订单创建事务

use async_trait::async_trait;
use ledger_shared::observability::metrics;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info, instrument, warn};

use super::OrderLedger;
use super::mutation::BalanceMutation;
use crate::error::{LedgerError, Result};
use crate::models::{NewOrder, Order};
use crate::repository::{OrderRepository, UserRepository};

/// 基于 PostgreSQL 事务的账本
///
/// 每个变更翻译成一条带条件的 UPDATE（行锁 + 前置条件），全部成功后插入订单并提交。
/// 变更按用户 ID 升序执行，两个方向相反的转账不会互相死锁。
pub struct PgOrderLedger {
    pool: PgPool,
}

impl PgOrderLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn apply_in_tx(
        conn: &mut PgConnection,
        mutations: &[&BalanceMutation],
        order: &NewOrder,
    ) -> Result<Order> {
        for mutation in mutations {
            let mut qb = mutation.build_update();
            let affected = qb.build().execute(&mut *conn).await?.rows_affected();

            if affected == 0 {
                return Err(Self::diagnose(conn, mutation).await);
            }
            debug!(user_id = mutation.user_id(), "余额变更已应用");
        }

        OrderRepository::insert_in_tx(conn, order).await
    }

    /// 条件更新命中 0 行时，读取当前余额判断具体原因
    async fn diagnose(conn: &mut PgConnection, mutation: &BalanceMutation) -> LedgerError {
        match UserRepository::get_balances_in_tx(conn, mutation.user_id()).await {
            Ok(None) => LedgerError::UserNotFound(mutation.user_id().to_string()),
            Ok(Some(mut snapshot)) => match mutation.apply_to(&mut snapshot) {
                Err(e) => e,
                // 读取时条件已恢复成立，说明更新时被并发修改
                Ok(()) => LedgerError::ConcurrencyConflict {
                    user_id: mutation.user_id(),
                },
            },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl OrderLedger for PgOrderLedger {
    #[instrument(
        skip(self, mutations, order),
        fields(order_type = %order.order_type(), amount = %order.amount(), users = mutations.len())
    )]
    async fn apply(&self, mutations: &[BalanceMutation], order: &NewOrder) -> Result<Order> {
        for mutation in mutations {
            mutation.validate()?;
        }
        let mut ordered: Vec<&BalanceMutation> = mutations.iter().collect();
        ordered.sort_by_key(|m| m.user_id());

        let mut tx = self.pool.begin().await?;

        match Self::apply_in_tx(&mut tx, &ordered, order).await {
            Ok(created) => {
                tx.commit().await?;
                metrics::record_order_created(order.order_type().as_str());
                info!(
                    order_id = created.id(),
                    order_no = %created.order_no(),
                    "账本事务已提交"
                );
                Ok(created)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "账本事务回滚失败");
                }
                metrics::record_ledger_failure(order.order_type().as_str());
                warn!(error = %e, code = e.error_code(), "账本事务已回滚");
                Err(e)
            }
        }
    }
}
