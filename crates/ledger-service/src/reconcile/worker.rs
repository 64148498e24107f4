//! 单用户社区积分对账
//!
//! 流程：获取用户锁 -> 读取用户 -> 查询外部积分 -> 比较 -> 账本事务。
//!
//! 积分未变化时不写任何数据，同一用户重复执行是幂等的。积分变化时在一个事务里：
//! `total_community` 覆盖为新值（要求旧值未被并发修改），`total_receive` 与
//! `available_balance` 增加差值，并写入一条 `community` 订单，金额为差值的绝对值。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ledger_shared::observability::metrics;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::error::{LedgerError, Result};
use crate::ledger::{BalanceMutation, OrderLedger};
use crate::lock::{LockProvider, reconcile_lock_key};
use crate::models::{BalanceField, NewOrder, Order, OrderType, User};
use crate::repository::UserRepositoryTrait;
use crate::score::ScoreSource;

const COMMUNITY_ORDER_NAME: &str = "社区积分更新";

/// 对账结果
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Unchanged {
        score: Decimal,
    },
    Updated {
        order: Order,
        old: Decimal,
        new: Decimal,
        delta: Decimal,
    },
}

/// 根据用户当前余额和外部积分构造账本变更
///
/// 积分与 `total_community` 相等时返回 `None`。
pub fn build_community_entry(
    user: &User,
    score: i64,
    system_payer: &str,
    now: DateTime<Utc>,
) -> Result<Option<(BalanceMutation, NewOrder)>> {
    let old = user.total_community;
    let mut new = Decimal::from(score);
    new.rescale(2);

    if new == old {
        return Ok(None);
    }

    let delta = new - old;
    let mutation = BalanceMutation::new(user.id)
        .set(BalanceField::TotalCommunity, new)
        .add(BalanceField::TotalReceive, delta)
        .add(BalanceField::AvailableBalance, delta)
        .expect(BalanceField::TotalCommunity, old);

    let order = NewOrder::new(
        COMMUNITY_ORDER_NAME,
        system_payer,
        &user.username,
        delta.abs(),
        OrderType::Community,
        now,
    )?
    .with_remark(format!("社区积分从 {old} 更新到 {new}，变化 {delta}"));

    Ok(Some((mutation, order)))
}

pub struct CommunityReconciler {
    users: Arc<dyn UserRepositoryTrait>,
    scores: Arc<dyn ScoreSource>,
    ledger: Arc<dyn OrderLedger>,
    locks: Arc<dyn LockProvider>,
    system_payer: String,
    lock_ttl: Duration,
}

impl CommunityReconciler {
    pub fn new(
        users: Arc<dyn UserRepositoryTrait>,
        scores: Arc<dyn ScoreSource>,
        ledger: Arc<dyn OrderLedger>,
        locks: Arc<dyn LockProvider>,
        system_payer: impl Into<String>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            users,
            scores,
            ledger,
            locks,
            system_payer: system_payer.into(),
            lock_ttl,
        }
    }

    /// 对账单个用户
    ///
    /// 同一用户的对账正在其他地方执行时返回 `ReconcileInProgress`（可重试）。
    #[instrument(skip(self))]
    pub async fn reconcile(&self, user_id: i64) -> Result<ReconcileOutcome> {
        let key = reconcile_lock_key(user_id);
        let Some(guard) = self.locks.try_acquire(&key, self.lock_ttl).await? else {
            metrics::record_reconciliation("busy");
            return Err(LedgerError::ReconcileInProgress { user_id });
        };

        let result = self.reconcile_locked(user_id).await;

        if let Err(e) = guard.release().await {
            warn!(error = %e, "释放对账锁失败，等待 TTL 过期");
        }

        let outcome = match &result {
            Ok(ReconcileOutcome::Unchanged { .. }) => "unchanged",
            Ok(ReconcileOutcome::Updated { .. }) => "updated",
            Err(_) => "failed",
        };
        metrics::record_reconciliation(outcome);
        result
    }

    async fn reconcile_locked(&self, user_id: i64) -> Result<ReconcileOutcome> {
        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;

        let score = self.scores.fetch_score(&user.username).await?;

        let Some((mutation, order)) =
            build_community_entry(&user, score, &self.system_payer, Utc::now())?
        else {
            info!(username = %user.username, score, "用户积分未变化，跳过更新");
            return Ok(ReconcileOutcome::Unchanged {
                score: user.total_community,
            });
        };

        let old = user.total_community;
        let delta = mutation.delta_of(BalanceField::AvailableBalance);
        let new = old + delta;

        let created = self.ledger.apply(&[mutation], &order).await?;

        info!(
            username = %user.username,
            old = %old,
            new = %new,
            delta = %delta,
            order_no = %created.order_no(),
            "用户社区积分已更新"
        );
        Ok(ReconcileOutcome::Updated {
            order: created,
            old,
            new,
            delta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::lock::LocalLockProvider;
    use crate::models::OrderStatus;
    use crate::repository::MockUserRepositoryTrait;
    use crate::score::MockScoreSource;
    use std::str::FromStr;

    const PAYER: &str = "LINUX DO Community";

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn user_with_community(id: i64, community: &str) -> User {
        let mut user = User::new(id, format!("user{id}"), Utc::now());
        user.total_community = dec(community);
        user.total_receive = dec(community);
        user.available_balance = dec(community);
        user
    }

    fn score_source(score: i64) -> Arc<dyn ScoreSource> {
        let mut scores = MockScoreSource::new();
        scores.expect_fetch_score().returning(move |_| Ok(score));
        Arc::new(scores)
    }

    fn reconciler(
        ledger: Arc<MemoryLedger>,
        scores: Arc<dyn ScoreSource>,
        locks: Arc<LocalLockProvider>,
    ) -> CommunityReconciler {
        CommunityReconciler::new(
            ledger.clone(),
            scores,
            ledger,
            locks,
            PAYER,
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_entry_for_increase() {
        let user = user_with_community(1, "100.00");
        let (mutation, order) = build_community_entry(&user, 135, PAYER, Utc::now())
            .unwrap()
            .unwrap();

        assert_eq!(order.amount(), dec("35.00"));
        assert_eq!(order.amount().to_string(), "35.00");
        assert_eq!(order.order_type(), OrderType::Community);
        assert_eq!(order.payer_username(), PAYER);
        assert_eq!(order.payee_username(), "user1");
        assert_eq!(
            order.remark(),
            Some("社区积分从 100.00 更新到 135.00，变化 35.00")
        );
        assert_eq!(mutation.delta_of(BalanceField::TotalReceive), dec("35"));
        assert_eq!(mutation.delta_of(BalanceField::AvailableBalance), dec("35"));
    }

    #[test]
    fn test_entry_for_decrease_records_magnitude() {
        let user = user_with_community(1, "50.00");
        let (mutation, order) = build_community_entry(&user, 40, PAYER, Utc::now())
            .unwrap()
            .unwrap();

        assert_eq!(order.amount(), dec("10.00"));
        assert_eq!(mutation.delta_of(BalanceField::AvailableBalance), dec("-10"));
        assert!(order.remark().unwrap().contains("变化 -10.00"));
    }

    #[test]
    fn test_equal_score_builds_nothing() {
        let user = user_with_community(1, "100.00");
        assert!(build_community_entry(&user, 100, PAYER, Utc::now()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reconcile_updates_balances_and_creates_order() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.insert_user(user_with_community(1, "100"));
        let worker = reconciler(ledger.clone(), score_source(135), Arc::new(LocalLockProvider::new()));

        let outcome = worker.reconcile(1).await.unwrap();

        match outcome {
            ReconcileOutcome::Updated { order, delta, .. } => {
                assert_eq!(delta, dec("35"));
                assert_eq!(order.status(), OrderStatus::Success);
                assert_eq!(order.amount(), dec("35"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let user = ledger.user(1).unwrap();
        assert_eq!(user.total_community, dec("135"));
        assert_eq!(user.total_receive, dec("135"));
        assert_eq!(user.available_balance, dec("135"));
        assert_eq!(ledger.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_decrease() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.insert_user(user_with_community(1, "50"));
        let worker = reconciler(ledger.clone(), score_source(40), Arc::new(LocalLockProvider::new()));

        worker.reconcile(1).await.unwrap();

        let user = ledger.user(1).unwrap();
        assert_eq!(user.total_community, dec("40"));
        assert_eq!(user.total_receive, dec("40"));
        assert_eq!(user.available_balance, dec("40"));
        assert_eq!(ledger.orders()[0].amount(), dec("10"));
    }

    #[tokio::test]
    async fn test_available_balance_is_sum_of_signed_deltas() {
        use crate::ledger::{LedgerService, TransferRequest};

        let ledger = Arc::new(MemoryLedger::new());
        ledger.insert_user(User::new(1, "user1", Utc::now()));
        ledger.insert_user(User::new(2, "user2", Utc::now()));
        let locks = Arc::new(LocalLockProvider::new());

        reconciler(ledger.clone(), score_source(135), locks.clone())
            .reconcile(1)
            .await
            .unwrap();
        reconciler(ledger.clone(), score_source(40), locks)
            .reconcile(1)
            .await
            .unwrap();
        LedgerService::new(ledger.clone(), ledger.clone())
            .transfer(TransferRequest {
                payer_username: "user1".to_string(),
                payee_username: "user2".to_string(),
                amount: dec("15"),
                remark: None,
            })
            .await
            .unwrap();

        // +135 - 95 - 15
        let payer = ledger.user(1).unwrap();
        assert_eq!(payer.available_balance, dec("25"));
        assert_eq!(payer.total_community, dec("40"));
        assert_eq!(payer.total_receive, dec("40"));
        assert_eq!(payer.total_transfer, dec("15"));

        let payee = ledger.user(2).unwrap();
        assert_eq!(payee.available_balance, dec("15"));
        assert_eq!(payee.total_receive, dec("15"));
        assert_eq!(payee.total_community, Decimal::ZERO);

        let orders = ledger.orders();
        assert_eq!(orders.len(), 3);
        assert_eq!(orders[1].order_type(), OrderType::Community);
        assert_eq!(orders[1].amount(), dec("95"));
        assert!(orders[1].remark().unwrap().contains("变化 -95.00"));
        assert_eq!(orders[2].order_type(), OrderType::Transfer);
        assert_eq!(orders[2].amount(), dec("15"));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.insert_user(user_with_community(1, "100"));
        let worker = reconciler(ledger.clone(), score_source(135), Arc::new(LocalLockProvider::new()));

        worker.reconcile(1).await.unwrap();
        let balances = ledger.user(1).unwrap().balances();

        let second = worker.reconcile(1).await.unwrap();

        assert!(matches!(second, ReconcileOutcome::Unchanged { .. }));
        assert_eq!(ledger.orders().len(), 1);
        assert_eq!(ledger.user(1).unwrap().balances(), balances);
    }

    #[tokio::test]
    async fn test_failed_order_insert_rolls_back_balances() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.insert_user(user_with_community(1, "100"));
        ledger.fail_order_insert(true);
        let worker = reconciler(ledger.clone(), score_source(135), Arc::new(LocalLockProvider::new()));

        assert!(worker.reconcile(1).await.is_err());

        let user = ledger.user(1).unwrap();
        assert_eq!(user.total_community, dec("100"));
        assert_eq!(user.available_balance, dec("100"));
        assert!(ledger.orders().is_empty());
    }

    #[tokio::test]
    async fn test_missing_user_is_not_retryable() {
        let mut users = MockUserRepositoryTrait::new();
        users.expect_get_user().returning(|_| Ok(None));
        let mut scores = MockScoreSource::new();
        scores.expect_fetch_score().times(0);

        let worker = CommunityReconciler::new(
            Arc::new(users),
            Arc::new(scores),
            Arc::new(MemoryLedger::new()),
            Arc::new(LocalLockProvider::new()),
            PAYER,
            Duration::from_secs(60),
        );

        let err = worker.reconcile(9).await.unwrap_err();
        assert!(matches!(err, LedgerError::UserNotFound(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_score_source_failure_writes_nothing() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.insert_user(user_with_community(1, "100"));
        let mut scores = MockScoreSource::new();
        scores.expect_fetch_score().returning(|_| {
            Err(LedgerError::ExternalServiceTimeout {
                service: "score_source".into(),
            })
        });
        let worker = reconciler(ledger.clone(), Arc::new(scores), Arc::new(LocalLockProvider::new()));

        let err = worker.reconcile(1).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(ledger.user(1).unwrap().total_community, dec("100"));
        assert!(ledger.orders().is_empty());
    }

    #[tokio::test]
    async fn test_held_lock_reports_in_progress_and_skips_work() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.insert_user(user_with_community(1, "100"));
        let locks = Arc::new(LocalLockProvider::new());
        let _held = locks
            .try_acquire(&reconcile_lock_key(1), Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let mut scores = MockScoreSource::new();
        scores.expect_fetch_score().times(0);
        let worker = reconciler(ledger.clone(), Arc::new(scores), locks.clone());

        let err = worker.reconcile(1).await.unwrap_err();

        assert!(matches!(err, LedgerError::ReconcileInProgress { user_id: 1 }));
        assert!(err.is_retryable());
        assert!(ledger.orders().is_empty());
    }

    #[tokio::test]
    async fn test_lock_released_after_run() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.insert_user(user_with_community(1, "100"));
        let locks = Arc::new(LocalLockProvider::new());
        let worker = reconciler(ledger, score_source(100), locks.clone());

        worker.reconcile(1).await.unwrap();

        assert!(!locks.is_locked(&reconcile_lock_key(1)));
    }

    #[tokio::test]
    async fn test_concurrent_change_between_read_and_commit_conflicts() {
        // 读取时旧值为 100，提交前被改成 120
        let ledger = Arc::new(MemoryLedger::new());
        ledger.insert_user(user_with_community(1, "120"));

        let mut users = MockUserRepositoryTrait::new();
        users
            .expect_get_user()
            .returning(|_| Ok(Some(user_with_community(1, "100"))));

        let worker = CommunityReconciler::new(
            Arc::new(users),
            score_source(135),
            ledger.clone(),
            Arc::new(LocalLockProvider::new()),
            PAYER,
            Duration::from_secs(60),
        );

        let err = worker.reconcile(1).await.unwrap_err();

        assert!(matches!(err, LedgerError::ConcurrencyConflict { user_id: 1 }));
        assert_eq!(ledger.user(1).unwrap().total_community, dec("120"));
        assert!(ledger.orders().is_empty());
    }
}
