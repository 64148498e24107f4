//! 账本业务服务
//!
//! 在订单创建事务之上提供用户间转账。

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, instrument};

use super::OrderLedger;
use super::mutation::BalanceMutation;
use crate::error::{LedgerError, Result};
use crate::models::{BalanceField, NewOrder, Order, OrderType};
use crate::repository::UserRepositoryTrait;

/// 转账请求
#[derive(Debug, Clone, Deserialize)]
pub struct TransferRequest {
    pub payer_username: String,
    pub payee_username: String,
    pub amount: Decimal,
    pub remark: Option<String>,
}

pub struct LedgerService {
    users: Arc<dyn UserRepositoryTrait>,
    ledger: Arc<dyn OrderLedger>,
}

impl LedgerService {
    pub fn new(users: Arc<dyn UserRepositoryTrait>, ledger: Arc<dyn OrderLedger>) -> Self {
        Self { users, ledger }
    }

    /// 用户间转账
    ///
    /// 付款方可用余额减少并累计转出额，收款方收入与可用余额增加，同时写入一条 `transfer` 订单。
    /// 付款方可用余额不足时整个事务失败。
    #[instrument(skip(self, request), fields(payer = %request.payer_username, payee = %request.payee_username))]
    pub async fn transfer(&self, request: TransferRequest) -> Result<Order> {
        if request.amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "转账金额必须为正: {}",
                request.amount
            )));
        }
        if request.payer_username == request.payee_username {
            return Err(LedgerError::Validation("不能给自己转账".to_string()));
        }

        let payer = self
            .users
            .find_by_username(&request.payer_username)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(request.payer_username.clone()))?;
        let payee = self
            .users
            .find_by_username(&request.payee_username)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(request.payee_username.clone()))?;

        let amount = request.amount;
        let mutations = [
            BalanceMutation::new(payer.id)
                .add(BalanceField::AvailableBalance, -amount)
                .add(BalanceField::TotalTransfer, amount)
                .require_non_negative(BalanceField::AvailableBalance),
            BalanceMutation::new(payee.id)
                .add(BalanceField::TotalReceive, amount)
                .add(BalanceField::AvailableBalance, amount),
        ];

        let mut order = NewOrder::new(
            "转账",
            &payer.username,
            &payee.username,
            amount,
            OrderType::Transfer,
            Utc::now(),
        )?;
        if let Some(remark) = request.remark {
            order = order.with_remark(remark);
        }

        let created = self.ledger.apply(&mutations, &order).await?;

        info!(order_no = %created.order_no(), amount = %amount, "转账完成");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::models::User;

    fn setup() -> (Arc<MemoryLedger>, LedgerService) {
        let ledger = Arc::new(MemoryLedger::new());
        let mut alice = User::new(1, "alice", Utc::now());
        alice.available_balance = Decimal::from(100);
        ledger.insert_user(alice);
        ledger.insert_user(User::new(2, "bob", Utc::now()));

        let service = LedgerService::new(ledger.clone(), ledger.clone());
        (ledger, service)
    }

    fn request(amount: i64) -> TransferRequest {
        TransferRequest {
            payer_username: "alice".to_string(),
            payee_username: "bob".to_string(),
            amount: Decimal::from(amount),
            remark: Some("午饭".to_string()),
        }
    }

    #[tokio::test]
    async fn test_transfer_moves_balance_and_records_order() {
        let (ledger, service) = setup();

        let order = service.transfer(request(30)).await.unwrap();

        assert_eq!(order.order_type(), OrderType::Transfer);
        assert_eq!(order.amount(), Decimal::from(30));
        assert_eq!(order.payer_username(), "alice");
        assert_eq!(order.remark(), Some("午饭"));

        let alice = ledger.user(1).unwrap();
        let bob = ledger.user(2).unwrap();
        assert_eq!(alice.available_balance, Decimal::from(70));
        assert_eq!(alice.total_transfer, Decimal::from(30));
        assert_eq!(bob.available_balance, Decimal::from(30));
        assert_eq!(bob.total_receive, Decimal::from(30));
    }

    #[tokio::test]
    async fn test_transfer_insufficient_balance_changes_nothing() {
        let (ledger, service) = setup();

        let err = service.transfer(request(150)).await.unwrap_err();

        assert!(matches!(err, LedgerError::InsufficientBalance { user_id: 1, .. }));
        assert_eq!(ledger.user(1).unwrap().available_balance, Decimal::from(100));
        assert_eq!(ledger.user(2).unwrap().available_balance, Decimal::ZERO);
        assert!(ledger.orders().is_empty());
    }

    #[tokio::test]
    async fn test_transfer_rejects_non_positive_amount_and_self_transfer() {
        let (_, service) = setup();

        assert!(matches!(
            service.transfer(request(0)).await,
            Err(LedgerError::Validation(_))
        ));

        let mut to_self = request(10);
        to_self.payee_username = "alice".to_string();
        assert!(matches!(
            service.transfer(to_self).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_transfer_unknown_payee() {
        let (_, service) = setup();
        let mut req = request(10);
        req.payee_username = "nobody".to_string();

        assert!(matches!(
            service.transfer(req).await,
            Err(LedgerError::UserNotFound(name)) if name == "nobody"
        ));
    }
}
