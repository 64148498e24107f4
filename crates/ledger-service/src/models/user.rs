//! 用户模型
//!
//! 用户的余额字段只能通过账本事务修改，这里只提供读取视图。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::BalanceField;

/// 用户
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
    pub trust_level: i16,
    pub total_receive: Decimal,
    pub total_payment: Decimal,
    pub total_transfer: Decimal,
    pub total_community: Decimal,
    pub available_balance: Decimal,
    pub is_active: bool,
    pub last_login_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn balances(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            total_receive: self.total_receive,
            total_payment: self.total_payment,
            total_transfer: self.total_transfer,
            total_community: self.total_community,
            available_balance: self.available_balance,
        }
    }

    /// 新建用户（余额全部为零），主要用于单进程账本和测试
    pub fn new(id: i64, username: impl Into<String>, last_login_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id,
            username: username.into(),
            nickname: None,
            avatar_url: None,
            trust_level: 0,
            total_receive: Decimal::ZERO,
            total_payment: Decimal::ZERO,
            total_transfer: Decimal::ZERO,
            total_community: Decimal::ZERO,
            available_balance: Decimal::ZERO,
            is_active: true,
            last_login_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// 把余额快照写回用户
    pub(crate) fn set_balances(&mut self, snapshot: &BalanceSnapshot) {
        self.total_receive = snapshot.total_receive;
        self.total_payment = snapshot.total_payment;
        self.total_transfer = snapshot.total_transfer;
        self.total_community = snapshot.total_community;
        self.available_balance = snapshot.available_balance;
        self.updated_at = Utc::now();
    }
}

/// 分发扫描用的轻量用户引用
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UserRef {
    pub id: i64,
    pub username: String,
}

/// 用户五个余额字段的快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct BalanceSnapshot {
    pub total_receive: Decimal,
    pub total_payment: Decimal,
    pub total_transfer: Decimal,
    pub total_community: Decimal,
    pub available_balance: Decimal,
}

impl BalanceSnapshot {
    pub fn get(&self, field: BalanceField) -> Decimal {
        match field {
            BalanceField::TotalReceive => self.total_receive,
            BalanceField::TotalPayment => self.total_payment,
            BalanceField::TotalTransfer => self.total_transfer,
            BalanceField::TotalCommunity => self.total_community,
            BalanceField::AvailableBalance => self.available_balance,
        }
    }

    pub fn get_mut(&mut self, field: BalanceField) -> &mut Decimal {
        match field {
            BalanceField::TotalReceive => &mut self.total_receive,
            BalanceField::TotalPayment => &mut self.total_payment,
            BalanceField::TotalTransfer => &mut self.total_transfer,
            BalanceField::TotalCommunity => &mut self.total_community,
            BalanceField::AvailableBalance => &mut self.available_balance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_has_zero_balances() {
        let user = User::new(1, "alice", Utc::now());
        assert_eq!(user.balances(), BalanceSnapshot::default());
        assert!(user.is_active);
    }

    #[test]
    fn test_snapshot_field_access() {
        let mut snapshot = BalanceSnapshot::default();
        *snapshot.get_mut(BalanceField::TotalCommunity) = Decimal::from(135);
        assert_eq!(snapshot.get(BalanceField::TotalCommunity), Decimal::from(135));
        assert_eq!(snapshot.get(BalanceField::AvailableBalance), Decimal::ZERO);

        let mut user = User::new(1, "alice", Utc::now());
        user.set_balances(&snapshot);
        assert_eq!(user.total_community, Decimal::from(135));
    }
}
