//! 余额变更描述
//!
//! 一个 `BalanceMutation` 描述对单个用户的若干余额字段的变更，以及提交时必须成立的
//! 前置条件。数据库实现把它翻译为一条带条件的 UPDATE，内存实现直接作用于快照，
//! 两者语义保持一致。

use rust_decimal::Decimal;
use sqlx::{Postgres, QueryBuilder};

use crate::error::{LedgerError, Result};
use crate::models::{BalanceField, BalanceSnapshot};

/// 单个字段的变更方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldChange {
    /// 在当前值上增加（可为负）
    Add(Decimal),
    /// 覆盖为指定值
    Set(Decimal),
}

/// 单用户余额变更
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceMutation {
    user_id: i64,
    changes: Vec<(BalanceField, FieldChange)>,
    expected: Option<(BalanceField, Decimal)>,
    non_negative: Vec<BalanceField>,
}

impl BalanceMutation {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            changes: Vec::new(),
            expected: None,
            non_negative: Vec::new(),
        }
    }

    pub fn add(mut self, field: BalanceField, delta: Decimal) -> Self {
        self.changes.push((field, FieldChange::Add(delta)));
        self
    }

    pub fn set(mut self, field: BalanceField, value: Decimal) -> Self {
        self.changes.push((field, FieldChange::Set(value)));
        self
    }

    /// 要求提交时该字段仍等于 `value`，否则视为并发冲突
    pub fn expect(mut self, field: BalanceField, value: Decimal) -> Self {
        self.expected = Some((field, value));
        self
    }

    /// 要求变更后该字段不为负
    pub fn require_non_negative(mut self, field: BalanceField) -> Self {
        self.non_negative.push(field);
        self
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn changes(&self) -> &[(BalanceField, FieldChange)] {
        &self.changes
    }

    /// 该字段上的增量之和，`Set` 不计入
    pub fn delta_of(&self, field: BalanceField) -> Decimal {
        self.changes
            .iter()
            .filter(|(f, _)| *f == field)
            .map(|(_, change)| match change {
                FieldChange::Add(d) => *d,
                FieldChange::Set(_) => Decimal::ZERO,
            })
            .sum()
    }

    /// 结构校验：至少一个变更，且每个字段只出现一次
    pub fn validate(&self) -> Result<()> {
        if self.changes.is_empty() {
            return Err(LedgerError::Validation(format!(
                "用户 {} 的余额变更为空",
                self.user_id
            )));
        }
        for (i, (field, _)) in self.changes.iter().enumerate() {
            if self.changes[..i].iter().any(|(f, _)| f == field) {
                return Err(LedgerError::Validation(format!(
                    "字段 {} 在同一次变更中出现多次",
                    field.column()
                )));
            }
        }
        Ok(())
    }

    /// 在快照上应用变更
    ///
    /// 前置条件不满足时返回与数据库实现相同的错误，快照保持不变。
    pub fn apply_to(&self, snapshot: &mut BalanceSnapshot) -> Result<()> {
        if let Some((field, expected)) = self.expected
            && snapshot.get(field) != expected
        {
            return Err(LedgerError::ConcurrencyConflict {
                user_id: self.user_id,
            });
        }

        let mut next = *snapshot;
        for (field, change) in &self.changes {
            let slot = next.get_mut(*field);
            match change {
                FieldChange::Add(d) => *slot += *d,
                FieldChange::Set(v) => *slot = *v,
            }
        }

        for field in &self.non_negative {
            if next.get(*field) < Decimal::ZERO {
                return Err(LedgerError::InsufficientBalance {
                    user_id: self.user_id,
                    required: -self.delta_of(*field),
                    available: snapshot.get(*field),
                });
            }
        }

        *snapshot = next;
        Ok(())
    }

    /// 构造带条件的 UPDATE 语句
    ///
    /// 命中 0 行说明用户不存在或前置条件不成立，由调用方进一步诊断。
    pub(crate) fn build_update(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("UPDATE users SET ");
        {
            let mut set = qb.separated(", ");
            for (field, change) in &self.changes {
                let column = field.column();
                match change {
                    FieldChange::Add(d) => {
                        set.push(format!("{column} = {column} + "));
                        set.push_bind_unseparated(*d);
                    }
                    FieldChange::Set(v) => {
                        set.push(format!("{column} = "));
                        set.push_bind_unseparated(*v);
                    }
                }
            }
            set.push("updated_at = NOW()");
        }

        qb.push(" WHERE id = ");
        qb.push_bind(self.user_id);

        if let Some((field, expected)) = self.expected {
            qb.push(format!(" AND {} = ", field.column()));
            qb.push_bind(expected);
        }

        for field in &self.non_negative {
            let column = field.column();
            match self.changes.iter().find(|(f, _)| f == field) {
                Some((_, FieldChange::Set(v))) => {
                    // 覆盖值直接校验，无需依赖当前值
                    if *v < Decimal::ZERO {
                        qb.push(" AND FALSE");
                    }
                }
                _ => {
                    qb.push(format!(" AND {column} + "));
                    qb.push_bind(self.delta_of(*field));
                    qb.push(" >= 0");
                }
            }
        }

        qb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn community_mutation(old: i64, new: i64) -> BalanceMutation {
        let delta = Decimal::from(new - old);
        BalanceMutation::new(7)
            .set(BalanceField::TotalCommunity, Decimal::from(new))
            .add(BalanceField::TotalReceive, delta)
            .add(BalanceField::AvailableBalance, delta)
            .expect(BalanceField::TotalCommunity, Decimal::from(old))
    }

    fn snapshot(community: i64, available: i64) -> BalanceSnapshot {
        BalanceSnapshot {
            total_community: Decimal::from(community),
            total_receive: Decimal::from(community),
            available_balance: Decimal::from(available),
            ..Default::default()
        }
    }

    #[test]
    fn test_apply_increments_and_sets() {
        let mut snap = snapshot(100, 100);
        community_mutation(100, 135).apply_to(&mut snap).unwrap();

        assert_eq!(snap.total_community, Decimal::from(135));
        assert_eq!(snap.total_receive, Decimal::from(135));
        assert_eq!(snap.available_balance, Decimal::from(135));
    }

    #[test]
    fn test_expected_value_mismatch_is_conflict() {
        let mut snap = snapshot(120, 120);
        let err = community_mutation(100, 135).apply_to(&mut snap).unwrap_err();

        assert!(matches!(err, LedgerError::ConcurrencyConflict { user_id: 7 }));
        assert_eq!(snap, snapshot(120, 120));
    }

    #[test]
    fn test_non_negative_guard_leaves_snapshot_untouched() {
        let mut snap = snapshot(0, 10);
        let mutation = BalanceMutation::new(7)
            .add(BalanceField::AvailableBalance, Decimal::from(-25))
            .require_non_negative(BalanceField::AvailableBalance);

        let err = mutation.apply_to(&mut snap).unwrap_err();
        match err {
            LedgerError::InsufficientBalance {
                required,
                available,
                ..
            } => {
                assert_eq!(required, Decimal::from(25));
                assert_eq!(available, Decimal::from(10));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(snap.available_balance, Decimal::from(10));
    }

    #[test]
    fn test_non_negative_guard_allows_exact_zero() {
        let mut snap = snapshot(0, 10);
        BalanceMutation::new(7)
            .add(BalanceField::AvailableBalance, Decimal::from(-10))
            .require_non_negative(BalanceField::AvailableBalance)
            .apply_to(&mut snap)
            .unwrap();
        assert!(snap.available_balance.is_zero());
    }

    #[test]
    fn test_validate_rejects_empty_and_duplicate_fields() {
        assert!(BalanceMutation::new(1).validate().is_err());

        let dup = BalanceMutation::new(1)
            .add(BalanceField::TotalReceive, Decimal::ONE)
            .add(BalanceField::TotalReceive, Decimal::ONE);
        assert!(dup.validate().is_err());

        assert!(community_mutation(1, 2).validate().is_ok());
    }

    #[test]
    fn test_build_update_sql() {
        let mutation = community_mutation(100, 135)
            .require_non_negative(BalanceField::AvailableBalance);
        let sql = mutation.build_update().into_sql();

        assert_eq!(
            sql,
            "UPDATE users SET total_community = $1, total_receive = total_receive + $2, \
             available_balance = available_balance + $3, updated_at = NOW() \
             WHERE id = $4 AND total_community = $5 AND available_balance + $6 >= 0"
        );
    }
}
