//! 账本枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化，存储为小写字符串

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 订单状态
///
/// 对账流程只会写入 `Success`，其余状态为商户支付等后续流程预留
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum OrderStatus {
    Success,
    Pending,
    Failed,
    Expired,
    Disputing,
    Refund,
    Refused,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Pending => "pending",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Disputing => "disputing",
            Self::Refund => "refund",
            Self::Refused => "refused",
        }
    }
}

/// 订单类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum OrderType {
    /// 收款
    Receive,
    /// 付款
    Payment,
    /// 用户间转账
    Transfer,
    /// 社区积分同步
    Community,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receive => "receive",
            Self::Payment => "payment",
            Self::Transfer => "transfer",
            Self::Community => "community",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "pending" => Ok(Self::Pending),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            "disputing" => Ok(Self::Disputing),
            "refund" => Ok(Self::Refund),
            "refused" => Ok(Self::Refused),
            other => Err(format!("未知订单状态: {other}")),
        }
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "receive" => Ok(Self::Receive),
            "payment" => Ok(Self::Payment),
            "transfer" => Ok(Self::Transfer),
            "community" => Ok(Self::Community),
            other => Err(format!("未知订单类型: {other}")),
        }
    }
}

/// 用户余额字段
///
/// 账本更新只能通过这些字段定位列名，避免拼接任意 SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BalanceField {
    TotalReceive,
    TotalPayment,
    TotalTransfer,
    TotalCommunity,
    AvailableBalance,
}

impl BalanceField {
    pub fn column(&self) -> &'static str {
        match self {
            Self::TotalReceive => "total_receive",
            Self::TotalPayment => "total_payment",
            Self::TotalTransfer => "total_transfer",
            Self::TotalCommunity => "total_community",
            Self::AvailableBalance => "available_balance",
        }
    }
}
