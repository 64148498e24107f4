//! 订单模型
//!
//! 订单是账本中每一笔余额变动的不可变记录。创建后金额、付款方、收款方、
//! 类型均不可修改，因此 `Order` 只暴露只读访问器。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::enums::{OrderStatus, OrderType};
use crate::error::{LedgerError, Result};

/// 订单号展示宽度
pub const ORDER_NO_WIDTH: usize = 18;

/// 订单名称最大长度（与表结构一致）
const MAX_NAME_LEN: usize = 64;
/// 订单备注最大长度（与表结构一致）
const MAX_REMARK_LEN: usize = 255;

/// 把订单 ID 格式化为对外展示的订单号，左侧补零到 18 位
///
/// 超过 18 位的 ID 原样输出，不截断。
pub fn format_order_no(id: i64) -> String {
    format!("{:0width$}", id, width = ORDER_NO_WIDTH)
}

/// 已持久化的订单
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Order {
    id: i64,
    order_name: String,
    merchant_order_no: Option<String>,
    client_id: Option<String>,
    payer_username: String,
    payee_username: String,
    amount: Decimal,
    status: OrderStatus,
    #[sqlx(rename = "type")]
    order_type: OrderType,
    remark: Option<String>,
    trade_time: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    pub fn id(&self) -> i64 {
        self.id
    }

    /// 对外展示的订单号
    pub fn order_no(&self) -> String {
        format_order_no(self.id)
    }

    pub fn order_name(&self) -> &str {
        &self.order_name
    }

    pub fn merchant_order_no(&self) -> Option<&str> {
        self.merchant_order_no.as_deref()
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn payer_username(&self) -> &str {
        &self.payer_username
    }

    pub fn payee_username(&self) -> &str {
        &self.payee_username
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn remark(&self) -> Option<&str> {
        self.remark.as_deref()
    }

    pub fn trade_time(&self) -> DateTime<Utc> {
        self.trade_time
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// 由待插入订单和数据库分配的 ID 组装订单
    ///
    /// 供非数据库的账本实现（单进程、测试）使用。
    pub(crate) fn from_new(id: i64, new: &NewOrder, now: DateTime<Utc>) -> Self {
        Self {
            id,
            order_name: new.order_name.clone(),
            merchant_order_no: new.merchant_order_no.clone(),
            client_id: new.client_id.clone(),
            payer_username: new.payer_username.clone(),
            payee_username: new.payee_username.clone(),
            amount: new.amount,
            status: new.status,
            order_type: new.order_type,
            remark: new.remark.clone(),
            trade_time: new.trade_time,
            expires_at: new.expires_at,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 待插入的订单
///
/// 构造时校验金额非负、名称与备注长度，保证写入数据库前就能拒绝非法订单。
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub(crate) order_name: String,
    pub(crate) merchant_order_no: Option<String>,
    pub(crate) client_id: Option<String>,
    pub(crate) payer_username: String,
    pub(crate) payee_username: String,
    pub(crate) amount: Decimal,
    pub(crate) status: OrderStatus,
    pub(crate) order_type: OrderType,
    pub(crate) remark: Option<String>,
    pub(crate) trade_time: DateTime<Utc>,
    pub(crate) expires_at: DateTime<Utc>,
}

impl NewOrder {
    pub fn new(
        order_name: impl Into<String>,
        payer_username: impl Into<String>,
        payee_username: impl Into<String>,
        amount: Decimal,
        order_type: OrderType,
        trade_time: DateTime<Utc>,
    ) -> Result<Self> {
        let order_name = order_name.into();
        if order_name.is_empty() || order_name.chars().count() > MAX_NAME_LEN {
            return Err(LedgerError::Validation(format!(
                "订单名称长度必须在 1..={MAX_NAME_LEN} 之间"
            )));
        }
        if amount < Decimal::ZERO {
            return Err(LedgerError::Validation(format!("订单金额不能为负: {amount}")));
        }
        if amount.normalize().scale() > 2 {
            return Err(LedgerError::Validation(format!(
                "订单金额最多两位小数: {amount}"
            )));
        }

        Ok(Self {
            order_name,
            merchant_order_no: None,
            client_id: None,
            payer_username: payer_username.into(),
            payee_username: payee_username.into(),
            amount,
            status: OrderStatus::Success,
            order_type,
            remark: None,
            trade_time,
            expires_at: trade_time,
        })
    }

    /// 设置备注，超长部分按字符截断
    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        let remark: String = remark.into();
        self.remark = Some(remark.chars().take(MAX_REMARK_LEN).collect());
        self
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn payer_username(&self) -> &str {
        &self.payer_username
    }

    pub fn payee_username(&self) -> &str {
        &self.payee_username
    }

    pub fn remark(&self) -> Option<&str> {
        self.remark.as_deref()
    }
}

/// 订单对外视图
///
/// 序列化时带上补零后的订单号，金额以字符串输出避免精度丢失。
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub id: i64,
    pub order_no: String,
    pub order_name: String,
    pub merchant_order_no: Option<String>,
    pub client_id: Option<String>,
    pub payer_username: String,
    pub payee_username: String,
    pub amount: Decimal,
    pub status: OrderStatus,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub remark: Option<String>,
    pub trade_time: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            order_no: order.order_no(),
            order_name: order.order_name.clone(),
            merchant_order_no: order.merchant_order_no.clone(),
            client_id: order.client_id.clone(),
            payer_username: order.payer_username.clone(),
            payee_username: order.payee_username.clone(),
            amount: order.amount,
            status: order.status,
            order_type: order.order_type,
            remark: order.remark.clone(),
            trade_time: order.trade_time,
            expires_at: order.expires_at,
            created_at: order.created_at,
        }
    }
}
