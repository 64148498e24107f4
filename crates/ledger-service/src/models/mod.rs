//! 账本领域模型

pub mod enums;
pub mod order;
pub mod user;

pub use enums::{BalanceField, OrderStatus, OrderType};
pub use order::{NewOrder, ORDER_NO_WIDTH, Order, OrderView, format_order_no};
pub use user::{BalanceSnapshot, User, UserRef};
