//! 用户交易记录查询

mod dto;
mod service;

pub use dto::{TransactionListRequest, TransactionListResponse};
pub use service::OrderQueryService;
