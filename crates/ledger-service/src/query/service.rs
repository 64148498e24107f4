//! 交易记录查询服务

use std::sync::Arc;

use tracing::{debug, instrument};
use validator::Validate;

use super::dto::{TransactionListRequest, TransactionListResponse};
use crate::error::{LedgerError, Result};
use crate::models::OrderView;
use crate::repository::{OrderFilter, OrderRepositoryTrait};

pub struct OrderQueryService {
    orders: Arc<dyn OrderRepositoryTrait>,
}

impl OrderQueryService {
    pub fn new(orders: Arc<dyn OrderRepositoryTrait>) -> Self {
        Self { orders }
    }

    /// 分页查询用户作为付款方或收款方的订单，按创建时间倒序
    ///
    /// 参数校验在任何查询之前完成。
    #[instrument(skip(self, request), fields(page = request.page, page_size = request.page_size))]
    pub async fn list_transactions(
        &self,
        username: &str,
        request: &TransactionListRequest,
    ) -> Result<TransactionListResponse> {
        request
            .validate()
            .map_err(|e| LedgerError::Validation(e.to_string()))?;

        let filter = OrderFilter {
            username: username.to_string(),
            order_type: request.order_type,
            status: request.status,
            start_time: request.start_time,
            end_time: request.end_time,
        };

        let total = self.orders.count_orders(&filter).await?;
        let orders = self
            .orders
            .list_orders(&filter, i64::from(request.page_size), request.offset())
            .await?;
        debug!(total, returned = orders.len(), "交易记录查询完成");

        Ok(TransactionListResponse {
            total,
            page: request.page,
            page_size: request.page_size,
            orders: orders.iter().map(OrderView::from).collect(),
        })
    }
}
