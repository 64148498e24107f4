//! 交易记录查询请求/响应

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::models::{OrderStatus, OrderType, OrderView};

/// 交易记录查询请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_time_range"))]
pub struct TransactionListRequest {
    #[validate(range(min = 1, message = "页码必须从 1 开始"))]
    pub page: u32,
    #[validate(range(min = 1, max = 100, message = "每页数量必须在1-100之间"))]
    pub page_size: u32,
    #[serde(rename = "type", default)]
    pub order_type: Option<OrderType>,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(rename = "startTime", default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(rename = "endTime", default)]
    pub end_time: Option<DateTime<Utc>>,
}

fn validate_time_range(req: &TransactionListRequest) -> Result<(), ValidationError> {
    if let (Some(start), Some(end)) = (req.start_time, req.end_time)
        && end <= start
    {
        let mut err = ValidationError::new("time_range");
        err.message = Some("结束时间必须晚于开始时间".into());
        return Err(err);
    }
    Ok(())
}

impl TransactionListRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            order_type: None,
            status: None,
            start_time: None,
            end_time: None,
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }
}

/// 交易记录查询响应
#[derive(Debug, Clone, Serialize)]
pub struct TransactionListResponse {
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub orders: Vec<OrderView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_page_bounds() {
        assert!(TransactionListRequest::new(1, 1).validate().is_ok());
        assert!(TransactionListRequest::new(1, 100).validate().is_ok());
        assert!(TransactionListRequest::new(0, 20).validate().is_err());
        assert!(TransactionListRequest::new(1, 0).validate().is_err());
        assert!(TransactionListRequest::new(1, 101).validate().is_err());
    }

    #[test]
    fn test_end_time_must_follow_start_time() {
        let now = Utc::now();
        let mut req = TransactionListRequest::new(1, 20);
        req.start_time = Some(now);
        req.end_time = Some(now);
        assert!(req.validate().is_err());

        req.end_time = Some(now + Duration::seconds(1));
        assert!(req.validate().is_ok());

        // 只有一端时不校验
        req.start_time = None;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_deserialize_wire_names() {
        let req: TransactionListRequest = serde_json::from_str(
            r#"{"page": 2, "page_size": 10, "type": "community", "status": "success",
                "startTime": "2025-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        assert_eq!(req.order_type, Some(OrderType::Community));
        assert_eq!(req.status, Some(OrderStatus::Success));
        assert!(req.start_time.is_some());
        assert!(req.end_time.is_none());
        assert_eq!(req.offset(), 10);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result = serde_json::from_str::<TransactionListRequest>(
            r#"{"page": 1, "page_size": 10, "type": "gift"}"#,
        );
        assert!(result.is_err());
    }
}
