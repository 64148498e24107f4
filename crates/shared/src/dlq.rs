//! 死信记录
//!
//! 后台任务重试耗尽或遇到不可重试的错误后，会被写成死信记录保存，
//! 而不是静默丢弃。死信记录保留原始负载和最后一次错误，便于人工排查后重新投递。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 死信消息信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    /// 原始任务 ID
    pub message_id: String,
    /// 任务类型
    pub task_type: String,
    /// 原始任务负载（JSON 字符串）
    pub payload: String,
    /// 最后一次失败原因
    pub error: String,
    /// 已重试次数
    pub retry_count: u32,
    /// 最大重试次数
    pub max_retries: u32,
    /// 进入死信的时间
    pub failed_at: DateTime<Utc>,
    /// 来源服务
    pub source_service: String,
}

impl DeadLetterMessage {
    pub fn new(
        message_id: impl Into<String>,
        task_type: impl Into<String>,
        payload: impl Into<String>,
        error: impl Into<String>,
        retry_count: u32,
        max_retries: u32,
        source_service: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            task_type: task_type.into(),
            payload: payload.into(),
            error: error.into(),
            retry_count,
            max_retries,
            failed_at: Utc::now(),
            source_service: source_service.into(),
        }
    }

    /// 是否因为重试次数耗尽而进入死信（否则是不可重试错误直接进入）
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_message_creation() {
        let msg = DeadLetterMessage::new(
            "task-001",
            "community:reconcile_user",
            r#"{"user_id":42}"#,
            "外部服务超时",
            3,
            3,
            "community-ledger",
        );

        assert_eq!(msg.message_id, "task-001");
        assert_eq!(msg.task_type, "community:reconcile_user");
        assert_eq!(msg.payload, r#"{"user_id":42}"#);
        assert!(msg.retries_exhausted());
    }

    #[test]
    fn test_fatal_error_not_exhausted() {
        let msg = DeadLetterMessage::new("t", "x", "{}", "用户不存在", 0, 3, "svc");
        assert!(!msg.retries_exhausted());
    }

    #[test]
    fn test_dead_letter_serialization() {
        let msg = DeadLetterMessage::new("task-002", "x", "{}", "err", 1, 5, "svc");
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("messageId"));
        assert!(json.contains("taskType"));
        assert!(json.contains("retryCount"));
        assert!(json.contains("failedAt"));

        let back: DeadLetterMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
