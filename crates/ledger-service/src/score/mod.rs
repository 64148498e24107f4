//! 外部社区积分来源

mod http;

use async_trait::async_trait;

use crate::error::Result;

pub use http::HttpScoreSource;

/// 社区积分来源
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScoreSource: Send + Sync {
    /// 查询用户当前的社区积分
    async fn fetch_score(&self, username: &str) -> Result<i64>;
}
