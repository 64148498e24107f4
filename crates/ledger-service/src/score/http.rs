//! 基于 HTTP 的积分来源
//!
//! 访问 `{profile_url_template}`（`{username}` 会被替换为百分号编码后的用户名），解析返回 JSON 中的
//! `gamification_score`。字段可以位于顶层，也可以位于 `user` 对象内。

use std::time::Duration;

use async_trait::async_trait;
use ledger_shared::config::ScoreSourceConfig;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::ScoreSource;
use crate::error::{LedgerError, Result};

const SERVICE_NAME: &str = "score_source";

#[derive(Debug, Deserialize)]
struct ScoreBody {
    gamification_score: i64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScoreResponse {
    Flat(ScoreBody),
    Nested { user: ScoreBody },
}

impl ScoreResponse {
    fn score(&self) -> i64 {
        match self {
            Self::Flat(body) | Self::Nested { user: body } => body.gamification_score,
        }
    }
}

fn external_error(message: impl Into<String>) -> LedgerError {
    LedgerError::ExternalService {
        service: SERVICE_NAME.to_string(),
        message: message.into(),
    }
}

pub(crate) fn parse_score(body: &[u8]) -> Result<i64> {
    serde_json::from_slice::<ScoreResponse>(body)
        .map(|resp| resp.score())
        .map_err(|e| external_error(format!("解析用户积分响应失败: {e}")))
}

#[derive(Clone)]
pub struct HttpScoreSource {
    http: Client,
    url_template: String,
}

impl HttpScoreSource {
    pub fn new(config: &ScoreSourceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| LedgerError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            http,
            url_template: config.profile_url_template.clone(),
        })
    }

    pub(crate) fn profile_url(&self, username: &str) -> Result<Url> {
        let raw = self
            .url_template
            .replace("{username}", &urlencoding::encode(username));
        Url::parse(&raw).map_err(|e| LedgerError::Validation(format!("积分接口地址无效 {raw}: {e}")))
    }
}

#[async_trait]
impl ScoreSource for HttpScoreSource {
    #[instrument(skip(self))]
    async fn fetch_score(&self, username: &str) -> Result<i64> {
        let url = self.profile_url(username)?;

        let resp = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                LedgerError::ExternalServiceTimeout {
                    service: SERVICE_NAME.to_string(),
                }
            } else {
                external_error(e.to_string())
            }
        })?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(external_error(format!("获取用户积分失败，状态码: {status}")));
        }

        let body = resp.bytes().await.map_err(|e| {
            if e.is_timeout() {
                LedgerError::ExternalServiceTimeout {
                    service: SERVICE_NAME.to_string(),
                }
            } else {
                external_error(e.to_string())
            }
        })?;

        let score = parse_score(&body)?;
        debug!(score, "已获取社区积分");
        Ok(score)
    }
}
