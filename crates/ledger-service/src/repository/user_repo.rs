//! 用户仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use super::traits::UserRepositoryTrait;
use crate::error::Result;
use crate::models::{BalanceSnapshot, User, UserRef};

const USER_COLUMNS: &str = r#"
    id, username, nickname, avatar_url, trust_level,
    total_receive, total_payment, total_transfer, total_community, available_balance,
    is_active, last_login_at, created_at, updated_at
"#;

pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中读取余额快照，用于诊断条件更新失败的原因
    pub async fn get_balances_in_tx(
        conn: &mut PgConnection,
        user_id: i64,
    ) -> Result<Option<BalanceSnapshot>> {
        let snapshot = sqlx::query_as::<_, BalanceSnapshot>(
            r#"
            SELECT total_receive, total_payment, total_transfer, total_community, available_balance
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(conn)
        .await?;

        Ok(snapshot)
    }
}

#[async_trait]
impl UserRepositoryTrait for UserRepository {
    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn list_active_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UserRef>> {
        let users = sqlx::query_as::<_, UserRef>(
            r#"
            SELECT id, username
            FROM users
            WHERE last_login_at >= $1
            ORDER BY last_login_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(since)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }
}
