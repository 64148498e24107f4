//! 进程内锁

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use uuid::Uuid;

use super::guard::{LockBackend, LockGuard};
use super::LockProvider;
use crate::error::Result;

/// 基于 DashMap 的进程内锁，过期的锁可以被重新获取
#[derive(Clone, Default)]
pub struct LocalLockProvider {
    locks: Arc<DashMap<String, (String, Instant)>>,
}

impl LocalLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .is_some_and(|entry| entry.1 > Instant::now())
    }
}

#[async_trait]
impl LockProvider for LocalLockProvider {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        let owner = Uuid::new_v4().to_string();
        let now = Instant::now();

        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().1 > now {
                    return Ok(None);
                }
                entry.insert((owner.clone(), now + ttl));
            }
            Entry::Vacant(entry) => {
                entry.insert((owner.clone(), now + ttl));
            }
        }

        Ok(Some(LockGuard::new(
            key.to_string(),
            owner,
            LockBackend::Local(self.locks.clone()),
        )))
    }
}
