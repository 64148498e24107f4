//! 任务处理器注册表
//!
//! 按任务类型索引处理器，Runner 通过它把领取到的任务路由到具体实现。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::TaskMessage;
use crate::error::Result;

/// 任务处理器
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> &'static str;

    async fn handle(&self, task: &TaskMessage) -> Result<()>;
}

#[derive(Default)]
pub struct TaskHandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
}

impl TaskHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，同类型的旧处理器会被替换
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) -> &mut Self {
        let task_type = handler.task_type();
        debug!(task_type, "注册任务处理器");
        self.handlers.insert(task_type, handler);
        self
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }
}
