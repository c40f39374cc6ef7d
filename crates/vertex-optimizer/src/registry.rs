// Background Task Registry
// Maps sleep-time task types to the executors that run them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use vertex_types::{Result, VertexError};

use crate::queue::SleepTimeTask;

#[async_trait]
pub trait SleepTaskExecutor: Send + Sync {
    async fn execute(&self, task: &SleepTimeTask) -> Result<Value>;
}

pub struct BackgroundTaskRegistry {
    executors: RwLock<HashMap<String, Arc<dyn SleepTaskExecutor>>>,
}

impl BackgroundTaskRegistry {
    pub fn new() -> Self {
        Self {
            executors: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(
        &self,
        task_type: &str,
        executor: Arc<dyn SleepTaskExecutor>,
    ) -> Result<()> {
        let mut executors = self.executors.write().await;
        if executors.contains_key(task_type) {
            return Err(VertexError::AlreadyExists(format!(
                "executor for task type '{task_type}'"
            )));
        }
        executors.insert(task_type.to_string(), executor);
        Ok(())
    }

    pub async fn get(&self, task_type: &str) -> Option<Arc<dyn SleepTaskExecutor>> {
        self.executors.read().await.get(task_type).cloned()
    }

    pub async fn list_task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.read().await.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for BackgroundTaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl SleepTaskExecutor for Echo {
        async fn execute(&self, task: &SleepTimeTask) -> Result<Value> {
            Ok(json!({"echo": task.name}))
        }
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = BackgroundTaskRegistry::new();
        registry.register("echo", Arc::new(Echo)).await.unwrap();

        assert!(registry.get("echo").await.is_some());
        assert!(registry.get("ghost").await.is_none());
        assert_eq!(registry.list_task_types().await, vec!["echo".to_string()]);

        let err = registry.register("echo", Arc::new(Echo)).await.unwrap_err();
        assert!(matches!(err, VertexError::AlreadyExists(_)));
    }
}
