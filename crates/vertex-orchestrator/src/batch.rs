// Batch Controller
// Groups pending tasks into batches via pluggable sizing rules and executes
// them through the orchestrator with a concurrency cap.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use vertex_types::{Result, VertexError};

use crate::engine::TaskOrchestrator;
use crate::types::{Task, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchPriority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub min_batch_size: usize,
    pub max_concurrent_tasks: usize,
    pub stop_on_first_failure: bool,
    pub priority: BatchPriority,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            min_batch_size: 1,
            max_concurrent_tasks: 4,
            stop_on_first_failure: false,
            priority: BatchPriority::Normal,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchTaskResult {
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub id: String,
    pub task_ids: Vec<String>,
    pub config: BatchConfig,
    pub status: BatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub results: HashMap<String, BatchTaskResult>,
    pub total_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub cancelled_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    pub pending_tasks: usize,
    pub active_batches: usize,
    pub completed_batches: usize,
    pub avg_batch_size: f64,
    pub avg_processing_secs: f64,
}

/// Recommends a batch size for the current pending tasks and system state.
pub trait BatchRule: Send + Sync {
    fn evaluate(&self, tasks: &[Task], system_state: &Value) -> usize;
}

pub struct BatchController {
    orchestrator: TaskOrchestrator,
    pending: RwLock<VecDeque<Task>>,
    batches: RwLock<HashMap<String, Batch>>,
    rules: RwLock<HashMap<String, Arc<dyn BatchRule>>>,
}

impl BatchController {
    pub fn new(orchestrator: TaskOrchestrator) -> Self {
        Self {
            orchestrator,
            pending: RwLock::new(VecDeque::new()),
            batches: RwLock::new(HashMap::new()),
            rules: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add(&self, task: Task) {
        self.pending.write().await.push_back(task);
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn register_rule(&self, rule_id: &str, rule: Arc<dyn BatchRule>) -> Result<()> {
        let mut rules = self.rules.write().await;
        if rules.contains_key(rule_id) {
            return Err(VertexError::AlreadyExists(format!("rule '{rule_id}'")));
        }
        rules.insert(rule_id.to_string(), rule);
        Ok(())
    }

    /// Take up to `max_batch_size` pending tasks, or nothing when fewer than
    /// `min_batch_size` are available.
    pub async fn form_batch(&self, config: &BatchConfig) -> Vec<Task> {
        let mut pending = self.pending.write().await;
        let take = config.max_batch_size.min(pending.len());
        if take < config.min_batch_size.max(1) {
            return Vec::new();
        }
        pending.drain(..take).collect()
    }

    /// Size the batch by the mean of the given rules' recommendations.
    /// Unknown rules are skipped; if none resolve, the default sizing runs.
    pub async fn form_optimal(&self, rule_ids: &[String], system_state: &Value) -> Vec<Task> {
        let snapshot: Vec<Task> = {
            let pending = self.pending.read().await;
            pending.iter().cloned().collect()
        };
        if snapshot.is_empty() {
            return Vec::new();
        }

        let mut recommendations = Vec::new();
        {
            let rules = self.rules.read().await;
            for rule_id in rule_ids {
                match rules.get(rule_id) {
                    Some(rule) => recommendations.push(rule.evaluate(&snapshot, system_state)),
                    None => {
                        tracing::warn!(rule_id, "batch rule not registered, skipping");
                    }
                }
            }
        }

        if recommendations.is_empty() {
            return self.form_batch(&BatchConfig::default()).await;
        }

        let mean = recommendations.iter().sum::<usize>() / recommendations.len();
        let mut pending = self.pending.write().await;
        let take = mean.min(pending.len());
        pending.drain(..take).collect()
    }

    /// Register a batch over the given tasks. Members are submitted to the
    /// orchestrator immediately; execution happens via `execute_batch`.
    pub async fn create_batch(&self, tasks: Vec<Task>, config: BatchConfig) -> Result<String> {
        if tasks.is_empty() {
            return Err(VertexError::InvalidInput("batch has no tasks".to_string()));
        }

        let task_ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        for task in tasks {
            self.orchestrator.submit(task).await?;
        }

        let batch = Batch {
            id: Uuid::new_v4().to_string(),
            total_count: task_ids.len(),
            task_ids,
            config,
            status: BatchStatus::Scheduled,
            started_at: None,
            ended_at: None,
            results: HashMap::new(),
            completed_count: 0,
            failed_count: 0,
            cancelled_count: 0,
        };

        let id = batch.id.clone();
        self.batches.write().await.insert(id.clone(), batch);
        Ok(id)
    }

    /// Run every member through the orchestrator, at most
    /// `max_concurrent_tasks` in flight. With `stop_on_first_failure`, the
    /// first failed member cancels everything that has not finished.
    pub async fn execute_batch(&self, batch_id: &str) -> Result<Batch> {
        let (task_ids, config) = {
            let mut batches = self.batches.write().await;
            let batch = batches
                .get_mut(batch_id)
                .ok_or_else(|| VertexError::NotFound(format!("batch '{batch_id}'")))?;
            if batch.status != BatchStatus::Scheduled {
                return Err(VertexError::InvalidInput(format!(
                    "batch '{batch_id}' is {:?}, not scheduled",
                    batch.status
                )));
            }
            batch.status = BatchStatus::Running;
            batch.started_at = Some(Utc::now());
            (batch.task_ids.clone(), batch.config.clone())
        };

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));
        let mut join_set: JoinSet<(String, Result<Value>)> = JoinSet::new();

        // The semaphore queue is FIFO, so members start in insertion order.
        for task_id in task_ids.clone() {
            let orchestrator = self.orchestrator.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = orchestrator.execute(&task_id).await;
                (task_id, outcome)
            });
        }

        let mut stop_triggered = false;
        while let Some(joined) = join_set.join_next().await {
            let Ok((task_id, outcome)) = joined else {
                tracing::error!(batch_id, "batch task join failed");
                continue;
            };

            let failed = matches!(
                outcome,
                Err(ref e) if !matches!(e, VertexError::Cancelled(_))
            );
            if failed && config.stop_on_first_failure && !stop_triggered {
                stop_triggered = true;
                tracing::warn!(batch_id, task_id, "first failure, cancelling remaining tasks");
                for other in &task_ids {
                    self.orchestrator.cancel(other).await;
                }
            }
        }

        // Collect per-task results from the task table.
        let mut results = HashMap::new();
        let (mut completed, mut failed, mut cancelled) = (0usize, 0usize, 0usize);
        for task_id in &task_ids {
            if let Some(task) = self.orchestrator.get_status(task_id).await {
                match task.status {
                    TaskStatus::Completed => completed += 1,
                    TaskStatus::Failed => failed += 1,
                    TaskStatus::Cancelled => cancelled += 1,
                    _ => {}
                }
                results.insert(
                    task_id.clone(),
                    BatchTaskResult {
                        status: task.status,
                        result: task.result,
                        error: task.error,
                    },
                );
            }
        }

        let mut batches = self.batches.write().await;
        let batch = batches
            .get_mut(batch_id)
            .ok_or_else(|| VertexError::NotFound(format!("batch '{batch_id}'")))?;
        batch.results = results;
        batch.completed_count = completed;
        batch.failed_count = failed;
        batch.cancelled_count = cancelled;
        batch.ended_at = Some(Utc::now());
        // A concurrent cancel() wins over the computed status.
        if batch.status == BatchStatus::Running {
            batch.status = if failed > 0 {
                BatchStatus::Failed
            } else if cancelled > 0 {
                BatchStatus::Cancelled
            } else {
                BatchStatus::Completed
            };
        }
        Ok(batch.clone())
    }

    pub async fn get_status(&self, batch_id: &str) -> Option<Batch> {
        self.batches.read().await.get(batch_id).cloned()
    }

    pub async fn get_tasks(&self, batch_id: &str) -> Result<Vec<Task>> {
        let task_ids = {
            let batches = self.batches.read().await;
            batches
                .get(batch_id)
                .map(|b| b.task_ids.clone())
                .ok_or_else(|| VertexError::NotFound(format!("batch '{batch_id}'")))?
        };

        let mut tasks = Vec::with_capacity(task_ids.len());
        for task_id in &task_ids {
            if let Some(task) = self.orchestrator.get_status(task_id).await {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    /// Cancel in-flight members and mark unscheduled ones CANCELLED.
    pub async fn cancel(&self, batch_id: &str) -> Result<Vec<String>> {
        let task_ids = {
            let mut batches = self.batches.write().await;
            let batch = batches
                .get_mut(batch_id)
                .ok_or_else(|| VertexError::NotFound(format!("batch '{batch_id}'")))?;
            if !batch.status.is_terminal() {
                batch.status = BatchStatus::Cancelled;
                batch.ended_at = Some(Utc::now());
            }
            batch.task_ids.clone()
        };

        let mut cancelled = Vec::new();
        for task_id in task_ids {
            if self.orchestrator.cancel(&task_id).await {
                cancelled.push(task_id);
            }
        }
        Ok(cancelled)
    }

    pub async fn stats(&self) -> BatchStats {
        let pending_tasks = self.pending.read().await.len();
        let batches = self.batches.read().await;

        let mut active = 0usize;
        let mut finished: Vec<&Batch> = Vec::new();
        for batch in batches.values() {
            if batch.status.is_terminal() {
                finished.push(batch);
            } else {
                active += 1;
            }
        }

        if finished.is_empty() {
            return BatchStats {
                pending_tasks,
                active_batches: active,
                ..Default::default()
            };
        }

        let total_tasks: usize = finished.iter().map(|b| b.total_count).sum();
        let timed: Vec<f64> = finished
            .iter()
            .filter_map(|b| match (b.started_at, b.ended_at) {
                (Some(start), Some(end)) => {
                    Some((end - start).num_milliseconds() as f64 / 1000.0)
                }
                _ => None,
            })
            .collect();

        BatchStats {
            pending_tasks,
            active_batches: active,
            completed_batches: finished.len(),
            avg_batch_size: total_tasks as f64 / finished.len() as f64,
            avg_processing_secs: if timed.is_empty() {
                0.0
            } else {
                timed.iter().sum::<f64>() / timed.len() as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutionOutcome, TaskExecutor};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;

    /// Fails exactly the tasks whose ids are listed.
    struct KeyedExecutor {
        fail_ids: HashSet<String>,
    }

    impl KeyedExecutor {
        fn new(fail_ids: &[&str]) -> Self {
            Self {
                fail_ids: fail_ids.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    #[async_trait]
    impl TaskExecutor for KeyedExecutor {
        async fn execute(&self, task: &Task) -> Result<ExecutionOutcome> {
            // Yield so the controller's join loop can interleave with
            // members still waiting on the concurrency cap.
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;

            if self.fail_ids.contains(&task.id) {
                return Err(VertexError::Provider(format!("task {} refused", task.id)));
            }
            Ok(ExecutionOutcome {
                result: json!({"ok": task.id}),
                provider: None,
                model: None,
            })
        }
    }

    fn controller(executor: KeyedExecutor) -> BatchController {
        BatchController::new(TaskOrchestrator::new(Arc::new(executor)))
    }

    fn tasks(n: usize) -> Vec<Task> {
        (1..=n)
            .map(|i| Task::new(format!("job {i}")).with_id(format!("t{i}")).with_max_retries(0))
            .collect()
    }

    struct FixedRule(usize);

    impl BatchRule for FixedRule {
        fn evaluate(&self, _tasks: &[Task], _state: &Value) -> usize {
            self.0
        }
    }

    #[tokio::test]
    async fn form_batch_honors_min_and_max() {
        let controller = controller(KeyedExecutor::new(&[]));
        for task in tasks(3) {
            controller.add(task).await;
        }

        let config = BatchConfig {
            max_batch_size: 2,
            min_batch_size: 1,
            ..Default::default()
        };
        let batch = controller.form_batch(&config).await;
        assert_eq!(batch.len(), 2);
        assert_eq!(controller.pending_count().await, 1);

        let strict = BatchConfig {
            max_batch_size: 10,
            min_batch_size: 5,
            ..Default::default()
        };
        assert!(controller.form_batch(&strict).await.is_empty());
        assert_eq!(controller.pending_count().await, 1);
    }

    #[tokio::test]
    async fn form_optimal_averages_rule_recommendations() {
        let controller = controller(KeyedExecutor::new(&[]));
        for task in tasks(10) {
            controller.add(task).await;
        }
        controller
            .register_rule("small", Arc::new(FixedRule(2)))
            .await
            .unwrap();
        controller
            .register_rule("large", Arc::new(FixedRule(7)))
            .await
            .unwrap();

        let formed = controller
            .form_optimal(
                &["small".to_string(), "large".to_string(), "ghost".to_string()],
                &json!({}),
            )
            .await;
        // mean(2, 7) floors to 4; the unknown rule is excluded.
        assert_eq!(formed.len(), 4);
        assert_eq!(controller.pending_count().await, 6);
    }

    #[tokio::test]
    async fn form_optimal_falls_back_when_no_rule_resolves() {
        let controller = controller(KeyedExecutor::new(&[]));
        for task in tasks(3) {
            controller.add(task).await;
        }

        let formed = controller
            .form_optimal(&["ghost".to_string()], &json!({}))
            .await;
        assert_eq!(formed.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_rule_id_is_rejected() {
        let controller = controller(KeyedExecutor::new(&[]));
        controller
            .register_rule("r", Arc::new(FixedRule(1)))
            .await
            .unwrap();
        let err = controller
            .register_rule("r", Arc::new(FixedRule(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, VertexError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn execute_batch_collects_results() {
        let controller = controller(KeyedExecutor::new(&[]));
        let id = controller
            .create_batch(tasks(3), BatchConfig::default())
            .await
            .unwrap();

        let batch = controller.execute_batch(&id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.completed_count, 3);
        assert_eq!(batch.failed_count, 0);
        assert_eq!(batch.results.len(), 3);
        assert!(batch.started_at.is_some() && batch.ended_at.is_some());
    }

    #[tokio::test]
    async fn failed_member_fails_the_batch() {
        let controller = controller(KeyedExecutor::new(&["t2"]));
        let id = controller
            .create_batch(tasks(3), BatchConfig::default())
            .await
            .unwrap();

        let batch = controller.execute_batch(&id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(batch.completed_count, 2);
        assert_eq!(batch.failed_count, 1);
    }

    #[tokio::test]
    async fn stop_on_first_failure_cancels_unstarted_members() {
        let controller = controller(KeyedExecutor::new(&["t2"]));
        let config = BatchConfig {
            max_concurrent_tasks: 1,
            stop_on_first_failure: true,
            ..Default::default()
        };
        let id = controller.create_batch(tasks(5), config).await.unwrap();

        let batch = controller.execute_batch(&id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(batch.completed_count, 1);
        assert_eq!(batch.failed_count, 1);
        assert_eq!(batch.cancelled_count, 3);

        for task_id in ["t3", "t4", "t5"] {
            assert_eq!(
                batch.results[task_id].status,
                TaskStatus::Cancelled,
                "{task_id} should be cancelled"
            );
        }
    }

    #[tokio::test]
    async fn cancel_batch_marks_members_cancelled() {
        let controller = controller(KeyedExecutor::new(&[]));
        let id = controller
            .create_batch(tasks(2), BatchConfig::default())
            .await
            .unwrap();

        let cancelled = controller.cancel(&id).await.unwrap();
        assert_eq!(cancelled.len(), 2);
        assert_eq!(
            controller.get_status(&id).await.unwrap().status,
            BatchStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn stats_aggregate_finished_batches() {
        let controller = controller(KeyedExecutor::new(&[]));
        controller.add(Task::new("waiting")).await;

        let id = controller
            .create_batch(tasks(4), BatchConfig::default())
            .await
            .unwrap();
        controller.execute_batch(&id).await.unwrap();

        let stats = controller.stats().await;
        assert_eq!(stats.pending_tasks, 1);
        assert_eq!(stats.completed_batches, 1);
        assert_eq!(stats.avg_batch_size, 4.0);
    }
}
