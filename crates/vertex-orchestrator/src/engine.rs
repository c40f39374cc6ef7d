// Task Orchestrator
// Task table, single-task execution with retry/backoff/timeout/cancel, and
// workflow DAG execution in concurrent rounds.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use vertex_types::{Result, VertexError};

use crate::executor::TaskExecutor;
use crate::scheduler::TaskScheduler;
use crate::types::{AttemptRecord, Task, TaskStatus, WorkflowTaskResult};

/// Cap on the exponential retry backoff.
const MAX_BACKOFF_SECS: u64 = 30;

#[derive(Clone)]
pub struct TaskOrchestrator {
    tasks: Arc<tokio::sync::RwLock<HashMap<String, Task>>>,
    workflows: Arc<tokio::sync::RwLock<HashMap<String, Vec<String>>>>,
    cancel_tokens: Arc<tokio::sync::RwLock<HashMap<String, CancellationToken>>>,
    executor: Arc<dyn TaskExecutor>,
}

impl TaskOrchestrator {
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            tasks: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            workflows: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            cancel_tokens: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            executor,
        }
    }

    /// Insert a task in PENDING. Duplicate ids are rejected.
    pub async fn submit(&self, task: Task) -> Result<String> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(VertexError::AlreadyExists(format!("task '{}'", task.id)));
        }
        let id = task.id.clone();
        tasks.insert(id.clone(), task);
        Ok(id)
    }

    /// Point-in-time snapshot of a task, if present.
    pub async fn get_status(&self, task_id: &str) -> Option<Task> {
        self.tasks.read().await.get(task_id).cloned()
    }

    pub async fn list_tasks(&self) -> Vec<Task> {
        self.tasks.read().await.values().cloned().collect()
    }

    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Cancel a pending or running task. Terminal tasks are left untouched.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let cancelled = {
            let mut tasks = self.tasks.write().await;
            match tasks.get_mut(task_id) {
                Some(task) if matches!(task.status, TaskStatus::Pending | TaskStatus::Running) => {
                    task.status = TaskStatus::Cancelled;
                    task.completed_at = Some(Utc::now());
                    true
                }
                _ => false,
            }
        };

        if cancelled {
            if let Some(token) = self.cancel_tokens.read().await.get(task_id) {
                token.cancel();
            }
            tracing::info!(task_id, "task cancelled");
        }
        cancelled
    }

    /// Execute a task to a terminal state.
    ///
    /// Preconditions: the task exists, is PENDING, and every dependency is
    /// COMPLETED. Retryable failures (provider errors, timeouts) are retried
    /// with exponential backoff up to `max_retries`; cancellation is observed
    /// at every suspension point.
    pub async fn execute(&self, task_id: &str) -> Result<Value> {
        let mut snapshot = self.begin_execution(task_id).await?;
        let token = self.token_for(task_id).await;

        loop {
            let attempt_started = Instant::now();
            let attempt = self.run_attempt(&snapshot, &token).await;

            // A cancel may have landed while the attempt ran; its result is
            // discarded.
            if self.status_of(task_id).await == Some(TaskStatus::Cancelled) {
                return Err(VertexError::Cancelled(format!("task '{task_id}'")));
            }

            let execution_secs = attempt_started.elapsed().as_secs_f64();
            match attempt {
                Ok(outcome) => {
                    let record = AttemptRecord {
                        timestamp: Utc::now(),
                        provider: outcome.provider.clone(),
                        model: outcome.model.clone(),
                        execution_secs,
                        success: true,
                        error: None,
                    };
                    self.with_task_mut(task_id, |task| {
                        task.execution_trace.push(record);
                        task.assigned_provider = outcome.provider.clone();
                        task.assigned_model = outcome.model.clone();
                        if task.status == TaskStatus::Running {
                            task.status = TaskStatus::Completed;
                            task.completed_at = Some(Utc::now());
                            task.result = Some(outcome.result.clone());
                            task.error = None;
                        }
                    })
                    .await;
                    return Ok(outcome.result);
                }
                Err(e) => {
                    snapshot.retry_count += 1;
                    let retry_count = snapshot.retry_count;
                    let error_text = e.to_string();
                    let record = AttemptRecord {
                        timestamp: Utc::now(),
                        provider: None,
                        model: None,
                        execution_secs,
                        success: false,
                        error: Some(error_text.clone()),
                    };
                    let will_retry = e.is_retryable() && retry_count < snapshot.max_retries;
                    self.with_task_mut(task_id, |task| {
                        task.execution_trace.push(record);
                        task.retry_count = retry_count;
                        task.error = Some(error_text.clone());
                        if !will_retry && task.status == TaskStatus::Running {
                            task.status = TaskStatus::Failed;
                            task.completed_at = Some(Utc::now());
                        }
                    })
                    .await;

                    if !will_retry {
                        tracing::warn!(task_id, retry_count, error = %e, "task failed");
                        return Err(e);
                    }

                    let delay = Self::backoff_delay(retry_count);
                    tracing::debug!(task_id, retry_count, delay_secs = delay.as_secs(), "retrying task");
                    tokio::select! {
                        _ = token.cancelled() => {
                            return Err(VertexError::Cancelled(format!("task '{task_id}'")));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Atomically insert a set of tasks as a workflow.
    pub async fn create_workflow(&self, workflow_tasks: Vec<Task>) -> Result<String> {
        {
            let tasks = self.tasks.read().await;
            let known: HashSet<String> = tasks.keys().cloned().collect();
            TaskScheduler::validate(&workflow_tasks, &known)?;
            for task in &workflow_tasks {
                if tasks.contains_key(&task.id) {
                    return Err(VertexError::AlreadyExists(format!("task '{}'", task.id)));
                }
            }
        }

        let task_ids: Vec<String> = workflow_tasks.iter().map(|t| t.id.clone()).collect();
        {
            let mut tasks = self.tasks.write().await;
            for task in workflow_tasks {
                tasks.insert(task.id.clone(), task);
            }
        }

        let workflow_id = uuid::Uuid::new_v4().to_string();
        self.workflows
            .write()
            .await
            .insert(workflow_id.clone(), task_ids);
        Ok(workflow_id)
    }

    pub async fn workflow_tasks(&self, workflow_id: &str) -> Result<Vec<Task>> {
        let task_ids = self
            .workflows
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| VertexError::NotFound(format!("workflow '{workflow_id}'")))?;

        let tasks = self.tasks.read().await;
        Ok(task_ids
            .iter()
            .filter_map(|id| tasks.get(id).cloned())
            .collect())
    }

    /// Execute a workflow as a DAG: every round launches all ready tasks
    /// concurrently; a failure or cancellation poisons all transitive
    /// dependents. The result map has exactly one entry per member task.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<HashMap<String, WorkflowTaskResult>> {
        let member_tasks = self.workflow_tasks(workflow_id).await?;
        let member_ids: HashSet<String> = member_tasks.iter().map(|t| t.id.clone()).collect();

        let dependents = TaskScheduler::dependents_map(&member_tasks);

        // Remaining in-workflow dependencies per task; deps outside the
        // workflow (or already completed) are the executor's concern.
        let mut remaining: HashMap<String, HashSet<String>> = HashMap::new();
        for task in &member_tasks {
            let deps: HashSet<String> = task
                .dependencies
                .iter()
                .filter(|d| member_ids.contains(*d))
                .cloned()
                .collect();
            remaining.insert(task.id.clone(), deps);
        }

        let priorities: HashMap<String, vertex_types::TaskPriority> = member_tasks
            .iter()
            .map(|t| (t.id.clone(), t.priority))
            .collect();

        let mut results: HashMap<String, WorkflowTaskResult> = HashMap::new();
        let mut ready: Vec<String> = member_tasks
            .iter()
            .filter(|t| remaining[&t.id].is_empty())
            .map(|t| t.id.clone())
            .collect();

        while !ready.is_empty() {
            // Higher priority tasks launch first within a round.
            ready.sort_by_key(|id| std::cmp::Reverse(priorities[id].level()));

            let mut join_set: JoinSet<(String, Result<Value>)> = JoinSet::new();
            for task_id in ready.drain(..) {
                let engine = self.clone();
                join_set.spawn(async move {
                    let outcome = engine.execute(&task_id).await;
                    (task_id, outcome)
                });
            }

            let mut completed_this_round: Vec<String> = Vec::new();
            let mut failed_this_round: Vec<String> = Vec::new();

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((task_id, Ok(value))) => {
                        results.insert(task_id.clone(), WorkflowTaskResult::Completed(value));
                        completed_this_round.push(task_id);
                    }
                    Ok((task_id, Err(e))) => {
                        results.insert(task_id.clone(), WorkflowTaskResult::Failed(e.to_string()));
                        failed_this_round.push(task_id);
                    }
                    Err(join_err) => {
                        tracing::error!(error = %join_err, "workflow task join failed");
                    }
                }
            }

            // Poison every transitive dependent of a failed task.
            let mut poison_queue: Vec<String> = failed_this_round;
            while let Some(failed_id) = poison_queue.pop() {
                for dependent in dependents.get(&failed_id).into_iter().flatten() {
                    if results.contains_key(dependent) {
                        continue;
                    }
                    let error = format!("dependency failed: {failed_id}");
                    self.with_task_mut(dependent, |task| {
                        if !task.status.is_terminal() {
                            task.status = TaskStatus::Failed;
                            task.completed_at = Some(Utc::now());
                            task.error = Some(error.clone());
                        }
                    })
                    .await;
                    results.insert(dependent.clone(), WorkflowTaskResult::Failed(error));
                    poison_queue.push(dependent.clone());
                }
            }

            // Promote dependents whose remaining dependency set drained.
            for completed_id in completed_this_round {
                for dependent in dependents.get(&completed_id).into_iter().flatten() {
                    if results.contains_key(dependent) {
                        continue;
                    }
                    if let Some(deps) = remaining.get_mut(dependent) {
                        deps.remove(&completed_id);
                        if deps.is_empty() {
                            ready.push(dependent.clone());
                        }
                    }
                }
            }
        }

        Ok(results)
    }

    /// Cancel every constituent task; returns the ids actually transitioned.
    pub async fn cancel_workflow(&self, workflow_id: &str) -> Result<Vec<String>> {
        let task_ids = self
            .workflows
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| VertexError::NotFound(format!("workflow '{workflow_id}'")))?;

        let mut cancelled = Vec::new();
        for task_id in task_ids {
            if self.cancel(&task_id).await {
                cancelled.push(task_id);
            }
        }
        Ok(cancelled)
    }

    fn backoff_delay(retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(5);
        Duration::from_secs((1u64 << exponent).min(MAX_BACKOFF_SECS))
    }

    async fn begin_execution(&self, task_id: &str) -> Result<Task> {
        let mut tasks = self.tasks.write().await;

        {
            let task = tasks
                .get(task_id)
                .ok_or_else(|| VertexError::NotFound(format!("task '{task_id}'")))?;

            match task.status {
                TaskStatus::Pending => {}
                TaskStatus::Cancelled => {
                    return Err(VertexError::Cancelled(format!("task '{task_id}'")))
                }
                other => {
                    return Err(VertexError::InvalidInput(format!(
                        "task '{task_id}' is {other:?}, not pending"
                    )))
                }
            }

            for dep_id in &task.dependencies {
                match tasks.get(dep_id) {
                    None => {
                        return Err(VertexError::DependencyUnsatisfied(format!(
                            "dependency '{dep_id}' of task '{task_id}' does not exist"
                        )))
                    }
                    Some(dep) if dep.status != TaskStatus::Completed => {
                        return Err(VertexError::DependencyUnsatisfied(format!(
                            "dependency '{dep_id}' of task '{task_id}' is {:?}",
                            dep.status
                        )))
                    }
                    Some(_) => {}
                }
            }
        }

        let task = tasks.get_mut(task_id).expect("checked above");
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        Ok(task.clone())
    }

    async fn run_attempt(
        &self,
        snapshot: &Task,
        token: &CancellationToken,
    ) -> Result<crate::executor::ExecutionOutcome> {
        let execution = self.executor.execute(snapshot);

        match snapshot.timeout_secs {
            Some(secs) => {
                tokio::select! {
                    _ = token.cancelled() => {
                        Err(VertexError::Cancelled(format!("task '{}'", snapshot.id)))
                    }
                    timed = tokio::time::timeout(Duration::from_secs(secs), execution) => {
                        match timed {
                            Ok(outcome) => outcome,
                            Err(_) => Err(VertexError::Timeout(format!(
                                "task '{}' exceeded {secs}s",
                                snapshot.id
                            ))),
                        }
                    }
                }
            }
            None => {
                tokio::select! {
                    _ = token.cancelled() => {
                        Err(VertexError::Cancelled(format!("task '{}'", snapshot.id)))
                    }
                    outcome = execution => outcome,
                }
            }
        }
    }

    async fn token_for(&self, task_id: &str) -> CancellationToken {
        self.cancel_tokens
            .write()
            .await
            .entry(task_id.to_string())
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    async fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.read().await.get(task_id).map(|t| t.status)
    }

    async fn with_task_mut<F>(&self, task_id: &str, f: F)
    where
        F: FnOnce(&mut Task),
    {
        if let Some(task) = self.tasks.write().await.get_mut(task_id) {
            f(task);
        }
    }
}
