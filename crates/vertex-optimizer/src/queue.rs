// Sleep-Time Task Queue
// Priority queue of deferred tasks with dependency gating, resource
// admission, and priority decay on failure.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use vertex_types::{Result, TaskPriority, VertexError};

use crate::monitor::ResourceMonitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepTaskStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

/// A deferred unit of work executed during idle periods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepTimeTask {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Routed to the executor registered under this type.
    pub task_type: String,
    pub parameters: Value,
    pub priority: TaskPriority,
    pub estimated_duration_secs: f64,
    #[serde(default)]
    pub estimated_resources: HashMap<String, f64>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub status: SleepTaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SleepTimeTask {
    pub fn new(name: impl Into<String>, task_type: impl Into<String>, parameters: Value) -> Self {
        let task_type = task_type.into();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: format!("sleep-time task of type '{task_type}'"),
            task_type,
            parameters,
            priority: TaskPriority::Medium,
            estimated_duration_secs: 60.0,
            estimated_resources: HashMap::new(),
            dependencies: Vec::new(),
            status: SleepTaskStatus::Pending,
            created_at: Utc::now(),
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_estimated_duration_secs(mut self, secs: f64) -> Self {
        self.estimated_duration_secs = secs;
        self
    }

    pub fn with_estimated_resources(mut self, resources: HashMap<String, f64>) -> Self {
        self.estimated_resources = resources;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStatus {
    pub pending_count: usize,
    pub scheduled_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub priority_counts: HashMap<String, usize>,
    pub total_tasks: usize,
}

// Max-heap entry: highest priority first, insertion order within a level.
struct QueueEntry {
    priority: u8,
    seq: u64,
    task_id: String,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    tasks: HashMap<String, SleepTimeTask>,
    scheduled: HashSet<String>,
    completed: HashSet<String>,
    failed: HashSet<String>,
    next_seq: u64,
}

pub struct SleepTaskScheduler {
    monitor: Arc<ResourceMonitor>,
    state: Mutex<QueueState>,
}

impl SleepTaskScheduler {
    pub fn new(monitor: Arc<ResourceMonitor>) -> Self {
        Self {
            monitor,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub async fn add_task(&self, task: SleepTimeTask) -> Result<String> {
        let mut state = self.state.lock().await;
        if state.tasks.contains_key(&task.id) {
            return Err(VertexError::AlreadyExists(format!(
                "sleep-time task '{}'",
                task.id
            )));
        }

        let id = task.id.clone();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(QueueEntry {
            priority: task.priority.level(),
            seq,
            task_id: id.clone(),
        });
        state.tasks.insert(id.clone(), task);
        Ok(id)
    }

    pub async fn get(&self, task_id: &str) -> Option<SleepTimeTask> {
        self.state.lock().await.tasks.get(task_id).cloned()
    }

    /// Highest-priority task whose dependencies are completed, provided the
    /// monitor's headroom covers its estimated resources. Returns None when
    /// nothing is ready or the head does not fit.
    pub async fn get_next(&self) -> Option<SleepTimeTask> {
        let available = self.monitor.available().await;
        let mut state = self.state.lock().await;
        let mut deferred: Vec<QueueEntry> = Vec::new();
        let mut picked = None;

        while let Some(entry) = state.heap.pop() {
            let Some(task) = state.tasks.get(&entry.task_id) else {
                continue;
            };
            // Entries whose task has moved on are stale; drop them.
            if task.status != SleepTaskStatus::Pending {
                continue;
            }

            let deps_met = task
                .dependencies
                .iter()
                .all(|dep| state.completed.contains(dep));
            if !deps_met {
                deferred.push(entry);
                continue;
            }

            let fits = task.estimated_resources.iter().all(|(resource, required)| {
                available
                    .get(resource)
                    .map_or(true, |have| have >= required)
            });
            if !fits {
                // The first ready task is the queue's head; when it does not
                // fit, nothing runs this round.
                deferred.push(entry);
                break;
            }

            picked = Some(entry);
            break;
        }

        for entry in deferred {
            state.heap.push(entry);
        }

        let entry = picked?;
        let task_id = entry.task_id.clone();
        state.scheduled.insert(task_id.clone());
        let task = state.tasks.get_mut(&task_id)?;
        task.status = SleepTaskStatus::Scheduled;
        task.scheduled_at = Some(Utc::now());
        Some(task.clone())
    }

    pub async fn set_running(&self, task_id: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.tasks.get_mut(task_id) {
            Some(task) if task.status == SleepTaskStatus::Scheduled => {
                task.status = SleepTaskStatus::Running;
                task.started_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    pub async fn mark_completed(&self, task_id: &str, result: Option<Value>) -> bool {
        let mut state = self.state.lock().await;
        if !state.tasks.contains_key(task_id) {
            return false;
        }
        state.scheduled.remove(task_id);
        state.completed.insert(task_id.to_string());
        let task = state.tasks.get_mut(task_id).expect("checked above");
        task.status = SleepTaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        task.result = result;
        true
    }

    /// Record a failure. Errors mentioning "critical" are terminal; anything
    /// else requeues the task one priority level lower.
    pub async fn mark_failed(&self, task_id: &str, error: &str) -> bool {
        if error.to_lowercase().contains("critical") {
            return self.mark_failed_terminal(task_id, error).await;
        }

        let mut state = self.state.lock().await;
        if !state.tasks.contains_key(task_id) {
            return false;
        }
        state.scheduled.remove(task_id);

        let seq = state.next_seq;
        state.next_seq += 1;

        let task = state.tasks.get_mut(task_id).expect("checked above");
        task.priority = task.priority.decremented();
        task.status = SleepTaskStatus::Pending;
        task.scheduled_at = None;
        task.started_at = None;
        task.completed_at = None;
        task.error = Some(error.to_string());
        let priority = task.priority.level();

        state.heap.push(QueueEntry {
            priority,
            seq,
            task_id: task_id.to_string(),
        });
        tracing::debug!(task_id, error, "sleep-time task requeued at lower priority");
        true
    }

    pub async fn mark_failed_terminal(&self, task_id: &str, error: &str) -> bool {
        let mut state = self.state.lock().await;
        if !state.tasks.contains_key(task_id) {
            return false;
        }
        state.scheduled.remove(task_id);
        state.failed.insert(task_id.to_string());
        let task = state.tasks.get_mut(task_id).expect("checked above");
        task.status = SleepTaskStatus::Failed;
        task.completed_at = Some(Utc::now());
        task.error = Some(error.to_string());
        true
    }

    /// Cancelable only before execution starts: removes a pending or
    /// scheduled task from the queue entirely.
    pub async fn remove(&self, task_id: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.tasks.get(task_id) {
            Some(task)
                if matches!(
                    task.status,
                    SleepTaskStatus::Pending | SleepTaskStatus::Scheduled
                ) =>
            {
                state.tasks.remove(task_id);
                state.scheduled.remove(task_id);
                true
            }
            _ => false,
        }
    }

    pub async fn pending_tasks(&self) -> Vec<SleepTimeTask> {
        self.state
            .lock()
            .await
            .tasks
            .values()
            .filter(|t| t.status == SleepTaskStatus::Pending)
            .cloned()
            .collect()
    }

    pub async fn completed_ids(&self) -> HashSet<String> {
        self.state.lock().await.completed.clone()
    }

    pub async fn queue_status(&self) -> QueueStatus {
        let state = self.state.lock().await;

        let mut priority_counts: HashMap<String, usize> = HashMap::new();
        let mut pending_count = 0usize;
        for task in state.tasks.values() {
            if task.status == SleepTaskStatus::Pending {
                pending_count += 1;
                *priority_counts
                    .entry(task.priority.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }

        QueueStatus {
            pending_count,
            scheduled_count: state.scheduled.len(),
            completed_count: state.completed.len(),
            failed_count: state.failed.len(),
            priority_counts,
            total_tasks: state.tasks.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scheduler() -> (Arc<ResourceMonitor>, SleepTaskScheduler) {
        let monitor = Arc::new(ResourceMonitor::new());
        let scheduler = SleepTaskScheduler::new(monitor.clone());
        (monitor, scheduler)
    }

    fn task(id: &str, priority: TaskPriority) -> SleepTimeTask {
        SleepTimeTask::new(id, "noop", json!({}))
            .with_id(id)
            .with_priority(priority)
    }

    #[tokio::test]
    async fn get_next_pops_highest_priority_first() {
        let (_, scheduler) = scheduler();
        scheduler.add_task(task("low", TaskPriority::Low)).await.unwrap();
        scheduler.add_task(task("high", TaskPriority::High)).await.unwrap();
        scheduler
            .add_task(task("medium", TaskPriority::Medium))
            .await
            .unwrap();

        assert_eq!(scheduler.get_next().await.unwrap().id, "high");
        assert_eq!(scheduler.get_next().await.unwrap().id, "medium");
        assert_eq!(scheduler.get_next().await.unwrap().id, "low");
        assert!(scheduler.get_next().await.is_none());
    }

    #[tokio::test]
    async fn equal_priority_pops_in_insertion_order() {
        let (_, scheduler) = scheduler();
        for id in ["first", "second", "third"] {
            scheduler.add_task(task(id, TaskPriority::Medium)).await.unwrap();
        }

        assert_eq!(scheduler.get_next().await.unwrap().id, "first");
        assert_eq!(scheduler.get_next().await.unwrap().id, "second");
        assert_eq!(scheduler.get_next().await.unwrap().id, "third");
    }

    #[tokio::test]
    async fn dependencies_gate_readiness() {
        let (_, scheduler) = scheduler();
        scheduler.add_task(task("base", TaskPriority::Low)).await.unwrap();
        scheduler
            .add_task(
                task("dependent", TaskPriority::High)
                    .with_dependencies(vec!["base".to_string()]),
            )
            .await
            .unwrap();

        // "dependent" outranks "base" but is not ready yet.
        let next = scheduler.get_next().await.unwrap();
        assert_eq!(next.id, "base");
        scheduler.mark_completed("base", None).await;

        assert_eq!(scheduler.get_next().await.unwrap().id, "dependent");
    }

    #[tokio::test]
    async fn resource_shortage_returns_none() {
        let (monitor, scheduler) = scheduler();
        monitor
            .update_usage(HashMap::from([("cpu".to_string(), 95.0)]))
            .await;

        scheduler
            .add_task(
                task("heavy", TaskPriority::High)
                    .with_estimated_resources(HashMap::from([("cpu".to_string(), 50.0)])),
            )
            .await
            .unwrap();

        assert!(scheduler.get_next().await.is_none());

        monitor
            .update_usage(HashMap::from([("cpu".to_string(), 10.0)]))
            .await;
        assert_eq!(scheduler.get_next().await.unwrap().id, "heavy");
    }

    #[tokio::test]
    async fn failure_decays_priority_until_critical() {
        let (_, scheduler) = scheduler();
        scheduler.add_task(task("flaky", TaskPriority::High)).await.unwrap();

        let picked = scheduler.get_next().await.unwrap();
        assert_eq!(picked.priority, TaskPriority::High);

        scheduler.mark_failed("flaky", "transient error").await;
        let requeued = scheduler.get("flaky").await.unwrap();
        assert_eq!(requeued.status, SleepTaskStatus::Pending);
        assert_eq!(requeued.priority, TaskPriority::Medium);

        scheduler.get_next().await.unwrap();
        scheduler.mark_failed("flaky", "transient error").await;
        assert_eq!(
            scheduler.get("flaky").await.unwrap().priority,
            TaskPriority::Low
        );

        scheduler.get_next().await.unwrap();
        scheduler.mark_failed("flaky", "critical: store corrupted").await;
        let dead = scheduler.get("flaky").await.unwrap();
        assert_eq!(dead.status, SleepTaskStatus::Failed);

        assert!(scheduler.get_next().await.is_none());
        assert_eq!(scheduler.queue_status().await.failed_count, 1);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let (_, scheduler) = scheduler();
        scheduler.add_task(task("t", TaskPriority::Low)).await.unwrap();
        let err = scheduler
            .add_task(task("t", TaskPriority::Low))
            .await
            .unwrap_err();
        assert!(matches!(err, VertexError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn remove_only_touches_unstarted_tasks() {
        let (_, scheduler) = scheduler();
        scheduler.add_task(task("a", TaskPriority::Low)).await.unwrap();
        scheduler.add_task(task("b", TaskPriority::Low)).await.unwrap();

        assert!(scheduler.remove("a").await);

        let picked = scheduler.get_next().await.unwrap();
        assert_eq!(picked.id, "b");
        scheduler.set_running("b").await;
        assert!(!scheduler.remove("b").await);
    }

    #[tokio::test]
    async fn queue_status_counts_by_priority() {
        let (_, scheduler) = scheduler();
        scheduler.add_task(task("a", TaskPriority::High)).await.unwrap();
        scheduler.add_task(task("b", TaskPriority::High)).await.unwrap();
        scheduler.add_task(task("c", TaskPriority::Low)).await.unwrap();

        let status = scheduler.queue_status().await;
        assert_eq!(status.pending_count, 3);
        assert_eq!(status.priority_counts["HIGH"], 2);
        assert_eq!(status.priority_counts["LOW"], 1);
        assert_eq!(status.total_tasks, 3);
    }
}
