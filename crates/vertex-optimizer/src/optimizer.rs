// Sleep-Time Optimizer
// Worker loop gated by the sleep detector, plus queue/system inspection and
// completion-time prediction over upcoming idle windows.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Local, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use vertex_types::{Result, TaskPriority, VertexError};

use crate::detector::{IdleState, SleepDetector};
use crate::monitor::ResourceMonitor;
use crate::queue::{QueueStatus, SleepTaskScheduler, SleepTaskStatus, SleepTimeTask};
use crate::registry::BackgroundTaskRegistry;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const PREDICTION_LOOKAHEAD_HOURS: i64 = 24;
const DEFAULT_TASK_DURATION_SECS: f64 = 60.0;

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub task_type: String,
    pub status: SleepTaskStatus,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub idle: IdleState,
    pub queue: QueueStatus,
    pub usage: HashMap<String, f64>,
    pub limits: HashMap<String, f64>,
    pub available: HashMap<String, f64>,
    pub worker_running: bool,
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Opportunistic background executor: while the detector reports the system
/// idle, pops ready tasks off the queue and dispatches them to registered
/// executors.
#[derive(Clone)]
pub struct SleepTimeOptimizer {
    monitor: Arc<ResourceMonitor>,
    scheduler: Arc<SleepTaskScheduler>,
    detector: Arc<SleepDetector>,
    registry: Arc<BackgroundTaskRegistry>,
    history: Arc<Mutex<Vec<ExecutionRecord>>>,
    worker: Arc<Mutex<Option<Worker>>>,
}

impl SleepTimeOptimizer {
    pub fn new(
        monitor: Arc<ResourceMonitor>,
        scheduler: Arc<SleepTaskScheduler>,
        detector: Arc<SleepDetector>,
        registry: Arc<BackgroundTaskRegistry>,
    ) -> Self {
        Self {
            monitor,
            scheduler,
            detector,
            registry,
            history: Arc::new(Mutex::new(Vec::new())),
            worker: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_defaults() -> Self {
        let monitor = Arc::new(ResourceMonitor::new());
        let scheduler = Arc::new(SleepTaskScheduler::new(monitor.clone()));
        let detector = Arc::new(SleepDetector::new(monitor.clone()));
        let registry = Arc::new(BackgroundTaskRegistry::new());
        Self::new(monitor, scheduler, detector, registry)
    }

    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    pub fn scheduler(&self) -> &Arc<SleepTaskScheduler> {
        &self.scheduler
    }

    pub fn detector(&self) -> &Arc<SleepDetector> {
        &self.detector
    }

    pub fn registry(&self) -> &Arc<BackgroundTaskRegistry> {
        &self.registry
    }

    /// Queue a task for idle-time execution. The task type must have a
    /// registered executor.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_task(
        &self,
        name: &str,
        task_type: &str,
        parameters: Value,
        priority: TaskPriority,
        estimated_duration_secs: f64,
        estimated_resources: HashMap<String, f64>,
        dependencies: Vec<String>,
    ) -> Result<String> {
        if self.registry.get(task_type).await.is_none() {
            return Err(VertexError::InvalidInput(format!(
                "task type '{task_type}' is not registered"
            )));
        }

        let task = SleepTimeTask::new(name, task_type, parameters)
            .with_priority(priority)
            .with_estimated_duration_secs(estimated_duration_secs)
            .with_estimated_resources(estimated_resources)
            .with_dependencies(dependencies);
        self.scheduler.add_task(task).await
    }

    pub async fn get_task_status(&self, task_id: &str) -> Option<SleepTimeTask> {
        self.scheduler.get(task_id).await
    }

    /// Drop a task that has not started executing yet.
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        self.scheduler.remove(task_id).await
    }

    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let optimizer = self.clone();
        let handle = tokio::spawn(async move {
            optimizer.run_worker(loop_token).await;
        });
        *worker = Some(Worker { token, handle });
        tracing::info!("sleep-time worker started");
    }

    pub async fn stop(&self) {
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            worker.token.cancel();
            let _ = worker.handle.await;
            tracing::info!("sleep-time worker stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    pub async fn system_status(&self) -> SystemStatus {
        SystemStatus {
            idle: self.detector.check_idle_state().await,
            queue: self.scheduler.queue_status().await,
            usage: self.monitor.current_usage().await,
            limits: self.monitor.limits().await,
            available: self.monitor.available().await,
            worker_running: self.is_running().await,
        }
    }

    /// Most recent executions first.
    pub async fn execution_history(&self, max_entries: usize) -> Vec<ExecutionRecord> {
        let history = self.history.lock().await;
        history.iter().rev().take(max_entries).cloned().collect()
    }

    pub async fn predict_completion_times(&self) -> HashMap<String, DateTime<Utc>> {
        self.predict_completion_times_at(Local::now()).await
    }

    /// Simulate the pending queue against predicted idle windows; tasks that
    /// do not fit are appended past the last fitted completion using the
    /// mean estimated duration.
    pub async fn predict_completion_times_at(
        &self,
        now: DateTime<Local>,
    ) -> HashMap<String, DateTime<Utc>> {
        let periods = self
            .detector
            .predict_idle_periods(PREDICTION_LOOKAHEAD_HOURS, now);
        let already_completed = self.scheduler.completed_ids().await;

        let mut pending = self.scheduler.pending_tasks().await;
        pending.sort_by_key(|t| std::cmp::Reverse(t.priority.level()));

        let mut completion: HashMap<String, DateTime<Local>> = HashMap::new();
        let mut remaining = pending.clone();

        for period in &periods {
            let mut current = period.start.max(now);
            while !remaining.is_empty() && current < period.end {
                let position = remaining.iter().position(|task| {
                    let deps_met = task.dependencies.iter().all(|dep| {
                        completion.contains_key(dep) || already_completed.contains(dep)
                    });
                    let fits = task.estimated_resources.iter().all(|(resource, required)| {
                        period
                            .available_resources
                            .get(resource)
                            .map_or(true, |have| have >= required)
                    });
                    deps_met && fits
                });

                let Some(position) = position else { break };
                let task = remaining.remove(position);

                let window_left = (period.end - current).num_seconds() as f64;
                let execution_secs = task.estimated_duration_secs.min(window_left);
                current += ChronoDuration::milliseconds((execution_secs * 1000.0) as i64);
                completion.insert(task.id, current);
            }
        }

        if !remaining.is_empty() {
            let avg_secs = if pending.is_empty() {
                DEFAULT_TASK_DURATION_SECS
            } else {
                pending
                    .iter()
                    .map(|t| t.estimated_duration_secs)
                    .sum::<f64>()
                    / pending.len() as f64
            };

            let mut last = completion.values().max().copied().unwrap_or(now);
            for task in remaining {
                last += ChronoDuration::milliseconds((avg_secs * 1000.0) as i64);
                completion.insert(task.id, last);
            }
        }

        completion
            .into_iter()
            .map(|(id, at)| (id, at.with_timezone(&Utc)))
            .collect()
    }

    async fn run_worker(&self, token: CancellationToken) {
        let mut ticks = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticks.tick() => {
                    let idle = self.detector.check_idle_state().await;
                    if idle.is_idle {
                        self.execute_next_pending().await;
                    }
                }
            }
        }
    }

    async fn execute_next_pending(&self) {
        let Some(task) = self.scheduler.get_next().await else {
            return;
        };

        let Some(executor) = self.registry.get(&task.task_type).await else {
            // Registration is checked at submit time, so this means the
            // executor set changed underneath us.
            let error = format!("no executor registered for task type '{}'", task.task_type);
            self.scheduler.mark_failed_terminal(&task.id, &error).await;
            self.record_execution(&task, SleepTaskStatus::Failed, 0.0, Some(error))
                .await;
            return;
        };

        self.scheduler.set_running(&task.id).await;
        let started = Instant::now();
        let outcome = executor.execute(&task).await;
        let duration_secs = started.elapsed().as_secs_f64();

        match outcome {
            Ok(result) => {
                self.scheduler.mark_completed(&task.id, Some(result)).await;
                self.record_execution(&task, SleepTaskStatus::Completed, duration_secs, None)
                    .await;
            }
            Err(e) => {
                let error = e.to_string();
                self.scheduler.mark_failed(&task.id, &error).await;
                self.record_execution(&task, SleepTaskStatus::Failed, duration_secs, Some(error))
                    .await;
            }
        }
    }

    async fn record_execution(
        &self,
        task: &SleepTimeTask,
        status: SleepTaskStatus,
        duration_secs: f64,
        error: Option<String>,
    ) {
        self.history.lock().await.push(ExecutionRecord {
            timestamp: Utc::now(),
            task_id: task.id.clone(),
            task_type: task.task_type.clone(),
            status,
            duration_secs,
            error,
        });
    }
}
