// Predictive Batch Scheduler
// Priority/deadline-ordered schedule queue with cost and duration prediction
// from a rolling window of observed workloads.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use vertex_types::{Result, VertexError};

use crate::ledger::CreditLedger;

const HISTORY_CAP: usize = 1000;

// Fallbacks used before any workload has been observed.
const DEFAULT_SECS_PER_TASK: f64 = 0.1;
const DEFAULT_CREDITS_PER_TASK: f64 = 0.01;
const DEFAULT_MEMORY_PER_TASK: f64 = 10.0;
const DEFAULT_COMPUTE_PER_TASK: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Scheduled,
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub schedule_id: String,
    pub component_id: String,
    pub batch_size: usize,
    pub priority: i64,
    pub deadline: Option<DateTime<Utc>>,
    pub predicted_duration_secs: f64,
    pub predicted_resources: HashMap<String, f64>,
    pub scheduled_at: DateTime<Utc>,
    pub status: ScheduleStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSample {
    pub recorded_at: DateTime<Utc>,
    pub batch_size: usize,
    pub execution_secs: f64,
    pub resource_usage: HashMap<String, f64>,
}

#[derive(Default)]
struct SchedulerState {
    queue: Vec<ScheduleEntry>,
    history: VecDeque<WorkloadSample>,
}

pub struct PredictiveBatchScheduler {
    ledger: Arc<CreditLedger>,
    state: RwLock<SchedulerState>,
}

impl PredictiveBatchScheduler {
    pub fn new(ledger: Arc<CreditLedger>) -> Self {
        Self {
            ledger,
            state: RwLock::new(SchedulerState::default()),
        }
    }

    pub async fn record_workload(
        &self,
        batch_size: usize,
        execution_secs: f64,
        resource_usage: HashMap<String, f64>,
    ) {
        let mut state = self.state.write().await;
        state.history.push_back(WorkloadSample {
            recorded_at: Utc::now(),
            batch_size,
            execution_secs,
            resource_usage,
        });
        while state.history.len() > HISTORY_CAP {
            state.history.pop_front();
        }
    }

    /// Mean over samples within ±20% of `batch_size`; else the nearest
    /// sample scaled linearly; else a flat per-task default.
    pub async fn predict_execution_time(&self, batch_size: usize) -> f64 {
        let state = self.state.read().await;
        Self::predict_time(&state.history, batch_size)
    }

    pub async fn predict_resource_usage(&self, batch_size: usize) -> HashMap<String, f64> {
        let state = self.state.read().await;
        Self::predict_resources(&state.history, batch_size)
    }

    /// Reserve credits for a batch and enqueue it.
    pub async fn schedule(
        &self,
        component_id: &str,
        batch_size: usize,
        priority: i64,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<ScheduleEntry> {
        let (predicted_resources, predicted_duration_secs) = {
            let state = self.state.read().await;
            (
                Self::predict_resources(&state.history, batch_size),
                Self::predict_time(&state.history, batch_size),
            )
        };

        let required_credits = predicted_resources.get("credits").copied().unwrap_or(0.0);
        if self.ledger.allocation(component_id).await < required_credits
            && !self.ledger.allocate(component_id, required_credits).await
        {
            return Err(VertexError::InsufficientCredits(format!(
                "{required_credits} credits for batch of {batch_size}"
            )));
        }

        let entry = ScheduleEntry {
            schedule_id: Uuid::new_v4().to_string(),
            component_id: component_id.to_string(),
            batch_size,
            priority,
            deadline,
            predicted_duration_secs,
            predicted_resources,
            scheduled_at: Utc::now(),
            status: ScheduleStatus::Scheduled,
        };

        let mut state = self.state.write().await;
        state.queue.push(entry.clone());
        Self::sort_queue(&mut state.queue);
        Ok(entry)
    }

    /// Peek the head of the queue and mark it running.
    pub async fn next(&self) -> Option<ScheduleEntry> {
        let mut state = self.state.write().await;
        let head = state.queue.first_mut()?;
        head.status = ScheduleStatus::Running;
        Some(head.clone())
    }

    /// Record the observed workload, consume the credits actually used, and
    /// drop the entry.
    pub async fn complete(
        &self,
        schedule_id: &str,
        execution_secs: f64,
        resource_usage: HashMap<String, f64>,
        success: bool,
    ) -> Result<()> {
        let entry = {
            let mut state = self.state.write().await;
            let idx = state
                .queue
                .iter()
                .position(|e| e.schedule_id == schedule_id)
                .ok_or_else(|| VertexError::NotFound(format!("schedule '{schedule_id}'")))?;
            let entry = state.queue.remove(idx);

            state.history.push_back(WorkloadSample {
                recorded_at: Utc::now(),
                batch_size: entry.batch_size,
                execution_secs,
                resource_usage: resource_usage.clone(),
            });
            while state.history.len() > HISTORY_CAP {
                state.history.pop_front();
            }
            entry
        };

        if !success {
            tracing::warn!(schedule_id, "batch completed unsuccessfully");
        }

        let used = resource_usage.get("credits").copied().unwrap_or(0.0);
        if !self.ledger.use_credits(&entry.component_id, used).await {
            tracing::warn!(
                schedule_id,
                component_id = %entry.component_id,
                used,
                "actual credit usage exceeded the component allocation"
            );
        }
        Ok(())
    }

    pub async fn queue_snapshot(&self) -> Vec<ScheduleEntry> {
        self.state.read().await.queue.clone()
    }

    pub async fn history_len(&self) -> usize {
        self.state.read().await.history.len()
    }

    // Stable sort: equal (priority, deadline) keep insertion order.
    fn sort_queue(queue: &mut [ScheduleEntry]) {
        queue.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then_with(|| {
                let da = a.deadline.unwrap_or(DateTime::<Utc>::MAX_UTC);
                let db = b.deadline.unwrap_or(DateTime::<Utc>::MAX_UTC);
                da.cmp(&db)
            })
        });
    }

    fn similar<'a>(
        history: &'a VecDeque<WorkloadSample>,
        batch_size: usize,
    ) -> Vec<&'a WorkloadSample> {
        let lo = 0.8 * batch_size as f64;
        let hi = 1.2 * batch_size as f64;
        history
            .iter()
            .filter(|s| {
                let n = s.batch_size as f64;
                n >= lo && n <= hi
            })
            .collect()
    }

    fn nearest(history: &VecDeque<WorkloadSample>, batch_size: usize) -> Option<&WorkloadSample> {
        history.iter().min_by_key(|s| {
            (s.batch_size as i64 - batch_size as i64).unsigned_abs()
        })
    }

    fn predict_time(history: &VecDeque<WorkloadSample>, batch_size: usize) -> f64 {
        if history.is_empty() {
            return batch_size as f64 * DEFAULT_SECS_PER_TASK;
        }

        let similar = Self::similar(history, batch_size);
        if !similar.is_empty() {
            return similar.iter().map(|s| s.execution_secs).sum::<f64>() / similar.len() as f64;
        }

        let nearest = Self::nearest(history, batch_size).expect("history is non-empty");
        let scale = batch_size as f64 / (nearest.batch_size.max(1)) as f64;
        nearest.execution_secs * scale
    }

    fn predict_resources(
        history: &VecDeque<WorkloadSample>,
        batch_size: usize,
    ) -> HashMap<String, f64> {
        if history.is_empty() {
            let n = batch_size as f64;
            return HashMap::from([
                ("credits".to_string(), n * DEFAULT_CREDITS_PER_TASK),
                ("memory".to_string(), n * DEFAULT_MEMORY_PER_TASK),
                ("compute".to_string(), n * DEFAULT_COMPUTE_PER_TASK),
            ]);
        }

        let similar = Self::similar(history, batch_size);
        if !similar.is_empty() {
            let mut keys: Vec<&String> = similar
                .iter()
                .flat_map(|s| s.resource_usage.keys())
                .collect();
            keys.sort();
            keys.dedup();

            return keys
                .into_iter()
                .map(|key| {
                    let mean = similar
                        .iter()
                        .map(|s| s.resource_usage.get(key).copied().unwrap_or(0.0))
                        .sum::<f64>()
                        / similar.len() as f64;
                    (key.clone(), mean)
                })
                .collect();
        }

        let nearest = Self::nearest(history, batch_size).expect("history is non-empty");
        let scale = batch_size as f64 / (nearest.batch_size.max(1)) as f64;
        nearest
            .resource_usage
            .iter()
            .map(|(k, v)| (k.clone(), v * scale))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(credits: f64) -> HashMap<String, f64> {
        HashMap::from([("credits".to_string(), credits)])
    }

    fn scheduler() -> PredictiveBatchScheduler {
        PredictiveBatchScheduler::new(Arc::new(CreditLedger::new(0.0, None)))
    }

    #[tokio::test]
    async fn empty_history_uses_linear_defaults() {
        let scheduler = scheduler();
        assert_eq!(scheduler.predict_execution_time(10).await, 1.0);

        let resources = scheduler.predict_resource_usage(10).await;
        assert_eq!(resources["credits"], 0.1);
        assert_eq!(resources["memory"], 100.0);
        assert_eq!(resources["compute"], 0.5);
    }

    #[tokio::test]
    async fn similar_batches_average_and_others_extrapolate() {
        let scheduler = scheduler();
        scheduler.record_workload(10, 2.0, usage(1.0)).await;
        scheduler.record_workload(11, 4.0, usage(2.0)).await;

        // 10 and 11 both fall inside ±20% of 10.
        assert_eq!(scheduler.predict_execution_time(10).await, 3.0);

        // 40 is far from both; nearest (11) scales linearly.
        let t = scheduler.predict_execution_time(40).await;
        assert!((t - 4.0 * (40.0 / 11.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn prediction_is_monotonic_with_monotonic_history() {
        let scheduler = scheduler();
        for n in [5usize, 10, 20, 40] {
            scheduler.record_workload(n, n as f64 * 0.5, usage(0.0)).await;
        }
        let mut last = 0.0;
        for n in [5usize, 10, 20, 40, 80] {
            let t = scheduler.predict_execution_time(n).await;
            assert!(t >= last, "prediction regressed at n={n}");
            last = t;
        }
    }

    #[tokio::test]
    async fn queue_orders_by_priority_then_deadline() {
        let ledger = Arc::new(CreditLedger::new(0.0, None));
        let scheduler = PredictiveBatchScheduler::new(ledger);

        let near = Utc::now() + chrono::Duration::minutes(5);
        let far = Utc::now() + chrono::Duration::hours(5);

        let low = scheduler.schedule("c", 1, 1, None).await.unwrap();
        let high_far = scheduler.schedule("c", 1, 5, Some(far)).await.unwrap();
        let high_near = scheduler.schedule("c", 1, 5, Some(near)).await.unwrap();
        let high_open = scheduler.schedule("c", 1, 5, None).await.unwrap();

        let ids: Vec<String> = scheduler
            .queue_snapshot()
            .await
            .into_iter()
            .map(|e| e.schedule_id)
            .collect();
        assert_eq!(
            ids,
            vec![
                high_near.schedule_id,
                high_far.schedule_id,
                high_open.schedule_id,
                low.schedule_id
            ]
        );
    }

    #[tokio::test]
    async fn equal_keys_preserve_insertion_order() {
        let scheduler = scheduler();
        let first = scheduler.schedule("c", 1, 2, None).await.unwrap();
        let second = scheduler.schedule("c", 1, 2, None).await.unwrap();
        let third = scheduler.schedule("c", 1, 2, None).await.unwrap();

        let ids: Vec<String> = scheduler
            .queue_snapshot()
            .await
            .into_iter()
            .map(|e| e.schedule_id)
            .collect();
        assert_eq!(
            ids,
            vec![first.schedule_id, second.schedule_id, third.schedule_id]
        );
    }

    #[tokio::test]
    async fn next_marks_head_running() {
        let scheduler = scheduler();
        let entry = scheduler.schedule("c", 3, 1, None).await.unwrap();

        let head = scheduler.next().await.unwrap();
        assert_eq!(head.schedule_id, entry.schedule_id);
        assert_eq!(head.status, ScheduleStatus::Running);
        assert_eq!(
            scheduler.queue_snapshot().await[0].status,
            ScheduleStatus::Running
        );
    }

    #[tokio::test]
    async fn complete_consumes_credits_and_records_history() {
        let ledger = Arc::new(CreditLedger::new(0.0, None));
        let scheduler = PredictiveBatchScheduler::new(ledger.clone());

        let entry = scheduler.schedule("c", 10, 1, None).await.unwrap();
        // The schedule call allocated the predicted credits (0.1 for 10 tasks).
        assert_eq!(ledger.allocation("c").await, 0.1);

        scheduler
            .complete(&entry.schedule_id, 1.5, usage(0.05), true)
            .await
            .unwrap();
        assert!((ledger.allocation("c").await - 0.05).abs() < 1e-12);
        assert!(scheduler.queue_snapshot().await.is_empty());
        assert_eq!(scheduler.history_len().await, 1);
    }

    #[tokio::test]
    async fn complete_unknown_id_fails() {
        let scheduler = scheduler();
        let err = scheduler
            .complete("nope", 1.0, HashMap::new(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, VertexError::NotFound(_)));
    }

    #[tokio::test]
    async fn schedule_fails_when_budget_blocks_allocation() {
        let ledger = Arc::new(CreditLedger::new(0.0, Some(0.05)));
        let scheduler = PredictiveBatchScheduler::new(ledger);

        // Predicted credits for 10 tasks (0.1) exceed the cap.
        let err = scheduler.schedule("c", 10, 1, None).await.unwrap_err();
        assert!(matches!(err, VertexError::InsufficientCredits(_)));
    }
}
