// Orchestrator Types
// Core type definitions for model-backed task execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use vertex_types::{ModelCapability, TaskPriority};

/// Status of a task in the orchestrator table.
///
/// Terminal states are monotonic: once completed, failed, or cancelled, a
/// task never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// One execution attempt, appended to the task's trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub execution_secs: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A unit of model-backed work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub priority: TaskPriority,
    pub max_retries: u32,
    /// Per-attempt execution cap in seconds; exceeding it is a retryable
    /// failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Tasks that must be completed before this one may start.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Capability tags a provider must support to run this task.
    #[serde(default)]
    pub required_capabilities: Vec<ModelCapability>,

    // Runtime state
    pub status: TaskStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_trace: Vec<AttemptRecord>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            input: Map::new(),
            priority: TaskPriority::Medium,
            max_retries: 3,
            timeout_secs: None,
            dependencies: Vec::new(),
            required_capabilities: Vec::new(),
            status: TaskStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            assigned_provider: None,
            assigned_model: None,
            result: None,
            error: None,
            execution_trace: Vec::new(),
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

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_required_capabilities(mut self, capabilities: Vec<ModelCapability>) -> Self {
        self.required_capabilities = capabilities;
        self
    }

    pub fn with_input(mut self, input: Map<String, Value>) -> Self {
        self.input = input;
        self
    }
}

/// Outcome of one workflow member, keyed by task id in the results map.
#[derive(Debug, Clone)]
pub enum WorkflowTaskResult {
    Completed(Value),
    Failed(String),
}

impl WorkflowTaskResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, WorkflowTaskResult::Failed(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            WorkflowTaskResult::Failed(e) => Some(e),
            WorkflowTaskResult::Completed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_defaults() {
        let task = Task::new("summarize the report");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, TaskPriority::Medium);
        assert_eq!(task.max_retries, 3);
        assert!(task.timeout_secs.is_none());
        assert!(task.execution_trace.is_empty());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }
}
