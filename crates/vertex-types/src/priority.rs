use serde::{Deserialize, Serialize};

/// Scheduling priority shared by orchestrator tasks and sleep-time tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub fn level(self) -> u8 {
        match self {
            TaskPriority::Low => 0,
            TaskPriority::Medium => 1,
            TaskPriority::High => 2,
            TaskPriority::Critical => 3,
        }
    }

    pub fn from_level(level: u8) -> Self {
        match level {
            0 => TaskPriority::Low,
            1 => TaskPriority::Medium,
            2 => TaskPriority::High,
            _ => TaskPriority::Critical,
        }
    }

    /// One level lower, saturating at LOW.
    pub fn decremented(self) -> Self {
        Self::from_level(self.level().saturating_sub(1))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Low => "LOW",
            TaskPriority::Medium => "MEDIUM",
            TaskPriority::High => "HIGH",
            TaskPriority::Critical => "CRITICAL",
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Medium
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = crate::VertexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(TaskPriority::Low),
            "MEDIUM" => Ok(TaskPriority::Medium),
            "HIGH" => Ok(TaskPriority::High),
            "CRITICAL" => Ok(TaskPriority::Critical),
            other => Err(crate::VertexError::InvalidInput(format!(
                "unknown priority: {other}"
            ))),
        }
    }
}
