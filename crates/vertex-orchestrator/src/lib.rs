pub mod batch;
pub mod engine;
pub mod executor;
pub mod scheduler;
pub mod types;

pub use batch::{
    Batch, BatchConfig, BatchController, BatchPriority, BatchRule, BatchStats, BatchStatus,
    BatchTaskResult,
};
pub use engine::TaskOrchestrator;
pub use executor::{ExecutionOutcome, ModelTaskExecutor, TaskExecutor};
pub use scheduler::TaskScheduler;
pub use types::{AttemptRecord, Task, TaskStatus, WorkflowTaskResult};
