pub mod detector;
pub mod monitor;
pub mod optimizer;
pub mod queue;
pub mod registry;

pub use detector::{IdlePeriod, IdleState, IdleWindow, IdleWindows, SleepDetector};
pub use monitor::{IdleStatus, ResourceMonitor};
pub use optimizer::{ExecutionRecord, SleepTimeOptimizer, SystemStatus};
pub use queue::{QueueStatus, SleepTaskScheduler, SleepTaskStatus, SleepTimeTask};
pub use registry::{BackgroundTaskRegistry, SleepTaskExecutor};
