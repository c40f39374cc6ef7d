pub mod ledger;
pub mod optimizer;
pub mod scheduler;
pub mod selector;

pub use ledger::{CreditLedger, LedgerAction, LedgerRecord, UsageReport};
pub use optimizer::{AllocationPlan, ResourceOptimizer};
pub use scheduler::{
    PredictiveBatchScheduler, ScheduleEntry, ScheduleStatus, WorkloadSample,
};
pub use selector::{CostAwareSelector, SelectionRequirements};
