// Resource Optimization Layer
// Facade over the ledger, selector, and scheduler, plus usage-ratio
// reallocation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use vertex_providers::Provider;
use vertex_types::Result;

use crate::ledger::{CreditLedger, UsageReport};
use crate::scheduler::{PredictiveBatchScheduler, ScheduleEntry};
use crate::selector::{CostAwareSelector, SelectionRequirements};

#[derive(Debug, Clone, Serialize)]
pub struct AllocationPlan {
    pub current: HashMap<String, f64>,
    pub optimized: HashMap<String, f64>,
    pub total: f64,
}

/// Entry point for resource accounting: every execution path reserves
/// credits and schedule capacity through this layer.
pub struct ResourceOptimizer {
    ledger: Arc<CreditLedger>,
    selector: Arc<CostAwareSelector>,
    scheduler: Arc<PredictiveBatchScheduler>,
}

impl ResourceOptimizer {
    pub fn new(
        ledger: Arc<CreditLedger>,
        selector: Arc<CostAwareSelector>,
        scheduler: Arc<PredictiveBatchScheduler>,
    ) -> Self {
        Self {
            ledger,
            selector,
            scheduler,
        }
    }

    pub fn ledger(&self) -> &Arc<CreditLedger> {
        &self.ledger
    }

    pub fn selector(&self) -> &Arc<CostAwareSelector> {
        &self.selector
    }

    pub fn scheduler(&self) -> &Arc<PredictiveBatchScheduler> {
        &self.scheduler
    }

    /// Give a component its starting allocation.
    pub async fn register_component(&self, component_id: &str, initial_allocation: f64) -> bool {
        self.ledger.allocate(component_id, initial_allocation).await
    }

    pub async fn select_provider(
        &self,
        component_id: &str,
        requirements: &SelectionRequirements,
    ) -> Result<(String, Arc<dyn Provider>)> {
        self.selector.select(component_id, requirements).await
    }

    pub async fn schedule_batch(
        &self,
        component_id: &str,
        batch_size: usize,
        priority: i64,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<ScheduleEntry> {
        self.scheduler
            .schedule(component_id, batch_size, priority, deadline)
            .await
    }

    pub async fn usage_report(
        &self,
        component_id: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> UsageReport {
        self.ledger.usage_report(component_id, start, end).await
    }

    /// Propose a reallocation of the current total, proportional to each
    /// component's observed usage. Components with no usage split evenly.
    pub async fn optimize_allocation(&self) -> AllocationPlan {
        let report = self.ledger.usage_report(None, None, None).await;
        let current = report.current_allocations.clone();
        let total: f64 = current.values().sum();

        let mut ratios: HashMap<String, f64> = HashMap::new();
        let mut total_used = 0.0;
        for (component_id, usage) in &report.component_usage {
            let ratio = usage.used / usage.allocated.max(0.001);
            ratios.insert(component_id.clone(), ratio);
            total_used += usage.used;
        }

        let optimized = if ratios.is_empty() {
            HashMap::new()
        } else if total_used > 0.0 {
            let ratio_sum: f64 = ratios.values().sum();
            ratios
                .into_iter()
                .map(|(id, ratio)| (id, ratio / ratio_sum * total))
                .collect()
        } else {
            let share = total / ratios.len() as f64;
            ratios.into_keys().map(|id| (id, share)).collect()
        };

        AllocationPlan {
            current,
            optimized,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vertex_providers::ProviderRegistry;

    fn optimizer_with(ledger: Arc<CreditLedger>) -> ResourceOptimizer {
        let registry = ProviderRegistry::new();
        let selector = Arc::new(CostAwareSelector::new(registry, ledger.clone()));
        let scheduler = Arc::new(PredictiveBatchScheduler::new(ledger.clone()));
        ResourceOptimizer::new(ledger, selector, scheduler)
    }

    #[tokio::test]
    async fn register_component_respects_budget() {
        let ledger = Arc::new(CreditLedger::new(0.0, Some(10.0)));
        let optimizer = optimizer_with(ledger.clone());

        assert!(optimizer.register_component("a", 8.0).await);
        assert!(!optimizer.register_component("b", 5.0).await);
        assert_eq!(ledger.balance().await, 8.0);
    }

    #[tokio::test]
    async fn optimize_allocation_follows_usage_ratio() {
        let ledger = Arc::new(CreditLedger::new(0.0, None));
        let optimizer = optimizer_with(ledger.clone());

        ledger.allocate("busy", 10.0).await;
        ledger.allocate("idle", 10.0).await;
        ledger.use_credits("busy", 8.0).await;

        let plan = optimizer.optimize_allocation().await;
        assert_eq!(plan.total, 12.0);
        // All observed usage came from "busy", so it gets the whole pool.
        assert!(plan.optimized["busy"] > plan.optimized["idle"]);
        let redistributed: f64 = plan.optimized.values().sum();
        assert!((redistributed - plan.total).abs() < 1e-9);
    }

    #[tokio::test]
    async fn facade_routes_selection_and_scheduling() {
        use vertex_providers::testing::StaticProvider;
        use vertex_types::ModelCapability;

        let registry = ProviderRegistry::new();
        registry
            .register(
                "p1",
                Arc::new(StaticProvider::new("p1").with_model(
                    "m1",
                    &[ModelCapability::TextGeneration],
                    0.5,
                )),
            )
            .await
            .unwrap();
        let ledger = Arc::new(CreditLedger::new(0.0, None));
        let selector = Arc::new(CostAwareSelector::new(registry, ledger.clone()));
        let scheduler = Arc::new(PredictiveBatchScheduler::new(ledger.clone()));
        let optimizer = ResourceOptimizer::new(ledger, selector, scheduler);

        let (provider_id, _) = optimizer
            .select_provider(
                "worker",
                &crate::selector::SelectionRequirements {
                    capabilities: vec![ModelCapability::TextGeneration],
                    max_cost: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(provider_id, "p1");

        let entry = optimizer.schedule_batch("worker", 5, 2, None).await.unwrap();
        assert_eq!(entry.batch_size, 5);
        // The selection already allocated 0.5 credits, which covers the
        // predicted batch cost, so only one ledger record exists.
        let report = optimizer.usage_report(None, None, None).await;
        assert_eq!(report.history.len(), 1);
        assert_eq!(report.total_allocated, 0.5);
    }

    #[tokio::test]
    async fn optimize_allocation_splits_evenly_without_usage() {
        let ledger = Arc::new(CreditLedger::new(0.0, None));
        let optimizer = optimizer_with(ledger.clone());

        ledger.allocate("a", 6.0).await;
        ledger.allocate("b", 2.0).await;

        let plan = optimizer.optimize_allocation().await;
        assert_eq!(plan.optimized["a"], 4.0);
        assert_eq!(plan.optimized["b"], 4.0);
    }
}
