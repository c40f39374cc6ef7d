// Cost-Aware Selector
// Ranks capability-matching providers by estimated cost and gates the pick
// against the credit ledger.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use vertex_providers::{Provider, ProviderRegistry};
use vertex_types::{ModelCapability, Result, VertexError};

use crate::ledger::CreditLedger;

/// Fixed probe used for comparable cost estimates across providers.
const PROBE_PROMPT: &str = "This is a standard test prompt to estimate cost.";

/// Estimate used when none of a candidate's models yields one.
const DEFAULT_ESTIMATE: f64 = 1.0;

#[derive(Debug, Clone, Default)]
pub struct SelectionRequirements {
    pub capabilities: Vec<ModelCapability>,
    pub max_cost: Option<f64>,
}

pub struct CostAwareSelector {
    registry: ProviderRegistry,
    ledger: Arc<CreditLedger>,
    // Keyed by (provider, model); invalidated only by clear_cache.
    cost_cache: RwLock<HashMap<(String, String), f64>>,
}

impl CostAwareSelector {
    pub fn new(registry: ProviderRegistry, ledger: Arc<CreditLedger>) -> Self {
        Self {
            registry,
            ledger,
            cost_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Pick the cheapest provider whose models cover every required
    /// capability, allocating the estimate to `component_id` when its
    /// current allocation does not cover it.
    pub async fn select(
        &self,
        component_id: &str,
        requirements: &SelectionRequirements,
    ) -> Result<(String, Arc<dyn Provider>)> {
        let candidates = self.capability_candidates(requirements).await;
        if candidates.is_empty() {
            return Err(VertexError::NoProvider(format!(
                "capabilities {:?}",
                requirements
                    .capabilities
                    .iter()
                    .map(|c| c.as_str())
                    .collect::<Vec<_>>()
            )));
        }

        let mut ranked: Vec<(String, Arc<dyn Provider>, f64)> = Vec::new();
        for (provider_id, provider) in candidates {
            let estimate = self
                .estimate_provider_cost(&provider_id, provider.as_ref(), requirements)
                .await;
            if let Some(max_cost) = requirements.max_cost {
                if estimate > max_cost {
                    continue;
                }
            }
            ranked.push((provider_id, provider, estimate));
        }

        if ranked.is_empty() {
            return Err(VertexError::NoAffordable(
                "all candidates exceed the cost constraint".to_string(),
            ));
        }

        ranked.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));
        let (provider_id, provider, estimate) = ranked.remove(0);

        if self.ledger.allocation(component_id).await < estimate
            && !self.ledger.allocate(component_id, estimate).await
        {
            return Err(VertexError::NoAffordable(format!(
                "allocation of {estimate} credits to '{component_id}' failed"
            )));
        }

        tracing::debug!(provider_id, estimate, component_id, "selected provider");
        Ok((provider_id, provider))
    }

    pub async fn clear_cache(&self) {
        self.cost_cache.write().await.clear();
    }

    /// Providers whose model set covers every required capability.
    async fn capability_candidates(
        &self,
        requirements: &SelectionRequirements,
    ) -> Vec<(String, Arc<dyn Provider>)> {
        let mut candidates = Vec::new();
        for (provider_id, provider) in self.registry.snapshot().await {
            let models = provider.list_models();
            let covers_all = requirements.capabilities.iter().all(|cap| {
                models.iter().any(|m| m.capabilities.contains(cap))
            });
            if covers_all {
                candidates.push((provider_id, provider));
            }
        }
        candidates
    }

    /// Minimum probe-prompt estimate over the provider's eligible models.
    async fn estimate_provider_cost(
        &self,
        provider_id: &str,
        provider: &dyn Provider,
        requirements: &SelectionRequirements,
    ) -> f64 {
        let mut min_cost = f64::INFINITY;

        for model in provider.list_models() {
            let eligible = requirements
                .capabilities
                .iter()
                .all(|cap| model.capabilities.contains(cap));
            if !eligible {
                continue;
            }

            let cache_key = (provider_id.to_string(), model.id.clone());
            let cached = self.cost_cache.read().await.get(&cache_key).copied();
            let cost = match cached {
                Some(cost) => cost,
                None => match provider.estimate_cost(&model.id, PROBE_PROMPT, None).await {
                    Ok(cost) => {
                        self.cost_cache.write().await.insert(cache_key, cost);
                        cost
                    }
                    Err(e) => {
                        tracing::warn!(provider_id, model_id = %model.id, error = %e, "cost estimate failed");
                        continue;
                    }
                },
            };

            min_cost = min_cost.min(cost);
        }

        if min_cost.is_finite() {
            min_cost
        } else {
            DEFAULT_ESTIMATE
        }
    }
}
