// Strategy Registry
// Typed registry of strategy capabilities with per-strategy outcome stats.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use vertex_types::{Result, VertexError};

use crate::strategy::{ProblemType, RecursionType, Strategy, StrategyMetadata};

#[derive(Debug, Clone, Copy, Default)]
struct OutcomeStats {
    successes: u64,
    failures: u64,
}

pub struct StrategyRegistry {
    strategies: RwLock<HashMap<String, Arc<dyn Strategy>>>,
    stats: RwLock<HashMap<String, OutcomeStats>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            stats: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, strategy: Arc<dyn Strategy>) -> Result<()> {
        let id = strategy.metadata().id;
        let mut strategies = self.strategies.write().await;
        if strategies.contains_key(&id) {
            return Err(VertexError::AlreadyExists(format!("strategy '{id}'")));
        }
        strategies.insert(id, strategy);
        Ok(())
    }

    pub async fn get(&self, strategy_id: &str) -> Result<Arc<dyn Strategy>> {
        self.strategies
            .read()
            .await
            .get(strategy_id)
            .cloned()
            .ok_or_else(|| VertexError::NotFound(format!("strategy '{strategy_id}'")))
    }

    pub async fn list(
        &self,
        problem_type: Option<ProblemType>,
        recursion_type: Option<RecursionType>,
    ) -> Vec<StrategyMetadata> {
        let mut metadata: Vec<StrategyMetadata> = self
            .strategies
            .read()
            .await
            .values()
            .map(|s| s.metadata())
            .filter(|m| problem_type.map_or(true, |p| m.problem_types.contains(&p)))
            .filter(|m| recursion_type.map_or(true, |r| m.recursion_type == r))
            .collect();
        metadata.sort_by(|a, b| a.id.cmp(&b.id));
        metadata
    }

    pub async fn record_outcome(&self, strategy_id: &str, success: bool) {
        let mut stats = self.stats.write().await;
        let entry = stats.entry(strategy_id.to_string()).or_default();
        if success {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
    }

    /// Historical success rate in [0, 1]; 0.5 before any outcome is known.
    pub async fn success_rate(&self, strategy_id: &str) -> f64 {
        let stats = self.stats.read().await;
        match stats.get(strategy_id) {
            Some(s) if s.successes + s.failures > 0 => {
                s.successes as f64 / (s.successes + s.failures) as f64
            }
            _ => 0.5,
        }
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
