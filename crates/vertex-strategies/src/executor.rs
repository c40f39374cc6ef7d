// Strategy Executor
// Runs one strategy or pipes several sequentially; records outcomes for the
// selector's historical scoring. A mid-pipeline failure yields the partial
// output with a flag instead of discarding completed stages.

use std::sync::Arc;

use serde_json::Value;

use vertex_types::Result;

use crate::registry::StrategyRegistry;

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub output: Value,
    pub completed_stages: usize,
    pub partial: bool,
    pub error: Option<String>,
}

pub struct StrategyExecutor {
    registry: Arc<StrategyRegistry>,
}

impl StrategyExecutor {
    pub fn new(registry: Arc<StrategyRegistry>) -> Self {
        Self { registry }
    }

    pub async fn execute(
        &self,
        strategy_id: &str,
        input: Value,
        context: &Value,
    ) -> Result<Value> {
        let strategy = self.registry.get(strategy_id).await?;
        let outcome = strategy.process(input, context).await;
        self.registry
            .record_outcome(strategy_id, outcome.is_ok())
            .await;
        outcome
    }

    pub async fn execute_pipeline(
        &self,
        strategy_ids: &[String],
        input: Value,
        context: &Value,
    ) -> Result<PipelineResult> {
        let mut current = input;
        for (stage, strategy_id) in strategy_ids.iter().enumerate() {
            match self.execute(strategy_id, current.clone(), context).await {
                Ok(output) => current = output,
                Err(e) => {
                    tracing::warn!(strategy_id, stage, error = %e, "pipeline stage failed");
                    return Ok(PipelineResult {
                        output: current,
                        completed_stages: stage,
                        partial: true,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(PipelineResult {
            output: current,
            completed_stages: strategy_ids.len(),
            partial: false,
            error: None,
        })
    }
}
