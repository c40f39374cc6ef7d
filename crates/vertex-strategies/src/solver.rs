// Tiered Solver
// Profile a task, pick a strategy (or pipeline), run it. Also adapts the
// whole framework as an orchestrator executor so tasks can be routed through
// strategies instead of model providers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use vertex_orchestrator::{ExecutionOutcome, Task, TaskExecutor};
use vertex_types::Result;

use crate::analyzer::ProblemAnalyzer;
use crate::executor::StrategyExecutor;
use crate::registry::StrategyRegistry;
use crate::selector::{Selection, StrategySelector};

pub struct TieredSolver {
    registry: Arc<StrategyRegistry>,
    selector: StrategySelector,
    executor: StrategyExecutor,
}

#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub output: Value,
    pub strategy_ids: Vec<String>,
    pub partial: bool,
    pub error: Option<String>,
}

impl TieredSolver {
    pub fn new(registry: Arc<StrategyRegistry>) -> Self {
        Self {
            selector: StrategySelector::new(registry.clone()),
            executor: StrategyExecutor::new(registry.clone()),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<StrategyRegistry> {
        &self.registry
    }

    pub async fn solve(&self, task: &Task) -> Result<SolveOutcome> {
        let profile = ProblemAnalyzer::analyze(task);
        let selection = self.selector.select(&profile).await?;
        let input = Value::Object(task.input.clone());
        let context = json!({
            "task_id": task.id,
            "description": task.description,
            "problem_type": profile.problem_type,
            "complexity": profile.complexity,
        });

        match selection {
            Selection::Single(strategy_id) => {
                let output = self.executor.execute(&strategy_id, input, &context).await?;
                Ok(SolveOutcome {
                    output,
                    strategy_ids: vec![strategy_id],
                    partial: false,
                    error: None,
                })
            }
            Selection::Pipeline(strategy_ids) => {
                let result = self
                    .executor
                    .execute_pipeline(&strategy_ids, input, &context)
                    .await?;
                Ok(SolveOutcome {
                    output: result.output,
                    strategy_ids,
                    partial: result.partial,
                    error: result.error,
                })
            }
        }
    }
}

/// Orchestrator executor backed by strategies rather than model providers.
pub struct StrategyTaskExecutor {
    solver: TieredSolver,
}

impl StrategyTaskExecutor {
    pub fn new(registry: Arc<StrategyRegistry>) -> Self {
        Self {
            solver: TieredSolver::new(registry),
        }
    }
}

#[async_trait]
impl TaskExecutor for StrategyTaskExecutor {
    async fn execute(&self, task: &Task) -> Result<ExecutionOutcome> {
        let outcome = self.solver.solve(task).await?;
        Ok(ExecutionOutcome {
            result: json!({
                "result": outcome.output,
                "metadata": {
                    "strategies": outcome.strategy_ids,
                    "partial": outcome.partial,
                    "error": outcome.error,
                },
            }),
            provider: None,
            model: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{
        ComplexityTier, ProblemType, RecursionType, Strategy, StrategyMetadata,
    };
    use vertex_orchestrator::TaskOrchestrator;
    use vertex_types::VertexError;

    struct Upper;

    #[async_trait]
    impl Strategy for Upper {
        fn metadata(&self) -> StrategyMetadata {
            StrategyMetadata {
                id: "upper".to_string(),
                description: "uppercase every string field".to_string(),
                recursion_type: RecursionType::Tail,
                problem_types: vec![ProblemType::Transformation],
                complexity_tiers: vec![ComplexityTier::Low, ComplexityTier::Medium],
            }
        }

        async fn process(&self, input: Value, _context: &Value) -> Result<Value> {
            match input {
                Value::Object(map) => Ok(Value::Object(
                    map.into_iter()
                        .map(|(k, v)| match v {
                            Value::String(s) => (k, Value::String(s.to_uppercase())),
                            other => (k, other),
                        })
                        .collect(),
                )),
                other => Ok(other),
            }
        }
    }

    struct Broken;

    #[async_trait]
    impl Strategy for Broken {
        fn metadata(&self) -> StrategyMetadata {
            StrategyMetadata {
                id: "broken".to_string(),
                description: "always fails".to_string(),
                recursion_type: RecursionType::Tree,
                problem_types: vec![ProblemType::Transformation],
                complexity_tiers: vec![ComplexityTier::High],
            }
        }

        async fn process(&self, _input: Value, _context: &Value) -> Result<Value> {
            Err(VertexError::Internal("strategy exploded".to_string()))
        }
    }

    #[tokio::test]
    async fn solve_runs_the_selected_strategy() {
        let registry = Arc::new(StrategyRegistry::new());
        registry.register(Arc::new(Upper)).await.unwrap();
        let solver = TieredSolver::new(registry);

        let mut input = serde_json::Map::new();
        input.insert("text".to_string(), json!("hello"));
        let task = Task::new("convert the text").with_input(input);

        let outcome = solver.solve(&task).await.unwrap();
        assert_eq!(outcome.strategy_ids, vec!["upper".to_string()]);
        assert_eq!(outcome.output["text"], "HELLO");
        assert!(!outcome.partial);
    }

    #[tokio::test]
    async fn solve_fails_without_a_matching_strategy() {
        let registry = Arc::new(StrategyRegistry::new());
        registry.register(Arc::new(Upper)).await.unwrap();
        let solver = TieredSolver::new(registry);

        let err = solver
            .solve(&Task::new("search the index"))
            .await
            .unwrap_err();
        assert!(matches!(err, VertexError::NotFound(_)));
    }

    #[tokio::test]
    async fn pipeline_failure_returns_partial_output() {
        let registry = Arc::new(StrategyRegistry::new());
        registry.register(Arc::new(Upper)).await.unwrap();
        registry.register(Arc::new(Broken)).await.unwrap();
        let executor = StrategyExecutor::new(registry);

        let result = executor
            .execute_pipeline(
                &["upper".to_string(), "broken".to_string()],
                json!({"text": "hi"}),
                &json!({}),
            )
            .await
            .unwrap();

        assert!(result.partial);
        assert_eq!(result.completed_stages, 1);
        assert_eq!(result.output["text"], "HI");
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn outcomes_feed_the_selectors_ranking() {
        let registry = Arc::new(StrategyRegistry::new());
        registry.register(Arc::new(Upper)).await.unwrap();
        registry.register(Arc::new(Broken)).await.unwrap();

        // Record a track record that puts "upper" clearly ahead.
        registry.record_outcome("upper", true).await;
        registry.record_outcome("upper", true).await;
        registry.record_outcome("broken", false).await;

        let selector = StrategySelector::new(registry);
        let profile = crate::analyzer::ProblemAnalyzer::analyze(&Task::new("convert it"));
        let selection = selector.select(&profile).await.unwrap();
        assert_eq!(selection, Selection::Single("upper".to_string()));
    }

    #[tokio::test]
    async fn strategy_executor_plugs_into_the_orchestrator() {
        let registry = Arc::new(StrategyRegistry::new());
        registry.register(Arc::new(Upper)).await.unwrap();
        let orchestrator =
            TaskOrchestrator::new(Arc::new(StrategyTaskExecutor::new(registry)));

        let mut input = serde_json::Map::new();
        input.insert("text".to_string(), json!("abc"));
        let task = Task::new("convert payload").with_id("t").with_input(input);
        orchestrator.submit(task).await.unwrap();

        let result = orchestrator.execute("t").await.unwrap();
        assert_eq!(result["result"]["text"], "ABC");
        assert_eq!(result["metadata"]["partial"], false);
    }
}
