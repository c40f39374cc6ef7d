// Task Executors
// The executor seam the orchestrator drives, and the default model-backed
// implementation routing tasks to providers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use vertex_providers::{ModelRoleManager, ProviderRegistry};
use vertex_resources::{CostAwareSelector, SelectionRequirements};
use vertex_types::{ModelRole, Result, VertexError};

use crate::types::Task;

/// What one execution attempt produced.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub result: Value,
    pub provider: Option<String>,
    pub model: Option<String>,
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<ExecutionOutcome>;
}

/// Default executor: picks a model for the task and runs its prompt.
///
/// Tasks with explicit capability requirements go through the cost-aware
/// selector; the rest are routed by a role heuristic over the description.
pub struct ModelTaskExecutor {
    registry: ProviderRegistry,
    roles: ModelRoleManager,
    selector: Arc<CostAwareSelector>,
    component_id: String,
}

impl ModelTaskExecutor {
    pub fn new(registry: ProviderRegistry, selector: Arc<CostAwareSelector>) -> Self {
        let roles = ModelRoleManager::new(registry.clone());
        Self {
            registry,
            roles,
            selector,
            component_id: "task-orchestrator".to_string(),
        }
    }

    pub fn with_component_id(mut self, component_id: impl Into<String>) -> Self {
        self.component_id = component_id.into();
        self
    }

    fn role_for_task(task: &Task) -> ModelRole {
        let description = task.description.to_lowercase();
        if description.contains("analyze") {
            ModelRole::Analyzer
        } else if description.contains("generate") {
            ModelRole::Generator
        } else if description.contains("validate") {
            ModelRole::Validator
        } else if description.contains("optimize") {
            ModelRole::Optimizer
        } else {
            ModelRole::Executor
        }
    }

    fn prompt_for_task(task: &Task) -> String {
        let input = serde_json::to_string_pretty(&task.input).unwrap_or_else(|_| "{}".to_string());
        format!(
            "Task: {}\n\nInput:\n{}\n\nPlease execute this task and provide the result.",
            task.description, input
        )
    }

    /// (provider_id, model_id, provider) for a capability-constrained task.
    async fn route_by_capabilities(
        &self,
        task: &Task,
    ) -> Result<(String, String, Arc<dyn vertex_providers::Provider>)> {
        let requirements = SelectionRequirements {
            capabilities: task.required_capabilities.clone(),
            max_cost: None,
        };
        let (provider_id, provider) = self
            .selector
            .select(&self.component_id, &requirements)
            .await?;

        let model = provider
            .list_models()
            .into_iter()
            .find(|m| {
                task.required_capabilities
                    .iter()
                    .all(|cap| m.capabilities.contains(cap))
            })
            .ok_or_else(|| {
                VertexError::NoProvider(format!(
                    "provider '{provider_id}' has no model covering the required capabilities"
                ))
            })?;

        Ok((provider_id, model.id, provider))
    }

    async fn route_by_role(
        &self,
        task: &Task,
    ) -> Result<(String, String, Arc<dyn vertex_providers::Provider>)> {
        let role = Self::role_for_task(task);
        if self.roles.models_for_role(role).await.is_empty() {
            self.roles.auto_assign().await;
        }
        let spec = self.roles.best_model_for_role(role).await?;
        let provider = self.registry.get(&spec.provider_id).await?;
        Ok((spec.provider_id, spec.model_id, provider))
    }
}

#[async_trait]
impl TaskExecutor for ModelTaskExecutor {
    async fn execute(&self, task: &Task) -> Result<ExecutionOutcome> {
        let (provider_id, model_id, provider) = if task.required_capabilities.is_empty() {
            self.route_by_role(task).await?
        } else {
            self.route_by_capabilities(task).await?
        };

        let prompt = Self::prompt_for_task(task);
        tracing::debug!(
            task_id = %task.id,
            provider_id,
            model_id,
            prompt = %vertex_observability::redact_text(&prompt),
            "executing task prompt"
        );

        let response = provider.execute(&model_id, &prompt, None).await?;

        Ok(ExecutionOutcome {
            result: json!({
                "result": response.text,
                "metadata": { "model_metadata": response.metadata },
            }),
            provider: Some(provider_id),
            model: Some(model_id),
        })
    }
}
