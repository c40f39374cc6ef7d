use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use vertex_types::{ModelCapability, ModelRole, ModelSpec, Result, VertexError};

use crate::ProviderRegistry;

/// Tracks which models serve which orchestration roles.
///
/// Roles can be assigned manually or derived from model capabilities via
/// `auto_assign`. Absent historical data, the first model assigned to a role
/// is considered the best one.
#[derive(Clone)]
pub struct ModelRoleManager {
    registry: ProviderRegistry,
    assignments: Arc<RwLock<HashMap<ModelRole, Vec<ModelSpec>>>>,
}

impl ModelRoleManager {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            assignments: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn assign_role(&self, role: ModelRole, provider_id: &str, model_id: &str) {
        let mut assignments = self.assignments.write().await;
        assignments.entry(role).or_default().push(ModelSpec {
            provider_id: provider_id.to_string(),
            model_id: model_id.to_string(),
        });
    }

    pub async fn models_for_role(&self, role: ModelRole) -> Vec<ModelSpec> {
        self.assignments
            .read()
            .await
            .get(&role)
            .cloned()
            .unwrap_or_default()
    }

    /// Rebuild all assignments from the current registry contents.
    pub async fn auto_assign(&self) {
        let mut fresh: HashMap<ModelRole, Vec<ModelSpec>> = HashMap::new();

        for (provider_id, provider) in self.registry.snapshot().await {
            for model in provider.list_models() {
                let caps = &model.capabilities;
                let mut push = |role: ModelRole, map: &mut HashMap<ModelRole, Vec<ModelSpec>>| {
                    map.entry(role).or_default().push(ModelSpec {
                        provider_id: provider_id.clone(),
                        model_id: model.id.clone(),
                    });
                };

                if caps.contains(&ModelCapability::CodeGeneration) {
                    push(ModelRole::Executor, &mut fresh);
                }
                if caps.contains(&ModelCapability::Summarization) {
                    push(ModelRole::Analyzer, &mut fresh);
                }
                if caps.contains(&ModelCapability::TextGeneration) {
                    push(ModelRole::Generator, &mut fresh);
                }
                // Versatile models can coordinate other models.
                if caps.len() >= 3 {
                    push(ModelRole::Orchestrator, &mut fresh);
                }
            }
        }

        *self.assignments.write().await = fresh;
    }

    pub async fn best_model_for_role(&self, role: ModelRole) -> Result<ModelSpec> {
        self.models_for_role(role)
            .await
            .into_iter()
            .next()
            .ok_or_else(|| VertexError::NoProvider(format!("no models assigned to role {role:?}")))
    }
}
