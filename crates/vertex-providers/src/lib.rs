use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use vertex_types::{ModelCapability, ModelInfo, ProviderInfo, Result, VertexError};

pub mod roles;
pub mod template;
pub mod testing;

pub use roles::ModelRoleManager;
pub use template::PromptTemplate;

/// Response returned by a provider for a single prompt execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub text: String,
    #[serde(default)]
    pub metadata: Value,
}

/// External model provider capability.
///
/// Metadata accessors are synchronous snapshots; `execute` and
/// `estimate_cost` may go over the network and are async.
#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug {
    fn info(&self) -> ProviderInfo;

    fn list_models(&self) -> Vec<ModelInfo>;

    fn capabilities(&self, model_id: &str) -> Vec<ModelCapability> {
        self.list_models()
            .into_iter()
            .find(|m| m.id == model_id)
            .map(|m| m.capabilities)
            .unwrap_or_default()
    }

    async fn execute(
        &self,
        model_id: &str,
        prompt: &str,
        params: Option<&Value>,
    ) -> Result<ProviderResponse>;

    /// Estimated cost in credits; never negative.
    async fn estimate_cost(
        &self,
        model_id: &str,
        prompt: &str,
        params: Option<&Value>,
    ) -> Result<f64>;
}

/// Registry mapping provider ids to provider handles, with capability lookup.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Arc<RwLock<HashMap<String, Arc<dyn Provider>>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a provider. Duplicate ids are rejected.
    pub async fn register(&self, provider_id: &str, provider: Arc<dyn Provider>) -> Result<()> {
        let mut providers = self.providers.write().await;
        if providers.contains_key(provider_id) {
            return Err(VertexError::AlreadyExists(format!(
                "provider '{provider_id}' is already registered"
            )));
        }
        tracing::info!(provider_id, "registered provider");
        providers.insert(provider_id.to_string(), provider);
        Ok(())
    }

    pub async fn get(&self, provider_id: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .read()
            .await
            .get(provider_id)
            .cloned()
            .ok_or_else(|| VertexError::NotFound(format!("provider '{provider_id}'")))
    }

    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Point-in-time snapshot of all registered providers.
    pub async fn snapshot(&self) -> Vec<(String, Arc<dyn Provider>)> {
        let mut entries: Vec<(String, Arc<dyn Provider>)> = self
            .providers
            .read()
            .await
            .iter()
            .map(|(id, p)| (id.clone(), p.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Providers having at least one model that exposes `capability`.
    pub async fn find_by_capability(&self, capability: ModelCapability) -> Vec<String> {
        let mut matching = Vec::new();
        for (provider_id, provider) in self.snapshot().await {
            let has = provider
                .list_models()
                .iter()
                .any(|m| m.capabilities.contains(&capability));
            if has {
                matching.push(provider_id);
            }
        }
        matching
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
