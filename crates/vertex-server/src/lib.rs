// Vertex HTTP Server
// Thin axum adapter: every route maps one-to-one to a core operation.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use vertex_optimizer::SleepTimeOptimizer;
use vertex_orchestrator::{BatchController, TaskOrchestrator};
use vertex_providers::ProviderRegistry;
use vertex_resources::ResourceOptimizer;

mod http;

pub use http::router;

/// Feature flags gating whole endpoints.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub features: HashMap<String, bool>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            features: HashMap::from([("advanced_batching".to_string(), true)]),
        }
    }
}

impl ServerConfig {
    pub fn feature_enabled(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }

    pub fn with_feature(mut self, name: &str, enabled: bool) -> Self {
        self.features.insert(name.to_string(), enabled);
        self
    }
}

#[derive(Clone)]
pub struct AppState {
    pub registry: ProviderRegistry,
    pub resources: Arc<ResourceOptimizer>,
    pub orchestrator: TaskOrchestrator,
    pub batches: Arc<BatchController>,
    pub optimizer: SleepTimeOptimizer,
    pub config: ServerConfig,
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "vertex server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
