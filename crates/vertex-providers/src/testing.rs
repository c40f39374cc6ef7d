//! Scripted in-memory provider for tests and local development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use vertex_types::{ModelCapability, ModelInfo, ProviderInfo, Result, VertexError};

use crate::{Provider, ProviderResponse};

/// Deterministic provider: fixed model list, fixed per-model costs, and an
/// optional failure/latency script for exercising retry and timeout paths.
#[derive(Debug)]
pub struct StaticProvider {
    id: String,
    models: Vec<ModelInfo>,
    costs: HashMap<String, f64>,
    response_text: String,
    failures_remaining: AtomicU32,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl StaticProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            models: Vec::new(),
            costs: HashMap::new(),
            response_text: "ok".to_string(),
            failures_remaining: AtomicU32::new(0),
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_model(mut self, model_id: &str, capabilities: &[ModelCapability], cost: f64) -> Self {
        self.models.push(ModelInfo {
            id: model_id.to_string(),
            display_name: model_id.to_string(),
            capabilities: capabilities.to_vec(),
        });
        self.costs.insert(model_id.to_string(), cost);
        self
    }

    pub fn with_response(mut self, text: impl Into<String>) -> Self {
        self.response_text = text.into();
        self
    }

    /// Fail the first `n` execute calls with a retryable provider error.
    pub fn failing_times(self, n: u32) -> Self {
        self.failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Delay every execute call, for driving timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.id.clone(),
            name: self.id.clone(),
            description: format!("static provider '{}'", self.id),
        }
    }

    fn list_models(&self) -> Vec<ModelInfo> {
        self.models.clone()
    }

    async fn execute(
        &self,
        model_id: &str,
        prompt: &str,
        _params: Option<&Value>,
    ) -> Result<ProviderResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if !self.costs.contains_key(model_id) {
            return Err(VertexError::NotFound(format!(
                "model '{model_id}' on provider '{}'",
                self.id
            )));
        }

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(VertexError::Provider(format!(
                "scripted failure from '{}'",
                self.id
            )));
        }

        Ok(ProviderResponse {
            text: self.response_text.clone(),
            metadata: json!({
                "provider": self.id,
                "model": model_id,
                "prompt_chars": prompt.len(),
            }),
        })
    }

    async fn estimate_cost(
        &self,
        model_id: &str,
        _prompt: &str,
        _params: Option<&Value>,
    ) -> Result<f64> {
        self.costs
            .get(model_id)
            .copied()
            .ok_or_else(|| {
                VertexError::NotFound(format!(
                    "model '{model_id}' on provider '{}'",
                    self.id
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_failures_run_out() {
        let provider = StaticProvider::new("p")
            .with_model("m", &[ModelCapability::TextGeneration], 0.5)
            .failing_times(2);

        assert!(provider.execute("m", "x", None).await.is_err());
        assert!(provider.execute("m", "x", None).await.is_err());
        assert!(provider.execute("m", "x", None).await.is_ok());
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn estimate_cost_is_per_model() {
        let provider = StaticProvider::new("p")
            .with_model("cheap", &[], 0.1)
            .with_model("pricey", &[], 2.0);

        assert_eq!(provider.estimate_cost("cheap", "x", None).await.unwrap(), 0.1);
        assert_eq!(provider.estimate_cost("pricey", "x", None).await.unwrap(), 2.0);
        assert!(provider.estimate_cost("ghost", "x", None).await.is_err());
    }
}
