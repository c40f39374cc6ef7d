use std::collections::HashMap;

use serde_json::Value;

use vertex_types::{ModelCapability, Result, VertexError};

use crate::Provider;

/// Prompt template with `{placeholder}` substitution and optional
/// per-model variants.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub template_id: String,
    pub template_text: String,
    pub required_capabilities: Vec<ModelCapability>,
    variants: HashMap<String, String>,
}

impl PromptTemplate {
    pub fn new(
        template_id: impl Into<String>,
        template_text: impl Into<String>,
        required_capabilities: Vec<ModelCapability>,
    ) -> Self {
        Self {
            template_id: template_id.into(),
            template_text: template_text.into(),
            required_capabilities,
            variants: HashMap::new(),
        }
    }

    pub fn with_variant(mut self, model_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.variants.insert(model_id.into(), text.into());
        self
    }

    /// Render for a model, failing when the model lacks a required capability.
    pub fn render(
        &self,
        model_id: &str,
        provider: &dyn Provider,
        parameters: &HashMap<String, Value>,
    ) -> Result<String> {
        let model_capabilities = provider.capabilities(model_id);
        for required in &self.required_capabilities {
            if !model_capabilities.contains(required) {
                return Err(VertexError::InvalidInput(format!(
                    "model '{model_id}' lacks required capability {}",
                    required.as_str()
                )));
            }
        }

        let mut rendered = self
            .variants
            .get(model_id)
            .unwrap_or(&self.template_text)
            .clone();

        for (key, value) in parameters {
            let placeholder = format!("{{{key}}}");
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&placeholder, &text);
        }

        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticProvider;

    #[test]
    fn render_substitutes_placeholders() {
        let provider = StaticProvider::new("p").with_model(
            "m",
            &[ModelCapability::TextGeneration],
            0.1,
        );
        let template = PromptTemplate::new(
            "greet",
            "Summarize {topic} in {count} words.",
            vec![ModelCapability::TextGeneration],
        );

        let mut params = HashMap::new();
        params.insert("topic".to_string(), Value::String("rust".to_string()));
        params.insert("count".to_string(), Value::from(10));

        let rendered = template.render("m", &provider, &params).unwrap();
        assert_eq!(rendered, "Summarize rust in 10 words.");
    }

    #[test]
    fn render_rejects_missing_capability() {
        let provider = StaticProvider::new("p").with_model(
            "m",
            &[ModelCapability::TextGeneration],
            0.1,
        );
        let template = PromptTemplate::new("code", "{x}", vec![ModelCapability::CodeGeneration]);
        let err = template.render("m", &provider, &HashMap::new()).unwrap_err();
        assert!(matches!(err, VertexError::InvalidInput(_)));
    }

    #[test]
    fn render_prefers_model_variant() {
        let provider = StaticProvider::new("p").with_model("m", &[], 0.1);
        let template = PromptTemplate::new("t", "base {x}", vec![])
            .with_variant("m", "variant {x}");

        let mut params = HashMap::new();
        params.insert("x".to_string(), Value::String("1".to_string()));
        assert_eq!(template.render("m", &provider, &params).unwrap(), "variant 1");
    }
}
