use serde::{Deserialize, Serialize};

/// Capability tag exposed by a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCapability {
    TextGeneration,
    CodeGeneration,
    Summarization,
    Translation,
    Classification,
    QuestionAnswering,
    ImageGeneration,
    AudioGeneration,
    Multimodal,
}

impl ModelCapability {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelCapability::TextGeneration => "text_generation",
            ModelCapability::CodeGeneration => "code_generation",
            ModelCapability::Summarization => "summarization",
            ModelCapability::Translation => "translation",
            ModelCapability::Classification => "classification",
            ModelCapability::QuestionAnswering => "question_answering",
            ModelCapability::ImageGeneration => "image_generation",
            ModelCapability::AudioGeneration => "audio_generation",
            ModelCapability::Multimodal => "multimodal",
        }
    }
}

impl std::str::FromStr for ModelCapability {
    type Err = crate::VertexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text_generation" => Ok(ModelCapability::TextGeneration),
            "code_generation" => Ok(ModelCapability::CodeGeneration),
            "summarization" => Ok(ModelCapability::Summarization),
            "translation" => Ok(ModelCapability::Translation),
            "classification" => Ok(ModelCapability::Classification),
            "question_answering" => Ok(ModelCapability::QuestionAnswering),
            "image_generation" => Ok(ModelCapability::ImageGeneration),
            "audio_generation" => Ok(ModelCapability::AudioGeneration),
            "multimodal" => Ok(ModelCapability::Multimodal),
            other => Err(crate::VertexError::InvalidInput(format!(
                "unknown capability: {other}"
            ))),
        }
    }
}

/// Role a model plays when the orchestrator routes work to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    Orchestrator,
    Executor,
    Analyzer,
    Generator,
    Validator,
    Optimizer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub provider_id: String,
    pub model_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub capabilities: Vec<ModelCapability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}
