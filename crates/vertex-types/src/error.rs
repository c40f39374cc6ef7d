// Vertex Error Types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VertexError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Dependency unsatisfied: {0}")]
    DependencyUnsatisfied(String),

    #[error("Insufficient credits: {0}")]
    InsufficientCredits(String),

    #[error("No provider with required capabilities: {0}")]
    NoProvider(String),

    #[error("No affordable provider: {0}")]
    NoAffordable(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Feature disabled: {0}")]
    FeatureDisabled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VertexError {
    /// Failures the task retry loop absorbs; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VertexError::Provider(_) | VertexError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, VertexError>;
