// Strategy Capability
// A pluggable problem-solving algorithm with a declared recursion shape and
// problem fit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use vertex_types::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecursionType {
    Tail,
    NonTail,
    Tree,
    Mutual,
    DivideAndConquer,
    Backtracking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
    Transformation,
    Search,
    Optimization,
    Generation,
    Analysis,
    Validation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyMetadata {
    pub id: String,
    pub description: String,
    pub recursion_type: RecursionType,
    pub problem_types: Vec<ProblemType>,
    /// Complexity tiers this strategy handles well.
    pub complexity_tiers: Vec<ComplexityTier>,
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn metadata(&self) -> StrategyMetadata;

    async fn process(&self, input: Value, context: &Value) -> Result<Value>;
}
