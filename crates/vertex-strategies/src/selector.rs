// Strategy Selector
// Ranks registered strategies against a problem profile and, for large
// complex problems, composes a short pipeline of distinct recursion shapes.

use std::collections::HashSet;
use std::sync::Arc;

use vertex_types::{Result, VertexError};

use crate::analyzer::ProblemProfile;
use crate::registry::StrategyRegistry;
use crate::strategy::ComplexityTier;

/// Input size beyond which a high-complexity profile gets a pipeline.
const PIPELINE_SIZE_THRESHOLD: usize = 10_000;
const MAX_PIPELINE_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Single(String),
    Pipeline(Vec<String>),
}

pub struct StrategySelector {
    registry: Arc<StrategyRegistry>,
}

impl StrategySelector {
    pub fn new(registry: Arc<StrategyRegistry>) -> Self {
        Self { registry }
    }

    pub async fn select(&self, profile: &ProblemProfile) -> Result<Selection> {
        let candidates = self.registry.list(Some(profile.problem_type), None).await;
        if candidates.is_empty() {
            return Err(VertexError::NotFound(format!(
                "no strategy supports problem type {:?}",
                profile.problem_type
            )));
        }

        let mut scored = Vec::with_capacity(candidates.len());
        for metadata in candidates {
            // Type match is a given (the list is pre-filtered); complexity
            // fit and track record break the ties.
            let mut score = 2.0;
            if metadata.complexity_tiers.contains(&profile.complexity) {
                score += 1.0;
            }
            score += self.registry.success_rate(&metadata.id).await;
            scored.push((metadata, score));
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let needs_pipeline = profile.complexity == ComplexityTier::High
            && profile.input_size > PIPELINE_SIZE_THRESHOLD;
        if !needs_pipeline {
            return Ok(Selection::Single(scored[0].0.id.clone()));
        }

        let mut pipeline = Vec::new();
        let mut recursion_types = HashSet::new();
        for (metadata, _) in &scored {
            if pipeline.len() >= MAX_PIPELINE_LEN {
                break;
            }
            if recursion_types.insert(metadata.recursion_type) {
                pipeline.push(metadata.id.clone());
            }
        }

        if pipeline.len() < 2 {
            Ok(Selection::Single(scored[0].0.id.clone()))
        } else {
            Ok(Selection::Pipeline(pipeline))
        }
    }
}
