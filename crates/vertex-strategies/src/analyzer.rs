// Problem Analyzer
// Derives a problem profile from a task: type via description keywords,
// size from the serialized payload, complexity from type-specific
// thresholds.

use serde::Serialize;

use vertex_orchestrator::Task;

use crate::strategy::{ComplexityTier, ProblemType};

#[derive(Debug, Clone, Serialize)]
pub struct ProblemProfile {
    pub problem_type: ProblemType,
    pub input_size: usize,
    pub complexity: ComplexityTier,
}

pub struct ProblemAnalyzer;

impl ProblemAnalyzer {
    pub fn analyze(task: &Task) -> ProblemProfile {
        let problem_type = Self::problem_type(&task.description);
        let input_size = serde_json::to_string(&task.input)
            .map(|s| s.len())
            .unwrap_or(0);
        let complexity = Self::complexity(problem_type, input_size);

        ProblemProfile {
            problem_type,
            input_size,
            complexity,
        }
    }

    fn problem_type(description: &str) -> ProblemType {
        let text = description.to_lowercase();
        if text.contains("search") || text.contains("find") || text.contains("locate") {
            ProblemType::Search
        } else if text.contains("optimiz") {
            ProblemType::Optimization
        } else if text.contains("generat") || text.contains("create") {
            ProblemType::Generation
        } else if text.contains("analy") {
            ProblemType::Analysis
        } else if text.contains("validat") || text.contains("verify") || text.contains("check") {
            ProblemType::Validation
        } else {
            ProblemType::Transformation
        }
    }

    // Search and optimization blow up faster with input size, so their
    // thresholds sit lower.
    fn complexity(problem_type: ProblemType, input_size: usize) -> ComplexityTier {
        let (low_cap, medium_cap) = match problem_type {
            ProblemType::Search | ProblemType::Optimization => (500, 50_000),
            _ => (1_000, 100_000),
        };

        if input_size < low_cap {
            ComplexityTier::Low
        } else if input_size < medium_cap {
            ComplexityTier::Medium
        } else {
            ComplexityTier::High
        }
    }
}
