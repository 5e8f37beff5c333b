// src/evaluator/mod.rs — Evaluator contract

pub mod command;
pub mod parser;
pub mod score;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::infra::errors::EvaluatorError;
use crate::project::BaselineCase;
use score::ScoreBreakdown;

pub use command::CommandEvaluator;

/// Scored result of evaluating a skill against a set of baseline cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub avg_score: f64,
    pub score_breakdown: ScoreBreakdown,
    #[serde(default)]
    pub completed_cases: u32,
    #[serde(default)]
    pub failed_cases: u32,
}

impl EvaluationOutcome {
    /// Average scores and breakdowns; case counts are summed.
    pub fn mean(outcomes: &[&EvaluationOutcome]) -> Option<EvaluationOutcome> {
        if outcomes.is_empty() {
            return None;
        }
        let breakdowns: Vec<&ScoreBreakdown> =
            outcomes.iter().map(|o| &o.score_breakdown).collect();
        Some(EvaluationOutcome {
            avg_score: outcomes.iter().map(|o| o.avg_score).sum::<f64>() / outcomes.len() as f64,
            score_breakdown: ScoreBreakdown::mean(&breakdowns).unwrap_or_default(),
            completed_cases: outcomes.iter().map(|o| o.completed_cases).sum(),
            failed_cases: outcomes.iter().map(|o| o.failed_cases).sum(),
        })
    }
}

/// The external scoring process. The core never inspects how a score was produced.
///
/// Implementations should be cancel-safe: dropping the returned future must
/// abandon (or kill) the underlying work.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        skill_content: &str,
        cases: &[BaselineCase],
    ) -> Result<EvaluationOutcome, EvaluatorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_sums_case_counts() {
        let a = EvaluationOutcome {
            avg_score: 50.0,
            score_breakdown: ScoreBreakdown::uniform(50.0),
            completed_cases: 2,
            failed_cases: 1,
        };
        let b = EvaluationOutcome {
            avg_score: 90.0,
            score_breakdown: ScoreBreakdown::uniform(90.0),
            completed_cases: 3,
            failed_cases: 0,
        };
        let m = EvaluationOutcome::mean(&[&a, &b]).unwrap();
        assert!((m.avg_score - 70.0).abs() < 1e-9);
        assert_eq!(m.completed_cases, 5);
        assert_eq!(m.failed_cases, 1);
    }

    #[test]
    fn test_mean_empty() {
        assert!(EvaluationOutcome::mean(&[]).is_none());
    }
}
