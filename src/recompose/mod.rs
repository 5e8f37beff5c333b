// src/recompose/mod.rs — Candidate generation collaborators
//
// A recomposer turns the current best skill plus a strategy directive into a
// new candidate document. The iteration controller never looks inside.

pub mod command;
pub mod sections;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::types::StrategyTag;
use crate::evaluator::score::ScoreBreakdown;
use crate::project::{AdvantageSegment, SkillDocument};

pub use command::CommandRecomposer;
pub use sections::SectionRecomposer;

/// Constraints on what a recomposer may change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetentionRules {
    /// Section headings (case-insensitive) that are never removed or replaced.
    #[serde(default)]
    pub keep_sections: Vec<String>,
    /// Upper bound on sections added, removed or replaced per candidate.
    #[serde(default)]
    pub max_changes: Option<usize>,
}

impl RetentionRules {
    pub fn retains(&self, heading: &str) -> bool {
        let heading = heading.trim();
        self.keep_sections
            .iter()
            .any(|k| k.trim().eq_ignore_ascii_case(heading))
    }

    pub fn change_budget(&self) -> usize {
        self.max_changes.unwrap_or(usize::MAX)
    }
}

/// Everything handed to a recomposer for one candidate.
#[derive(Debug, Clone, Serialize)]
pub struct RecomposeRequest<'a> {
    pub base: &'a SkillDocument,
    pub strategy: StrategyTag,
    pub retention: &'a RetentionRules,
    /// Breakdown of the base skill's latest evaluation, when known.
    pub breakdown: Option<&'a ScoreBreakdown>,
    pub segments: &'a [AdvantageSegment],
    pub round: u32,
    /// Position of the candidate within its round's beam.
    pub variant: usize,
}

#[async_trait]
pub trait Recomposer: Send + Sync {
    /// Produce the content of a new candidate skill.
    async fn generate(&self, request: &RecomposeRequest<'_>) -> anyhow::Result<String>;
}
