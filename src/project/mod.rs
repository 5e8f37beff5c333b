// src/project/mod.rs — Project, skill and baseline collaborators
//
// The controllers only see projects through `ProjectCatalog`. Metadata CRUD,
// content storage and analysis live behind it.

pub mod frontmatter;
pub mod fs;
pub mod memory;

use serde::{Deserialize, Serialize};

use crate::core::types::{IterationMode, StrategyTag};
use crate::evaluator::score::Dimension;
use crate::infra::config::EvaluationConfig;

pub use fs::FsCatalog;
pub use memory::MemoryCatalog;

/// Reference to a skill document owned by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkillRef(pub String);

impl SkillRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SkillRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One input/expected-output pair within a baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineCase {
    pub id: String,
    pub input: String,
    #[serde(default)]
    pub expected: String,
}

/// A resolved skill document.
#[derive(Debug, Clone, Serialize)]
pub struct SkillDocument {
    pub skill_ref: SkillRef,
    pub name: String,
    /// Instruction text handed to the evaluator (frontmatter stripped).
    pub content: String,
    pub last_score: Option<f64>,
}

/// A portion of a skill identified by analysis as lifting one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvantageSegment {
    pub source_skill: SkillRef,
    pub dimension: Dimension,
    pub heading: String,
    pub content: String,
    #[serde(default)]
    pub gain: f64,
}

/// Everything a controller needs to know about a project.
#[derive(Debug, Clone)]
pub struct ProjectSpec {
    pub id: String,
    pub name: String,
    pub skills: Vec<SkillRef>,
    pub cases: Vec<BaselineCase>,
    pub evaluation: EvaluationConfig,
    pub mode: IterationMode,
}

impl ProjectSpec {
    pub fn case_ids(&self) -> Vec<String> {
        self.cases.iter().map(|c| c.id.clone()).collect()
    }

    pub fn skill_ids(&self) -> Vec<String> {
        self.skills.iter().map(|s| s.0.clone()).collect()
    }
}

/// A generated candidate to be stored before evaluation.
#[derive(Debug, Clone)]
pub struct CandidateDraft<'a> {
    pub parent: &'a SkillRef,
    pub round: u32,
    pub index: usize,
    pub strategy: StrategyTag,
    pub content: &'a str,
}

/// Storage and metadata collaborator.
pub trait ProjectCatalog: Send + Sync {
    fn project(&self, project_id: &str) -> anyhow::Result<Option<ProjectSpec>>;

    fn skill(&self, skill_ref: &SkillRef) -> anyhow::Result<Option<SkillDocument>>;

    /// Persist a candidate document and return its reference.
    fn save_candidate(
        &self,
        project_id: &str,
        draft: &CandidateDraft<'_>,
    ) -> anyhow::Result<SkillRef>;

    /// Remember the latest score for a skill (seeds later iterations).
    fn record_score(&self, skill_ref: &SkillRef, score: f64) -> anyhow::Result<()>;

    /// Advantage segments produced by the analysis step, if any.
    fn segments(&self, project_id: &str) -> anyhow::Result<Vec<AdvantageSegment>>;
}

/// Identifier for a stored candidate.
pub fn candidate_id(project_id: &str, round: u32, index: usize) -> String {
    format!("{}-r{:03}-c{}", slug::slugify(project_id), round, index)
}
