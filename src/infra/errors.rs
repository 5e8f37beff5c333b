// src/infra/errors.rs — Error types for SkillForge

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SkillForgeError {
    // State errors (rejected at the API boundary, never retried)
    #[error("An {activity} is already running for project '{project_id}'")]
    AlreadyRunning {
        project_id: String,
        activity: String,
    },

    #[error("No {activity} is running for project '{project_id}'")]
    NotRunning {
        project_id: String,
        activity: String,
    },

    #[error("Project '{project_id}' is busy with an active {active}")]
    ResourceBusy { project_id: String, active: String },

    #[error("Seed skill '{skill_id}' could not be resolved")]
    NoSeedSkill { skill_id: String },

    #[error("Case '{case_id}' has no failed task in the current run")]
    CaseNotFailed { case_id: String },

    // User errors
    #[error("Project '{0}' not found")]
    ProjectNotFound(String),

    #[error("Skill '{0}' not found")]
    SkillNotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // Infra
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SkillForgeError {
    /// Stable wire code reported in control-surface envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            SkillForgeError::AlreadyRunning { .. } => "ALREADY_RUNNING",
            SkillForgeError::NotRunning { .. } => "NOT_RUNNING",
            SkillForgeError::ResourceBusy { .. } => "RESOURCE_BUSY",
            SkillForgeError::NoSeedSkill { .. } => "NO_SEED_SKILL",
            SkillForgeError::CaseNotFailed { .. } => "CASE_NOT_FAILED",
            SkillForgeError::ProjectNotFound(_) => "PROJECT_NOT_FOUND",
            SkillForgeError::SkillNotFound(_) => "SKILL_NOT_FOUND",
            SkillForgeError::InvalidParameter(_) => "INVALID_PARAMETER",
            SkillForgeError::Database(_) => "DATABASE_ERROR",
            SkillForgeError::Config(_) => "CONFIG_ERROR",
            SkillForgeError::Io(_) => "IO_ERROR",
            SkillForgeError::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// State errors are caller mistakes about the controller lifecycle.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            SkillForgeError::AlreadyRunning { .. }
                | SkillForgeError::NotRunning { .. }
                | SkillForgeError::ResourceBusy { .. }
                | SkillForgeError::NoSeedSkill { .. }
                | SkillForgeError::CaseNotFailed { .. }
        )
    }

    pub fn already_running(project_id: &str, activity: &str) -> Self {
        SkillForgeError::AlreadyRunning {
            project_id: project_id.to_string(),
            activity: activity.to_string(),
        }
    }

    pub fn not_running(project_id: &str, activity: &str) -> Self {
        SkillForgeError::NotRunning {
            project_id: project_id.to_string(),
            activity: activity.to_string(),
        }
    }
}

/// Failures reported by the external evaluator.
///
/// All variants are eligible for retry; they surface on a task only after
/// the retry budget is spent.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", content = "message", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluatorError {
    #[error("Evaluator not available: {0}")]
    CliNotAvailable(String),

    #[error("Evaluator execution failed: {0}")]
    CliExecutionError(String),

    #[error("Evaluator output could not be parsed: {0}")]
    OutputParseFailed(String),
}

impl EvaluatorError {
    pub fn code(&self) -> &'static str {
        match self {
            EvaluatorError::CliNotAvailable(_) => "CLI_NOT_AVAILABLE",
            EvaluatorError::CliExecutionError(_) => "CLI_EXECUTION_ERROR",
            EvaluatorError::OutputParseFailed(_) => "OUTPUT_PARSE_FAILED",
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            EvaluatorError::CliNotAvailable(_)
                | EvaluatorError::CliExecutionError(_)
                | EvaluatorError::OutputParseFailed(_)
        )
    }

    pub fn message(&self) -> &str {
        match self {
            EvaluatorError::CliNotAvailable(m)
            | EvaluatorError::CliExecutionError(m)
            | EvaluatorError::OutputParseFailed(m) => m,
        }
    }
}
