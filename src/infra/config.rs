// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::strategy::StrategyTable;
use crate::core::types::{IterationMode, IterationParams};
use crate::infra::paths;
use crate::recompose::RetentionRules;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub evaluation: EvaluationConfig,

    #[serde(default)]
    pub evaluator: EvaluatorConfig,

    #[serde(default)]
    pub recompose: RecomposeConfig,

    #[serde(default)]
    pub iteration: IterationConfig,

    /// Plateau level → strategy escalation table.
    #[serde(default)]
    pub strategy: StrategyTable,

    #[serde(default)]
    pub api: ApiConfig,

    /// Project workspace root. Defaults to `$SKILLFORGE_HOME/workspace`.
    #[serde(default)]
    pub workspace: Option<PathBuf>,
}

/// Dispatch settings for an evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub concurrency: usize,
    /// Per-attempt limit; 0 disables the timeout.
    pub timeout_seconds: u64,
    pub retry_count: u32,
    /// Delay before the first retry, doubled on each further retry.
    pub retry_delay_ms: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            timeout_seconds: 300,
            retry_count: 2,
            retry_delay_ms: 1_000,
        }
    }
}

/// Per-project overrides of `[evaluation]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationOverrides {
    pub concurrency: Option<usize>,
    pub timeout_seconds: Option<u64>,
    pub retry_count: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

impl EvaluationOverrides {
    pub fn apply(&self, base: &EvaluationConfig) -> EvaluationConfig {
        EvaluationConfig {
            concurrency: self.concurrency.unwrap_or(base.concurrency).max(1),
            timeout_seconds: self.timeout_seconds.unwrap_or(base.timeout_seconds),
            retry_count: self.retry_count.unwrap_or(base.retry_count),
            retry_delay_ms: self.retry_delay_ms.unwrap_or(base.retry_delay_ms),
        }
    }
}

/// External evaluator process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            command: "skill-eval".into(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecomposeKind {
    #[default]
    Sections,
    Command,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecomposeConfig {
    pub kind: RecomposeKind,
    /// Required when `kind = "command"`.
    pub command: Option<String>,
    pub args: Vec<String>,
    /// Fixed seed for the built-in recomposer; random when unset.
    pub seed: Option<u64>,
}

/// Defaults for `iteration:start` parameters the caller leaves out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationConfig {
    pub mode: IterationMode,
    pub max_rounds: u32,
    pub stop_threshold: Option<f64>,
    pub beam_width: usize,
    pub plateau_threshold: f64,
    pub plateau_rounds_before_escape: u32,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            mode: IterationMode::Standard,
            max_rounds: 5,
            stop_threshold: None,
            beam_width: 3,
            plateau_threshold: 1.0,
            plateau_rounds_before_escape: 2,
        }
    }
}

impl IterationConfig {
    pub fn params(&self, seed_skill_id: &str) -> IterationParams {
        IterationParams {
            seed_skill_id: seed_skill_id.to_string(),
            max_rounds: self.max_rounds,
            stop_threshold: self.stop_threshold,
            beam_width: self.beam_width,
            plateau_threshold: self.plateau_threshold,
            plateau_rounds_before_escape: self.plateau_rounds_before_escape,
            retention_rules: RetentionRules::default(),
            mode: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
    /// Bearer token required on every route except health when set.
    pub token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 7878,
            token: None,
        }
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.evaluation.concurrency == 0 {
            anyhow::bail!("evaluation.concurrency must be at least 1");
        }
        if self.iteration.beam_width == 0 {
            anyhow::bail!("iteration.beam_width must be at least 1");
        }
        if self.recompose.kind == RecomposeKind::Command && self.recompose.command.is_none() {
            anyhow::bail!("recompose.command is required when recompose.kind = \"command\"");
        }
        self.strategy.validate()?;
        Ok(())
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.workspace.clone().unwrap_or_else(paths::workspace_dir)
    }
}
