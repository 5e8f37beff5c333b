// src/api/types.rs

use serde::{Deserialize, Serialize};

use crate::core::types::{IterationMode, IterationParams};
use crate::infra::config::IterationConfig;
use crate::infra::errors::SkillForgeError;
use crate::recompose::RetentionRules;

/// Structured failure carried by every envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl From<&SkillForgeError> for ApiError {
    fn from(e: &SkillForgeError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// Success/failure envelope returned by every control-surface route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// Body of `POST .../iteration/start`. Omitted fields take the configured defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationStartRequest {
    pub seed_skill_id: String,
    #[serde(default)]
    pub max_rounds: Option<u32>,
    #[serde(default)]
    pub stop_threshold: Option<f64>,
    #[serde(default)]
    pub beam_width: Option<usize>,
    #[serde(default)]
    pub plateau_threshold: Option<f64>,
    #[serde(default)]
    pub plateau_rounds_before_escape: Option<u32>,
    #[serde(default)]
    pub retention_rules: RetentionRules,
    #[serde(default)]
    pub mode: Option<IterationMode>,
}

impl IterationStartRequest {
    pub fn into_params(self, defaults: &IterationConfig) -> IterationParams {
        let mut params = defaults.params(&self.seed_skill_id);
        if let Some(v) = self.max_rounds {
            params.max_rounds = v;
        }
        if self.stop_threshold.is_some() {
            params.stop_threshold = self.stop_threshold;
        }
        if let Some(v) = self.beam_width {
            params.beam_width = v;
        }
        if let Some(v) = self.plateau_threshold {
            params.plateau_threshold = v;
        }
        if let Some(v) = self.plateau_rounds_before_escape {
            params.plateau_rounds_before_escape = v;
        }
        params.retention_rules = self.retention_rules;
        params.mode = self.mode;
        params
    }
}
