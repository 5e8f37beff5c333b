// tests/common/mod.rs — Shared fixtures: in-memory catalog, scripted collaborators

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Semaphore};

use skillforge::core::types::{IterationMode, ProgressEvent};
use skillforge::evaluator::score::ScoreBreakdown;
use skillforge::evaluator::{EvaluationOutcome, Evaluator};
use skillforge::infra::config::EvaluationConfig;
use skillforge::infra::errors::EvaluatorError;
use skillforge::project::{BaselineCase, MemoryCatalog, ProjectSpec, SkillRef};
use skillforge::recompose::{RecomposeRequest, Recomposer};

pub fn settings(concurrency: usize, retry_count: u32) -> EvaluationConfig {
    EvaluationConfig {
        concurrency,
        timeout_seconds: 0,
        retry_count,
        retry_delay_ms: 0,
    }
}

pub fn outcome(score: f64) -> EvaluationOutcome {
    EvaluationOutcome {
        avg_score: score,
        score_breakdown: ScoreBreakdown::uniform(score),
        completed_cases: 1,
        failed_cases: 0,
    }
}

/// A catalog holding one project whose skills' content is `"<id> body"`.
pub fn catalog(
    project_id: &str,
    skills: &[(&str, Option<f64>)],
    cases: &[&str],
    evaluation: EvaluationConfig,
    mode: IterationMode,
) -> Arc<MemoryCatalog> {
    let catalog = MemoryCatalog::new();
    let refs: Vec<SkillRef> = skills
        .iter()
        .map(|(id, score)| catalog.insert_skill(id, &format!("{id} body"), *score))
        .collect();
    catalog.insert_project(ProjectSpec {
        id: project_id.to_string(),
        name: project_id.to_string(),
        skills: refs,
        cases: cases
            .iter()
            .map(|c| BaselineCase {
                id: c.to_string(),
                input: format!("input for {c}"),
                expected: String::new(),
            })
            .collect(),
        evaluation,
        mode,
    });
    Arc::new(catalog)
}

// ─── Evaluators ─────────────────────────────────────────────────────────────

/// Records every call; fails listed cases; optionally waits on a gate.
#[derive(Default)]
pub struct Scripted {
    pub calls: Mutex<Vec<(String, String)>>,
    pub failing: Mutex<HashSet<String>>,
    pub gate: Option<Arc<Semaphore>>,
    pub delay: Option<Duration>,
    pub score: f64,
}

impl Scripted {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            ..Self::default()
        }
    }

    pub fn gated(score: f64, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(score)
        }
    }

    pub fn fail_case(&self, case_id: &str) {
        self.failing.lock().unwrap().insert(case_id.to_string());
    }

    pub fn heal_case(&self, case_id: &str) {
        self.failing.lock().unwrap().remove(case_id);
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for_case(&self, case_id: &str) -> usize {
        self.calls().iter().filter(|(_, c)| c == case_id).count()
    }
}

#[async_trait]
impl Evaluator for Scripted {
    async fn evaluate(
        &self,
        skill_content: &str,
        cases: &[BaselineCase],
    ) -> Result<EvaluationOutcome, EvaluatorError> {
        let case_id = cases.first().map(|c| c.id.clone()).unwrap_or_default();
        self.calls
            .lock()
            .unwrap()
            .push((skill_content.to_string(), case_id.clone()));
        if let Some(ref gate) = self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&case_id) {
            return Err(EvaluatorError::CliExecutionError(format!("{case_id} crashed")));
        }
        Ok(outcome(self.score))
    }
}

/// Scores a candidate by looking its content up in a script.
///
/// Content not in the script fails with `OUTPUT_PARSE_FAILED`.
pub struct ByContent {
    pub scores: Vec<(String, f64)>,
    pub gate: Option<Arc<Semaphore>>,
}

impl ByContent {
    pub fn new(scores: &[(&str, f64)]) -> Self {
        Self {
            scores: scores.iter().map(|(c, s)| (c.to_string(), *s)).collect(),
            gate: None,
        }
    }
}

#[async_trait]
impl Evaluator for ByContent {
    async fn evaluate(
        &self,
        skill_content: &str,
        _cases: &[BaselineCase],
    ) -> Result<EvaluationOutcome, EvaluatorError> {
        if let Some(ref gate) = self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.scores
            .iter()
            .find(|(c, _)| c == skill_content)
            .map(|(_, s)| outcome(*s))
            .ok_or_else(|| EvaluatorError::OutputParseFailed(format!("unscored: {skill_content}")))
    }
}

/// Panics on every call.
pub struct Panicking;

#[async_trait]
impl Evaluator for Panicking {
    async fn evaluate(
        &self,
        _skill_content: &str,
        _cases: &[BaselineCase],
    ) -> Result<EvaluationOutcome, EvaluatorError> {
        panic!("evaluator bug")
    }
}

// ─── Recomposers ────────────────────────────────────────────────────────────

/// Emits `"r<round>c<variant>"`, or fails for listed rounds.
#[derive(Default)]
pub struct Labeling {
    pub failing_rounds: Vec<u32>,
    pub requests: Mutex<Vec<(u32, usize, String)>>,
}

impl Labeling {
    pub fn failing(rounds: &[u32]) -> Self {
        Self {
            failing_rounds: rounds.to_vec(),
            ..Self::default()
        }
    }

    /// (round, variant, base skill id) per request, in arrival order.
    pub fn requests(&self) -> Vec<(u32, usize, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Recomposer for Labeling {
    async fn generate(&self, request: &RecomposeRequest<'_>) -> anyhow::Result<String> {
        self.requests.lock().unwrap().push((
            request.round,
            request.variant,
            request.base.skill_ref.as_str().to_string(),
        ));
        if self.failing_rounds.contains(&request.round) {
            anyhow::bail!("no edit applies in round {}", request.round);
        }
        Ok(format!("r{}c{}", request.round, request.variant))
    }
}

/// Panics on every request.
pub struct PanickingRecomposer;

#[async_trait]
impl Recomposer for PanickingRecomposer {
    async fn generate(&self, _request: &RecomposeRequest<'_>) -> anyhow::Result<String> {
        panic!("recomposer bug")
    }
}

// ─── Events ─────────────────────────────────────────────────────────────────

/// Receive until `pred` matches, failing the test after five seconds.
pub async fn next_matching(
    rx: &mut broadcast::Receiver<ProgressEvent>,
    pred: impl Fn(&ProgressEvent) -> bool,
) -> ProgressEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
