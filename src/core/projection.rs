// src/core/projection.rs — Read-only views over run and iteration state
//
// Everything here is built from a copy of controller state; nothing holds a
// reference into the live structures.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::*;
use crate::evaluator::EvaluationOutcome;
use crate::infra::errors::EvaluatorError;

// ─── Evaluation results ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub skill_id: String,
    pub case_id: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub outcome: Option<EvaluationOutcome>,
    pub error: Option<EvaluatorError>,
}

impl From<&EvaluationTask> for TaskResult {
    fn from(task: &EvaluationTask) -> Self {
        Self {
            task_id: task.id.clone(),
            skill_id: task.skill_id.clone(),
            case_id: task.case_id.clone(),
            status: task.status,
            attempts: task.attempts,
            outcome: task.outcome.clone(),
            error: task.error.clone(),
        }
    }
}

/// Per-skill aggregate, consumed by leaderboards downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSummary {
    pub skill_id: String,
    pub avg_score: Option<f64>,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResults {
    pub progress: RunProgress,
    pub aggregate: Option<EvaluationOutcome>,
    pub skills: Vec<SkillSummary>,
    pub tasks: Vec<TaskResult>,
}

impl RunResults {
    pub fn empty(project_id: &str) -> Self {
        Self {
            progress: RunProgress::idle(project_id),
            aggregate: None,
            skills: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn from_run(run: &EvaluationRun) -> Self {
        let mut order: Vec<&str> = Vec::new();
        let mut by_skill: BTreeMap<&str, Vec<&EvaluationTask>> = BTreeMap::new();
        for task in &run.tasks {
            if !by_skill.contains_key(task.skill_id.as_str()) {
                order.push(&task.skill_id);
            }
            by_skill.entry(&task.skill_id).or_default().push(task);
        }

        let skills = order
            .into_iter()
            .map(|skill_id| {
                let tasks = &by_skill[skill_id];
                let outcomes: Vec<&EvaluationOutcome> =
                    tasks.iter().filter_map(|t| t.outcome.as_ref()).collect();
                SkillSummary {
                    skill_id: skill_id.to_string(),
                    avg_score: EvaluationOutcome::mean(&outcomes).map(|o| o.avg_score),
                    succeeded: outcomes.len(),
                    failed: tasks
                        .iter()
                        .filter(|t| t.status == TaskStatus::Failed)
                        .count(),
                }
            })
            .collect();

        Self {
            progress: run.progress(),
            aggregate: run.aggregate(),
            skills,
            tasks: run.tasks.iter().map(TaskResult::from).collect(),
        }
    }

    pub fn failed_cases(&self) -> Vec<&str> {
        let mut cases: Vec<&str> = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| t.case_id.as_str())
            .collect();
        cases.sort_unstable();
        cases.dedup();
        cases
    }
}

// ─── Iteration views ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationProgress {
    pub project_id: String,
    pub status: IterationStatus,
    pub mode: IterationMode,
    pub current_round: u32,
    pub max_rounds: u32,
    pub best_avg_score: Option<f64>,
    pub best_round: Option<u32>,
    pub plateau_level: u8,
    pub consecutive_plateau: u32,
    pub stop_reason: Option<StopReason>,
}

impl IterationProgress {
    pub fn idle(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            status: IterationStatus::Idle,
            mode: IterationMode::default(),
            current_round: 0,
            max_rounds: 0,
            best_avg_score: None,
            best_round: None,
            plateau_level: 0,
            consecutive_plateau: 0,
            stop_reason: None,
        }
    }

    pub fn from_state(state: &IterationState) -> Self {
        Self {
            project_id: state.project_id.clone(),
            status: state.status,
            mode: state.mode,
            current_round: state.current_round,
            max_rounds: state.params.max_rounds,
            best_avg_score: state.best_score(),
            best_round: state.best.as_ref().map(|b| b.round),
            plateau_level: state.plateau_level,
            consecutive_plateau: state.consecutive_plateau,
            stop_reason: state.stop_reason,
        }
    }
}

/// Summary of a finished (or running) iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationReport {
    pub project_id: String,
    pub iteration_id: String,
    pub status: IterationStatus,
    pub mode: IterationMode,
    pub stop_reason: Option<StopReason>,
    pub rounds: u32,
    pub seed_score: Option<f64>,
    pub best: Option<BestEver>,
    /// Best-ever minus seed score; `None` without a seed score.
    pub total_improvement: Option<f64>,
    /// Winner score per round (`None` for winnerless rounds).
    pub score_trajectory: Vec<Option<f64>>,
    /// Candidates generated per strategy.
    pub strategy_usage: BTreeMap<StrategyTag, usize>,
    pub winnerless_rounds: Vec<u32>,
    pub failed_candidates: usize,
    pub peak_plateau_level: u8,
}

impl IterationReport {
    pub fn from_state(state: &IterationState) -> Self {
        let mut strategy_usage = BTreeMap::new();
        let mut failed_candidates = 0;
        for candidate in state.rounds.iter().flat_map(|r| &r.candidates) {
            *strategy_usage.entry(candidate.strategy).or_insert(0) += 1;
            if !candidate.succeeded() {
                failed_candidates += 1;
            }
        }

        let best = state.best.clone();
        let total_improvement = match (&best, state.seed_score) {
            (Some(b), Some(seed)) => Some(b.avg_score - seed),
            _ => None,
        };

        Self {
            project_id: state.project_id.clone(),
            iteration_id: state.id.clone(),
            status: state.status,
            mode: state.mode,
            stop_reason: state.stop_reason,
            rounds: state.rounds.len() as u32,
            seed_score: state.seed_score,
            best,
            total_improvement,
            score_trajectory: state.rounds.iter().map(|r| r.winner_score()).collect(),
            strategy_usage,
            winnerless_rounds: state
                .rounds
                .iter()
                .filter(|r| r.winner.is_none())
                .map(|r| r.round)
                .collect(),
            failed_candidates,
            peak_plateau_level: state
                .rounds
                .iter()
                .map(|r| r.plateau_level)
                .chain(std::iter::once(state.plateau_level))
                .max()
                .unwrap_or(0),
        }
    }
}

/// Ordered, append-only record of every round and candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationLog {
    pub project_id: String,
    pub iteration_id: Option<String>,
    pub rounds: Vec<Round>,
}

impl ExplorationLog {
    pub fn empty(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            iteration_id: None,
            rounds: Vec::new(),
        }
    }

    pub fn from_state(state: &IterationState) -> Self {
        Self {
            project_id: state.project_id.clone(),
            iteration_id: Some(state.id.clone()),
            rounds: state.rounds.clone(),
        }
    }
}
