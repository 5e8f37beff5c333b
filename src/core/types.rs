// src/core/types.rs — Core domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::evaluator::score::ScoreBreakdown;
use crate::evaluator::EvaluationOutcome;
use crate::infra::errors::EvaluatorError;
use crate::project::SkillRef;
use crate::recompose::RetentionRules;

/// Highest plateau tier ("Severe").
pub const MAX_PLATEAU_LEVEL: u8 = 3;

// ─── Evaluation runs ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "succeeded" => Some(TaskStatus::Succeeded),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One (skill, case) pairing to score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationTask {
    pub id: String,
    pub index: usize,
    pub skill_id: String,
    pub case_id: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub outcome: Option<EvaluationOutcome>,
    pub error: Option<EvaluatorError>,
}

impl EvaluationTask {
    pub fn new(index: usize, skill_id: &str, case_id: &str) -> Self {
        Self {
            id: format!("{skill_id}::{case_id}"),
            index,
            skill_id: skill_id.to_string(),
            case_id: case_id.to_string(),
            status: TaskStatus::Pending,
            attempts: 0,
            outcome: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Error,
}

impl RunStatus {
    /// Running and paused runs hold the project.
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::Paused)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(RunStatus::Idle),
            "running" => Some(RunStatus::Running),
            "paused" => Some(RunStatus::Paused),
            "completed" => Some(RunStatus::Completed),
            "error" => Some(RunStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Idle => write!(f, "idle"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Paused => write!(f, "paused"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Error => write!(f, "error"),
        }
    }
}

/// Result of resolving one task attempt sequence.
#[derive(Debug, Clone)]
pub enum TaskResolution {
    Succeeded(EvaluationOutcome),
    Failed(EvaluatorError),
}

/// One execution of a skill×case matrix.
///
/// Mutated only by the run controller. `completed_tasks + failed_tasks`
/// never exceeds the task count and `last_checkpoint` never decreases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRun {
    pub id: String,
    pub project_id: String,
    pub status: RunStatus,
    pub tasks: Vec<EvaluationTask>,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    /// Index of the last task in the contiguous, durably recorded prefix.
    pub last_checkpoint: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl EvaluationRun {
    /// Build the task queue: one task per skill×case pair, skill-major.
    pub fn new(project_id: &str, skill_ids: &[String], case_ids: &[String]) -> Self {
        let mut tasks = Vec::with_capacity(skill_ids.len() * case_ids.len());
        for skill in skill_ids {
            for case in case_ids {
                tasks.push(EvaluationTask::new(tasks.len(), skill, case));
            }
        }
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            status: RunStatus::Running,
            tasks,
            completed_tasks: 0,
            failed_tasks: 0,
            last_checkpoint: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn total_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn resolved_tasks(&self) -> usize {
        self.completed_tasks + self.failed_tasks
    }

    /// True once every task has resolved, regardless of how many failed.
    pub fn all_resolved(&self) -> bool {
        self.resolved_tasks() == self.total_tasks()
    }

    /// Claim the next pending task at or after the checkpoint, marking it running.
    ///
    /// Tasks before the checkpoint are only ever pending after a `retry_case`,
    /// so the scan falls back to the start of the queue.
    pub fn claim_next(&mut self) -> Option<usize> {
        let from = self.last_checkpoint.map(|c| c + 1).unwrap_or(0);
        let idx = (from..self.tasks.len())
            .chain(0..from.min(self.tasks.len()))
            .find(|&i| self.tasks[i].status == TaskStatus::Pending)?;
        self.tasks[idx].status = TaskStatus::Running;
        Some(idx)
    }

    /// Record a resolved task and advance the checkpoint over the resolved prefix.
    ///
    /// Returns false if the task was not in flight (e.g. a late result after stop).
    pub fn record(&mut self, index: usize, attempts: u32, resolution: TaskResolution) -> bool {
        let Some(task) = self.tasks.get_mut(index) else {
            return false;
        };
        if task.status != TaskStatus::Running {
            return false;
        }
        task.attempts += attempts;
        match resolution {
            TaskResolution::Succeeded(outcome) => {
                task.status = TaskStatus::Succeeded;
                task.outcome = Some(outcome);
                task.error = None;
                self.completed_tasks += 1;
            }
            TaskResolution::Failed(error) => {
                task.status = TaskStatus::Failed;
                task.outcome = None;
                task.error = Some(error);
                self.failed_tasks += 1;
            }
        }
        self.advance_checkpoint();
        true
    }

    fn advance_checkpoint(&mut self) {
        let mut next = self.last_checkpoint.map(|c| c + 1).unwrap_or(0);
        while next < self.tasks.len() && self.tasks[next].status.is_resolved() {
            next += 1;
        }
        if next > 0 {
            let candidate = next - 1;
            if self.last_checkpoint.is_none_or(|c| candidate > c) {
                self.last_checkpoint = Some(candidate);
            }
        }
    }

    /// Return failed tasks for `case_id` to the queue.
    ///
    /// Returns the number of tasks re-queued; `failed_tasks` drops by the same amount.
    pub fn requeue_failed_case(&mut self, case_id: &str) -> usize {
        let mut requeued = 0;
        for task in self
            .tasks
            .iter_mut()
            .filter(|t| t.case_id == case_id && t.status == TaskStatus::Failed)
        {
            task.status = TaskStatus::Pending;
            task.error = None;
            requeued += 1;
        }
        self.failed_tasks -= requeued;
        requeued
    }

    /// Tasks interrupted mid-flight (stop or process restart) go back to pending.
    pub fn release_in_flight(&mut self) -> usize {
        let mut released = 0;
        for task in self
            .tasks
            .iter_mut()
            .filter(|t| t.status == TaskStatus::Running)
        {
            task.status = TaskStatus::Pending;
            released += 1;
        }
        released
    }

    pub fn progress(&self) -> RunProgress {
        RunProgress {
            run_id: self.id.clone(),
            project_id: self.project_id.clone(),
            status: self.status,
            total_tasks: self.total_tasks(),
            completed_tasks: self.completed_tasks,
            failed_tasks: self.failed_tasks,
            last_checkpoint: self.last_checkpoint,
        }
    }

    /// Mean outcome over succeeded tasks; `None` if nothing succeeded.
    pub fn aggregate(&self) -> Option<EvaluationOutcome> {
        let outcomes: Vec<&EvaluationOutcome> =
            self.tasks.iter().filter_map(|t| t.outcome.as_ref()).collect();
        EvaluationOutcome::mean(&outcomes)
    }
}

/// Read-only snapshot of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub run_id: String,
    pub project_id: String,
    pub status: RunStatus,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub last_checkpoint: Option<usize>,
}

impl RunProgress {
    pub fn idle(project_id: &str) -> Self {
        Self {
            run_id: String::new(),
            project_id: project_id.to_string(),
            status: RunStatus::Idle,
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            last_checkpoint: None,
        }
    }
}

// ─── Strategies ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationMode {
    #[default]
    Standard,
    Explore,
    Adaptive,
}

impl std::fmt::Display for IterationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IterationMode::Standard => write!(f, "standard"),
            IterationMode::Explore => write!(f, "explore"),
            IterationMode::Adaptive => write!(f, "adaptive"),
        }
    }
}

impl std::str::FromStr for IterationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(IterationMode::Standard),
            "explore" => Ok(IterationMode::Explore),
            "adaptive" => Ok(IterationMode::Adaptive),
            other => Err(format!("unknown iteration mode '{other}'")),
        }
    }
}

/// Candidate-generation directive handed to the recomposer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyTag {
    #[serde(alias = "greedy")]
    Greedy,
    #[serde(alias = "dimension_focus")]
    DimensionFocus,
    #[serde(alias = "segment_explore")]
    SegmentExplore,
    #[serde(alias = "cross_pollinate")]
    CrossPollinate,
    #[serde(alias = "random_subset")]
    RandomSubset,
}

impl StrategyTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyTag::Greedy => "GREEDY",
            StrategyTag::DimensionFocus => "DIMENSION_FOCUS",
            StrategyTag::SegmentExplore => "SEGMENT_EXPLORE",
            StrategyTag::CrossPollinate => "CROSS_POLLINATE",
            StrategyTag::RandomSubset => "RANDOM_SUBSET",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GREEDY" => Some(StrategyTag::Greedy),
            "DIMENSION_FOCUS" => Some(StrategyTag::DimensionFocus),
            "SEGMENT_EXPLORE" => Some(StrategyTag::SegmentExplore),
            "CROSS_POLLINATE" => Some(StrategyTag::CrossPollinate),
            "RANDOM_SUBSET" => Some(StrategyTag::RandomSubset),
            _ => None,
        }
    }

    pub fn is_exploratory(&self) -> bool {
        !matches!(self, StrategyTag::Greedy)
    }
}

impl std::fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Iteration ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    Idle,
    Running,
    Completed,
}

impl IterationStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(IterationStatus::Idle),
            "running" => Some(IterationStatus::Running),
            "completed" => Some(IterationStatus::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for IterationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IterationStatus::Idle => write!(f, "idle"),
            IterationStatus::Running => write!(f, "running"),
            IterationStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxRounds,
    ScoreThresholdReached,
    ManualStop,
}

impl StopReason {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "max_rounds" => Some(StopReason::MaxRounds),
            "score_threshold_reached" => Some(StopReason::ScoreThresholdReached),
            "manual_stop" => Some(StopReason::ManualStop),
            _ => None,
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::MaxRounds => write!(f, "max_rounds"),
            StopReason::ScoreThresholdReached => write!(f, "score_threshold_reached"),
            StopReason::ManualStop => write!(f, "manual_stop"),
        }
    }
}

/// Parameters of `iteration:start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationParams {
    pub seed_skill_id: String,
    pub max_rounds: u32,
    #[serde(default)]
    pub stop_threshold: Option<f64>,
    pub beam_width: usize,
    pub plateau_threshold: f64,
    pub plateau_rounds_before_escape: u32,
    #[serde(default)]
    pub retention_rules: RetentionRules,
    /// Overrides the project's configured mode when set.
    #[serde(default)]
    pub mode: Option<IterationMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateError {
    pub code: String,
    pub message: String,
}

impl From<&EvaluatorError> for CandidateError {
    fn from(e: &EvaluatorError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.message().to_string(),
        }
    }
}

/// One skill variant produced within a round. Never mutated after resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub index: usize,
    pub skill_ref: Option<SkillRef>,
    pub strategy: StrategyTag,
    pub avg_score: Option<f64>,
    pub score_breakdown: Option<ScoreBreakdown>,
    pub error: Option<CandidateError>,
    pub won: bool,
}

impl Candidate {
    pub fn succeeded(&self) -> bool {
        self.avg_score.is_some()
    }
}

/// One resolved pass of the iteration loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub round: u32,
    pub strategy: StrategyTag,
    /// Plateau level in force when the round's strategy was chosen.
    pub plateau_level: u8,
    pub candidates: Vec<Candidate>,
    /// Index into `candidates` of the winner; `None` if every candidate failed.
    pub winner: Option<usize>,
    pub score_delta: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Round {
    pub fn winner(&self) -> Option<&Candidate> {
        self.winner.and_then(|i| self.candidates.get(i))
    }

    pub fn winner_score(&self) -> Option<f64> {
        self.winner().and_then(|c| c.avg_score)
    }
}

/// Highest-scoring skill observed so far. Round 0 is the seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestEver {
    pub skill_ref: SkillRef,
    pub round: u32,
    pub avg_score: f64,
    pub strategy: Option<StrategyTag>,
    #[serde(default)]
    pub score_breakdown: Option<ScoreBreakdown>,
}

/// Per-project iteration state. `rounds` is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationState {
    pub id: String,
    pub project_id: String,
    pub status: IterationStatus,
    pub mode: IterationMode,
    pub params: IterationParams,
    pub current_round: u32,
    pub seed_score: Option<f64>,
    pub best: Option<BestEver>,
    pub plateau_level: u8,
    pub consecutive_plateau: u32,
    pub stop_reason: Option<StopReason>,
    pub rounds: Vec<Round>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl IterationState {
    pub fn new(
        project_id: &str,
        mode: IterationMode,
        params: IterationParams,
        seed: Option<BestEver>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            status: IterationStatus::Running,
            mode,
            params,
            current_round: 0,
            seed_score: seed.as_ref().map(|b| b.avg_score),
            best: seed,
            plateau_level: 0,
            consecutive_plateau: 0,
            stop_reason: None,
            rounds: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best.as_ref().map(|b| b.avg_score)
    }
}

// ─── Notifications ──────────────────────────────────────────────────

/// Compact per-round delta pushed after each round barrier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundDelta {
    pub round: u32,
    pub strategy: StrategyTag,
    pub plateau_level: u8,
    pub winner_score: Option<f64>,
    pub score_delta: Option<f64>,
    pub best_avg_score: Option<f64>,
    pub candidates: usize,
    pub failed_candidates: usize,
}

impl From<&Round> for RoundDelta {
    fn from(round: &Round) -> Self {
        Self {
            round: round.round,
            strategy: round.strategy,
            plateau_level: round.plateau_level,
            winner_score: round.winner_score(),
            score_delta: round.score_delta,
            best_avg_score: None,
            candidates: round.candidates.len(),
            failed_candidates: round.candidates.iter().filter(|c| !c.succeeded()).count(),
        }
    }
}

/// Events pushed to subscribers. Delivery is at-least-once and only
/// eventually consistent with the final state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    TaskResolved {
        project_id: String,
        task_id: String,
        status: TaskStatus,
        progress: RunProgress,
    },
    RunFinished {
        project_id: String,
        progress: RunProgress,
    },
    RoundStarted {
        project_id: String,
        round: u32,
        strategy: StrategyTag,
        plateau_level: u8,
        candidates: usize,
    },
    RoundCompleted {
        project_id: String,
        delta: RoundDelta,
    },
    IterationComplete {
        project_id: String,
        stop_reason: StopReason,
        rounds: u32,
        best: Option<BestEver>,
    },
}

impl ProgressEvent {
    pub fn project_id(&self) -> &str {
        match self {
            ProgressEvent::TaskResolved { project_id, .. }
            | ProgressEvent::RunFinished { project_id, .. }
            | ProgressEvent::RoundStarted { project_id, .. }
            | ProgressEvent::RoundCompleted { project_id, .. }
            | ProgressEvent::IterationComplete { project_id, .. } => project_id,
        }
    }
}
