// src/core/iteration.rs — Iteration controller (beam search over skill variants)
//
// Rounds are a strict barrier: round N+1's candidates are generated only after
// every candidate of round N has resolved. The loop task owns the
// IterationState; readers see the last published copy.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use super::leases::{Activity, ProjectLease, ProjectLeases};
use super::plateau::PlateauTracker;
use super::projection::{ExplorationLog, IterationProgress, IterationReport};
use super::run_controller::EvaluationRunController;
use super::strategy::{self, AvailableSegments, StrategyTable};
use super::types::*;
use crate::evaluator::score::ScoreBreakdown;
use crate::infra::errors::SkillForgeError;
use crate::project::{
    AdvantageSegment, CandidateDraft, ProjectCatalog, ProjectSpec, SkillDocument, SkillRef,
};
use crate::recompose::{RecomposeRequest, Recomposer};
use crate::store::Store;

/// Candidate error code when the recomposer produced nothing usable.
pub const RECOMPOSE_FAILED: &str = "RECOMPOSE_FAILED";
/// Candidate error code when the generated document could not be stored.
pub const SAVE_FAILED: &str = "SAVE_FAILED";

struct IterationHandle {
    state: watch::Sender<IterationState>,
    stop: watch::Sender<bool>,
}

impl IterationHandle {
    fn status(&self) -> IterationStatus {
        self.state.borrow().status
    }
}

#[derive(Clone)]
struct Engine {
    catalog: Arc<dyn ProjectCatalog>,
    runs: Arc<EvaluationRunController>,
    recomposer: Arc<dyn Recomposer>,
    table: StrategyTable,
    store: Option<Arc<Mutex<Store>>>,
    events: broadcast::Sender<ProgressEvent>,
}

impl Engine {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.events.send(event);
    }

    /// Persist iteration state. Non-fatal on error.
    fn persist(&self, what: &str, f: impl FnOnce(&Store) -> anyhow::Result<()>) {
        let Some(ref store) = self.store else { return };
        let Ok(s) = store.lock() else { return };
        if let Err(e) = f(&s) {
            warn!("Failed to persist {}: {}", what, e);
        }
    }

    /// Run a catalog call on the blocking pool. File-backed catalogs do disk I/O.
    async fn catalog_call<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&dyn ProjectCatalog) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let catalog = self.catalog.clone();
        tokio::task::spawn_blocking(move || f(catalog.as_ref())).await?
    }
}

/// The document a round recomposes from.
#[derive(Clone)]
struct Base {
    doc: SkillDocument,
    breakdown: Option<ScoreBreakdown>,
}

/// Drives per-project optimisation loops.
pub struct IterationController {
    engine: Engine,
    leases: ProjectLeases,
    iterations: Mutex<HashMap<String, Arc<IterationHandle>>>,
}

impl IterationController {
    pub fn new(
        catalog: Arc<dyn ProjectCatalog>,
        runs: Arc<EvaluationRunController>,
        recomposer: Arc<dyn Recomposer>,
        leases: ProjectLeases,
    ) -> Self {
        let events = runs.events();
        Self {
            engine: Engine {
                catalog,
                runs,
                recomposer,
                table: StrategyTable::default(),
                store: None,
                events,
            },
            leases,
            iterations: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_store(mut self, store: Arc<Mutex<Store>>) -> Self {
        self.engine.store = Some(store);
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<ProgressEvent>) -> Self {
        self.engine.events = events;
        self
    }

    pub fn with_strategy_table(mut self, table: StrategyTable) -> Self {
        self.engine.table = table;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.engine.events.subscribe()
    }

    fn handle(&self, project_id: &str) -> Option<Arc<IterationHandle>> {
        self.iterations.lock().ok()?.get(project_id).cloned()
    }

    fn validate(params: &IterationParams) -> Result<(), SkillForgeError> {
        if params.max_rounds == 0 {
            return Err(SkillForgeError::InvalidParameter(
                "max_rounds must be at least 1".into(),
            ));
        }
        if params.beam_width == 0 {
            return Err(SkillForgeError::InvalidParameter(
                "beam_width must be at least 1".into(),
            ));
        }
        if !params.plateau_threshold.is_finite() {
            return Err(SkillForgeError::InvalidParameter(
                "plateau_threshold must be a finite number".into(),
            ));
        }
        if params.stop_threshold.is_some_and(|t| !t.is_finite()) {
            return Err(SkillForgeError::InvalidParameter(
                "stop_threshold must be a finite number".into(),
            ));
        }
        Ok(())
    }

    // ─── Control surface ────────────────────────────────────────

    /// Begin optimising from `params.seed_skill_id`.
    pub fn start(
        &self,
        project_id: &str,
        params: IterationParams,
    ) -> Result<IterationProgress, SkillForgeError> {
        if let Some(existing) = self.handle(project_id) {
            if existing.status() == IterationStatus::Running {
                return Err(SkillForgeError::already_running(project_id, "iteration"));
            }
        }
        Self::validate(&params)?;

        let project = self
            .engine
            .catalog
            .project(project_id)?
            .ok_or_else(|| SkillForgeError::ProjectNotFound(project_id.to_string()))?;
        let seed_ref = SkillRef::new(params.seed_skill_id.clone());
        let seed = self
            .engine
            .catalog
            .skill(&seed_ref)?
            .ok_or_else(|| SkillForgeError::NoSeedSkill {
                skill_id: params.seed_skill_id.clone(),
            })?;
        let lease = self.leases.acquire(project_id, Activity::Iteration)?;

        let mode = params.mode.unwrap_or(project.mode);
        let seed_best = seed.last_score.map(|score| BestEver {
            skill_ref: seed.skill_ref.clone(),
            round: 0,
            avg_score: score,
            strategy: None,
            score_breakdown: None,
        });
        let state = IterationState::new(project_id, mode, params, seed_best);
        self.engine
            .persist("iteration", |s| s.insert_iteration(&state));

        info!(
            project_id,
            iteration_id = %state.id,
            mode = %mode,
            seed = %seed.skill_ref,
            seed_score = ?seed.last_score,
            max_rounds = state.params.max_rounds,
            beam_width = state.params.beam_width,
            "Iteration started"
        );

        let progress = IterationProgress::from_state(&state);
        let (state_tx, _) = watch::channel(state.clone());
        let (stop_tx, _) = watch::channel(false);
        let handle = Arc::new(IterationHandle {
            state: state_tx,
            stop: stop_tx,
        });
        if let Ok(mut iterations) = self.iterations.lock() {
            iterations.insert(project_id.to_string(), handle.clone());
        }

        let base = Base {
            doc: seed,
            breakdown: None,
        };
        tokio::spawn(supervise(
            self.engine.clone(),
            handle,
            project,
            base,
            state,
            lease,
        ));
        Ok(progress)
    }

    /// Request termination at the next round barrier. Idempotent.
    pub fn stop(&self, project_id: &str) -> Result<IterationProgress, SkillForgeError> {
        let handle = self
            .handle(project_id)
            .ok_or_else(|| SkillForgeError::not_running(project_id, "iteration"))?;
        if handle.status() == IterationStatus::Running {
            handle.stop.send_replace(true);
            info!(project_id, "Iteration stop requested");
        }
        let progress = IterationProgress::from_state(&handle.state.borrow());
        Ok(progress)
    }

    fn latest(&self, project_id: &str) -> Result<Option<IterationState>, SkillForgeError> {
        if let Some(handle) = self.handle(project_id) {
            return Ok(Some(handle.state.borrow().clone()));
        }
        let Some(ref store) = self.engine.store else {
            return Ok(None);
        };
        let s = store
            .lock()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        Ok(s.latest_iteration(project_id)?)
    }

    pub fn get_progress(&self, project_id: &str) -> IterationProgress {
        match self.handle(project_id) {
            Some(handle) => IterationProgress::from_state(&handle.state.borrow()),
            None => match self.latest(project_id) {
                Ok(Some(state)) => IterationProgress::from_state(&state),
                _ => IterationProgress::idle(project_id),
            },
        }
    }

    /// Summary of the current (or most recent) iteration, if any.
    pub fn get_report(&self, project_id: &str) -> Result<Option<IterationReport>, SkillForgeError> {
        Ok(self
            .latest(project_id)?
            .map(|state| IterationReport::from_state(&state)))
    }

    pub fn get_exploration_log(&self, project_id: &str) -> Result<ExplorationLog, SkillForgeError> {
        Ok(match self.latest(project_id)? {
            Some(state) => ExplorationLog::from_state(&state),
            None => ExplorationLog::empty(project_id),
        })
    }

    /// Wait until the loop leaves `running` and return the final progress.
    pub async fn wait(&self, project_id: &str) -> IterationProgress {
        let Some(handle) = self.handle(project_id) else {
            return self.get_progress(project_id);
        };
        let mut rx = handle.state.subscribe();
        let progress = match rx.wait_for(|s| s.status != IterationStatus::Running).await {
            Ok(state) => IterationProgress::from_state(&state),
            Err(_) => IterationProgress::idle(project_id),
        };
        progress
    }

    /// Close iterations a previous process left running.
    ///
    /// The round loop is not resumable: every recorded round is kept and the
    /// iteration ends as manually stopped.
    pub fn recover(&self) -> Result<usize, SkillForgeError> {
        let Some(ref store) = self.engine.store else {
            return Ok(0);
        };
        let s = store
            .lock()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        let closed = s.close_interrupted_iterations()?;
        if closed > 0 {
            info!(closed, "Closed interrupted iterations");
        }
        Ok(closed)
    }
}

// ─── Round loop ─────────────────────────────────────────────────────

/// Own the project lease for the loop's lifetime and close the iteration if
/// the loop dies without reaching a stop condition.
async fn supervise(
    engine: Engine,
    handle: Arc<IterationHandle>,
    project: ProjectSpec,
    base: Base,
    state: IterationState,
    lease: ProjectLease,
) {
    let looped = AssertUnwindSafe(run_loop(engine.clone(), handle.clone(), project, base, state))
        .catch_unwind()
        .await;
    if looped.is_err() {
        let state = handle.state.borrow().clone();
        if state.status == IterationStatus::Running {
            error!(
                project_id = %state.project_id,
                round = state.current_round,
                "Iteration loop panicked, closing the iteration"
            );
            finish(&engine, &handle, state, StopReason::ManualStop);
        }
    }
    drop(lease);
}

async fn run_loop(
    engine: Engine,
    handle: Arc<IterationHandle>,
    project: ProjectSpec,
    mut base: Base,
    mut state: IterationState,
) {
    let stop_rx = handle.stop.subscribe();
    let mut plateau = PlateauTracker::new(
        state.params.plateau_threshold,
        state.params.plateau_rounds_before_escape,
    );

    let reason = loop {
        if *stop_rx.borrow() {
            break StopReason::ManualStop;
        }

        let round = run_round(&engine, &project, &base, &state, plateau.level()).await;
        let (round, improved) = resolve_round(round, &mut state, &mut plateau);
        if let Some(winner) = improved {
            base = winner;
        }

        engine.persist("round", |s| s.insert_round(&state.id, &round));
        let winner_score = round.winner_score();
        let mut delta = RoundDelta::from(&round);
        state.rounds.push(round);
        engine.persist("iteration", |s| s.update_iteration(&state));
        handle.state.send_replace(state.clone());

        delta.best_avg_score = state.best_score();
        info!(
            project_id = %state.project_id,
            round = delta.round,
            strategy = %delta.strategy,
            plateau_level = state.plateau_level,
            winner_score = ?winner_score,
            best = ?delta.best_avg_score,
            "Round completed"
        );
        engine.emit(ProgressEvent::RoundCompleted {
            project_id: state.project_id.clone(),
            delta,
        });

        let threshold_met = match (state.params.stop_threshold, winner_score) {
            (Some(threshold), Some(score)) => score >= threshold,
            _ => false,
        };
        if threshold_met {
            break StopReason::ScoreThresholdReached;
        }
        if state.current_round >= state.params.max_rounds {
            break StopReason::MaxRounds;
        }
        if *stop_rx.borrow() {
            break StopReason::ManualStop;
        }
    };

    finish(&engine, &handle, state, reason);
}

/// Freeze the iteration with `reason` and publish the final state.
fn finish(engine: &Engine, handle: &IterationHandle, mut state: IterationState, reason: StopReason) {
    state.status = if reason == StopReason::ManualStop && state.rounds.is_empty() {
        IterationStatus::Idle
    } else {
        IterationStatus::Completed
    };
    state.stop_reason = Some(reason);
    state.finished_at = Some(Utc::now());
    engine.persist("iteration", |s| s.update_iteration(&state));
    handle.state.send_replace(state.clone());

    info!(
        project_id = %state.project_id,
        reason = %reason,
        rounds = state.rounds.len(),
        best = ?state.best_score(),
        "Iteration finished"
    );
    engine.emit(ProgressEvent::IterationComplete {
        project_id: state.project_id.clone(),
        stop_reason: reason,
        rounds: state.rounds.len() as u32,
        best: state.best.clone(),
    });
}

/// A round's candidates before the winner is chosen.
struct PendingRound {
    number: u32,
    plateau_level: u8,
    plan: Vec<StrategyTag>,
    resolved: Vec<(Candidate, Option<String>)>,
    started_at: chrono::DateTime<Utc>,
}

async fn run_round(
    engine: &Engine,
    project: &ProjectSpec,
    base: &Base,
    state: &IterationState,
    plateau_level: u8,
) -> PendingRound {
    let number = state.current_round + 1;
    let project_id = project.id.clone();
    let segments = match engine.catalog_call(move |c| c.segments(&project_id)).await {
        Ok(segments) => segments,
        Err(e) => {
            warn!(project_id = %project.id, "Advantage segments unavailable: {}", e);
            Vec::new()
        }
    };
    let available = AvailableSegments::from_segments(&segments);
    let plan = strategy::plan_beam(
        &engine.table,
        state.mode,
        plateau_level,
        available,
        state.params.beam_width,
    );

    engine.emit(ProgressEvent::RoundStarted {
        project_id: project.id.clone(),
        round: number,
        strategy: plan[0],
        plateau_level,
        candidates: plan.len(),
    });
    debug!(project_id = %project.id, round = number, plan = ?plan, "Generating candidates");

    let started_at = Utc::now();
    let resolved = join_all(plan.iter().copied().enumerate().map(|(index, tag)| {
        produce_candidate(engine, project, base, state, &segments, number, index, tag)
    }))
    .await;

    PendingRound {
        number,
        plateau_level,
        plan,
        resolved,
        started_at,
    }
}

fn failed(
    index: usize,
    strategy: StrategyTag,
    skill_ref: Option<SkillRef>,
    code: &str,
    message: String,
) -> Candidate {
    Candidate {
        index,
        skill_ref,
        strategy,
        avg_score: None,
        score_breakdown: None,
        error: Some(CandidateError {
            code: code.to_string(),
            message,
        }),
        won: false,
    }
}

/// Generate, store and evaluate one beam slot.
#[allow(clippy::too_many_arguments)]
async fn produce_candidate(
    engine: &Engine,
    project: &ProjectSpec,
    base: &Base,
    state: &IterationState,
    segments: &[AdvantageSegment],
    round: u32,
    index: usize,
    tag: StrategyTag,
) -> (Candidate, Option<String>) {
    let request = RecomposeRequest {
        base: &base.doc,
        strategy: tag,
        retention: &state.params.retention_rules,
        breakdown: base.breakdown.as_ref(),
        segments,
        round,
        variant: index,
    };
    let generated = AssertUnwindSafe(engine.recomposer.generate(&request))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(anyhow::anyhow!("recomposer panicked")));
    let content = match generated {
        Ok(content) if !content.trim().is_empty() => content,
        Ok(_) => {
            let message = "recomposer returned an empty document".to_string();
            return (failed(index, tag, None, RECOMPOSE_FAILED, message), None);
        }
        Err(e) => {
            warn!(project_id = %project.id, round, index, "Recompose failed: {}", e);
            return (failed(index, tag, None, RECOMPOSE_FAILED, e.to_string()), None);
        }
    };

    let (project_id, parent, body) = (
        project.id.clone(),
        base.doc.skill_ref.clone(),
        content.clone(),
    );
    let saved = engine
        .catalog_call(move |c| {
            let draft = CandidateDraft {
                parent: &parent,
                round,
                index,
                strategy: tag,
                content: &body,
            };
            c.save_candidate(&project_id, &draft)
        })
        .await;
    let skill_ref = match saved {
        Ok(r) => r,
        Err(e) => {
            warn!(project_id = %project.id, round, index, "Failed to store candidate: {}", e);
            return (failed(index, tag, None, SAVE_FAILED, e.to_string()), None);
        }
    };

    match engine
        .runs
        .evaluate_candidate(&content, &project.cases, &project.evaluation)
        .await
    {
        Ok(outcome) => {
            let (scored, score) = (skill_ref.clone(), outcome.avg_score);
            if let Err(e) = engine
                .catalog_call(move |c| c.record_score(&scored, score))
                .await
            {
                warn!(skill = %skill_ref, "Failed to record candidate score: {}", e);
            }
            let candidate = Candidate {
                index,
                skill_ref: Some(skill_ref),
                strategy: tag,
                avg_score: Some(outcome.avg_score),
                score_breakdown: Some(outcome.score_breakdown),
                error: None,
                won: false,
            };
            (candidate, Some(content))
        }
        Err(e) => {
            warn!(project_id = %project.id, round, index, code = e.code(), "Candidate evaluation failed");
            let c = failed(index, tag, Some(skill_ref), e.code(), e.message().to_string());
            (c, None)
        }
    }
}

/// Index of the highest-scoring candidate; ties go to the earliest.
fn pick_winner(candidates: &[Candidate]) -> Option<usize> {
    let mut winner: Option<(usize, f64)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let Some(score) = candidate.avg_score else { continue };
        if winner.is_none_or(|(_, best)| score > best) {
            winner = Some((i, score));
        }
    }
    winner.map(|(i, _)| i)
}

/// Choose the winner, update plateau and best-ever, and build the round record.
///
/// Returns the new recompose base when best-ever improved.
fn resolve_round(
    pending: PendingRound,
    state: &mut IterationState,
    plateau: &mut PlateauTracker,
) -> (Round, Option<Base>) {
    let (mut candidates, contents): (Vec<Candidate>, Vec<Option<String>>) =
        pending.resolved.into_iter().unzip();
    let winner = pick_winner(&candidates);

    let mut score_delta = None;
    let mut improved = None;
    match winner {
        Some(w) => {
            candidates[w].won = true;
            let candidate = &candidates[w];
            let score = candidate.avg_score.unwrap_or_default();
            if let Some(best) = state.best_score() {
                let delta = score - best;
                score_delta = Some(delta);
                plateau.record_delta(delta);
            }
            if state.best_score().is_none_or(|best| score > best) {
                if let (Some(skill_ref), Some(content)) =
                    (candidate.skill_ref.clone(), contents[w].clone())
                {
                    state.best = Some(BestEver {
                        skill_ref: skill_ref.clone(),
                        round: pending.number,
                        avg_score: score,
                        strategy: Some(candidate.strategy),
                        score_breakdown: candidate.score_breakdown.clone(),
                    });
                    improved = Some(Base {
                        doc: SkillDocument {
                            name: skill_ref.0.clone(),
                            skill_ref,
                            content,
                            last_score: Some(score),
                        },
                        breakdown: candidate.score_breakdown.clone(),
                    });
                }
            }
        }
        None => plateau.record_stall(),
    }

    state.current_round = pending.number;
    state.plateau_level = plateau.level();
    state.consecutive_plateau = plateau.consecutive();

    let round = Round {
        round: pending.number,
        strategy: pending.plan[0],
        plateau_level: pending.plateau_level,
        candidates,
        winner,
        score_delta,
        started_at: pending.started_at,
        finished_at: Utc::now(),
    };
    (round, improved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recompose::RetentionRules;

    fn scored(index: usize, score: Option<f64>) -> Candidate {
        Candidate {
            index,
            skill_ref: score.map(|_| SkillRef::new(format!("c{index}"))),
            strategy: StrategyTag::Greedy,
            avg_score: score,
            score_breakdown: score.map(ScoreBreakdown::uniform),
            error: None,
            won: false,
        }
    }

    fn params() -> IterationParams {
        IterationParams {
            seed_skill_id: "seed".into(),
            max_rounds: 5,
            stop_threshold: None,
            beam_width: 2,
            plateau_threshold: 1.0,
            plateau_rounds_before_escape: 1,
            retention_rules: RetentionRules::default(),
            mode: None,
        }
    }

    fn pending(number: u32, scores: &[Option<f64>]) -> PendingRound {
        PendingRound {
            number,
            plateau_level: 0,
            plan: vec![StrategyTag::Greedy; scores.len()],
            resolved: scores
                .iter()
                .enumerate()
                .map(|(i, s)| (scored(i, *s), s.map(|_| format!("# c{i}"))))
                .collect(),
            started_at: Utc::now(),
        }
    }

    fn seeded_state(seed: Option<f64>) -> IterationState {
        let best = seed.map(|score| BestEver {
            skill_ref: SkillRef::new("seed"),
            round: 0,
            avg_score: score,
            strategy: None,
            score_breakdown: None,
        });
        IterationState::new("p", IterationMode::Explore, params(), best)
    }

    #[test]
    fn test_pick_winner_ties_go_to_earliest() {
        let c = vec![scored(0, Some(70.0)), scored(1, Some(80.0)), scored(2, Some(80.0))];
        assert_eq!(pick_winner(&c), Some(1));
        assert_eq!(pick_winner(&[scored(0, None), scored(1, None)]), None);
        assert_eq!(pick_winner(&[scored(0, None), scored(1, Some(1.0))]), Some(1));
    }

    #[test]
    fn test_resolve_round_updates_best_and_delta() {
        let mut state = seeded_state(Some(60.0));
        let mut plateau = PlateauTracker::new(1.0, 1);
        let (round, improved) =
            resolve_round(pending(1, &[Some(65.0), Some(64.0)]), &mut state, &mut plateau);
        assert_eq!(round.winner, Some(0));
        assert!(round.candidates[0].won);
        assert!(!round.candidates[1].won);
        assert_eq!(round.score_delta, Some(5.0));
        assert_eq!(state.best_score(), Some(65.0));
        assert_eq!(state.best.as_ref().map(|b| b.round), Some(1));
        assert_eq!(improved.map(|b| b.doc.content), Some("# c0".to_string()));
        assert_eq!(state.current_round, 1);
        assert_eq!(state.plateau_level, 0);
    }

    #[test]
    fn test_regressing_winner_keeps_best_ever() {
        let mut state = seeded_state(Some(80.0));
        let mut plateau = PlateauTracker::new(1.0, 1);
        let (round, improved) = resolve_round(pending(1, &[Some(70.0)]), &mut state, &mut plateau);
        assert_eq!(round.score_delta, Some(-10.0));
        assert!(improved.is_none());
        assert_eq!(state.best_score(), Some(80.0));
        assert_eq!(state.plateau_level, 1);
    }

    #[test]
    fn test_winnerless_round_is_a_stall() {
        let mut state = seeded_state(Some(50.0));
        let mut plateau = PlateauTracker::new(1.0, 2);
        let (round, improved) = resolve_round(pending(1, &[None, None]), &mut state, &mut plateau);
        assert!(round.winner.is_none());
        assert!(round.score_delta.is_none());
        assert!(improved.is_none());
        assert_eq!(state.consecutive_plateau, 1);
        assert_eq!(state.best_score(), Some(50.0));
    }

    #[test]
    fn test_first_round_without_seed_score_has_no_delta() {
        let mut state = seeded_state(None);
        let mut plateau = PlateauTracker::new(1.0, 1);
        let (round, improved) = resolve_round(pending(1, &[Some(40.0)]), &mut state, &mut plateau);
        assert!(round.score_delta.is_none());
        assert!(improved.is_some());
        assert_eq!(state.plateau_level, 0);
        assert_eq!(state.consecutive_plateau, 0);
    }

    #[test]
    fn test_validate_rejects_zero_beam() {
        let mut p = params();
        p.beam_width = 0;
        let err = IterationController::validate(&p).unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETER");
        let mut p = params();
        p.max_rounds = 0;
        assert!(IterationController::validate(&p).is_err());
        assert!(IterationController::validate(&params()).is_ok());
    }
}
