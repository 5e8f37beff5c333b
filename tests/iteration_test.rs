// tests/iteration_test.rs — Integration test: iteration loop end to end

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::Semaphore;

use common::*;
use skillforge::core::types::{
    IterationMode, IterationParams, IterationState, IterationStatus, ProgressEvent, StopReason,
    StrategyTag,
};
use skillforge::core::{Activity, EvaluationRunController, IterationController, ProjectLeases};
use skillforge::evaluator::Evaluator;
use skillforge::recompose::RetentionRules;
use skillforge::store::{self, Store};

struct Fixture {
    iterations: IterationController,
    runs: Arc<EvaluationRunController>,
    recomposer: Arc<Labeling>,
    leases: ProjectLeases,
}

fn fixture(
    seed_score: Option<f64>,
    mode: IterationMode,
    evaluator: Arc<dyn Evaluator>,
    recomposer: Labeling,
    store: Option<Arc<Mutex<Store>>>,
) -> Fixture {
    let catalog = catalog("demo", &[("seed", seed_score)], &["c1"], settings(2, 0), mode);
    let leases = ProjectLeases::new();
    let runs = Arc::new(EvaluationRunController::new(
        catalog.clone(),
        evaluator,
        leases.clone(),
    ));
    let recomposer = Arc::new(recomposer);
    let mut iterations =
        IterationController::new(catalog, runs.clone(), recomposer.clone(), leases.clone());
    if let Some(store) = store {
        iterations = iterations.with_store(store);
    }
    Fixture {
        iterations,
        runs,
        recomposer,
        leases,
    }
}

fn params(max_rounds: u32, beam_width: usize) -> IterationParams {
    IterationParams {
        seed_skill_id: "seed".into(),
        max_rounds,
        stop_threshold: None,
        beam_width,
        plateau_threshold: 1.0,
        plateau_rounds_before_escape: 2,
        retention_rules: RetentionRules::default(),
        mode: None,
    }
}

// ─── Stop conditions ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_standard_mode_stops_at_threshold() {
    let eval = Arc::new(ByContent::new(&[("r1c0", 85.0), ("r2c0", 87.0), ("r3c0", 90.0)]));
    let f = fixture(None, IterationMode::Standard, eval, Labeling::default(), None);

    let p = IterationParams {
        stop_threshold: Some(90.0),
        ..params(3, 1)
    };
    let started = f.iterations.start("demo", p).unwrap();
    assert_eq!(started.status, IterationStatus::Running);
    assert_eq!(f.leases.holder("demo"), Some(Activity::Iteration));

    let done = f.iterations.wait("demo").await;
    assert_eq!(done.status, IterationStatus::Completed);
    assert_eq!(done.stop_reason, Some(StopReason::ScoreThresholdReached));
    assert_eq!(done.current_round, 3);
    assert_eq!(done.best_round, Some(3));
    assert_eq!(done.best_avg_score, Some(90.0));
    assert_eq!(f.leases.holder("demo"), None);

    // Each round recomposes from the previous winner.
    let bases: Vec<String> = f.recomposer.requests().into_iter().map(|(_, _, b)| b).collect();
    assert_eq!(bases, vec!["seed", "demo-r001-c0", "demo-r002-c0"]);

    let log = f.iterations.get_exploration_log("demo").unwrap();
    assert!(log.rounds.iter().all(|r| r.strategy == StrategyTag::Greedy));
    assert!(log.rounds.iter().all(|r| r.candidates.len() == 1));
}

#[tokio::test]
async fn test_max_rounds_reached() {
    let eval = Arc::new(ByContent::new(&[("r1c0", 60.0), ("r2c0", 61.0)]));
    let f = fixture(Some(50.0), IterationMode::Standard, eval, Labeling::default(), None);

    f.iterations.start("demo", params(2, 1)).unwrap();
    let done = f.iterations.wait("demo").await;
    assert_eq!(done.stop_reason, Some(StopReason::MaxRounds));
    assert_eq!(done.current_round, 2);

    let report = f.iterations.get_report("demo").unwrap().unwrap();
    assert_eq!(report.seed_score, Some(50.0));
    assert_eq!(report.total_improvement, Some(11.0));
    assert_eq!(report.score_trajectory, vec![Some(60.0), Some(61.0)]);
}

// ─── Plateau escalation ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_explore_mode_escalates_after_plateau() {
    let eval = Arc::new(ByContent::new(&[("r1c0", 80.5), ("r2c0", 80.8), ("r3c0", 81.0)]));
    let f = fixture(Some(80.0), IterationMode::Explore, eval, Labeling::default(), None);

    f.iterations.start("demo", params(3, 1)).unwrap();
    let done = f.iterations.wait("demo").await;
    assert_eq!(done.stop_reason, Some(StopReason::MaxRounds));

    let log = f.iterations.get_exploration_log("demo").unwrap();
    assert_eq!(log.rounds.len(), 3);
    assert_eq!(log.rounds[0].strategy, StrategyTag::Greedy);
    assert_eq!(log.rounds[0].score_delta.map(|d| (d * 10.0).round()), Some(5.0));
    assert_eq!(log.rounds[1].plateau_level, 0);
    assert_eq!(log.rounds[2].plateau_level, 1);
    assert_ne!(log.rounds[2].strategy, StrategyTag::Greedy);
}

#[tokio::test]
async fn test_standard_mode_never_diversifies() {
    let eval = Arc::new(ByContent::new(&[("r1c0", 70.1), ("r2c0", 70.2), ("r3c0", 70.3)]));
    let f = fixture(Some(70.0), IterationMode::Standard, eval, Labeling::default(), None);

    f.iterations.start("demo", params(3, 4)).unwrap();
    f.iterations.wait("demo").await;

    let log = f.iterations.get_exploration_log("demo").unwrap();
    assert!(log.rounds.iter().all(|r| r.strategy == StrategyTag::Greedy));
    assert!(log.rounds.iter().all(|r| r.candidates.len() == 1));
}

// ─── Manual stop ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stop_mid_round_records_whole_round() {
    let gate = Arc::new(Semaphore::new(0));
    let eval = Arc::new(ByContent {
        gate: Some(gate.clone()),
        ..ByContent::new(&[("r1c0", 70.0), ("r1c1", 74.0)])
    });
    let f = fixture(None, IterationMode::Explore, eval, Labeling::default(), None);
    let mut rx = f.iterations.subscribe();

    f.iterations.start("demo", params(5, 2)).unwrap();
    next_matching(&mut rx, |e| matches!(e, ProgressEvent::RoundStarted { .. })).await;

    let during = f.iterations.stop("demo").unwrap();
    assert_eq!(during.status, IterationStatus::Running);
    assert_eq!(during.current_round, 0);
    // Idempotent while the round drains.
    f.iterations.stop("demo").unwrap();

    gate.add_permits(2);
    let done = f.iterations.wait("demo").await;
    assert_eq!(done.status, IterationStatus::Completed);
    assert_eq!(done.stop_reason, Some(StopReason::ManualStop));
    assert_eq!(done.current_round, 1);

    let log = f.iterations.get_exploration_log("demo").unwrap();
    assert_eq!(log.rounds.len(), 1);
    assert_eq!(log.rounds[0].candidates.len(), 2);
    assert_eq!(log.rounds[0].winner, Some(1));
    assert_eq!(f.leases.holder("demo"), None);
}

#[tokio::test]
async fn test_stop_without_iteration() {
    let eval = Arc::new(ByContent::new(&[]));
    let f = fixture(None, IterationMode::Standard, eval, Labeling::default(), None);
    assert_eq!(f.iterations.stop("demo").unwrap_err().code(), "NOT_RUNNING");
}

// ─── Candidate failures ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_winnerless_round_keeps_best_and_continues() {
    let eval = Arc::new(ByContent::new(&[
        ("r1c0", 70.0),
        ("r1c1", 72.0),
        ("r3c0", 75.0),
        ("r3c1", 71.0),
    ]));
    let f = fixture(None, IterationMode::Explore, eval, Labeling::failing(&[2]), None);
    let mut rx = f.iterations.subscribe();

    f.iterations.start("demo", params(3, 2)).unwrap();

    let event = next_matching(&mut rx, |e| {
        matches!(e, ProgressEvent::RoundCompleted { delta, .. } if delta.round == 2)
    })
    .await;
    if let ProgressEvent::RoundCompleted { delta, .. } = event {
        assert_eq!(delta.winner_score, None);
        assert_eq!(delta.failed_candidates, 2);
        assert_eq!(delta.best_avg_score, Some(72.0));
    }

    let done = f.iterations.wait("demo").await;
    assert_eq!(done.stop_reason, Some(StopReason::MaxRounds));
    assert_eq!(done.current_round, 3);
    assert_eq!(done.best_round, Some(3));
    assert_eq!(done.best_avg_score, Some(75.0));

    let log = f.iterations.get_exploration_log("demo").unwrap();
    let round2 = &log.rounds[1];
    assert_eq!(round2.winner, None);
    assert_eq!(round2.score_delta, None);
    assert!(round2
        .candidates
        .iter()
        .all(|c| c.error.as_ref().map(|e| e.code.as_str()) == Some("RECOMPOSE_FAILED")));

    // Round 3 builds on round 1's winner.
    let round3_bases: Vec<String> = f
        .recomposer
        .requests()
        .into_iter()
        .filter(|(round, _, _)| *round == 3)
        .map(|(_, _, base)| base)
        .collect();
    assert_eq!(round3_bases, vec!["demo-r001-c1", "demo-r001-c1"]);

    let report = f.iterations.get_report("demo").unwrap().unwrap();
    assert_eq!(report.winnerless_rounds, vec![2]);
    assert_eq!(report.failed_candidates, 2);
}

#[tokio::test]
async fn test_evaluation_failure_is_recorded_on_candidate() {
    let eval = Arc::new(ByContent::new(&[("r1c1", 60.0)]));
    let f = fixture(None, IterationMode::Explore, eval, Labeling::default(), None);

    f.iterations.start("demo", params(1, 2)).unwrap();
    f.iterations.wait("demo").await;

    let log = f.iterations.get_exploration_log("demo").unwrap();
    let failed = &log.rounds[0].candidates[0];
    assert_eq!(failed.avg_score, None);
    assert_eq!(failed.error.as_ref().unwrap().code, "OUTPUT_PARSE_FAILED");
    assert_eq!(failed.skill_ref.as_ref().unwrap().as_str(), "demo-r001-c0");
    assert!(!failed.won);
    assert!(log.rounds[0].candidates[1].won);
}

#[tokio::test]
async fn test_panicking_evaluator_fails_candidates_not_the_loop() {
    let eval = Arc::new(Panicking);
    let f = fixture(None, IterationMode::Explore, eval, Labeling::default(), None);

    f.iterations.start("demo", params(2, 2)).unwrap();
    let done = tokio::time::timeout(Duration::from_secs(5), f.iterations.wait("demo"))
        .await
        .expect("iteration wedged after an evaluator panic");
    assert_eq!(done.status, IterationStatus::Completed);
    assert_eq!(done.stop_reason, Some(StopReason::MaxRounds));
    assert_eq!(done.current_round, 2);
    assert_eq!(done.best_avg_score, None);
    assert_eq!(f.leases.holder("demo"), None);

    let log = f.iterations.get_exploration_log("demo").unwrap();
    assert!(log.rounds.iter().all(|r| r.winner.is_none()));
    assert!(log
        .rounds
        .iter()
        .flat_map(|r| &r.candidates)
        .all(|c| c.error.as_ref().map(|e| e.code.as_str()) == Some("CLI_EXECUTION_ERROR")));

    // The project is free for the next activity.
    f.iterations.start("demo", params(1, 1)).unwrap();
    f.iterations.wait("demo").await;
}

#[tokio::test]
async fn test_panicking_recomposer_is_a_recompose_failure() {
    let catalog = catalog(
        "demo",
        &[("seed", Some(50.0))],
        &["c1"],
        settings(1, 0),
        IterationMode::Standard,
    );
    let leases = ProjectLeases::new();
    let eval = Arc::new(ByContent::new(&[]));
    let runs = Arc::new(EvaluationRunController::new(
        catalog.clone(),
        eval,
        leases.clone(),
    ));
    let iterations = IterationController::new(
        catalog,
        runs.clone(),
        Arc::new(PanickingRecomposer),
        leases.clone(),
    );

    iterations.start("demo", params(1, 1)).unwrap();
    let done = iterations.wait("demo").await;
    assert_eq!(done.stop_reason, Some(StopReason::MaxRounds));
    assert_eq!(done.best_avg_score, Some(50.0));

    let log = iterations.get_exploration_log("demo").unwrap();
    let candidate = &log.rounds[0].candidates[0];
    assert_eq!(candidate.error.as_ref().unwrap().code, "RECOMPOSE_FAILED");
    assert_eq!(candidate.skill_ref, None);
    assert_eq!(leases.holder("demo"), None);
    runs.start("demo").unwrap();
}

// ─── Best-ever ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_best_ever_dominates_every_candidate_in_adaptive_beam() {
    let eval = Arc::new(ByContent::new(&[
        ("r1c0", 70.0),
        ("r1c1", 82.0),
        ("r1c2", 60.0),
        // Regressing round: the winner trails round 1.
        ("r2c0", 75.0),
        ("r2c1", 80.0),
        ("r2c2", 78.0),
        // A losing candidate here still beats round 1's best.
        ("r3c0", 79.0),
        ("r3c1", 85.0),
        ("r3c2", 84.0),
    ]));
    let f = fixture(Some(65.0), IterationMode::Adaptive, eval, Labeling::default(), None);

    f.iterations.start("demo", params(3, 3)).unwrap();
    let done = f.iterations.wait("demo").await;
    assert_eq!(done.stop_reason, Some(StopReason::MaxRounds));

    let report = f.iterations.get_report("demo").unwrap().unwrap();
    let best = report.best.unwrap();
    assert_eq!((best.round, best.avg_score), (3, 85.0));
    assert_eq!(best.skill_ref.as_str(), "demo-r003-c1");

    let log = f.iterations.get_exploration_log("demo").unwrap();
    assert!(log.rounds.iter().all(|r| r.candidates.len() == 3));
    for candidate in log.rounds.iter().flat_map(|r| &r.candidates) {
        let score = candidate.avg_score.unwrap();
        assert!(best.avg_score >= score, "{score} beats best-ever {}", best.avg_score);
    }

    // Round 2 did not improve, so round 3 still recomposes round 1's winner.
    let round3_bases: Vec<String> = f
        .recomposer
        .requests()
        .into_iter()
        .filter(|(round, _, _)| *round == 3)
        .map(|(_, _, base)| base)
        .collect();
    assert_eq!(round3_bases, vec!["demo-r001-c1"; 3]);
}

// ─── Start validation ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_rejections() {
    let eval = Arc::new(ByContent::new(&[]));
    let f = fixture(None, IterationMode::Standard, eval, Labeling::default(), None);

    let err = f.iterations.start("demo", params(0, 1)).unwrap_err();
    assert_eq!(err.code(), "INVALID_PARAMETER");

    let missing = IterationParams {
        seed_skill_id: "ghost".into(),
        ..params(1, 1)
    };
    let err = f.iterations.start("demo", missing).unwrap_err();
    assert_eq!(err.code(), "NO_SEED_SKILL");

    let err = f.iterations.start("nope", params(1, 1)).unwrap_err();
    assert_eq!(err.code(), "PROJECT_NOT_FOUND");

    let held = f.leases.acquire("demo", Activity::Evaluation).unwrap();
    let err = f.iterations.start("demo", params(1, 1)).unwrap_err();
    assert_eq!(err.code(), "RESOURCE_BUSY");
    drop(held);
    assert_eq!(f.iterations.get_progress("demo").status, IterationStatus::Idle);
}

#[tokio::test]
async fn test_evaluation_blocked_while_iterating() {
    let gate = Arc::new(Semaphore::new(0));
    let eval = Arc::new(ByContent {
        gate: Some(gate.clone()),
        ..ByContent::new(&[("r1c0", 70.0)])
    });
    let f = fixture(None, IterationMode::Standard, eval, Labeling::default(), None);

    f.iterations.start("demo", params(1, 1)).unwrap();
    assert_eq!(f.runs.start("demo").unwrap_err().code(), "RESOURCE_BUSY");
    let again = f.iterations.start("demo", params(1, 1)).unwrap_err();
    assert_eq!(again.code(), "ALREADY_RUNNING");

    gate.add_permits(1);
    f.iterations.wait("demo").await;
}

// ─── Persistence ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_report_survives_restart() {
    let db = Arc::new(Mutex::new(store::open_in_memory().unwrap()));
    let eval = Arc::new(ByContent::new(&[("r1c0", 66.0), ("r2c0", 68.0)]));
    let first = fixture(
        Some(60.0),
        IterationMode::Standard,
        eval.clone(),
        Labeling::default(),
        Some(db.clone()),
    );
    first.iterations.start("demo", params(2, 1)).unwrap();
    first.iterations.wait("demo").await;

    let second = fixture(
        Some(60.0),
        IterationMode::Standard,
        eval,
        Labeling::default(),
        Some(db),
    );
    let report = second.iterations.get_report("demo").unwrap().unwrap();
    assert_eq!(report.rounds, 2);
    assert_eq!(report.stop_reason, Some(StopReason::MaxRounds));
    assert_eq!(report.best.unwrap().avg_score, 68.0);

    let log = second.iterations.get_exploration_log("demo").unwrap();
    assert_eq!(log.rounds.len(), 2);
    assert_eq!(second.iterations.get_progress("demo").current_round, 2);
}

#[tokio::test]
async fn test_recover_closes_interrupted_iteration() {
    let db = Arc::new(Mutex::new(store::open_in_memory().unwrap()));
    let state = IterationState::new("demo", IterationMode::Explore, params(5, 2), None);
    db.lock().unwrap().insert_iteration(&state).unwrap();

    let eval = Arc::new(ByContent::new(&[]));
    let f = fixture(None, IterationMode::Explore, eval, Labeling::default(), Some(db));

    assert_eq!(f.iterations.recover().unwrap(), 1);
    let progress = f.iterations.get_progress("demo");
    assert_eq!(progress.status, IterationStatus::Idle);
    assert_eq!(progress.stop_reason, Some(StopReason::ManualStop));
    assert_eq!(f.iterations.recover().unwrap(), 0);
}
