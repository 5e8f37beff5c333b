// src/cli/progress.rs — Terminal progress renderer for run and iteration events

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::core::types::ProgressEvent;
use crate::util::{format_delta, format_score};

/// One line of stderr output for an event, or `None` if it is not shown.
pub fn render(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::TaskResolved {
            task_id,
            status,
            progress,
            ..
        } => Some(format!(
            "[eval {}/{}] {} {}",
            progress.completed_tasks + progress.failed_tasks,
            progress.total_tasks,
            task_id,
            status,
        )),
        ProgressEvent::RunFinished { progress, .. } => Some(format!(
            "[done] {} completed={} failed={} total={}",
            progress.status, progress.completed_tasks, progress.failed_tasks, progress.total_tasks,
        )),
        ProgressEvent::RoundStarted {
            round,
            strategy,
            plateau_level,
            candidates,
            ..
        } => Some(format!(
            "[round {}] {} x{} (plateau {})",
            round, strategy, candidates, plateau_level,
        )),
        ProgressEvent::RoundCompleted { delta, .. } => Some(format!(
            "[round {}] winner={} delta={} best={} failed={}/{}",
            delta.round,
            format_score(delta.winner_score),
            format_delta(delta.score_delta),
            format_score(delta.best_avg_score),
            delta.failed_candidates,
            delta.candidates,
        )),
        ProgressEvent::IterationComplete {
            stop_reason,
            rounds,
            best,
            ..
        } => Some(format!(
            "[done] {} after {} round(s), best={}{}",
            stop_reason,
            rounds,
            format_score(best.as_ref().map(|b| b.avg_score)),
            best.as_ref()
                .map(|b| format!(" ({} @ round {})", b.skill_ref, b.round))
                .unwrap_or_default(),
        )),
    }
}

/// Print events for `project_id` to stderr until the channel closes or the
/// returned task is aborted.
pub fn follow(mut rx: broadcast::Receiver<ProgressEvent>, project_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.project_id() == project_id => {
                    if let Some(line) = render(&event) {
                        eprintln!("{line}");
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Progress output skipped {} event(s)", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::*;
    use crate::project::SkillRef;

    fn progress(done: usize, failed: usize, total: usize) -> RunProgress {
        RunProgress {
            run_id: "r".into(),
            project_id: "p".into(),
            status: RunStatus::Running,
            total_tasks: total,
            completed_tasks: done,
            failed_tasks: failed,
            last_checkpoint: None,
        }
    }

    #[test]
    fn test_task_resolved_format() {
        let line = render(&ProgressEvent::TaskResolved {
            project_id: "p".into(),
            task_id: "alpha::c2".into(),
            status: TaskStatus::Failed,
            progress: progress(2, 1, 4),
        })
        .unwrap();
        assert_eq!(line, "[eval 3/4] alpha::c2 failed");
    }

    #[test]
    fn test_round_completed_format() {
        let line = render(&ProgressEvent::RoundCompleted {
            project_id: "p".into(),
            delta: RoundDelta {
                round: 2,
                strategy: StrategyTag::DimensionFocus,
                plateau_level: 1,
                winner_score: Some(81.5),
                score_delta: Some(0.5),
                best_avg_score: Some(81.5),
                candidates: 3,
                failed_candidates: 1,
            },
        })
        .unwrap();
        assert_eq!(line, "[round 2] winner=81.5 delta=+0.5 best=81.5 failed=1/3");
    }

    #[test]
    fn test_winnerless_round_format() {
        let line = render(&ProgressEvent::RoundCompleted {
            project_id: "p".into(),
            delta: RoundDelta {
                round: 4,
                strategy: StrategyTag::Greedy,
                plateau_level: 0,
                winner_score: None,
                score_delta: None,
                best_avg_score: Some(70.0),
                candidates: 2,
                failed_candidates: 2,
            },
        })
        .unwrap();
        assert!(line.contains("winner=-"));
        assert!(line.contains("failed=2/2"));
    }

    #[test]
    fn test_iteration_complete_format() {
        let line = render(&ProgressEvent::IterationComplete {
            project_id: "p".into(),
            stop_reason: StopReason::ScoreThresholdReached,
            rounds: 3,
            best: Some(BestEver {
                skill_ref: SkillRef::new("p-r003-c0"),
                round: 3,
                avg_score: 90.0,
                strategy: Some(StrategyTag::Greedy),
                score_breakdown: None,
            }),
        })
        .unwrap();
        assert_eq!(
            line,
            "[done] score_threshold_reached after 3 round(s), best=90.0 (p-r003-c0 @ round 3)"
        );
    }
}
