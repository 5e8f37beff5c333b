// src/core/run_controller.rs — Evaluation run state machine
//
// Each run is owned by a driver task that claims pending tasks, dispatches
// them to the evaluator (bounded by the project's concurrency) and records
// results. Control calls flip a watch channel the driver listens on; readers
// only ever see published snapshots.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::{FutureExt, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::leases::{Activity, ProjectLease, ProjectLeases};
use super::projection::RunResults;
use super::types::*;
use crate::evaluator::{EvaluationOutcome, Evaluator};
use crate::infra::config::EvaluationConfig;
use crate::infra::errors::{EvaluatorError, SkillForgeError};
use crate::project::{BaselineCase, ProjectCatalog, ProjectSpec};
use crate::store::Store;

/// Buffered events per subscriber before it starts lagging.
pub const EVENT_CAPACITY: usize = 1024;

const MAX_RETRY_DELAY_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Running,
    Paused,
    Stopped,
}

struct RunHandle {
    run: Mutex<EvaluationRun>,
    control: watch::Sender<Control>,
    snapshot: watch::Sender<RunProgress>,
    settings: EvaluationConfig,
    skills: HashMap<String, Arc<str>>,
    cases: HashMap<String, BaselineCase>,
    lease: Mutex<Option<ProjectLease>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl RunHandle {
    fn lock(&self) -> MutexGuard<'_, EvaluationRun> {
        self.run.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn publish(&self, progress: RunProgress) {
        self.snapshot.send_replace(progress);
    }

    fn set_lease(&self, lease: Option<ProjectLease>) {
        if let Ok(mut slot) = self.lease.lock() {
            *slot = lease;
        }
    }

    fn driver_finished(&self) -> bool {
        self.driver
            .lock()
            .map(|d| d.as_ref().is_none_or(|h| h.is_finished()))
            .unwrap_or(true)
    }
}

/// Pieces shared with driver tasks.
#[derive(Clone)]
struct Shared {
    evaluator: Arc<dyn Evaluator>,
    store: Option<Arc<Mutex<Store>>>,
    events: broadcast::Sender<ProgressEvent>,
}

impl Shared {
    fn emit(&self, event: ProgressEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Non-fatal: failures are logged and the run carries on.
    fn persist(&self, what: &str, f: impl FnOnce(&Store) -> anyhow::Result<()>) {
        let Some(ref store) = self.store else { return };
        let Ok(s) = store.lock() else { return };
        if let Err(e) = f(&s) {
            warn!("Failed to persist {}: {}", what, e);
        }
    }
}

/// Owns every project's evaluation run.
pub struct EvaluationRunController {
    catalog: Arc<dyn ProjectCatalog>,
    leases: ProjectLeases,
    shared: Shared,
    runs: Mutex<HashMap<String, Arc<RunHandle>>>,
}

impl EvaluationRunController {
    pub fn new(
        catalog: Arc<dyn ProjectCatalog>,
        evaluator: Arc<dyn Evaluator>,
        leases: ProjectLeases,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            catalog,
            leases,
            shared: Shared {
                evaluator,
                store: None,
                events,
            },
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Record runs and tasks durably.
    pub fn with_store(mut self, store: Arc<Mutex<Store>>) -> Self {
        self.shared.store = Some(store);
        self
    }

    /// Publish on an existing event channel instead of a private one.
    pub fn with_events(mut self, events: broadcast::Sender<ProgressEvent>) -> Self {
        self.shared.events = events;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.shared.events.subscribe()
    }

    pub fn events(&self) -> broadcast::Sender<ProgressEvent> {
        self.shared.events.clone()
    }

    fn handle(&self, project_id: &str) -> Option<Arc<RunHandle>> {
        self.runs.lock().ok()?.get(project_id).cloned()
    }

    fn resolve_skills(
        &self,
        project: &ProjectSpec,
    ) -> Result<HashMap<String, Arc<str>>, SkillForgeError> {
        let mut skills = HashMap::new();
        for skill_ref in &project.skills {
            let doc = self
                .catalog
                .skill(skill_ref)?
                .ok_or_else(|| SkillForgeError::SkillNotFound(skill_ref.0.clone()))?;
            skills.insert(skill_ref.0.clone(), Arc::from(doc.content));
        }
        Ok(skills)
    }

    fn launch(
        &self,
        run: EvaluationRun,
        project: &ProjectSpec,
        skills: HashMap<String, Arc<str>>,
        lease: ProjectLease,
        control: Control,
    ) -> Arc<RunHandle> {
        let (control_tx, _) = watch::channel(control);
        let (snapshot_tx, _) = watch::channel(run.progress());
        let handle = Arc::new(RunHandle {
            run: Mutex::new(run),
            control: control_tx,
            snapshot: snapshot_tx,
            settings: project.evaluation.clone(),
            skills,
            cases: project
                .cases
                .iter()
                .map(|c| (c.id.clone(), c.clone()))
                .collect(),
            lease: Mutex::new(Some(lease)),
            driver: Mutex::new(None),
        });
        if let Ok(mut runs) = self.runs.lock() {
            runs.insert(project.id.clone(), handle.clone());
        }
        self.spawn_driver(&handle);
        handle
    }

    fn spawn_driver(&self, handle: &Arc<RunHandle>) {
        let task = tokio::spawn(drive(self.shared.clone(), handle.clone()));
        if let Ok(mut driver) = handle.driver.lock() {
            *driver = Some(task);
        }
    }

    // ─── Control surface ────────────────────────────────────────

    /// Build the skill×case matrix and begin dispatching.
    pub fn start(&self, project_id: &str) -> Result<RunProgress, SkillForgeError> {
        if let Some(existing) = self.handle(project_id) {
            if existing.lock().status.is_active() {
                return Err(SkillForgeError::already_running(project_id, "evaluation"));
            }
        }

        let project = self
            .catalog
            .project(project_id)?
            .ok_or_else(|| SkillForgeError::ProjectNotFound(project_id.to_string()))?;
        let lease = self.leases.acquire(project_id, Activity::Evaluation)?;
        let skills = self.resolve_skills(&project)?;

        let run = EvaluationRun::new(project_id, &project.skill_ids(), &project.case_ids());
        self.shared.persist("run", |s| s.insert_run(&run));
        info!(
            project_id,
            run_id = %run.id,
            total_tasks = run.total_tasks(),
            concurrency = project.evaluation.concurrency,
            "Evaluation run started"
        );

        let handle = self.launch(run, &project, skills, lease, Control::Running);
        let progress = handle.snapshot.borrow().clone();
        Ok(progress)
    }

    /// running → paused. In-flight tasks finish; nothing new is dispatched.
    pub fn pause(&self, project_id: &str) -> Result<RunProgress, SkillForgeError> {
        let handle = self
            .handle(project_id)
            .ok_or_else(|| SkillForgeError::not_running(project_id, "evaluation"))?;
        let progress = {
            let mut run = handle.lock();
            if run.status != RunStatus::Running {
                return Err(SkillForgeError::not_running(project_id, "evaluation"));
            }
            run.status = RunStatus::Paused;
            self.shared.persist("run", |s| s.update_run(&run));
            run.progress()
        };
        handle.control.send_replace(Control::Paused);
        handle.publish(progress.clone());
        info!(project_id, "Evaluation run paused");
        Ok(progress)
    }

    /// paused → running, continuing after the checkpoint.
    pub fn resume(&self, project_id: &str) -> Result<RunProgress, SkillForgeError> {
        let handle = self
            .handle(project_id)
            .ok_or_else(|| SkillForgeError::not_running(project_id, "evaluation"))?;
        let progress = {
            let mut run = handle.lock();
            if run.status != RunStatus::Paused {
                return Err(SkillForgeError::not_running(project_id, "evaluation"));
            }
            run.status = RunStatus::Running;
            self.shared.persist("run", |s| s.update_run(&run));
            run.progress()
        };
        handle.control.send_replace(Control::Running);
        if handle.driver_finished() {
            self.spawn_driver(&handle);
        }
        handle.publish(progress.clone());
        info!(project_id, checkpoint = ?progress.last_checkpoint, "Evaluation run resumed");
        Ok(progress)
    }

    /// running/paused → idle. In-flight evaluations are cancelled and their
    /// tasks return to pending.
    pub fn stop(&self, project_id: &str) -> Result<RunProgress, SkillForgeError> {
        let handle = self
            .handle(project_id)
            .ok_or_else(|| SkillForgeError::not_running(project_id, "evaluation"))?;
        let (progress, released) = {
            let mut run = handle.lock();
            if !run.status.is_active() {
                return Err(SkillForgeError::not_running(project_id, "evaluation"));
            }
            run.status = RunStatus::Idle;
            run.finished_at = Some(Utc::now());
            let released = run.release_in_flight();
            self.shared.persist("run", |s| s.update_tasks(&run));
            (run.progress(), released)
        };
        handle.control.send_replace(Control::Stopped);
        handle.set_lease(None);
        handle.publish(progress.clone());
        self.shared.emit(ProgressEvent::RunFinished {
            project_id: project_id.to_string(),
            progress: progress.clone(),
        });
        info!(project_id, cancelled = released, "Evaluation run stopped");
        Ok(progress)
    }

    /// Latest snapshot. Never blocks on the driver.
    pub fn get_progress(&self, project_id: &str) -> RunProgress {
        match self.handle(project_id) {
            Some(handle) => handle.snapshot.borrow().clone(),
            None => RunProgress::idle(project_id),
        }
    }

    /// Per-task results of the current (or most recent) run.
    pub fn get_results(&self, project_id: &str) -> Result<RunResults, SkillForgeError> {
        if let Some(handle) = self.handle(project_id) {
            let copy = handle.lock().clone();
            return Ok(RunResults::from_run(&copy));
        }
        if let Some(ref store) = self.shared.store {
            let s = store
                .lock()
                .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
            if let Some(run) = s.latest_run(project_id)? {
                return Ok(RunResults::from_run(&run));
            }
        }
        Ok(RunResults::empty(project_id))
    }

    /// Re-submit only the failed task(s) for `case_id`.
    pub fn retry_case(&self, project_id: &str, case_id: &str) -> Result<RunProgress, SkillForgeError> {
        let handle = self
            .handle(project_id)
            .ok_or_else(|| SkillForgeError::not_running(project_id, "evaluation"))?;
        let (progress, respawn) = {
            let mut run = handle.lock();
            if !matches!(
                run.status,
                RunStatus::Running | RunStatus::Paused | RunStatus::Completed
            ) {
                return Err(SkillForgeError::not_running(project_id, "evaluation"));
            }
            let has_failure = run
                .tasks
                .iter()
                .any(|t| t.case_id == case_id && t.status == TaskStatus::Failed);
            if !has_failure {
                return Err(SkillForgeError::CaseNotFailed {
                    case_id: case_id.to_string(),
                });
            }

            let respawn = run.status == RunStatus::Completed;
            if respawn {
                let lease = self.leases.acquire(project_id, Activity::Evaluation)?;
                handle.set_lease(Some(lease));
                run.status = RunStatus::Running;
                run.finished_at = None;
            }
            let requeued = run.requeue_failed_case(case_id);
            self.shared.persist("run", |s| s.update_tasks(&run));
            info!(project_id, case_id, requeued, "Retrying failed case");
            (run.progress(), respawn)
        };

        handle.publish(progress.clone());
        if respawn {
            handle.control.send_replace(Control::Running);
            self.spawn_driver(&handle);
        } else {
            // Wake the driver so it picks the re-queued tasks up.
            handle.control.send_modify(|_| {});
        }
        Ok(progress)
    }

    /// Wait until the run leaves running/paused and return the final snapshot.
    pub async fn wait(&self, project_id: &str) -> RunProgress {
        let Some(handle) = self.handle(project_id) else {
            return RunProgress::idle(project_id);
        };
        let mut rx = handle.snapshot.subscribe();
        let progress = match rx.wait_for(|p| !p.status.is_active()).await {
            Ok(p) => p.clone(),
            Err(_) => RunProgress::idle(project_id),
        };
        progress
    }

    /// Reload runs a previous process left running or paused.
    ///
    /// In-flight tasks go back to pending and the run comes back paused, so a
    /// later `resume` continues without re-executing resolved tasks.
    pub fn recover(&self) -> Result<usize, SkillForgeError> {
        let Some(store) = self.shared.store.clone() else {
            return Ok(0);
        };
        let runs = {
            let s = store
                .lock()
                .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
            s.load_active_runs()?
        };

        let mut restored = 0;
        for mut run in runs {
            let project_id = run.project_id.clone();
            let released = run.release_in_flight();

            let prepared = self
                .catalog
                .project(&project_id)
                .map_err(SkillForgeError::from)
                .and_then(|p| p.ok_or_else(|| SkillForgeError::ProjectNotFound(project_id.clone())))
                .and_then(|p| {
                    let skills = self.resolve_skills(&p)?;
                    let lease = self.leases.acquire(&project_id, Activity::Evaluation)?;
                    Ok((p, skills, lease))
                });

            match prepared {
                Ok((project, skills, lease)) => {
                    run.status = RunStatus::Paused;
                    self.shared.persist("run", |s| s.update_tasks(&run));
                    info!(
                        project_id = %project_id,
                        run_id = %run.id,
                        released,
                        checkpoint = ?run.last_checkpoint,
                        "Recovered interrupted evaluation run (paused)"
                    );
                    self.launch(run, &project, skills, lease, Control::Paused);
                    restored += 1;
                }
                Err(e) => {
                    warn!(project_id = %project_id, "Cannot recover evaluation run: {}", e);
                    run.status = RunStatus::Error;
                    run.finished_at = Some(Utc::now());
                    self.shared.persist("run", |s| s.update_tasks(&run));
                }
            }
        }
        Ok(restored)
    }

    /// Evaluate one skill document against `cases` outside any project run.
    ///
    /// Used by the iteration controller, which already holds the project.
    /// Cases are dispatched with the same concurrency, timeout and retry policy
    /// as run tasks. Fails only if every case fails.
    pub async fn evaluate_candidate(
        &self,
        content: &str,
        cases: &[BaselineCase],
        settings: &EvaluationConfig,
    ) -> Result<EvaluationOutcome, EvaluatorError> {
        let evaluator = self.shared.evaluator.as_ref();
        let results: Vec<(u32, TaskResolution)> = futures::stream::iter(cases.iter().cloned())
            .map(|case| async move {
                evaluate_isolated(evaluator, content, std::slice::from_ref(&case), settings).await
            })
            .buffered(settings.concurrency.max(1))
            .collect()
            .await;

        let mut outcomes = Vec::new();
        let mut failed = 0;
        let mut last_error = None;
        for (_, resolution) in results {
            match resolution {
                TaskResolution::Succeeded(outcome) => outcomes.push(outcome),
                TaskResolution::Failed(e) => {
                    failed += 1;
                    last_error = Some(e);
                }
            }
        }

        let refs: Vec<&EvaluationOutcome> = outcomes.iter().collect();
        match EvaluationOutcome::mean(&refs) {
            Some(mut aggregate) => {
                aggregate.failed_cases += failed;
                Ok(aggregate)
            }
            None => Err(last_error.unwrap_or_else(|| {
                EvaluatorError::CliExecutionError("no baseline cases to evaluate".into())
            })),
        }
    }
}

// ─── Driver ─────────────────────────────────────────────────────────

async fn drive(shared: Shared, handle: Arc<RunHandle>) {
    let mut control_rx = handle.control.subscribe();
    let mut in_flight: JoinSet<(usize, u32, TaskResolution)> = JoinSet::new();
    let concurrency = handle.settings.concurrency.max(1);

    loop {
        let control = *control_rx.borrow_and_update();
        if control == Control::Stopped {
            in_flight.abort_all();
            return;
        }

        if control == Control::Running {
            while in_flight.len() < concurrency {
                let claimed = {
                    let mut run = handle.lock();
                    if run.status != RunStatus::Running {
                        None
                    } else {
                        run.claim_next().map(|i| (i, run.tasks[i].clone()))
                    }
                };
                let Some((index, task)) = claimed else { break };

                let content = handle.skills.get(&task.skill_id).cloned();
                let case = handle.cases.get(&task.case_id).cloned();
                let (Some(content), Some(case)) = (content, case) else {
                    let missing = EvaluatorError::CliExecutionError(format!(
                        "task {} references an unknown skill or case",
                        task.id
                    ));
                    resolve(&shared, &handle, index, 0, TaskResolution::Failed(missing));
                    continue;
                };

                let evaluator = shared.evaluator.clone();
                let settings = handle.settings.clone();
                debug!(task_id = %task.id, "Dispatching task");
                in_flight.spawn(async move {
                    let (attempts, resolution) = evaluate_isolated(
                        evaluator.as_ref(),
                        &content,
                        std::slice::from_ref(&case),
                        &settings,
                    )
                    .await;
                    (index, attempts, resolution)
                });
            }
        }

        if in_flight.is_empty() {
            if control == Control::Running && finish(&shared, &handle) {
                return;
            }
            if control_rx.changed().await.is_err() {
                return;
            }
            continue;
        }

        tokio::select! {
            joined = in_flight.join_next() => {
                if let Some(Ok((index, attempts, resolution))) = joined {
                    resolve(&shared, &handle, index, attempts, resolution);
                }
            }
            changed = control_rx.changed() => {
                if changed.is_err() {
                    in_flight.abort_all();
                    return;
                }
            }
        }
    }
}

fn resolve(
    shared: &Shared,
    handle: &RunHandle,
    index: usize,
    attempts: u32,
    resolution: TaskResolution,
) {
    let (progress, task_id, status) = {
        let mut run = handle.lock();
        if !run.record(index, attempts, resolution) {
            debug!(index, "Discarding result for a task no longer in flight");
            return;
        }
        shared.persist("task", |s| s.record_task(&run, index));
        let task = &run.tasks[index];
        (run.progress(), task.id.clone(), task.status)
    };

    if status == TaskStatus::Failed {
        warn!(project_id = %progress.project_id, task_id = %task_id, "Task failed after retries");
    }
    handle.publish(progress.clone());
    shared.emit(ProgressEvent::TaskResolved {
        project_id: progress.project_id.clone(),
        task_id,
        status,
        progress,
    });
}

/// Mark the run completed if every task has resolved. Returns true if it did.
fn finish(shared: &Shared, handle: &RunHandle) -> bool {
    let progress = {
        let mut run = handle.lock();
        if run.status != RunStatus::Running || !run.all_resolved() {
            return false;
        }
        run.status = RunStatus::Completed;
        run.finished_at = Some(Utc::now());
        shared.persist("run", |s| s.update_run(&run));
        run.progress()
    };

    handle.set_lease(None);
    handle.publish(progress.clone());
    info!(
        project_id = %progress.project_id,
        completed = progress.completed_tasks,
        failed = progress.failed_tasks,
        "Evaluation run completed"
    );
    shared.emit(ProgressEvent::RunFinished {
        project_id: progress.project_id.clone(),
        progress,
    });
    true
}

fn retry_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(10);
    Duration::from_millis(base_ms.saturating_mul(factor).min(MAX_RETRY_DELAY_MS))
}

/// `evaluate_with_retry`, reporting a panicking evaluator as a failed task.
async fn evaluate_isolated(
    evaluator: &dyn Evaluator,
    content: &str,
    cases: &[BaselineCase],
    settings: &EvaluationConfig,
) -> (u32, TaskResolution) {
    AssertUnwindSafe(evaluate_with_retry(evaluator, content, cases, settings))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            error!("Evaluator panicked");
            (
                1,
                TaskResolution::Failed(EvaluatorError::CliExecutionError(
                    "evaluator panicked".into(),
                )),
            )
        })
}

/// Evaluate with the per-attempt timeout, retrying up to `retry_count` times.
///
/// Returns the number of attempts made and the final resolution.
pub(crate) async fn evaluate_with_retry(
    evaluator: &dyn Evaluator,
    content: &str,
    cases: &[BaselineCase],
    settings: &EvaluationConfig,
) -> (u32, TaskResolution) {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = if settings.timeout_seconds == 0 {
            evaluator.evaluate(content, cases).await
        } else {
            let limit = Duration::from_secs(settings.timeout_seconds);
            match tokio::time::timeout(limit, evaluator.evaluate(content, cases)).await {
                Ok(result) => result,
                Err(_) => Err(EvaluatorError::CliExecutionError(format!(
                    "timed out after {}s",
                    settings.timeout_seconds
                ))),
            }
        };

        match result {
            Ok(outcome) => return (attempts, TaskResolution::Succeeded(outcome)),
            Err(e) if e.is_retriable() && attempts <= settings.retry_count => {
                let delay = retry_delay(settings.retry_delay_ms, attempts);
                warn!(
                    attempt = attempts,
                    code = e.code(),
                    delay_ms = delay.as_millis() as u64,
                    "Evaluator failed, retrying: {}",
                    e.message()
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return (attempts, TaskResolution::Failed(e)),
        }
    }
}
