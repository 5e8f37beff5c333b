// src/cli/run.rs — Subcommand execution

use std::sync::{Arc, Mutex};

use crate::api::{self, ApiState};
use crate::core::projection::{ExplorationLog, IterationReport};
use crate::core::types::IterationParams;
use crate::core::{EvaluationRunController, IterationController, ProjectLeases};
use crate::evaluator::CommandEvaluator;
use crate::infra::config::{Config, RecomposeKind};
use crate::infra::paths;
use crate::project::FsCatalog;
use crate::recompose::{CommandRecomposer, Recomposer, SectionRecomposer};
use crate::store::{self, Store};
use crate::util::{format_delta, format_score, truncate_str};

use super::progress;

/// Controllers wired to the configured workspace, evaluator and database.
pub struct Runtime {
    pub config: Config,
    pub runs: Arc<EvaluationRunController>,
    pub iterations: Arc<IterationController>,
    pub store: Option<Arc<Mutex<Store>>>,
}

impl Runtime {
    pub fn init(config: Config) -> anyhow::Result<Self> {
        let workspace = config.workspace_dir();
        tracing::debug!("Workspace: {}", workspace.display());
        let catalog = Arc::new(
            FsCatalog::new(&workspace)
                .with_defaults(config.evaluation.clone(), config.iteration.mode),
        );

        let evaluator = CommandEvaluator::from_config(&config.evaluator).with_working_dir(&workspace);
        if !evaluator.is_available() {
            tracing::warn!(
                "Evaluator '{}' not found on PATH; tasks will fail with CLI_NOT_AVAILABLE",
                config.evaluator.command
            );
        }

        let recomposer: Arc<dyn Recomposer> = match config.recompose.kind {
            RecomposeKind::Sections => Arc::new(SectionRecomposer::new(config.recompose.seed)),
            RecomposeKind::Command => Arc::new(CommandRecomposer::new(
                config.recompose.command.clone().unwrap_or_default(),
                config.recompose.args.clone(),
            )),
        };

        let store = init_store().map(|s| Arc::new(Mutex::new(s)));
        let leases = ProjectLeases::new();

        let mut runs = EvaluationRunController::new(catalog.clone(), Arc::new(evaluator), leases.clone());
        if let Some(ref s) = store {
            runs = runs.with_store(s.clone());
        }
        let runs = Arc::new(runs);

        let mut iterations = IterationController::new(catalog, runs.clone(), recomposer, leases)
            .with_strategy_table(config.strategy);
        if let Some(ref s) = store {
            iterations = iterations.with_store(s.clone());
        }
        let iterations = Arc::new(iterations);

        let recovered = runs.recover()?;
        if recovered > 0 {
            tracing::info!("{} interrupted evaluation run(s) restored as paused", recovered);
        }
        iterations.recover()?;

        Ok(Self {
            config,
            runs,
            iterations,
            store,
        })
    }
}

/// Open the database, running migrations if needed.
/// Returns None if it can't be opened; runs then simply aren't durable.
fn init_store() -> Option<Store> {
    match store::open(&paths::db_path()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!("Could not open database: {}. Progress will not be persisted.", e);
            None
        }
    }
}

/// `skillforge eval <project>`
pub async fn run_eval(rt: &Runtime, project_id: &str, resume: bool, quiet: bool) -> anyhow::Result<()> {
    let printer = (!quiet).then(|| progress::follow(rt.runs.subscribe(), project_id.to_string()));

    let started = if resume {
        rt.runs.resume(project_id)
    } else {
        rt.runs.start(project_id)
    };
    let started = match started {
        Ok(p) => p,
        Err(e) if e.code() == "ALREADY_RUNNING" => {
            anyhow::bail!("{e}. Pass --resume to continue the interrupted run.")
        }
        Err(e) => return Err(e.into()),
    };
    if !quiet {
        eprintln!(
            "[eval] {} task(s), {} already resolved",
            started.total_tasks,
            started.completed_tasks + started.failed_tasks
        );
    }

    let final_progress = tokio::select! {
        p = rt.runs.wait(project_id) => p,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("[eval] interrupted, stopping");
            rt.runs.stop(project_id)?
        }
    };
    if let Some(p) = printer {
        p.abort();
    }

    let results = rt.runs.get_results(project_id)?;
    println!(
        "{}: {} ({} succeeded, {} failed of {})",
        project_id,
        final_progress.status,
        final_progress.completed_tasks,
        final_progress.failed_tasks,
        final_progress.total_tasks,
    );
    for skill in &results.skills {
        println!(
            "  {:<32} avg={:>6}  ok={} failed={}",
            truncate_str(&skill.skill_id, 32),
            format_score(skill.avg_score),
            skill.succeeded,
            skill.failed,
        );
    }
    let failed = results.failed_cases();
    if !failed.is_empty() {
        println!("  failed cases: {}", failed.join(", "));
    }
    Ok(())
}

/// `skillforge iterate <project> --seed ...`
pub async fn run_iterate(
    rt: &Runtime,
    project_id: &str,
    params: IterationParams,
    quiet: bool,
) -> anyhow::Result<()> {
    let printer =
        (!quiet).then(|| progress::follow(rt.iterations.subscribe(), project_id.to_string()));

    rt.iterations.start(project_id, params)?;

    let wait = rt.iterations.wait(project_id);
    tokio::pin!(wait);
    let final_progress = tokio::select! {
        p = &mut wait => p,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("[iterate] stop requested; finishing the current round");
            rt.iterations.stop(project_id)?;
            wait.await
        }
    };
    if let Some(p) = printer {
        p.abort();
    }

    println!(
        "{}: {} ({} round(s)), best={}{}",
        project_id,
        final_progress.status,
        final_progress.current_round,
        format_score(final_progress.best_avg_score),
        final_progress
            .best_round
            .map(|r| format!(" at round {r}"))
            .unwrap_or_default(),
    );
    if let Some(report) = rt.iterations.get_report(project_id)? {
        if let Some(best) = report.best {
            println!("best skill: {}", best.skill_ref);
        }
    }
    Ok(())
}

/// `skillforge serve`
pub async fn run_serve(rt: &Runtime, port: Option<u16>) -> anyhow::Result<()> {
    let mut api_config = rt.config.api.clone();
    if let Some(port) = port {
        api_config.port = port;
    }
    let state = ApiState::new(rt.runs.clone(), rt.iterations.clone())
        .with_token(api_config.token.clone())
        .with_iteration_defaults(rt.config.iteration.clone());
    api::start_server(&api_config, state).await
}

/// `skillforge report <project>`
pub fn run_report(rt: &Runtime, project_id: &str, json: bool) -> anyhow::Result<()> {
    let report = rt.iterations.get_report(project_id)?;
    let log = rt.iterations.get_exploration_log(project_id)?;

    if json {
        let value = serde_json::json!({ "report": report, "log": log });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let Some(report) = report else {
        println!("No iteration recorded for '{project_id}'.");
        return Ok(());
    };
    print!("{}", format_report(&report, &log));
    Ok(())
}

fn format_report(report: &IterationReport, log: &ExplorationLog) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} [{}] {}: {} round(s)\n",
        report.project_id,
        report.mode,
        report
            .stop_reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| report.status.to_string()),
        report.rounds,
    ));
    out.push_str(&format!(
        "seed={} best={} improvement={} peak_plateau={}\n",
        format_score(report.seed_score),
        format_score(report.best.as_ref().map(|b| b.avg_score)),
        format_delta(report.total_improvement),
        report.peak_plateau_level,
    ));
    for round in &log.rounds {
        out.push_str(&format!(
            "  round {:>3}  {:<16} plateau={}  winner={:>6}  delta={:>6}\n",
            round.round,
            round.strategy.as_str(),
            round.plateau_level,
            format_score(round.winner_score()),
            format_delta(round.score_delta),
        ));
        for c in &round.candidates {
            let outcome = match (&c.avg_score, &c.error) {
                (Some(s), _) => format_score(Some(*s)),
                (None, Some(e)) => e.code.clone(),
                (None, None) => "-".into(),
            };
            out.push_str(&format!(
                "    {} c{} {:<16} {}\n",
                if c.won { "*" } else { " " },
                c.index,
                c.strategy.as_str(),
                outcome,
            ));
        }
    }
    out
}
