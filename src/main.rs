// src/main.rs — SkillForge entry point

use clap::Parser;

use skillforge::cli::run::{self, Runtime};
use skillforge::cli::{Cli, Commands};
use skillforge::infra::config::Config;
use skillforge::infra::{logger, paths};
use skillforge::recompose::RetentionRules;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Respects RUST_LOG
    logger::init_logging(if cli.verbose { "debug" } else { "warn" });

    // Falls back to defaults if no config.toml
    let config = if let Some(ref path) = cli.config {
        Config::load_from(std::path::Path::new(path))?
    } else {
        Config::load()?
    };
    paths::ensure_dirs().await?;

    let rt = Runtime::init(config)?;

    match cli.command {
        Commands::Eval { project, resume } => run::run_eval(&rt, &project, resume, cli.quiet).await,
        Commands::Iterate {
            project,
            seed,
            rounds,
            threshold,
            beam,
            mode,
            plateau_threshold,
            escape_after,
            keep_sections,
            max_changes,
        } => {
            let mut params = rt.config.iteration.params(&seed);
            if let Some(v) = rounds {
                params.max_rounds = v;
            }
            if threshold.is_some() {
                params.stop_threshold = threshold;
            }
            if let Some(v) = beam {
                params.beam_width = v;
            }
            if let Some(v) = plateau_threshold {
                params.plateau_threshold = v;
            }
            if let Some(v) = escape_after {
                params.plateau_rounds_before_escape = v;
            }
            params.retention_rules = RetentionRules {
                keep_sections,
                max_changes,
            };
            params.mode = mode;
            run::run_iterate(&rt, &project, params, cli.quiet).await
        }
        Commands::Serve { port } => run::run_serve(&rt, port).await,
        Commands::Report { project, json } => run::run_report(&rt, &project, json),
    }
}
