// src/cli/mod.rs — CLI definition (clap derive)

pub mod progress;
pub mod run;

use clap::{Parser, Subcommand};

use crate::core::types::IterationMode;

#[derive(Parser)]
#[command(
    name = "skillforge",
    about = "Evaluate skill documents and search for better variants",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress progress output (only emit the final summary)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate every skill of a project against its baseline
    Eval {
        project: String,
        /// Resume a run left paused by an interrupted process
        #[arg(long)]
        resume: bool,
    },
    /// Search for an improved variant of a seed skill
    Iterate {
        project: String,
        /// Seed skill id
        #[arg(long)]
        seed: String,
        /// Maximum rounds
        #[arg(short, long)]
        rounds: Option<u32>,
        /// Stop once a round's winner reaches this score
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Candidates per round
        #[arg(short, long)]
        beam: Option<usize>,
        /// Search mode (standard, explore, adaptive)
        #[arg(short, long)]
        mode: Option<IterationMode>,
        /// Improvement below this counts as a plateau round
        #[arg(long)]
        plateau_threshold: Option<f64>,
        /// Plateau rounds before escalating strategy
        #[arg(long)]
        escape_after: Option<u32>,
        /// Section heading that must never be changed (repeatable)
        #[arg(long = "keep")]
        keep_sections: Vec<String>,
        /// Upper bound on section edits per candidate
        #[arg(long)]
        max_changes: Option<usize>,
    },
    /// Serve the HTTP control surface
    Serve {
        /// Port (overrides [api].port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print the most recent iteration report and exploration log
    Report {
        project: String,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}
