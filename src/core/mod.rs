// src/core/mod.rs — Evaluation runs and the iteration engine

pub mod iteration;
pub mod leases;
pub mod plateau;
pub mod projection;
pub mod run_controller;
pub mod strategy;
pub mod types;

pub use iteration::IterationController;
pub use leases::{Activity, ProjectLeases};
pub use run_controller::EvaluationRunController;
