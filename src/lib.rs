// src/lib.rs — Library root for SkillForge

pub mod api;
pub mod cli;
pub mod core;
pub mod evaluator;
pub mod infra;
pub mod project;
pub mod recompose;
pub mod store;
pub mod util;
