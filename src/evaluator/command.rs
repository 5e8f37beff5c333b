// src/evaluator/command.rs — External CLI evaluator
//
// Spawns the configured evaluator command, writes a JSON request on stdin and
// parses the JSON result from stdout. The child is killed if the future is
// dropped, so aborting a task cancels the evaluation.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::parser::parse_evaluator_output;
use super::{EvaluationOutcome, Evaluator};
use crate::infra::config::EvaluatorConfig;
use crate::infra::errors::EvaluatorError;
use crate::project::BaselineCase;
use crate::util::truncate_str;

#[derive(Serialize)]
struct EvaluationRequest<'a> {
    skill: &'a str,
    cases: &'a [BaselineCase],
}

/// Evaluator backed by an external process.
pub struct CommandEvaluator {
    command: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandEvaluator {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir: None,
        }
    }

    pub fn from_config(config: &EvaluatorConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Whether the evaluator binary can be found on PATH.
    pub fn is_available(&self) -> bool {
        which::which(&self.command).is_ok()
    }
}

#[async_trait]
impl Evaluator for CommandEvaluator {
    async fn evaluate(
        &self,
        skill_content: &str,
        cases: &[BaselineCase],
    ) -> Result<EvaluationOutcome, EvaluatorError> {
        let program = which::which(&self.command).map_err(|e| {
            EvaluatorError::CliNotAvailable(format!("'{}': {}", self.command, e))
        })?;

        let mut cmd = Command::new(program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            EvaluatorError::CliNotAvailable(format!("failed to spawn '{}': {}", self.command, e))
        })?;

        let payload = serde_json::to_vec(&EvaluationRequest {
            skill: skill_content,
            cases,
        })
        .map_err(|e| EvaluatorError::CliExecutionError(format!("request encoding: {e}")))?;

        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };

        let (write_result, output) = tokio::join!(write, child.wait_with_output());
        let output = output
            .map_err(|e| EvaluatorError::CliExecutionError(format!("wait failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EvaluatorError::CliExecutionError(format!(
                "'{}' exited with {}: {}",
                self.command,
                output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".into()),
                truncate_str(stderr.trim(), 500)
            )));
        }

        if let Err(e) = write_result {
            // The child may legitimately close stdin early; only note it.
            tracing::debug!(command = %self.command, "Evaluator stdin write failed: {}", e);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_evaluator_output(&stdout, cases.len())
    }
}
