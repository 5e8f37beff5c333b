// src/recompose/command.rs — External CLI recomposer
//
// Writes the request as JSON on stdin; stdout is the candidate document.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{RecomposeRequest, Recomposer};
use crate::util::truncate_str;

pub struct CommandRecomposer {
    command: String,
    args: Vec<String>,
}

impl CommandRecomposer {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl Recomposer for CommandRecomposer {
    async fn generate(&self, request: &RecomposeRequest<'_>) -> anyhow::Result<String> {
        let program = which::which(&self.command)
            .map_err(|e| anyhow::anyhow!("recompose command '{}' not found: {}", self.command, e))?;

        let mut child = Command::new(program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let payload = serde_json::to_vec(request)?;
        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (_, output) = tokio::join!(write, child.wait_with_output());
        let output = output?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "recompose command '{}' failed: {}",
                self.command,
                truncate_str(stderr.trim(), 500)
            );
        }

        let content = String::from_utf8_lossy(&output.stdout).into_owned();
        if content.trim().is_empty() {
            anyhow::bail!("recompose command '{}' produced no content", self.command);
        }
        Ok(content)
    }
}
