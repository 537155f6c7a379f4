//! Pre-flight Catch-up Tasks
//!
//! Before gathering knowledge, a run gives overdue periodic work (weekly or
//! monthly analyses, feed fetches) a chance to finish so the context is
//! fresh. Every task is best-effort: failures are logged and swallowed,
//! never abort the run.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Upper bound for a single catch-up command
pub const CATCH_UP_TIMEOUT: Duration = Duration::from_secs(600);

/// A best-effort task run before knowledge gathering
#[async_trait]
pub trait PreflightTask: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<()>;
}

/// Shell command task (`sh -c <command>`)
#[derive(Debug, Clone)]
pub struct CommandTask {
    command: String,
    timeout: Duration,
}

impl CommandTask {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: CATCH_UP_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl PreflightTask for CommandTask {
    fn name(&self) -> &str {
        &self.command
    }

    async fn run(&self) -> Result<()> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", self.command))?;

        let stderr = child.stderr.take();
        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status.context("failed to wait for catch-up command")?,
            Err(_) => bail!("timed out after {}s", self.timeout.as_secs()),
        };

        if !status.success() {
            let mut detail = String::new();
            if let Some(mut stderr) = stderr {
                use tokio::io::AsyncReadExt;
                let _ = stderr.read_to_string(&mut detail).await;
            }
            bail!("exited with {}: {}", status, detail.trim());
        }

        Ok(())
    }
}

/// Build tasks from configured catch-up commands
pub fn tasks_from_commands(commands: &[String]) -> Vec<Box<dyn PreflightTask>> {
    commands
        .iter()
        .filter(|c| !c.trim().is_empty())
        .map(|c| Box::new(CommandTask::new(c.clone())) as Box<dyn PreflightTask>)
        .collect()
}

/// Run every task, swallowing failures. Returns the number that failed.
pub async fn run_preflight(tasks: &[Box<dyn PreflightTask>]) -> usize {
    if tasks.is_empty() {
        debug!("No catch-up tasks configured");
        return 0;
    }

    info!("Running {} catch-up task(s)...", tasks.len());
    let mut failed = 0;
    for task in tasks {
        match task.run().await {
            Ok(()) => info!("Catch-up task '{}' complete", task.name()),
            Err(e) => {
                failed += 1;
                warn!("Catch-up task '{}' failed: {:#}", task.name(), e);
            }
        }
    }
    failed
}
