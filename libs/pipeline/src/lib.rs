//! Update pipeline invocation.
//!
//! A verified deploy event triggers one pipeline run: fetch the latest
//! repository state, install dependencies, stop the running instance, then
//! start a fresh one detached from this process group. The first three steps
//! run to completion and gate the HTTP response; the start step deliberately
//! outlives the pipeline so the managed app keeps running after the stop
//! step's signals have landed.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::process::Command;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with code {code}: {stderr}")]
    Step {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("empty command for pipeline step")]
    EmptyCommand,
    #[error("pipeline timed out after {0:?}")]
    TimedOut(Duration),
}

/// Captured stdout/stderr of the waited pipeline steps.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait UpdatePipeline: Send + Sync {
    async fn invoke(&self) -> Result<PipelineOutput, PipelineError>;
}

/// Commands run by the production pipeline, in order. Each entry is an argv
/// vector executed directly, without a shell.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Working directory of the managed checkout.
    pub repo_dir: PathBuf,
    /// Fetch the latest repository state.
    pub fetch: Vec<String>,
    /// Install or update dependencies.
    pub install: Vec<String>,
    /// Terminate the currently running instance.
    pub stop: Vec<String>,
    /// Start a fresh instance, detached.
    pub start: Vec<String>,
    /// Optional bound on the waited steps.
    pub timeout: Option<Duration>,
}

/// Production pipeline: spawns the configured commands as child processes.
pub struct ProcessUpdatePipeline {
    config: PipelineConfig,
}

impl ProcessUpdatePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    fn command(&self, argv: &[String]) -> Result<Command, PipelineError> {
        let (program, args) = argv.split_first().ok_or(PipelineError::EmptyCommand)?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.config.repo_dir);
        Ok(cmd)
    }

    async fn run_waited_steps(&self) -> Result<PipelineOutput, PipelineError> {
        let mut combined = PipelineOutput::default();
        for argv in [&self.config.fetch, &self.config.install, &self.config.stop] {
            let rendered = argv.join(" ");
            tracing::debug!(command = %rendered, "running pipeline step");
            let output = self
                .command(argv)?
                .output()
                .await
                .map_err(|source| PipelineError::Spawn {
                    command: rendered.clone(),
                    source,
                })?;
            combined
                .stdout
                .push_str(&String::from_utf8_lossy(&output.stdout));
            combined
                .stderr
                .push_str(&String::from_utf8_lossy(&output.stderr));
            if !output.status.success() {
                return Err(PipelineError::Step {
                    command: rendered,
                    code: output.status.code().unwrap_or(-1),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                });
            }
        }
        Ok(combined)
    }

    fn spawn_detached(&self) -> Result<(), PipelineError> {
        let argv = &self.config.start;
        let mut cmd = self.command(argv)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // New process group, so the stop step's next run (and our own exit)
        // cannot take the fresh instance down with it.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.spawn().map_err(|source| PipelineError::Spawn {
            command: argv.join(" "),
            source,
        })?;
        tracing::debug!(command = %argv.join(" "), "started detached instance");
        Ok(())
    }
}

#[async_trait]
impl UpdatePipeline for ProcessUpdatePipeline {
    async fn invoke(&self) -> Result<PipelineOutput, PipelineError> {
        let output = match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, self.run_waited_steps())
                .await
                .map_err(|_| PipelineError::TimedOut(limit))??,
            None => self.run_waited_steps().await?,
        };
        self.spawn_detached()?;
        Ok(output)
    }
}

/// Fixed-outcome pipeline for tests: resolves to the configured result and
/// counts invocations.
#[derive(Clone)]
pub struct StaticUpdatePipeline {
    outcome: StaticOutcome,
    invocations: Arc<AtomicUsize>,
}

#[derive(Clone)]
enum StaticOutcome {
    Success(PipelineOutput),
    Failure { code: i32, stderr: String },
}

impl StaticUpdatePipeline {
    pub fn succeeding(stdout: &str) -> Self {
        Self {
            outcome: StaticOutcome::Success(PipelineOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(code: i32, stderr: &str) -> Self {
        Self {
            outcome: StaticOutcome::Failure {
                code,
                stderr: stderr.to_string(),
            },
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpdatePipeline for StaticUpdatePipeline {
    async fn invoke(&self) -> Result<PipelineOutput, PipelineError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            StaticOutcome::Success(output) => Ok(output.clone()),
            StaticOutcome::Failure { code, stderr } => Err(PipelineError::Step {
                command: "update pipeline".into(),
                code: *code,
                stderr: stderr.clone(),
            }),
        }
    }
}
