//! Runner backed by real child processes.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{CommandSpec, RunConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandResult, CommandRunner};

/// Runs commands as local child processes using tokio.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec, run_config: &RunConfig) -> RunnerResult<CommandResult> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }
        if spec.clear_env {
            cmd.env_clear();
        }
        cmd.envs(&spec.env);

        debug!("Executing {}", spec.display());

        let started_at = Utc::now();
        let start = Instant::now();

        let child = cmd.spawn().map_err(|source| RunnerError::SpawnFailed {
            program: spec.program.clone(),
            source,
        })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = if run_config.timeout_seconds > 0 {
            let deadline = Duration::from_secs(run_config.timeout_seconds);
            match tokio::time::timeout(deadline, child.wait_with_output()).await {
                Ok(output) => output?,
                Err(_) => {
                    warn!(
                        "{} exceeded {}s timeout, killed",
                        spec.display(),
                        run_config.timeout_seconds
                    );
                    return Err(RunnerError::Timeout(run_config.timeout_seconds));
                }
            }
        } else {
            child.wait_with_output().await?
        };

        let exit_code = output.status.code().unwrap_or(-1);
        debug!("{} exited with {}", spec.display(), exit_code);

        Ok(CommandResult {
            command: spec.display(),
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            started_at,
            finished_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
