//! Execution step
//!
//! Each run gets a box holding nothing but the submission's artifact and its
//! input. The box is emptied again afterwards, whatever the outcome.

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::{Config, Language};
use crate::isolate::{
    IsolateAction, IsolateBox, IsolateCommand, RunOptions, SANDBOX_ROOT, resolve_command,
    run_batch, validate_mounts,
};
use crate::runner::ExecuteError;
use crate::types::{Artifact, ExecutionOutcome, ResourceLimits};

/// Run an artifact once with batch I/O under `limits`
#[instrument(skip_all, fields(box_id = sandbox.id(), language = %language.name))]
pub async fn execute(
    sandbox: &IsolateBox,
    config: &Config,
    language: &Language,
    artifact: &Artifact,
    input: &[u8],
    limits: &ResourceLimits,
    cancel: &CancellationToken,
) -> Result<ExecutionOutcome, ExecuteError> {
    let result =
        execute_in_scratch(sandbox, config, language, artifact, input, limits, cancel).await;

    if let Err(e) = sandbox.reset().await {
        warn!(error = %e, "failed to reset box after run");
    }

    result
}

async fn execute_in_scratch(
    sandbox: &IsolateBox,
    config: &Config,
    language: &Language,
    artifact: &Artifact,
    input: &[u8],
    limits: &ResourceLimits,
    cancel: &CancellationToken,
) -> Result<ExecutionOutcome, ExecuteError> {
    let entry = match language.compile {
        Some(ref compile) => compile.output_name.clone(),
        None => language.source_name(),
    };
    if !artifact.contains(&entry) {
        return Err(ExecuteError::NotStarted(format!(
            "artifact has no '{entry}'"
        )));
    }

    sandbox.reset().await?;
    sandbox.restore(artifact).await?;

    let mut run_cmd = language.run_command();
    resolve_command(&mut run_cmd)?;
    validate_mounts(&config.sandbox_mounts)?;
    validate_mounts(&language.run.mounts)?;
    debug!(?run_cmd, "executing program");

    let command = IsolateCommand::new(sandbox.isolate_path(), sandbox.id())
        .action(IsolateAction::Run)
        .cgroup(sandbox.cgroup())
        .limits(limits.clone())
        .working_dir(SANDBOX_ROOT)
        .env("PATH", &language.run.path)
        .envs(&language.run.env)
        .mounts(&config.sandbox_mounts)
        .mounts(&language.run.mounts)
        .command(run_cmd);

    let options = RunOptions {
        deadline: limits.host_deadline(),
        capture_limit: config.judge.capture_limit_bytes,
        cancel,
    };
    let mut outcome = run_batch(sandbox, command, input, options).await?;

    if let Some(memory_limit) = limits.memory_limit {
        outcome.detect_memory_limit(memory_limit, sandbox.cgroup());
    }

    debug!(
        status = ?outcome.status,
        limit = ?outcome.limit_exceeded,
        exit_code = ?outcome.exit_code,
        "run complete"
    );

    Ok(outcome)
}
