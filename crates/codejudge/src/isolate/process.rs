//! Process spawning and I/O for Isolate
//!
//! Every isolate invocation is raced against a host-side deadline and the
//! caller's cancellation token. The isolate process is killed when either
//! fires, so a wedged sandbox never holds a worker forever.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::isolate::IsolateError;
use crate::isolate::box_manager::IsolateBox;
use crate::isolate::command::IsolateCommand;
use crate::isolate::meta::MetaFile;
use crate::types::{ExecutionOutcome, ExecutionStatus};

/// How much of isolate's own stderr is kept for diagnostics
const DIAGNOSTIC_LIMIT: u64 = 16 * 1024;

/// Host-side controls for one sandboxed run
#[derive(Debug, Clone, Copy)]
pub struct RunOptions<'a> {
    /// Longest the host waits for isolate before killing it
    pub deadline: Duration,
    /// Bytes of stdout and stderr read back from the box
    pub capture_limit: usize,
    pub cancel: &'a CancellationToken,
}

enum Waited {
    Exited(std::io::Result<std::process::ExitStatus>),
    DeadlinePassed,
    Cancelled,
}

/// Run isolate and load its meta file.
///
/// Returns `Ok(None)` when the host deadline passed and isolate was killed.
async fn run_isolate_command(
    args: Vec<String>,
    meta_path: &Path,
    options: &RunOptions<'_>,
) -> Result<Option<MetaFile>, IsolateError> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| IsolateError::CommandFailed("empty command arguments".to_owned()))?;

    // A stale meta file from the previous run must never be mistaken for this one.
    match tokio::fs::remove_file(meta_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut child = Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(IsolateError::SpawnFailed)?;
    let diagnostics = tokio::spawn(read_diagnostics(child.stderr.take()));

    let waited = tokio::select! {
        status = child.wait() => Waited::Exited(status),
        _ = tokio::time::sleep(options.deadline) => Waited::DeadlinePassed,
        _ = options.cancel.cancelled() => Waited::Cancelled,
    };

    match waited {
        Waited::Exited(status) => {
            let status = status?;
            if tokio::fs::try_exists(meta_path).await? {
                return Ok(Some(MetaFile::load(meta_path).await?));
            }
            let stderr = diagnostics.await.unwrap_or_default();
            let stderr = String::from_utf8_lossy(&stderr);
            Err(IsolateError::CommandFailed(format!(
                "isolate exited with {status} without a meta file: {}",
                stderr.trim()
            )))
        }
        Waited::DeadlinePassed => {
            warn!(deadline = ?options.deadline, "host deadline passed, killing isolate");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill isolate");
            }
            Ok(None)
        }
        Waited::Cancelled => {
            debug!("run cancelled, killing isolate");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill isolate");
            }
            Err(IsolateError::Cancelled)
        }
    }
}

async fn read_diagnostics(stderr: Option<impl AsyncRead + Unpin>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(stderr) = stderr {
        let _ = stderr.take(DIAGNOSTIC_LIMIT).read_to_end(&mut buf).await;
    }
    buf
}

/// Convert isolate's verdict into an outcome, treating `XX` as an engine fault
fn outcome_from(meta: Option<MetaFile>, started: Instant) -> Result<ExecutionOutcome, IsolateError> {
    let Some(meta) = meta else {
        return Ok(ExecutionOutcome::host_timeout(
            started.elapsed().as_secs_f64(),
        ));
    };

    let outcome = meta.to_outcome();
    if outcome.status == ExecutionStatus::InternalError {
        return Err(IsolateError::Internal(
            outcome.message.unwrap_or_else(|| "no message".to_owned()),
        ));
    }
    Ok(outcome)
}

/// Run a program with batch I/O.
///
/// The input is written to `stdin.txt`; stdout and stderr are captured into
/// files in the box and read back up to the capture limit.
#[instrument(skip_all, fields(box_id = sandbox.id()))]
pub async fn run_batch(
    sandbox: &IsolateBox,
    command: IsolateCommand,
    stdin_data: &[u8],
    options: RunOptions<'_>,
) -> Result<ExecutionOutcome, IsolateError> {
    let meta_path = sandbox.meta_path();

    // Isolate needs a stdin file even when the input is empty.
    sandbox.write_file("stdin.txt", stdin_data).await?;

    let args = command
        .meta_file(&meta_path)
        .stdin(sandbox.sandbox_path("stdin.txt")?)
        .stdout(sandbox.sandbox_path("stdout.txt")?)
        .stderr(sandbox.sandbox_path("stderr.txt")?)
        .build();
    debug!(?args, "running isolate command");

    let started = Instant::now();
    let meta = run_isolate_command(args, &meta_path, &options).await?;
    let mut outcome = outcome_from(meta, started)?;

    let (stdout, truncated) = sandbox
        .read_capped("stdout.txt", options.capture_limit)
        .await?;
    let (stderr, _) = sandbox
        .read_capped("stderr.txt", options.capture_limit)
        .await?;
    outcome.stdout = stdout;
    outcome.stdout_truncated = truncated;
    outcome.stderr = stderr;

    debug!(
        status = ?outcome.status,
        time = outcome.time,
        wall_time = outcome.wall_time,
        memory = outcome.memory,
        "execution complete"
    );

    Ok(outcome)
}

/// Run a command and collect its combined output as text (compiler feedback)
#[instrument(skip_all, fields(box_id = sandbox.id()))]
pub async fn run_with_output(
    sandbox: &IsolateBox,
    command: IsolateCommand,
    options: RunOptions<'_>,
) -> Result<(ExecutionOutcome, String), IsolateError> {
    let meta_path = sandbox.meta_path();
    sandbox.write_file("compile_stdin.txt", b"").await?;

    let args = command
        .meta_file(&meta_path)
        .stdin(sandbox.sandbox_path("compile_stdin.txt")?)
        .stdout(sandbox.sandbox_path("compile_stdout.txt")?)
        .stderr(sandbox.sandbox_path("compile_stderr.txt")?)
        .build();
    debug!(?args, "running compile command");

    let started = Instant::now();
    let meta = run_isolate_command(args, &meta_path, &options).await?;
    let outcome = outcome_from(meta, started)?;

    let (stdout, _) = sandbox
        .read_capped("compile_stdout.txt", options.capture_limit)
        .await?;
    let (stderr, _) = sandbox
        .read_capped("compile_stderr.txt", options.capture_limit)
        .await?;

    let stdout = String::from_utf8_lossy(&stdout);
    let stderr = String::from_utf8_lossy(&stderr);
    let mut compiler_output = stdout.into_owned();
    if !compiler_output.is_empty() && !stderr.is_empty() {
        compiler_output.push('\n');
    }
    compiler_output.push_str(&stderr);

    Ok((outcome, compiler_output))
}
