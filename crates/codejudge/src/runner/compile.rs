//! Compilation step
//!
//! Runs the language's compiler once per submission under its own timeout and
//! snapshots what it produced into an [`Artifact`].

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::language::DEFAULT_SANDBOX_PATH;
use crate::config::{CompileConfig, Config, Language};
use crate::isolate::{
    IsolateAction, IsolateBox, IsolateCommand, RunOptions, SANDBOX_ROOT, resolve_command,
    run_with_output, validate_mounts,
};
use crate::runner::CompileError;
use crate::types::{Artifact, ExecutionOutcome, ExecutionStatus, ResourceLimits};

/// Files the compile step uses for I/O; never part of the artifact
pub const COMPILE_CAPTURE_FILES: [&str; 3] = [
    "compile_stdin.txt",
    "compile_stdout.txt",
    "compile_stderr.txt",
];

#[derive(Debug, Clone)]
pub struct CompileResult {
    /// Whether the compiler succeeded and produced its output file
    pub success: bool,

    /// Outcome of the compiler process
    pub execution: ExecutionOutcome,

    /// Compiler diagnostics (stdout and stderr combined)
    pub output: String,

    /// Files left in the box by a successful compile
    pub artifact: Artifact,
}

fn base_compile_limits() -> ResourceLimits {
    ResourceLimits {
        time_limit: Some(30.0),
        wall_time_limit: Some(60.0),
        memory_limit: Some(512 * ResourceLimits::MB),
        max_processes: Some(10),
        max_output: Some(64 * ResourceLimits::MB),
        ..Default::default()
    }
}

/// Limits for a compile run: base limits, then the language's compile limits,
/// then the compile timeout for both CPU and wall time
pub fn compile_limits(compile: &CompileConfig) -> ResourceLimits {
    let limits = match compile.limits {
        Some(ref lang) => base_compile_limits().with_overrides(lang),
        None => base_compile_limits(),
    };
    limits.with_time_limit(compile.timeout_ms as f64 / 1000.0)
}

/// Compile source code in an isolate box.
///
/// The box is emptied before and after; a successful compile's files are
/// returned in [`CompileResult::artifact`].
#[instrument(skip_all, fields(box_id = sandbox.id(), language = %language.name))]
pub async fn compile(
    sandbox: &IsolateBox,
    config: &Config,
    language: &Language,
    source: &[u8],
    cancel: &CancellationToken,
) -> Result<CompileResult, CompileError> {
    let compile_config = language
        .compile
        .as_ref()
        .ok_or_else(|| CompileError::NotCompiled(language.name.clone()))?;

    let result = compile_in_box(sandbox, config, compile_config, source, cancel).await;

    if let Err(e) = sandbox.reset().await {
        warn!(error = %e, "failed to reset box after compile");
    }

    result
}

async fn compile_in_box(
    sandbox: &IsolateBox,
    config: &Config,
    compile_config: &CompileConfig,
    source: &[u8],
    cancel: &CancellationToken,
) -> Result<CompileResult, CompileError> {
    sandbox.reset().await?;

    let source_name = &compile_config.source_name;
    sandbox.write_file(source_name, source).await?;
    debug!(source_name, "wrote source file");

    let limits = compile_limits(compile_config);
    let options = RunOptions {
        deadline: limits.host_deadline(),
        capture_limit: config.judge.capture_limit_bytes,
        cancel,
    };

    // isolate uses execve, not execvp
    let mut expanded_cmd = Language::expand_command(
        &compile_config.command,
        source_name,
        &compile_config.output_name,
    );
    resolve_command(&mut expanded_cmd)?;
    validate_mounts(&config.sandbox_mounts)?;

    let command = IsolateCommand::new(sandbox.isolate_path(), sandbox.id())
        .action(IsolateAction::Run)
        .cgroup(sandbox.cgroup())
        .limits(limits)
        .working_dir(SANDBOX_ROOT)
        .env("PATH", DEFAULT_SANDBOX_PATH)
        .envs(&compile_config.env)
        .mounts(&config.sandbox_mounts)
        .command(expanded_cmd);

    let (execution, mut output) = run_with_output(sandbox, command, options).await?;
    let mut success = execution.is_success();

    debug!(
        success,
        exit_code = ?execution.exit_code,
        status = ?execution.status,
        message = ?execution.message,
        "compilation complete"
    );

    if execution.status == ExecutionStatus::TimeLimitExceeded {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(&format!(
            "compilation exceeded the {} ms time limit",
            compile_config.timeout_ms
        ));
    } else if output.is_empty()
        && let Some(ref msg) = execution.message
    {
        output = msg.clone();
    }

    let mut artifact = Artifact::default();
    if success {
        let mut exclude: Vec<&str> = COMPILE_CAPTURE_FILES.to_vec();
        exclude.push("stdin.txt");
        artifact = sandbox.snapshot(&exclude).await?;

        if !artifact.contains(&compile_config.output_name) {
            success = false;
            output = format!(
                "compiler exited cleanly but produced no '{}'",
                compile_config.output_name
            );
        }
    }

    Ok(CompileResult {
        success,
        execution,
        output,
        artifact,
    })
}
