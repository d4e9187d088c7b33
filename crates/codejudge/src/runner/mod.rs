//! Sandboxed runner
//!
//! Compiles a submission once, then runs it against each input in a freshly
//! reset box. The [`Sandbox`] trait is the seam between the judging state
//! machine and isolate.

use std::future::Future;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use crate::runner::compile::{COMPILE_CAPTURE_FILES, CompileResult, compile, compile_limits};
pub use crate::runner::execute::execute;

mod compile;
mod execute;

use crate::config::{Config, Language};
use crate::isolate::{IsolateBox, IsolateError};
use crate::types::{Artifact, ExecutionOutcome, ResourceLimits};

/// Errors that occur during compilation.
///
/// A program that fails to compile is not an error; see
/// [`CompileResult::success`].
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("language '{0}' does not support compilation")]
    NotCompiled(String),

    #[error("isolate error: {0}")]
    Isolate(#[from] IsolateError),
}

impl CompileError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CompileError::Isolate(IsolateError::Cancelled))
    }
}

/// Errors that occur during execution
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("execution not started: {0}")]
    NotStarted(String),

    #[error("isolate error: {0}")]
    Isolate(#[from] IsolateError),
}

impl ExecuteError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecuteError::Isolate(IsolateError::Cancelled))
    }
}

/// What a submission turned into before its first test case
#[derive(Debug, Clone)]
pub enum Prepared {
    /// Ready to run
    Ready(Artifact),
    /// The compiler rejected the code; carries its output
    Rejected { output: String },
}

/// Something that can compile and run submissions in isolation
pub trait Sandbox: Sync {
    /// Turn source code into a runnable artifact, compiling if the language
    /// needs it
    fn prepare(
        &self,
        language: &Language,
        source: &[u8],
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Prepared, CompileError>> + Send;

    /// Run the artifact once against `input` in a fresh scratch directory
    fn run(
        &self,
        language: &Language,
        artifact: &Artifact,
        input: &[u8],
        limits: &ResourceLimits,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<ExecutionOutcome, ExecuteError>> + Send;
}

/// [`Sandbox`] backed by one initialized isolate box
#[derive(Debug, Clone, Copy)]
pub struct IsolateSandbox<'a> {
    sandbox: &'a IsolateBox,
    config: &'a Config,
}

impl<'a> IsolateSandbox<'a> {
    pub fn new(sandbox: &'a IsolateBox, config: &'a Config) -> Self {
        Self { sandbox, config }
    }
}

impl Sandbox for IsolateSandbox<'_> {
    async fn prepare(
        &self,
        language: &Language,
        source: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Prepared, CompileError> {
        if !language.is_compiled() {
            return Ok(Prepared::Ready(Artifact::from_source(
                language.source_name(),
                source,
            )));
        }

        let result = compile(self.sandbox, self.config, language, source, cancel).await?;
        if result.success {
            Ok(Prepared::Ready(result.artifact))
        } else {
            Ok(Prepared::Rejected {
                output: result.output,
            })
        }
    }

    async fn run(
        &self,
        language: &Language,
        artifact: &Artifact,
        input: &[u8],
        limits: &ResourceLimits,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, ExecuteError> {
        execute(
            self.sandbox,
            self.config,
            language,
            artifact,
            input,
            limits,
            cancel,
        )
        .await
    }
}
