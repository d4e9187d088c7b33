//! Judging a submission against its test cases
//!
//! A request is validated, compiled once, run against every test case in
//! order, compared, and aggregated into a [`SubmissionResult`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::judge::compare::{ComparisonMode, compare, normalize};
pub use crate::judge::engine::{Engine, HealthReport};
pub use crate::judge::orchestrator::run_submission;
pub use crate::judge::validate::{CaseField, ValidatedRequest, ValidationError, validate};
use crate::pool::PoolError;

mod compare;
mod engine;
mod orchestrator;
mod validate;

/// Time limit in seconds when the request does not name one
pub const DEFAULT_TIME_LIMIT_SECS: f64 = 5.0;

/// Memory limit in MB when the request does not name one
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 64;

/// One judge call as received from the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeRequest {
    pub code: String,

    /// Language id in the registry
    #[serde(alias = "languageId")]
    pub language: String,

    pub test_cases: Vec<TestCase>,

    /// Seconds, applied to every test case
    #[serde(default = "default_time_limit")]
    pub time_limit: f64,

    /// Megabytes, applied to every test case
    #[serde(default = "default_memory_limit")]
    pub memory_limit: u64,
}

fn default_time_limit() -> f64 {
    DEFAULT_TIME_LIMIT_SECS
}

fn default_memory_limit() -> u64 {
    DEFAULT_MEMORY_LIMIT_MB
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    #[serde(default)]
    pub input: String,

    pub expected_output: String,

    /// How output is compared; lenient when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ComparisonMode>,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
            comparison: None,
        }
    }
}

/// Verdict for one test case, or for a whole submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictStatus {
    Passed,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompileError,
    /// Not run because an earlier case failed under the stop-on-first-failure
    /// policy
    Skipped,
}

impl VerdictStatus {
    pub fn is_passed(self) -> bool {
        self == VerdictStatus::Passed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestVerdict {
    /// Position of the test case in the request
    pub index: usize,
    pub status: VerdictStatus,
    pub elapsed_ms: u64,
    pub memory_kb: u64,
    /// The program's stdout, cut to the configured report size
    pub actual_output: String,
    pub expected_output: String,
}

impl TestVerdict {
    /// Verdict for a case that never ran
    pub fn not_run(index: usize, status: VerdictStatus, expected_output: &str) -> Self {
        Self {
            index,
            status,
            elapsed_ms: 0,
            memory_kb: 0,
            actual_output: String::new(),
            expected_output: expected_output.to_owned(),
        }
    }
}

/// Outcome of judging one submission; immutable once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub overall_status: VerdictStatus,
    pub test_verdicts: Vec<TestVerdict>,
    pub max_elapsed_ms: u64,
    pub max_memory_kb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_error: Option<String>,
}

impl SubmissionResult {
    /// Result for code that failed to compile; no test case ran
    pub fn compile_error(output: impl Into<String>) -> Self {
        Self {
            overall_status: VerdictStatus::CompileError,
            test_verdicts: Vec::new(),
            max_elapsed_ms: 0,
            max_memory_kb: 0,
            compile_error: Some(output.into()),
        }
    }

    /// Aggregate per-case verdicts.
    ///
    /// The overall status is `Passed` only if every verdict passed, and
    /// otherwise the status of the first verdict that did not.
    pub fn aggregate(test_verdicts: Vec<TestVerdict>) -> Self {
        let overall_status = test_verdicts
            .iter()
            .map(|v| v.status)
            .find(|status| !status.is_passed())
            .unwrap_or(VerdictStatus::Passed);
        let max_elapsed_ms = test_verdicts.iter().map(|v| v.elapsed_ms).max().unwrap_or(0);
        let max_memory_kb = test_verdicts.iter().map(|v| v.memory_kb).max().unwrap_or(0);

        Self {
            overall_status,
            test_verdicts,
            max_elapsed_ms,
            max_memory_kb,
            compile_error: None,
        }
    }

    pub fn passed_count(&self) -> usize {
        self.test_verdicts
            .iter()
            .filter(|v| v.status.is_passed())
            .count()
    }

    pub fn is_passed(&self) -> bool {
        self.overall_status.is_passed()
    }
}

/// Why a submission could not be judged.
///
/// Everything the submitted code does wrong is a verdict, not an error.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("overloaded: {0}")]
    Overloaded(#[from] PoolError),

    #[error("submission cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Internal {
        context: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl JudgeError {
    pub(crate) fn internal(
        context: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        JudgeError::Internal {
            context,
            source: source.into(),
        }
    }
}
