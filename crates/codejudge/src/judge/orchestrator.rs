//! Submission state machine
//!
//! A submission is compiled once, then its test cases run strictly in order.
//! Whatever happens inside a test case ends up as that case's verdict; only
//! cancellation and failures outside the test cases abort the submission.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use crate::config::{FailFastPolicy, JudgeSettings};
use crate::judge::{
    JudgeError, SubmissionResult, TestCase, TestVerdict, ValidatedRequest, VerdictStatus, compare,
};
use crate::runner::{Prepared, Sandbox};
use crate::types::{ExecutionOutcome, TerminationReason};

/// Compile, run and judge every test case of a validated request
#[instrument(skip_all, fields(language = %request.language_id, cases = request.test_cases.len()))]
pub async fn run_submission<S: Sandbox>(
    sandbox: &S,
    request: &ValidatedRequest,
    settings: &JudgeSettings,
    cancel: &CancellationToken,
) -> Result<SubmissionResult, JudgeError> {
    if cancel.is_cancelled() {
        return Err(JudgeError::Cancelled);
    }

    let prepared = sandbox
        .prepare(&request.language, request.code.as_bytes(), cancel)
        .await;
    let artifact = match prepared {
        Ok(Prepared::Ready(artifact)) => artifact,
        Ok(Prepared::Rejected { output }) => {
            debug!("submission does not compile");
            return Ok(SubmissionResult::compile_error(output));
        }
        Err(e) if e.is_cancelled() => return Err(JudgeError::Cancelled),
        Err(e) => return Err(JudgeError::internal("compile step failed", e)),
    };
    debug!(files = artifact.files.len(), size = artifact.size(), "artifact ready");

    let mut verdicts = Vec::with_capacity(request.test_cases.len());
    let mut cases = request.test_cases.iter().enumerate();

    for (index, case) in cases.by_ref() {
        if cancel.is_cancelled() {
            return Err(JudgeError::Cancelled);
        }

        let outcome = sandbox
            .run(
                &request.language,
                &artifact,
                case.input.as_bytes(),
                &request.limits,
                cancel,
            )
            .await;
        let verdict = match outcome {
            Ok(outcome) => judge_case(index, case, &outcome, settings.report_output_bytes),
            Err(e) if e.is_cancelled() => return Err(JudgeError::Cancelled),
            Err(e) => {
                error!(index, error = %e, "sandbox failed while running test case");
                TestVerdict::not_run(index, VerdictStatus::RuntimeError, &case.expected_output)
            }
        };
        debug!(index, status = ?verdict.status, elapsed_ms = verdict.elapsed_ms, "test case judged");

        let failed = !verdict.status.is_passed();
        verdicts.push(verdict);
        if failed && settings.fail_fast == FailFastPolicy::StopOnFirstFailure {
            break;
        }
    }

    verdicts.extend(cases.map(|(index, case)| {
        TestVerdict::not_run(index, VerdictStatus::Skipped, &case.expected_output)
    }));

    Ok(SubmissionResult::aggregate(verdicts))
}

fn judge_case(
    index: usize,
    case: &TestCase,
    outcome: &ExecutionOutcome,
    report_bytes: usize,
) -> TestVerdict {
    let status = match outcome.termination_reason() {
        TerminationReason::Timeout => VerdictStatus::TimeLimitExceeded,
        TerminationReason::MemoryExceeded => VerdictStatus::MemoryLimitExceeded,
        TerminationReason::RuntimeError | TerminationReason::Signaled => {
            VerdictStatus::RuntimeError
        }
        // part of the output is missing, so it cannot be right
        TerminationReason::Normal if outcome.stdout_truncated => VerdictStatus::WrongAnswer,
        TerminationReason::Normal => compare(
            &outcome.stdout,
            &case.expected_output,
            case.comparison.unwrap_or_default(),
        ),
    };

    TestVerdict {
        index,
        status,
        elapsed_ms: outcome.elapsed_ms(),
        memory_kb: outcome.peak_memory_kb(),
        actual_output: excerpt(&outcome.stdout, report_bytes),
        expected_output: case.expected_output.clone(),
    }
}

/// At most `limit` bytes of `output`, cut on a character boundary
fn excerpt(output: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(output);
    if text.len() <= limit {
        return text.into_owned();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_owned()
}
