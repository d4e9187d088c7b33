//! Result reporting
//!
//! The engine never talks to persistence or notification services itself; it
//! hands back these shapes and leaves storing them to the caller.

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::judge::{JudgeError, SubmissionResult, TestVerdict, VerdictStatus};

/// Seconds an overloaded caller is asked to wait before retrying
pub const RETRY_AFTER_SECS: u64 = 1;

/// Body of a successful `POST /execute`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub overall_status: VerdictStatus,
    pub results: Vec<TestVerdict>,
    pub max_elapsed_ms: u64,
    pub max_memory_kb: u64,
    pub passed_count: usize,
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_error: Option<String>,
}

impl From<SubmissionResult> for ExecuteResponse {
    fn from(result: SubmissionResult) -> Self {
        let passed_count = result.passed_count();
        Self {
            overall_status: result.overall_status,
            total: result.test_verdicts.len(),
            results: result.test_verdicts,
            max_elapsed_ms: result.max_elapsed_ms,
            max_memory_kb: result.max_memory_kb,
            passed_count,
            compile_error: result.compile_error,
        }
    }
}

/// `{error, details}` body of every failed call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub details: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
        }
    }

    pub fn validation(details: impl Into<String>) -> Self {
        Self::new("validation failed", details)
    }
}

/// HTTP status a judge error is reported with
pub fn status_for(err: &JudgeError) -> StatusCode {
    match err {
        JudgeError::Validation(_) => StatusCode::BAD_REQUEST,
        JudgeError::Overloaded(_) | JudgeError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        JudgeError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<&JudgeError> for ErrorBody {
    fn from(err: &JudgeError) -> Self {
        match err {
            JudgeError::Validation(e) => ErrorBody::validation(e.to_string()),
            JudgeError::Overloaded(e) => ErrorBody::new("overloaded", e.to_string()),
            JudgeError::Cancelled => ErrorBody::new("cancelled", "submission cancelled"),
            // internals stay in the log
            JudgeError::Internal { .. } => ErrorBody::new("internal error", "internal error"),
        }
    }
}

impl IntoResponse for JudgeError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let body = Json(ErrorBody::from(&self));

        match self {
            JudgeError::Overloaded(_) => (
                status,
                [(header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}
