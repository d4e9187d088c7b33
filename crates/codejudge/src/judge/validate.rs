//! Request validation
//!
//! Runs before any slot is taken or process spawned. Checks are pure and
//! ordered, so the first problem found is the one reported.

use std::fmt;

use thiserror::Error;

use crate::config::{Config, JudgeSettings, Language};
use crate::judge::{JudgeRequest, TestCase};
use crate::types::ResourceLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseField {
    Input,
    ExpectedOutput,
}

impl fmt::Display for CaseField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseField::Input => f.write_str("input"),
            CaseField::ExpectedOutput => f.write_str("expectedOutput"),
        }
    }
}

/// Why a request was refused; always the caller's fault
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("code is empty")]
    EmptyCode,

    #[error("code is {size} bytes, at most {max} are allowed")]
    CodeTooLarge { size: usize, max: usize },

    #[error("unsupported language '{0}'")]
    UnsupportedLanguage(String),

    #[error("time limit {value} s is outside [{min}, {max}]")]
    TimeLimitOutOfBounds { value: f64, min: f64, max: f64 },

    #[error("memory limit {value} MB is outside [{min}, {max}]")]
    MemoryLimitOutOfBounds { value: u64, min: u64, max: u64 },

    #[error("no test cases")]
    NoTestCases,

    #[error("{count} test cases, at most {max} are allowed")]
    TooManyTestCases { count: usize, max: usize },

    #[error("test case {index}: {field} is {size} bytes, at most {max} are allowed")]
    TestCaseTooLarge {
        index: usize,
        field: CaseField,
        size: usize,
        max: usize,
    },
}

/// A request that passed validation, with its limits resolved
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub language_id: String,
    pub language: Language,
    pub code: String,
    pub test_cases: Vec<TestCase>,
    /// Limits every test case runs under
    pub limits: ResourceLimits,
}

/// Check `request` against the administrator bounds in `config` and resolve
/// its language and limits
pub fn validate(request: JudgeRequest, config: &Config) -> Result<ValidatedRequest, ValidationError> {
    let bounds = &config.judge;

    if request.code.trim().is_empty() {
        return Err(ValidationError::EmptyCode);
    }
    if request.code.len() > bounds.max_code_bytes {
        return Err(ValidationError::CodeTooLarge {
            size: request.code.len(),
            max: bounds.max_code_bytes,
        });
    }

    let language = config
        .runnable_language(&request.language)
        .map_err(|_| ValidationError::UnsupportedLanguage(request.language.clone()))?;

    check_limits(&request, bounds)?;
    check_test_cases(&request.test_cases, bounds)?;

    let limits = effective_limits(config, language, request.time_limit, request.memory_limit);

    Ok(ValidatedRequest {
        language: language.clone(),
        language_id: request.language,
        code: request.code,
        test_cases: request.test_cases,
        limits,
    })
}

fn check_limits(request: &JudgeRequest, bounds: &JudgeSettings) -> Result<(), ValidationError> {
    let time = request.time_limit;
    // NaN fails both comparisons, so test for the accepted range
    if !(time.is_finite() && time >= bounds.min_time_limit && time <= bounds.max_time_limit) {
        return Err(ValidationError::TimeLimitOutOfBounds {
            value: time,
            min: bounds.min_time_limit,
            max: bounds.max_time_limit,
        });
    }

    let memory = request.memory_limit;
    if memory < bounds.min_memory_limit || memory > bounds.max_memory_limit {
        return Err(ValidationError::MemoryLimitOutOfBounds {
            value: memory,
            min: bounds.min_memory_limit,
            max: bounds.max_memory_limit,
        });
    }

    Ok(())
}

fn check_test_cases(cases: &[TestCase], bounds: &JudgeSettings) -> Result<(), ValidationError> {
    if cases.is_empty() {
        return Err(ValidationError::NoTestCases);
    }
    if cases.len() > bounds.max_test_cases {
        return Err(ValidationError::TooManyTestCases {
            count: cases.len(),
            max: bounds.max_test_cases,
        });
    }

    for (index, case) in cases.iter().enumerate() {
        for (field, text) in [
            (CaseField::Input, &case.input),
            (CaseField::ExpectedOutput, &case.expected_output),
        ] {
            if text.len() > bounds.max_case_bytes {
                return Err(ValidationError::TestCaseTooLarge {
                    index,
                    field,
                    size: text.len(),
                    max: bounds.max_case_bytes,
                });
            }
        }
    }

    Ok(())
}

/// Configured defaults, then the language's run limits, then the request's
/// time and memory scaled by the language multipliers
fn effective_limits(
    config: &Config,
    language: &Language,
    time_limit: f64,
    memory_limit_mb: u64,
) -> ResourceLimits {
    let base = match language.run.limits {
        Some(ref lang) => config.default_limits.with_overrides(lang),
        None => config.default_limits.clone(),
    };
    base.with_time_limit(language.scaled_time(time_limit))
        .with_memory_limit(language.scaled_memory_kb(memory_limit_mb))
}
