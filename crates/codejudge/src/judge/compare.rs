//! Output comparison

use serde::{Deserialize, Serialize};

use crate::judge::VerdictStatus;

/// Default tolerance for numeric comparison
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// How a test case's actual output is matched against the expected output
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ComparisonMode {
    /// Line endings unified, trailing whitespace and trailing blank lines
    /// ignored
    #[default]
    Lenient,
    /// Byte for byte
    Exact,
    /// Lenient, then whitespace-separated tokens; numbers match within
    /// `tolerance`, absolute or relative
    Numeric {
        #[serde(default = "default_tolerance")]
        tolerance: f64,
    },
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

/// Unify line endings, strip trailing whitespace from every line and drop
/// trailing blank lines
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<&str> = unified.split('\n').map(str::trim_end).collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Compare a program's stdout against the expected output
pub fn compare(actual: &[u8], expected: &str, mode: ComparisonMode) -> VerdictStatus {
    let matched = match mode {
        ComparisonMode::Exact => actual == expected.as_bytes(),
        ComparisonMode::Lenient => normalize(&String::from_utf8_lossy(actual)) == normalize(expected),
        ComparisonMode::Numeric { tolerance } => {
            numeric_match(&String::from_utf8_lossy(actual), expected, tolerance)
        }
    };

    if matched {
        VerdictStatus::Passed
    } else {
        VerdictStatus::WrongAnswer
    }
}

fn numeric_match(actual: &str, expected: &str, tolerance: f64) -> bool {
    let actual = normalize(actual);
    let expected = normalize(expected);
    let mut actual_tokens = actual.split_whitespace();
    let mut expected_tokens = expected.split_whitespace();

    loop {
        match (actual_tokens.next(), expected_tokens.next()) {
            (None, None) => return true,
            (Some(a), Some(e)) if tokens_match(a, e, tolerance) => {}
            _ => return false,
        }
    }
}

fn tokens_match(actual: &str, expected: &str, tolerance: f64) -> bool {
    if actual == expected {
        return true;
    }
    match (actual.parse::<f64>(), expected.parse::<f64>()) {
        (Ok(a), Ok(e)) => {
            let diff = (a - e).abs();
            diff <= tolerance || diff <= tolerance * a.abs().max(e.abs())
        }
        _ => false,
    }
}
