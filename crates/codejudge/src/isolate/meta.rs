//! Meta file parsing for isolate
//!
//! Isolate writes one `key:value` pair per line after a run. The meta file is
//! the only trusted source for time, memory and termination status.

use std::collections::HashMap;
use std::path::Path;

use crate::isolate::IsolateError;
use crate::types::{ExecutionOutcome, ExecutionStatus, LimitExceeded};

#[derive(Debug, Clone, Default)]
pub struct MetaFile {
    entries: HashMap<String, String>,
}

impl MetaFile {
    /// Parse meta file content, skipping malformed lines
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .filter_map(|line| line.trim().split_once(':'))
            .map(|(key, value)| (key.trim(), value.trim()))
            .filter(|(key, _)| !key.is_empty())
            .map(|(key, value)| (key.to_owned(), value.to_owned()))
            .collect();

        Self { entries }
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, IsolateError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(Self::parse(&content))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn get_parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// A meta file without a status line describes a clean exit
    pub fn status(&self) -> ExecutionStatus {
        self.get("status")
            .map(ExecutionStatus::from_isolate_status)
            .unwrap_or(ExecutionStatus::Ok)
    }

    /// CPU time in seconds
    pub fn time(&self) -> f64 {
        self.get_parsed("time").unwrap_or(0.0)
    }

    /// Wall clock time in seconds
    pub fn wall_time(&self) -> f64 {
        self.get_parsed("time-wall").unwrap_or(0.0)
    }

    /// Peak memory in kilobytes, preferring the cgroup figure over max-rss
    pub fn memory(&self) -> u64 {
        self.get_parsed("cg-mem")
            .or_else(|| self.get_parsed("max-rss"))
            .unwrap_or(0)
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.get_parsed("exitcode")
    }

    pub fn signal(&self) -> Option<i32> {
        self.get_parsed("exitsig")
    }

    pub fn message(&self) -> Option<&str> {
        self.get("message")
    }

    /// Whether the cgroup OOM killer fired (cgroup mode only)
    pub fn oom_killed(&self) -> bool {
        self.get("cg-oom-killed").is_some()
    }

    pub fn limit_exceeded(&self) -> LimitExceeded {
        if self.oom_killed() {
            return LimitExceeded::Memory;
        }

        let from_message = LimitExceeded::from_message(self.message());
        if from_message.is_exceeded() {
            return from_message;
        }

        if self.status() == ExecutionStatus::TimeLimitExceeded {
            return LimitExceeded::Time;
        }

        LimitExceeded::NotExceeded
    }

    /// Convert to an outcome without captured output
    pub fn to_outcome(&self) -> ExecutionOutcome {
        ExecutionOutcome {
            status: self.status(),
            limit_exceeded: self.limit_exceeded(),
            time: self.time(),
            wall_time: self.wall_time(),
            memory: self.memory(),
            exit_code: self.exit_code(),
            signal: self.signal(),
            message: self.message().map(str::to_owned),
            ..Default::default()
        }
    }
}
