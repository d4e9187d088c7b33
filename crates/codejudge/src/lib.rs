//! A sandboxed code judging engine.
//!
//! Codejudge takes untrusted source code, a language and a set of test cases,
//! compiles the code once and runs it against every test case inside an IOI
//! Isolate box, under strict time and memory limits. Each test case gets a
//! verdict and the submission gets an overall one.
//!
//! # Features
//!
//! - **Sandboxed execution**: every test case runs in a freshly reset box with no network.
//! - **Multi-language**: compiled and interpreted languages from a TOML registry.
//! - **Bounded concurrency**: a worker pool with a FIFO queue and backpressure.
//! - **Tolerant comparison**: trailing whitespace and line endings never fail a case.
//! - **HTTP service**: `POST /execute` and `GET /health` on axum.
//! - **cgroup v2 support**: memory limiting in container environments.

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, Language};
pub use isolate::{IsolateBox, IsolateError, prepare_cgroup};
pub use judge::{
    ComparisonMode, Engine, JudgeError, JudgeRequest, SubmissionResult, TestCase, TestVerdict,
    ValidationError, VerdictStatus,
};
pub use pool::{PoolError, WorkerPool};
pub use report::{ErrorBody, ExecuteResponse};
pub use runner::{CompileError, ExecuteError, IsolateSandbox, Sandbox};
pub use types::{
    Artifact, ExecutionOutcome, ExecutionStatus, LimitExceeded, MountConfig, ResourceLimits,
    TerminationReason,
};

pub mod config;
pub mod isolate;
pub mod judge;
pub mod pool;
pub mod report;
pub mod runner;
pub mod server;
pub mod types;
