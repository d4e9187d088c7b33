//! Integration tests for codejudge
//!
//! These tests require the isolate binary to be installed and accessible.
//! Run with: cargo test -p codejudge --features integration-tests
//!
//! Tests that require root are marked `#[ignore]`. To include them:
//!    cargo test -p codejudge --features integration-tests -- --include-ignored

#![cfg(feature = "integration-tests")]

use std::fs;

use codejudge::config::Config;
use codejudge::{Engine, JudgeRequest, TestCase};

mod config_loading;
mod judging;
mod meta_file_fixtures;
mod overload;
mod resource_limits;
mod sandbox_lifecycle;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture file content
pub(crate) fn fixture_source(name: &str) -> String {
    let path = format!("{FIXTURES_PATH}/sources/{name}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

/// Create a test config with cgroup support if available, falling back to non-cgroup mode.
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    if config.cgroup {
        match codejudge::prepare_cgroup(&config.cg_root) {
            Ok(true) => {}              // cgroups ready
            _ => config.cgroup = false, // not available, fall back
        }
    }
    config
}

/// An engine whose boxes start at `first_box_id`, so tests running in
/// parallel never share a box
pub(crate) fn test_engine(first_box_id: u32, workers: usize) -> Engine {
    let mut config = test_config();
    config.pool.first_box_id = first_box_id;
    config.pool.workers = Some(workers);
    Engine::new(config)
}

pub(crate) fn request(source: &str, language: &str, cases: &[(&str, &str)]) -> JudgeRequest {
    JudgeRequest {
        code: fixture_source(source),
        language: language.to_owned(),
        test_cases: cases
            .iter()
            .map(|(input, expected)| TestCase::new(*input, *expected))
            .collect(),
        time_limit: 2.0,
        memory_limit: 64,
    }
}
