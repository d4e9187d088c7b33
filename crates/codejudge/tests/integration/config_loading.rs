use codejudge::config::{Config, FailFastPolicy};
use codejudge::{ConfigError, ValidationError};
use codejudge::judge::validate;

use super::{FIXTURES_PATH, request};

fn load(name: &str) -> Result<Config, ConfigError> {
    Config::from_file(format!("{FIXTURES_PATH}/configs/{name}"))
}

#[test]
fn test_load_valid_config() {
    let config = load("valid_full.toml").expect("Failed to load config");

    assert!(config.languages.contains("cpp17"));
    assert!(config.languages.contains("python3"));
    assert_eq!(config.default_limits.time_limit, Some(2.0));
    assert_eq!(config.judge.fail_fast, FailFastPolicy::StopOnFirstFailure);
    assert_eq!(config.pool_capacity(), 2);
    assert_eq!(config.pool.first_box_id, 100);
    assert_eq!(config.server.bind.port(), 9000);
}

#[test]
fn test_load_minimal_config() {
    let config = load("valid_minimal.toml").expect("Failed to load config");

    assert!(config.languages.contains("test"));
    assert_eq!(config.judge.max_time_limit, 15.0);
}

#[test]
fn test_loaded_multipliers_scale_request_limits() {
    let config = load("valid_full.toml").expect("Failed to load config");
    let validated = validate(request("echo.py", "python3", &[("1", "1")]), &config)
        .expect("request should be valid");

    assert_eq!(validated.limits.time_limit, Some(4.0));
    assert_eq!(validated.limits.memory_limit, Some(96 * 1024));
    // 512 MB requests scaled by python's 1.5 outweigh the 512 MB compile ceiling
    assert_eq!(config.slot_memory_mb(), 768);
}

#[test]
fn test_loaded_bounds_reject_requests() {
    let config = load("valid_full.toml").expect("Failed to load config");
    let mut req = request("echo.py", "python3", &[("1", "1")]);
    req.time_limit = 12.0;

    assert!(matches!(
        validate(req, &config),
        Err(ValidationError::TimeLimitOutOfBounds { .. })
    ));
}

#[test]
fn test_load_invalid_configs() {
    for name in [
        "invalid_empty_name.toml",
        "invalid_empty_extension.toml",
        "invalid_empty_run_command.toml",
        "invalid_multiplier.toml",
        "invalid_bounds.toml",
    ] {
        assert!(load(name).is_err(), "{name} was accepted");
    }
}

#[test]
fn test_missing_config_file() {
    assert!(matches!(
        load("does_not_exist.toml"),
        Err(ConfigError::Parse(_))
    ));
}
