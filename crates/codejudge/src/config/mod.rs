use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::config::language::{
    CompileConfig, DEFAULT_SANDBOX_PATH, FileExtension, Language, RunConfig,
};
pub use crate::config::registry::LanguageRegistry;
use crate::runner::compile_limits;
use crate::types::{MountConfig, ResourceLimits};

pub mod language;
mod loader;
pub mod registry;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../codejudge.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid characters in file extension")]
    InvalidFileExtChars,

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("unsupported language '{0}'")]
    UnsupportedLanguage(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the Isolate binary (uses PATH if not specified).
    #[serde(default)]
    pub isolate_path: Option<PathBuf>,

    /// Use cgroup memory limiting instead of RLIMIT_AS.
    ///
    /// When enabled, isolate uses `--cg` and `--cg-mem` which limit actual memory
    /// usage (RSS) rather than virtual address space. Runtimes like the JVM and
    /// Go map far more virtual memory than they use; languages marked
    /// `requires_cgroup` are refused while this is off.
    #[serde(default)]
    pub cgroup: bool,

    /// Cgroup root path for isolate. Must match isolate's `cg_root` config value.
    #[serde(default = "default_cg_root")]
    pub cg_root: PathBuf,

    /// Directory mounts applied to every sandbox invocation
    #[serde(default)]
    pub sandbox_mounts: Vec<MountConfig>,

    /// Base resource limits; request and language limits are layered on top
    #[serde(default)]
    pub default_limits: ResourceLimits,

    /// Validation bounds and judging policy
    #[serde(default)]
    pub judge: JudgeSettings,

    /// Worker pool sizing
    #[serde(default)]
    pub pool: PoolConfig,

    /// HTTP service settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Language registry keyed by language id
    #[serde(default)]
    pub languages: LanguageRegistry,
}

/// Administrator bounds checked before any process is spawned
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeSettings {
    /// Smallest accepted time limit in seconds
    pub min_time_limit: f64,
    /// Largest accepted time limit in seconds
    pub max_time_limit: f64,
    /// Smallest accepted memory limit in MB
    pub min_memory_limit: u64,
    /// Largest accepted memory limit in MB
    pub max_memory_limit: u64,
    pub max_code_bytes: usize,
    pub max_test_cases: usize,
    /// Upper bound for each test case's input and expected output
    pub max_case_bytes: usize,
    /// How much of stdout/stderr is read back from the sandbox
    pub capture_limit_bytes: usize,
    /// How much of the actual output is echoed back in a verdict
    pub report_output_bytes: usize,
    pub fail_fast: FailFastPolicy,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            min_time_limit: 0.1,
            max_time_limit: 15.0,
            min_memory_limit: 16,
            max_memory_limit: 1024,
            max_code_bytes: 64 * 1024,
            max_test_cases: 100,
            max_case_bytes: 1024 * 1024,
            capture_limit_bytes: 1024 * 1024,
            report_output_bytes: 4 * 1024,
            fail_fast: FailFastPolicy::RunAll,
        }
    }
}

/// Whether the orchestrator keeps going after a failed test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailFastPolicy {
    /// Run every test case for full diagnostics
    #[default]
    RunAll,
    /// Stop at the first verdict that is not Passed
    StopOnFirstFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent submissions; derived from the host when unset
    pub workers: Option<usize>,
    /// Maximum number of submissions waiting for a slot
    pub queue_length: usize,
    /// Longest a submission may wait for a slot, in seconds
    pub queue_timeout_secs: u64,
    /// First isolate box id handed out by the pool
    pub first_box_id: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: None,
            queue_length: 32,
            queue_timeout_secs: 30,
            first_box_id: 0,
        }
    }
}

impl PoolConfig {
    /// Number of concurrent slots.
    ///
    /// Without an explicit `workers` value this is the number of CPU cores,
    /// further capped so that every slot can use `slot_memory_mb` at once.
    pub fn capacity(&self, slot_memory_mb: u64) -> usize {
        if let Some(workers) = self.workers {
            return workers.max(1);
        }

        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        derived_capacity(cores, host_memory_mb(), slot_memory_mb)
    }
}

fn derived_capacity(cores: usize, host_memory_mb: Option<u64>, slot_memory_mb: u64) -> usize {
    let by_memory = host_memory_mb
        .map(|total| (total / slot_memory_mb.max(1)) as usize)
        .unwrap_or(cores);

    cores.min(by_memory).max(1)
}

/// Memory available to new workloads in MB, from /proc/meminfo
fn host_memory_mb() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_available_memory_mb(&meminfo)
}

/// `MemAvailable`, or `MemTotal` on kernels too old to report it
fn parse_available_memory_mb(meminfo: &str) -> Option<u64> {
    meminfo_field_kb(meminfo, "MemAvailable:")
        .or_else(|| meminfo_field_kb(meminfo, "MemTotal:"))
        .map(|kb| kb / 1024)
}

fn meminfo_field_kb(meminfo: &str, field: &str) -> Option<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix(field))
        .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Largest accepted request body in bytes
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Create a new config with embedded default languages
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            isolate_path: None,
            cgroup: false,
            cg_root: default_cg_root(),
            sandbox_mounts: Vec::new(),
            default_limits: ResourceLimits::default(),
            judge: JudgeSettings::default(),
            pool: PoolConfig::default(),
            server: ServerConfig::default(),
            languages: LanguageRegistry::default(),
        }
    }

    /// Resolve a language id through the registry
    pub fn language(&self, id: &str) -> Result<&Language, ConfigError> {
        self.languages.resolve(id)
    }

    /// Whether `language` can start with the memory limiting in use
    pub fn can_run(&self, language: &Language) -> bool {
        self.cgroup || !language.requires_cgroup
    }

    /// Resolve a language id, refusing languages this host cannot start
    pub fn runnable_language(&self, id: &str) -> Result<&Language, ConfigError> {
        let language = self.languages.resolve(id)?;
        if self.can_run(language) {
            Ok(language)
        } else {
            Err(ConfigError::UnsupportedLanguage(id.to_owned()))
        }
    }

    /// Ids of the languages submissions may use, sorted
    pub fn runnable_languages(&self) -> Vec<&str> {
        self.languages
            .iter_sorted()
            .into_iter()
            .filter(|(_, lang)| self.can_run(lang))
            .map(|(id, _)| id)
            .collect()
    }

    /// Most memory a single slot may hold at once, in MB.
    ///
    /// A run may use the largest accepted request limit scaled by the
    /// language's memory multiplier; a compile step uses its own ceiling.
    pub fn slot_memory_mb(&self) -> u64 {
        let runnable: Vec<_> = self
            .languages
            .iter_sorted()
            .into_iter()
            .map(|(_, lang)| lang)
            .filter(|lang| self.can_run(lang))
            .collect();

        let multiplier = runnable
            .iter()
            .map(|lang| lang.memory_multiplier)
            .fold(1.0, f64::max);
        let run_mb = (self.judge.max_memory_limit as f64 * multiplier).ceil() as u64;

        let compile_mb = runnable
            .iter()
            .filter_map(|lang| lang.compile.as_ref())
            .filter_map(|compile| compile_limits(compile).memory_limit)
            .map(|kb| kb.div_ceil(ResourceLimits::MB))
            .max()
            .unwrap_or(0);

        run_mb.max(compile_mb)
    }

    /// Get the path to the isolate binary
    pub fn isolate_binary(&self) -> PathBuf {
        self.isolate_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("isolate"))
    }

    /// Worker pool capacity for this configuration
    pub fn pool_capacity(&self) -> usize {
        self.pool.capacity(self.slot_memory_mb())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_cg_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup/isolate")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::language::tests::{cpp, python};

    #[test]
    fn language_found() {
        let config = Config::default();
        assert_eq!(config.language("cpp17").unwrap().name, "C++ 17 (GCC)");
    }

    #[test]
    fn language_not_found() {
        let config = Config::default();
        assert!(matches!(
            config.language("brainfuck"),
            Err(ConfigError::UnsupportedLanguage(_))
        ));
    }

    #[test]
    fn empty_config_has_no_languages() {
        let config = Config::empty();
        assert!(config.languages.is_empty());
        assert!(config.language("cpp17").is_err());
        assert!(config.default_limits.time_limit.is_some());
    }

    #[test]
    fn isolate_binary_default_and_custom() {
        let mut config = Config::empty();
        assert_eq!(config.isolate_binary(), PathBuf::from("isolate"));

        config.isolate_path = Some(PathBuf::from("/usr/local/bin/isolate"));
        assert_eq!(
            config.isolate_binary(),
            PathBuf::from("/usr/local/bin/isolate")
        );
    }

    #[test]
    fn judge_settings_defaults() {
        let settings = JudgeSettings::default();
        assert_eq!(settings.fail_fast, FailFastPolicy::RunAll);
        assert!(settings.min_time_limit > 0.0);
        assert!(settings.min_memory_limit < settings.max_memory_limit);
    }

    #[test]
    fn explicit_workers_win() {
        let pool = PoolConfig {
            workers: Some(3),
            ..Default::default()
        };
        assert_eq!(pool.capacity(1024), 3);

        let zero = PoolConfig {
            workers: Some(0),
            ..Default::default()
        };
        assert_eq!(zero.capacity(1024), 1);
    }

    #[test]
    fn derived_capacity_is_at_least_one() {
        let pool = PoolConfig::default();
        assert!(pool.capacity(u64::MAX) >= 1);
    }

    #[test]
    fn available_memory_prefers_mem_available() {
        let meminfo = "MemTotal:       16303428 kB\nMemFree:         1234 kB\nMemAvailable:    8151714 kB\n";
        assert_eq!(parse_available_memory_mb(meminfo), Some(7960));
    }

    #[test]
    fn available_memory_falls_back_to_mem_total() {
        let meminfo = "MemTotal:       16303428 kB\nMemFree:         1234 kB\n";
        assert_eq!(parse_available_memory_mb(meminfo), Some(15921));
        assert_eq!(parse_available_memory_mb("MemFree: 10 kB"), None);
    }

    #[test]
    fn derived_capacity_respects_memory_and_cores() {
        assert_eq!(derived_capacity(8, Some(8192), 2048), 4);
        assert_eq!(derived_capacity(2, Some(65536), 1024), 2);
        assert_eq!(derived_capacity(8, Some(512), 2048), 1);
        assert_eq!(derived_capacity(4, None, 2048), 4);
    }

    fn with_languages(cgroup: bool, languages: Vec<(&str, Language)>) -> Config {
        let mut config = Config::empty();
        config.cgroup = cgroup;
        config.languages = languages
            .into_iter()
            .map(|(id, lang)| (id.to_owned(), lang))
            .collect();
        config
    }

    #[test]
    fn slot_memory_scales_with_the_largest_multiplier() {
        let mut heavy = python();
        heavy.memory_multiplier = 2.0;
        let config = with_languages(true, vec![("python3", python()), ("heavy", heavy)]);

        assert_eq!(config.judge.max_memory_limit, 1024);
        assert_eq!(config.slot_memory_mb(), 2048);
        assert_eq!(derived_capacity(8, Some(8192), config.slot_memory_mb()), 4);
    }

    #[test]
    fn slot_memory_covers_the_compile_step() {
        let mut config = with_languages(true, vec![("cpp17", cpp())]);
        config.judge.max_memory_limit = 256;
        // base compile ceiling is 512 MB
        assert_eq!(config.slot_memory_mb(), 512);
    }

    #[test]
    fn slot_memory_ignores_languages_that_cannot_run() {
        let mut heavy = python();
        heavy.memory_multiplier = 3.0;
        heavy.requires_cgroup = true;
        let languages = vec![("python3", python()), ("heavy", heavy)];

        assert_eq!(with_languages(false, languages.clone()).slot_memory_mb(), 1024);
        assert_eq!(with_languages(true, languages).slot_memory_mb(), 3072);
    }

    #[test]
    fn cgroup_only_languages_need_cgroup_mode() {
        let mut jvm = python();
        jvm.requires_cgroup = true;
        let languages = vec![("python3", python()), ("java", jvm)];

        let rlimit = with_languages(false, languages.clone());
        assert!(matches!(
            rlimit.runnable_language("java"),
            Err(ConfigError::UnsupportedLanguage(id)) if id == "java"
        ));
        assert!(rlimit.runnable_language("python3").is_ok());
        assert_eq!(rlimit.runnable_languages(), vec!["python3"]);

        let cgroup = with_languages(true, languages);
        assert!(cgroup.runnable_language("java").is_ok());
        assert_eq!(cgroup.runnable_languages(), vec!["java", "python3"]);
    }

    #[test]
    fn shipped_config_uses_cgroup_for_heavy_runtimes() {
        let config = Config::default();
        assert!(config.cgroup);
        for id in ["java", "javascript", "go"] {
            assert!(config.language(id).unwrap().requires_cgroup, "{id}");
        }
        assert_eq!(config.runnable_languages().len(), config.languages.len());
    }
}
