use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, de};

use crate::config::ConfigError;
use crate::types::{MountConfig, ResourceLimits};

const INVALID_FILE_EXT_CHARS: [char; 2] = ['/', '.'];

/// Default PATH for sandbox execution
pub const DEFAULT_SANDBOX_PATH: &str = "/usr/bin:/bin";

/// Toolchain descriptor for one language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Language {
    /// Human-readable name for the language (e.g., "C++ 17 (GCC)")
    pub name: String,

    /// File extension
    pub extension: FileExtension,

    /// Compilation configuration (None for interpreted languages)
    #[serde(default)]
    pub compile: Option<CompileConfig>,

    /// Execution configuration
    pub run: RunConfig,

    /// Factor applied to the requested time limit
    #[serde(default = "default_multiplier")]
    pub time_multiplier: f64,

    /// Factor applied to the requested memory limit
    #[serde(default = "default_multiplier")]
    pub memory_multiplier: f64,

    /// The runtime reserves more address space than any sane memory limit,
    /// so it can only run with cgroup memory accounting
    #[serde(default)]
    pub requires_cgroup: bool,
}

impl Language {
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    /// Get the source file name for this language
    pub fn source_name(&self) -> String {
        match self.compile {
            Some(ref compile) => compile.source_name.clone(),
            None => format!("main.{}", self.extension),
        }
    }

    /// Expand placeholders in an argument vector.
    ///
    /// Each argument stays a separate argv entry; nothing is ever handed to a
    /// shell, so file names cannot inject extra arguments.
    pub fn expand_command(command: &[String], source: &str, binary: &str) -> Vec<String> {
        command
            .iter()
            .map(|arg| {
                arg.replace("{source}", source)
                    .replace("{output}", binary)
                    .replace("{binary}", binary)
            })
            .collect()
    }

    /// The run command with placeholders filled in
    pub fn run_command(&self) -> Vec<String> {
        match self.compile {
            Some(ref compile) => Self::expand_command(
                &self.run.command,
                &compile.source_name,
                &compile.output_name,
            ),
            None => {
                let source = self.source_name();
                Self::expand_command(&self.run.command, &source, &source)
            }
        }
    }

    /// Time limit in seconds after applying the language multiplier
    pub fn scaled_time(&self, seconds: f64) -> f64 {
        seconds * self.time_multiplier
    }

    /// Memory limit in kilobytes after applying the language multiplier
    pub fn scaled_memory_kb(&self, megabytes: u64) -> u64 {
        let kb = (megabytes * ResourceLimits::MB) as f64 * self.memory_multiplier;
        kb.round() as u64
    }
}

fn default_multiplier() -> f64 {
    1.0
}

/// File extension without dot (e.g., "cpp")
#[derive(Debug, Clone, Serialize)]
pub struct FileExtension(String);

impl FileExtension {
    pub fn new(extension: &str) -> Result<Self, ConfigError> {
        if extension
            .chars()
            .any(|c| INVALID_FILE_EXT_CHARS.contains(&c))
        {
            return Err(ConfigError::InvalidFileExtChars);
        }
        Ok(Self(extension.to_owned()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for FileExtension {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FileExtension::new(&s).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Str(&s),
                &"a file extension without '/' or '.' characters",
            )
        })
    }
}

impl std::fmt::Display for FileExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Configuration for the compilation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Command and arguments with placeholders
    /// Placeholders: {source}, {output}
    pub command: Vec<String>,

    /// Source file name in the sandbox (e.g., "main.cpp")
    pub source_name: String,

    /// Output name (e.g., "main")
    pub output_name: String,

    /// Environment variables to set during compilation
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Resource limits for compilation (overrides defaults)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,

    /// Compile timeout in milliseconds, independent of per-test limits
    #[serde(default = "default_compile_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_compile_timeout_ms() -> u64 {
    10_000
}

/// Configuration for the execution step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Command and arguments with placeholders
    /// Placeholders: {source}, {binary}
    pub command: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Directory mounts
    #[serde(default)]
    pub mounts: Vec<MountConfig>,

    /// PATH inside the sandbox
    #[serde(default = "default_sandbox_path")]
    pub path: String,

    /// Resource limits for execution (overrides defaults)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

fn default_sandbox_path() -> String {
    DEFAULT_SANDBOX_PATH.to_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn python() -> Language {
        Language {
            name: "Python 3".to_owned(),
            extension: FileExtension::new("py").unwrap(),
            compile: None,
            run: RunConfig {
                command: vec!["python3".to_owned(), "{source}".to_owned()],
                env: HashMap::new(),
                mounts: vec![],
                path: DEFAULT_SANDBOX_PATH.to_owned(),
                limits: None,
            },
            time_multiplier: 1.0,
            memory_multiplier: 1.0,
            requires_cgroup: false,
        }
    }

    pub(crate) fn cpp() -> Language {
        Language {
            name: "C++ 17".to_owned(),
            extension: FileExtension::new("cpp").unwrap(),
            compile: Some(CompileConfig {
                command: vec![
                    "g++".to_owned(),
                    "{source}".to_owned(),
                    "-o".to_owned(),
                    "{output}".to_owned(),
                ],
                source_name: "solution.cpp".to_owned(),
                output_name: "solution".to_owned(),
                env: HashMap::new(),
                limits: None,
                timeout_ms: 10_000,
            }),
            run: RunConfig {
                command: vec!["./{binary}".to_owned()],
                env: HashMap::new(),
                mounts: vec![],
                path: DEFAULT_SANDBOX_PATH.to_owned(),
                limits: None,
            },
            time_multiplier: 1.0,
            memory_multiplier: 1.0,
            requires_cgroup: false,
        }
    }

    #[test]
    fn file_extension_accepts_plain_names() {
        assert_eq!(FileExtension::new("f90").unwrap().to_string(), "f90");
        assert!(FileExtension::new("").unwrap().is_empty());
    }

    #[test]
    fn file_extension_rejects_separators() {
        assert!(FileExtension::new("path/ext").is_err());
        assert!(FileExtension::new(".cpp").is_err());
        assert!(FileExtension::new("tar.gz").is_err());
    }

    #[test]
    fn expand_command_fills_placeholders() {
        let cmd = vec![
            "gcc".to_owned(),
            "{source}".to_owned(),
            "-o".to_owned(),
            "{output}".to_owned(),
        ];
        let result = Language::expand_command(&cmd, "test.c", "test");
        assert_eq!(result, vec!["gcc", "test.c", "-o", "test"]);
    }

    #[test]
    fn expand_command_keeps_hostile_names_as_one_argument() {
        let cmd = vec!["python3".to_owned(), "{source}".to_owned()];
        let result = Language::expand_command(&cmd, "a.py; rm -rf /", "a");
        assert_eq!(result, vec!["python3", "a.py; rm -rf /"]);
    }

    #[test]
    fn source_name_depends_on_compile_step() {
        assert_eq!(cpp().source_name(), "solution.cpp");
        assert_eq!(python().source_name(), "main.py");
    }

    #[test]
    fn run_command_for_compiled_language_uses_binary() {
        assert_eq!(cpp().run_command(), vec!["./solution"]);
    }

    #[test]
    fn run_command_for_interpreted_language_uses_source() {
        assert_eq!(python().run_command(), vec!["python3", "main.py"]);
    }

    #[test]
    fn multipliers_scale_limits() {
        let mut java = cpp();
        java.time_multiplier = 2.0;
        java.memory_multiplier = 1.5;
        assert_eq!(java.scaled_time(2.0), 4.0);
        assert_eq!(java.scaled_memory_kb(64), 98304);
        assert_eq!(cpp().scaled_memory_kb(64), 65536);
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn file_extension_rejects_all_strings_with_slash(s in ".*/.*") {
            prop_assert!(FileExtension::new(&s).is_err());
        }

        #[test]
        fn file_extension_accepts_alphanumeric(s in "[a-zA-Z0-9_-]+") {
            prop_assert!(FileExtension::new(&s).is_ok());
        }

        #[test]
        fn expand_command_length_preserved(cmd_len in 0usize..10) {
            let cmd: Vec<String> = (0..cmd_len).map(|i| format!("{{source}}{i}")).collect();
            let result = Language::expand_command(&cmd, "source", "binary");
            prop_assert_eq!(result.len(), cmd_len);
        }
    }
}
