use serde::{Deserialize, Serialize};

/// Markers printed by common runtimes when an allocation fails under RLIMIT_AS.
///
/// Without cgroup accounting the peak RSS of such a process usually stays below
/// the limit, so the failure is only visible on stderr. The program controls
/// its own stderr, so a marker only counts alongside real memory pressure.
const ALLOCATION_FAILURE_MARKERS: [&str; 6] = [
    "MemoryError",
    "std::bad_alloc",
    "java.lang.OutOfMemoryError",
    "memory allocation of",
    "JavaScript heap out of memory",
    "runtime: out of memory",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU time limit in seconds
    #[serde(default)]
    pub time_limit: Option<f64>,

    /// Wall clock time limit in seconds
    #[serde(default)]
    pub wall_time_limit: Option<f64>,

    /// Memory limit in kilobytes
    #[serde(default)]
    pub memory_limit: Option<u64>,

    /// Stack size limit in kilobytes
    #[serde(default)]
    pub stack_limit: Option<u64>,

    /// Maximum number of processes/threads
    #[serde(default)]
    pub max_processes: Option<u32>,

    /// Maximum size of any file the program writes, in kilobytes
    #[serde(default)]
    pub max_output: Option<u64>,

    /// Maximum open files
    #[serde(default)]
    pub max_open_files: Option<u32>,

    /// Grace period before the program is killed, in seconds
    #[serde(default)]
    pub extra_time: Option<f64>,
}

impl ResourceLimits {
    /// 1 megabyte in kilobytes
    pub const MB: u64 = 1024;

    /// Limits with every field unset
    pub fn unset() -> Self {
        Self {
            time_limit: None,
            wall_time_limit: None,
            memory_limit: None,
            stack_limit: None,
            max_processes: None,
            max_output: None,
            max_open_files: None,
            extra_time: None,
        }
    }

    /// Set both the CPU and the wall clock limit in seconds
    pub fn with_time_limit(mut self, seconds: f64) -> Self {
        self.time_limit = Some(seconds);
        self.wall_time_limit = Some(seconds);
        self
    }

    /// Set the memory limit in kilobytes
    pub fn with_memory_limit(mut self, kb: u64) -> Self {
        self.memory_limit = Some(kb);
        self
    }

    /// Set the maximum number of processes
    pub fn with_max_processes(mut self, count: u32) -> Self {
        self.max_processes = Some(count);
        self
    }

    /// Merge `overrides` on top of `self`; set fields in `overrides` win.
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            time_limit: overrides.time_limit.or(self.time_limit),
            wall_time_limit: overrides.wall_time_limit.or(self.wall_time_limit),
            memory_limit: overrides.memory_limit.or(self.memory_limit),
            stack_limit: overrides.stack_limit.or(self.stack_limit),
            max_processes: overrides.max_processes.or(self.max_processes),
            max_output: overrides.max_output.or(self.max_output),
            max_open_files: overrides.max_open_files.or(self.max_open_files),
            extra_time: overrides.extra_time.or(self.extra_time),
        }
    }

    /// Longest the host should wait for a sandboxed process before giving up on it
    pub fn host_deadline(&self) -> std::time::Duration {
        let wall = self
            .wall_time_limit
            .or(self.time_limit)
            .unwrap_or(Self::FALLBACK_WALL_SECS);
        let extra = self.extra_time.unwrap_or(0.0);
        std::time::Duration::from_secs_f64(wall + extra + Self::HOST_GRACE_SECS)
    }

    const FALLBACK_WALL_SECS: f64 = 60.0;
    const HOST_GRACE_SECS: f64 = 2.0;
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            time_limit: Some(5.0),
            wall_time_limit: Some(5.0),
            memory_limit: Some(64 * Self::MB),
            stack_limit: Some(64 * Self::MB),
            max_processes: Some(1),
            max_output: Some(16 * Self::MB),
            max_open_files: Some(64),
            extra_time: Some(0.5),
        }
    }
}

/// Raw result of one sandboxed process run
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Execution status (matches IOI Isolate status codes)
    pub status: ExecutionStatus,

    /// Which limit was exceeded, if any
    pub limit_exceeded: LimitExceeded,

    /// CPU time used in seconds
    pub time: f64,

    /// Wall clock time used in seconds
    pub wall_time: f64,

    /// Peak memory usage in kilobytes (cg-mem preferred, fallback to max-rss)
    pub memory: u64,

    /// Exit code if the program exited normally
    pub exit_code: Option<i32>,

    /// Signal number if the program was killed by a signal
    pub signal: Option<i32>,

    /// Additional message from isolate
    pub message: Option<String>,

    /// Captured standard output, bounded by the capture limit
    pub stdout: Vec<u8>,

    /// Captured standard error, bounded by the capture limit
    pub stderr: Vec<u8>,

    /// Whether stdout was cut at the capture limit
    pub stdout_truncated: bool,
}

impl ExecutionOutcome {
    /// Outcome for a process the host had to kill after its deadline passed
    pub fn host_timeout(wall_time: f64) -> Self {
        Self {
            status: ExecutionStatus::TimeLimitExceeded,
            limit_exceeded: LimitExceeded::WallTime,
            wall_time,
            message: Some("killed by host deadline".to_owned()),
            ..Default::default()
        }
    }

    /// Check if the execution was successful (exited with code 0)
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, ExecutionStatus::Ok) && self.exit_code == Some(0)
    }

    /// Wall clock time in whole milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        (self.wall_time * 1000.0).round() as u64
    }

    /// Peak memory in kilobytes
    pub fn peak_memory_kb(&self) -> u64 {
        self.memory
    }

    /// Mark the outcome as a memory limit hit when the evidence points there.
    ///
    /// A failed run whose peak usage reached the limit always counts. Isolate
    /// only reports memory explicitly in cgroup mode; under RLIMIT_AS the
    /// process simply fails to allocate, so there an allocator failure on
    /// stderr also counts once peak usage is at least half the limit.
    pub fn detect_memory_limit(&mut self, limit_kb: u64, cgroup: bool) {
        if self.limit_exceeded.is_exceeded()
            || self.is_success()
            || self.status == ExecutionStatus::TimeLimitExceeded
        {
            return;
        }

        if self.memory >= limit_kb {
            self.limit_exceeded = LimitExceeded::Memory;
            return;
        }
        if cgroup || self.memory < limit_kb / 2 {
            return;
        }

        let stderr = String::from_utf8_lossy(&self.stderr);
        if ALLOCATION_FAILURE_MARKERS
            .iter()
            .any(|marker| stderr.contains(marker))
        {
            self.limit_exceeded = LimitExceeded::Memory;
        }
    }

    /// Classify how the process ended
    pub fn termination_reason(&self) -> TerminationReason {
        match self.limit_exceeded {
            LimitExceeded::Time | LimitExceeded::WallTime => return TerminationReason::Timeout,
            LimitExceeded::Memory => return TerminationReason::MemoryExceeded,
            LimitExceeded::Output | LimitExceeded::NotExceeded => {}
        }

        match self.status {
            ExecutionStatus::TimeLimitExceeded => TerminationReason::Timeout,
            ExecutionStatus::Signaled => TerminationReason::Signaled,
            ExecutionStatus::RuntimeError | ExecutionStatus::InternalError => {
                TerminationReason::RuntimeError
            }
            ExecutionStatus::Ok if self.exit_code == Some(0) => TerminationReason::Normal,
            ExecutionStatus::Ok => TerminationReason::RuntimeError,
        }
    }
}

impl Default for ExecutionOutcome {
    fn default() -> Self {
        Self {
            status: ExecutionStatus::Ok,
            limit_exceeded: LimitExceeded::NotExceeded,
            time: 0.0,
            wall_time: 0.0,
            memory: 0,
            exit_code: None,
            signal: None,
            message: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdout_truncated: false,
        }
    }
}

/// Status of an execution
/// Corresponds to IOI Isolate two-letter status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Program exited normally
    #[serde(rename = "OK")]
    Ok,

    /// Runtime error (non-zero exit code)
    #[serde(rename = "RE")]
    RuntimeError,

    /// Time limit exceeded
    #[serde(rename = "TO")]
    TimeLimitExceeded,

    /// Program was killed by a signal
    #[serde(rename = "SG")]
    Signaled,

    /// Internal error in Isolate
    #[serde(rename = "XX")]
    InternalError,
}

impl ExecutionStatus {
    /// Parse status from isolate meta file status string
    pub fn from_isolate_status(status: &str) -> Self {
        match status {
            "OK" => ExecutionStatus::Ok,
            "RE" => ExecutionStatus::RuntimeError,
            "TO" => ExecutionStatus::TimeLimitExceeded,
            "SG" => ExecutionStatus::Signaled,
            _ => ExecutionStatus::InternalError,
        }
    }
}

/// Which resource limit was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LimitExceeded {
    #[default]
    #[serde(rename = "none")]
    NotExceeded,

    #[serde(rename = "time")]
    Time,

    #[serde(rename = "wall_time")]
    WallTime,

    #[serde(rename = "memory")]
    Memory,

    #[serde(rename = "output")]
    Output,
}

impl LimitExceeded {
    /// Infer which limit was exceeded from isolate's message field
    pub fn from_message(message: Option<&str>) -> Self {
        let Some(msg) = message else {
            return LimitExceeded::NotExceeded;
        };

        let msg = msg.to_lowercase();

        if msg.contains("time limit") {
            if msg.contains("wall") {
                LimitExceeded::WallTime
            } else {
                LimitExceeded::Time
            }
        } else if msg.contains("memory") {
            LimitExceeded::Memory
        } else if msg.contains("output") || msg.contains("file size") {
            LimitExceeded::Output
        } else {
            LimitExceeded::NotExceeded
        }
    }

    #[must_use]
    pub fn is_exceeded(&self) -> bool {
        !matches!(self, LimitExceeded::NotExceeded)
    }
}

/// How a sandboxed process ended, from the judge's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Exit code 0 within all limits
    Normal,
    /// Wall clock (or CPU) limit hit
    Timeout,
    /// Memory ceiling hit
    MemoryExceeded,
    /// Non-zero exit code
    RuntimeError,
    /// Killed by a fatal signal
    Signaled,
}

/// Configuration for a directory mount in Isolate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Source path on the host
    pub source: String,

    /// Target path in the sandbox
    pub target: String,

    /// Whether the mount is read-write (default: read-only)
    #[serde(default)]
    pub writable: bool,

    /// Whether this mount is optional (don't fail if source doesn't exist)
    /// Maps to isolate's `:maybe` flag
    #[serde(default)]
    pub optional: bool,
}

/// Files a submission needs to run: the compiled program, or the source itself
/// for interpreted languages.
///
/// The artifact is restored into a freshly emptied box before every test case,
/// so one run can never observe files left behind by another.
#[derive(Debug, Clone, Default)]
pub struct Artifact {
    pub files: Vec<ArtifactFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    /// File name relative to the box directory
    pub name: String,
    pub contents: Vec<u8>,
    /// Unix permission bits
    pub mode: u32,
}

impl Artifact {
    /// Artifact holding a single source file
    pub fn from_source(name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            files: vec![ArtifactFile {
                name: name.into(),
                contents: contents.into(),
                mode: 0o644,
            }],
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.iter().any(|file| file.name == name)
    }

    /// Total size of all files in bytes
    pub fn size(&self) -> usize {
        self.files.iter().map(|file| file.contents.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
