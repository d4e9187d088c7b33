//! Argument builder for the Isolate CLI
//!
//! Every invocation is a plain argv vector handed to `execve`; nothing here
//! goes through a shell.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::types::{MountConfig, ResourceLimits};

/// Builder for Isolate command-line arguments
#[derive(Debug)]
pub struct IsolateCommand {
    isolate_path: PathBuf,
    /// One of --init, --run, --cleanup
    action: IsolateAction,
    /// -b, --box-id
    box_id: u32,
    limits: ResourceLimits,
    mounts: Vec<MountConfig>,
    /// -E, --env; ordered so the argv is deterministic
    env: BTreeMap<String, String>,
    /// -M, --meta
    meta_file: Option<PathBuf>,
    /// -i, --stdin
    stdin: Option<String>,
    /// -o, --stdout
    stdout: Option<String>,
    /// -r, --stderr
    stderr: Option<String>,
    working_dir: Option<String>,
    command: Vec<String>,
    cgroup: bool,
}

impl IsolateCommand {
    pub fn new(isolate_path: impl Into<PathBuf>, box_id: u32) -> Self {
        Self {
            isolate_path: isolate_path.into(),
            action: IsolateAction::Run,
            box_id,
            limits: ResourceLimits::default(),
            mounts: Vec::new(),
            env: BTreeMap::new(),
            meta_file: None,
            stdin: None,
            stdout: None,
            stderr: None,
            working_dir: None,
            command: Vec::new(),
            cgroup: false,
        }
    }

    pub fn action(mut self, action: IsolateAction) -> Self {
        self.action = action;
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn mounts<'a>(mut self, mounts: impl IntoIterator<Item = &'a MountConfig>) -> Self {
        self.mounts.extend(mounts.into_iter().cloned());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<'a>(mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (key, value) in vars {
            self.env.insert(key.clone(), value.clone());
        }
        self
    }

    /// Host path of the meta file isolate writes its verdict to.
    ///
    /// This should live outside the box directory so the sandboxed program
    /// cannot tamper with it.
    pub fn meta_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.meta_file = Some(path.into());
        self
    }

    /// Redirect stdin from a file relative to the box directory
    pub fn stdin(mut self, name: impl Into<String>) -> Self {
        self.stdin = Some(name.into());
        self
    }

    /// Redirect stdout to a file relative to the box directory
    pub fn stdout(mut self, name: impl Into<String>) -> Self {
        self.stdout = Some(name.into());
        self
    }

    /// Redirect stderr to a file relative to the box directory
    pub fn stderr(mut self, name: impl Into<String>) -> Self {
        self.stderr = Some(name.into());
        self
    }

    /// Working directory inside the sandbox
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn command(mut self, cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Limit memory through cgroups (`--cg-mem`) instead of RLIMIT_AS
    pub fn cgroup(mut self, enable: bool) -> Self {
        self.cgroup = enable;
        self
    }

    /// Build the argument vector, program path first
    pub fn build(self) -> Vec<String> {
        let mut args = vec![
            self.isolate_path.to_string_lossy().into_owned(),
            format!("--box-id={}", self.box_id),
        ];

        if self.cgroup {
            args.push("--cg".to_owned());
        }

        match self.action {
            IsolateAction::Init => args.push("--init".to_owned()),
            IsolateAction::Cleanup => args.push("--cleanup".to_owned()),
            IsolateAction::Run => {
                args.push("--run".to_owned());
                push_limits(&mut args, &self.limits, self.cgroup);

                for mount in &self.mounts {
                    if mount.optional && !Path::new(&mount.source).exists() {
                        continue;
                    }
                    let mut opts = String::new();
                    if mount.writable {
                        opts.push_str(":rw");
                    }
                    if mount.optional {
                        opts.push_str(":maybe");
                    }
                    args.push(format!("--dir={}={}{}", mount.target, mount.source, opts));
                }

                args.extend(
                    self.env
                        .iter()
                        .map(|(key, value)| format!("--env={key}={value}")),
                );

                if let Some(ref meta) = self.meta_file {
                    args.push(format!("--meta={}", meta.display()));
                }
                if let Some(ref stdin) = self.stdin {
                    args.push(format!("--stdin={stdin}"));
                }
                if let Some(ref stdout) = self.stdout {
                    args.push(format!("--stdout={stdout}"));
                }
                if let Some(ref stderr) = self.stderr {
                    args.push(format!("--stderr={stderr}"));
                }
                if let Some(ref dir) = self.working_dir {
                    args.push(format!("--chdir={dir}"));
                }

                args.push("--".to_owned());
                args.extend(self.command);
            }
        }

        args
    }
}

fn push_limits(args: &mut Vec<String>, limits: &ResourceLimits, cgroup: bool) {
    if let Some(time) = limits.time_limit {
        args.push(format!("--time={time}"));
    }
    if let Some(wall_time) = limits.wall_time_limit {
        args.push(format!("--wall-time={wall_time}"));
    }
    if let Some(extra_time) = limits.extra_time {
        args.push(format!("--extra-time={extra_time}"));
    }
    if let Some(memory) = limits.memory_limit {
        if cgroup {
            args.push(format!("--cg-mem={memory}"));
        } else {
            args.push(format!("--mem={memory}"));
        }
    }
    if let Some(stack) = limits.stack_limit {
        args.push(format!("--stack={stack}"));
    }
    if let Some(procs) = limits.max_processes {
        args.push(format!("--processes={procs}"));
    }
    if let Some(fsize) = limits.max_output {
        args.push(format!("--fsize={fsize}"));
    }
    if let Some(open_files) = limits.max_open_files {
        args.push(format!("--open-files={open_files}"));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolateAction {
    /// Initialize a new box
    Init,
    /// Run a command in the box
    Run,
    /// Clean up a box
    Cleanup,
}
