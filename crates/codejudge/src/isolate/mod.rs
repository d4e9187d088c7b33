//! IOI Isolate wrapper
//!
//! This module provides a Rust interface to Isolate, handling command building,
//! box lifecycle management, and result parsing. Isolate is the isolation
//! primitive of the engine: it caps CPU time, wall time and memory, gives the
//! program a private `/box` directory and, unless told otherwise, no network.
//!
//! References for Isolate's CLI arguments and meta-files:
//! - https://www.ucw.cz/isolate/isolate.1.html
//! - https://github.com/ioi/isolate

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use crate::isolate::box_manager::{IsolateBox, SANDBOX_ROOT};
#[cfg(test)]
pub(crate) use crate::isolate::box_manager::tests::scratch_box;
pub use crate::isolate::command::{IsolateAction, IsolateCommand};
pub use crate::isolate::meta::MetaFile;
pub use crate::isolate::process::{RunOptions, run_batch, run_with_output};
use crate::types::MountConfig;

mod box_manager;
mod command;
mod meta;
mod process;

/// Errors that occur during isolate sandbox operations
#[derive(Debug, Error)]
pub enum IsolateError {
    #[error("failed to initialize box {id}: {message}")]
    InitFailed { id: u32, message: String },

    #[error("failed to cleanup box {id}: {message}")]
    CleanupFailed { id: u32, message: String },

    #[error("isolate command failed: {0}")]
    CommandFailed(String),

    #[error("isolate reported an internal error: {0}")]
    Internal(String),

    #[error("failed to spawn isolate process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("mount source path does not exist: {0}")]
    MountSourceNotFound(String),

    #[error("execution cancelled")]
    Cancelled,
}

/// Attempt to set up the cgroup v2 hierarchy for isolate.
///
/// In container environments `isolate-cg-keeper` is not available. This
/// creates the cgroup directory at `cg_root` and enables the memory and pids
/// controllers so that per-box child cgroups work.
///
/// Returns `Ok(true)` if cgroups are ready, `Ok(false)` if the caller should
/// fall back to non-cgroup mode (RLIMIT_AS).
pub fn prepare_cgroup(cg_root: &Path) -> Result<bool, IsolateError> {
    let cg_base = Path::new("/sys/fs/cgroup");

    let controllers_path = cg_base.join("cgroup.controllers");
    if !controllers_path.exists() {
        return Ok(false);
    }

    let controllers = fs::read_to_string(&controllers_path)?;
    if !controllers.split_whitespace().any(|c| c == "memory") {
        return Ok(false);
    }

    if cg_root.exists() {
        let subtree = cg_root.join("cgroup.subtree_control");
        if let Ok(content) = fs::read_to_string(&subtree)
            && content.split_whitespace().any(|c| c == "memory")
        {
            return Ok(true);
        }
    }

    // cgroup v2's "no internal process" rule: move ourselves into a leaf
    // before enabling controllers at the root.
    let init_cg = cg_base.join("init");
    if !init_cg.exists() {
        fs::create_dir(&init_cg)?;
    }
    fs::write(init_cg.join("cgroup.procs"), std::process::id().to_string())?;
    fs::write(cg_base.join("cgroup.subtree_control"), "+memory +pids")?;

    if !cg_root.exists() {
        fs::create_dir(cg_root)?;
    }
    fs::write(cg_root.join("cgroup.subtree_control"), "+memory +pids")?;

    Ok(true)
}

/// Check that every non-optional mount source exists on the host
pub fn validate_mounts(mounts: &[MountConfig]) -> Result<(), IsolateError> {
    match mounts
        .iter()
        .find(|mount| !mount.optional && !Path::new(&mount.source).exists())
    {
        Some(missing) => Err(IsolateError::MountSourceNotFound(missing.source.clone())),
        None => Ok(()),
    }
}

/// Find a program on the host's PATH, following symlinks.
///
/// Programs that already contain a `/` are returned unchanged.
pub fn locate_program(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        return Some(PathBuf::from(program));
    }

    let path_var = std::env::var("PATH").unwrap_or_default();
    path_var
        .split(':')
        .map(|dir| Path::new(dir).join(program))
        .find(|candidate| candidate.exists())
        .map(|candidate| fs::canonicalize(&candidate).unwrap_or(candidate))
}

/// Resolve the program in a command to an absolute path using the host's PATH.
///
/// Isolate uses `execve`, which does not search PATH, so bare names like `g++`
/// are replaced with their canonical location. The resolved path is directly
/// reachable inside the sandbox without crossing symlinks at bind-mount
/// boundaries.
pub fn resolve_command(command: &mut [String]) -> Result<(), IsolateError> {
    let Some(first) = command.first_mut() else {
        return Ok(());
    };
    if first.contains('/') {
        return Ok(());
    }

    match locate_program(first) {
        Some(path) => {
            *first = path.to_string_lossy().into_owned();
            Ok(())
        }
        None => Err(IsolateError::CommandFailed(format!(
            "command '{first}' not found in PATH",
        ))),
    }
}
