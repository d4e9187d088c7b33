//! Box lifecycle management for isolate
//!
//! A box is initialized once per submission and reused for every test case.
//! Between runs the box directory is emptied and the submission's artifact is
//! written back, so nothing a program writes survives into the next run.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::isolate::IsolateError;
use crate::isolate::command::{IsolateAction, IsolateCommand};
use crate::pool::Slot;
use crate::types::{Artifact, ArtifactFile};

/// Sandbox-internal mount point of the box directory
pub const SANDBOX_ROOT: &str = "/box";

/// An initialized isolate box.
///
/// Call [`cleanup()`](Self::cleanup) before dropping. If the box is dropped
/// while still initialized, cleanup runs on a background thread and the pool
/// slot it holds is released only after that thread finishes, so the box id
/// cannot be handed out while isolate is still tearing it down.
#[derive(Debug)]
pub struct IsolateBox {
    id: u32,

    /// Box root as printed by `isolate --init`; the program sees `box/` only
    root: PathBuf,

    isolate_path: PathBuf,

    initialized: bool,

    cgroup: bool,

    slot: Option<Slot>,
}

impl IsolateBox {
    #[instrument(skip(isolate_path))]
    pub async fn init(
        id: u32,
        isolate_path: impl Into<PathBuf>,
        cgroup: bool,
    ) -> Result<Self, IsolateError> {
        let isolate_path = isolate_path.into();

        let args = IsolateCommand::new(&isolate_path, id)
            .action(IsolateAction::Init)
            .cgroup(cgroup)
            .build();
        debug!(?args, "initializing isolate box");

        let output = Command::new(&args[0])
            .args(&args[1..])
            .output()
            .await
            .map_err(IsolateError::SpawnFailed)?;

        if !output.status.success() {
            return Err(IsolateError::InitFailed {
                id,
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let root = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        if !root.join("box").is_dir() {
            return Err(IsolateError::InitFailed {
                id,
                message: format!("box directory missing under {}", root.display()),
            });
        }

        debug!(?root, "box initialized");

        Ok(Self {
            id,
            root,
            isolate_path,
            initialized: true,
            cgroup,
            slot: None,
        })
    }

    /// Tie a pool slot to this box; it is released after cleanup
    pub fn with_slot(mut self, slot: Slot) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn cgroup(&self) -> bool {
        self.cgroup
    }

    pub fn isolate_path(&self) -> &Path {
        &self.isolate_path
    }

    /// Host path of the directory the program sees as `/box`
    pub fn box_dir(&self) -> PathBuf {
        self.root.join("box")
    }

    /// Host path of the meta file.
    ///
    /// It sits next to the box directory rather than inside it, out of reach
    /// of the sandboxed program.
    pub fn meta_path(&self) -> PathBuf {
        self.root.join("meta.txt")
    }

    /// Host path of a file inside the box
    pub fn file_path(&self, name: &str) -> Result<PathBuf, IsolateError> {
        check_name(name)?;
        Ok(self.box_dir().join(name))
    }

    /// Path of a file as seen from inside the sandbox, for `--stdin` and friends
    pub fn sandbox_path(&self, name: &str) -> Result<String, IsolateError> {
        check_name(name)?;
        Ok(format!("{SANDBOX_ROOT}/{name}"))
    }

    pub async fn write_file(&self, name: &str, content: &[u8]) -> Result<(), IsolateError> {
        self.write_file_with_mode(name, content, 0o644).await
    }

    #[instrument(skip(self, content))]
    pub async fn write_file_with_mode(
        &self,
        name: &str,
        content: &[u8],
        mode: u32,
    ) -> Result<(), IsolateError> {
        let path = self.file_path(name)?;
        tokio::fs::write(&path, content).await?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).await?;
        debug!(?path, len = content.len(), "wrote file to box");
        Ok(())
    }

    /// Read at most `limit` bytes of a file the program produced.
    ///
    /// Returns the bytes and whether the file was longer than `limit`. Missing
    /// files and anything that is not a regular file (a symlink planted by the
    /// program, for instance) read as empty.
    pub async fn read_capped(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<(Vec<u8>, bool), IsolateError> {
        let path = self.file_path(name)?;
        match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) if meta.file_type().is_file() => {}
            Ok(_) => {
                warn!(?path, "ignoring non-regular output file");
                return Ok((Vec::new(), false));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), false)),
            Err(e) => return Err(e.into()),
        }

        let file = tokio::fs::File::open(&path).await?;
        let mut content = Vec::new();
        file.take(limit as u64 + 1).read_to_end(&mut content).await?;

        let truncated = content.len() > limit;
        content.truncate(limit);
        Ok((content, truncated))
    }

    pub async fn file_exists(&self, name: &str) -> Result<bool, IsolateError> {
        let path = self.file_path(name)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// Remove everything inside the box directory
    #[instrument(skip(self), fields(box_id = self.id))]
    pub async fn reset(&self) -> Result<(), IsolateError> {
        let mut entries = tokio::fs::read_dir(self.box_dir()).await?;
        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
            removed += 1;
        }
        debug!(removed, "box reset");
        Ok(())
    }

    /// Capture the regular files at the top of the box directory.
    ///
    /// Symlinks and directories are skipped, as is every name in `exclude`.
    #[instrument(skip(self, exclude), fields(box_id = self.id))]
    pub async fn snapshot(&self, exclude: &[&str]) -> Result<Artifact, IsolateError> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(self.box_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if exclude.contains(&name.as_str()) {
                continue;
            }

            let mode = entry.metadata().await?.permissions().mode() & 0o7777;
            let contents = tokio::fs::read(entry.path()).await?;
            files.push(ArtifactFile {
                name,
                contents,
                mode,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));

        let artifact = Artifact { files };
        debug!(files = artifact.files.len(), bytes = artifact.size(), "box snapshot");
        Ok(artifact)
    }

    /// Write every artifact file back into the box
    pub async fn restore(&self, artifact: &Artifact) -> Result<(), IsolateError> {
        for file in &artifact.files {
            self.write_file_with_mode(&file.name, &file.contents, file.mode)
                .await?;
        }
        Ok(())
    }

    #[must_use = "cleanup errors should be handled"]
    #[instrument(skip(self), fields(box_id = self.id))]
    pub async fn cleanup(&mut self) -> Result<(), IsolateError> {
        if !self.initialized {
            return Ok(());
        }

        let args = IsolateCommand::new(&self.isolate_path, self.id)
            .action(IsolateAction::Cleanup)
            .cgroup(self.cgroup)
            .build();
        debug!(?args, "cleaning up isolate box");

        let output = Command::new(&args[0])
            .args(&args[1..])
            .output()
            .await
            .map_err(IsolateError::SpawnFailed)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(stderr = %stderr, "cleanup failed");
            return Err(IsolateError::CleanupFailed {
                id: self.id,
                message: stderr.trim().to_owned(),
            });
        }

        self.initialized = false;
        debug!("box cleaned up");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

impl Drop for IsolateBox {
    fn drop(&mut self) {
        if !self.initialized {
            return;
        }

        warn!(
            box_id = self.id,
            root = %self.root.display(),
            "box dropped without cleanup, cleaning up in the background"
        );

        let args = IsolateCommand::new(&self.isolate_path, self.id)
            .action(IsolateAction::Cleanup)
            .cgroup(self.cgroup)
            .build();
        let id = self.id;
        let slot = self.slot.take();

        std::thread::spawn(move || {
            match std::process::Command::new(&args[0]).args(&args[1..]).output() {
                Ok(output) if output.status.success() => {
                    debug!(box_id = id, "background cleanup succeeded");
                }
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    warn!(box_id = id, stderr = %stderr, "background cleanup failed");
                }
                Err(e) => {
                    warn!(box_id = id, error = %e, "background cleanup spawn failed");
                }
            }
            drop(slot);
        });
    }
}

fn check_name(name: &str) -> Result<(), IsolateError> {
    if name.is_empty() || name.contains("..") || name.starts_with('/') {
        return Err(IsolateError::InvalidPath(format!(
            "not a box-relative file name: {name:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
impl IsolateBox {
    /// A box over an existing directory, never handed to isolate
    pub(crate) fn detached(root: impl Into<PathBuf>) -> Self {
        Self {
            id: 0,
            root: root.into(),
            isolate_path: PathBuf::from("isolate"),
            initialized: false,
            cgroup: false,
            slot: None,
        }
    }
}
