//! Privilege broker: the only path by which files reach root-owned locations.
//!
//! Callers stage content in a temp file they own ([`PrivilegedFile`]); the
//! broker copies it to a hidden staging sibling of the destination, applies
//! ownership and mode there, then renames it into place. Each step is a
//! separate elevated operation from a fixed allow-list ([`ElevatedOp`]),
//! retried with bounded attempts. The destination is either untouched or
//! fully replaced; the caller's temp file is removed on every path.

use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use tempfile::NamedTempFile;
use tokio::process::Command;

use crate::error::PrivilegeError;
use crate::models::ElevationTool;
use crate::orchestrator::executor::{retry_with_backoff, RetryPolicy};

/// Owner and group applied to a committed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ownership {
    pub user: String,
    pub group: String,
}

impl Ownership {
    pub fn new(user: impl Into<String>, group: impl Into<String>) -> Self {
        Ownership {
            user: user.into(),
            group: group.into(),
        }
    }

    /// `root:root`
    pub fn root() -> Self {
        Self::new("root", "root")
    }
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user, self.group)
    }
}

/// What an existence test expects to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Directory,
}

impl PathKind {
    fn test_flag(&self) -> &'static str {
        match self {
            PathKind::File => "-f",
            PathKind::Directory => "-d",
        }
    }
}

/// The complete set of operations ever run with elevated privileges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElevatedOp {
    CreateDir { path: PathBuf },
    Copy { from: PathBuf, to: PathBuf },
    Chown { path: PathBuf, owner: Ownership },
    Chmod { path: PathBuf, mode: u32 },
    /// Only used to move a broker staging file over its destination.
    Rename { from: PathBuf, to: PathBuf },
    /// Only used to discard a broker staging file.
    Remove { path: PathBuf },
    /// Read-only test for satisfied checks inside service-owned directories.
    Exists { path: PathBuf, kind: PathKind },
}

impl ElevatedOp {
    pub fn name(&self) -> &'static str {
        match self {
            ElevatedOp::CreateDir { .. } => "mkdir",
            ElevatedOp::Copy { .. } => "copy",
            ElevatedOp::Chown { .. } => "chown",
            ElevatedOp::Chmod { .. } => "chmod",
            ElevatedOp::Rename { .. } => "rename",
            ElevatedOp::Remove { .. } => "remove",
            ElevatedOp::Exists { .. } => "test",
        }
    }

    /// Command line run under the elevation tool. Paths are passed as
    /// separate arguments after `--`, never through a shell.
    pub fn argv(&self) -> Vec<OsString> {
        let mut argv: Vec<OsString> = Vec::new();
        match self {
            ElevatedOp::CreateDir { path } => {
                argv.extend(["mkdir", "-p", "--"].map(OsString::from));
                argv.push(path.into());
            }
            ElevatedOp::Copy { from, to } => {
                argv.extend(["cp", "--"].map(OsString::from));
                argv.push(from.into());
                argv.push(to.into());
            }
            ElevatedOp::Chown { path, owner } => {
                argv.extend(["chown", "--"].map(OsString::from));
                argv.push(owner.to_string().into());
                argv.push(path.into());
            }
            ElevatedOp::Chmod { path, mode } => {
                argv.extend(["chmod", "--"].map(OsString::from));
                argv.push(format!("{:o}", mode).into());
                argv.push(path.into());
            }
            ElevatedOp::Rename { from, to } => {
                argv.extend(["mv", "-f", "-T", "--"].map(OsString::from));
                argv.push(from.into());
                argv.push(to.into());
            }
            ElevatedOp::Remove { path } => {
                argv.extend(["rm", "-f", "--"].map(OsString::from));
                argv.push(path.into());
            }
            // test(1) takes no `--`; paths here are always absolute
            ElevatedOp::Exists { path, kind } => {
                argv.extend(["test", kind.test_flag()].map(OsString::from));
                argv.push(path.into());
            }
        }
        argv
    }
}

impl fmt::Display for ElevatedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElevatedOp::CreateDir { path } => write!(f, "mkdir {}", path.display()),
            ElevatedOp::Copy { from, to } => {
                write!(f, "copy {} -> {}", from.display(), to.display())
            }
            ElevatedOp::Chown { path, owner } => write!(f, "chown {} {}", owner, path.display()),
            ElevatedOp::Chmod { path, mode } => write!(f, "chmod {:o} {}", mode, path.display()),
            ElevatedOp::Rename { from, to } => {
                write!(f, "rename {} -> {}", from.display(), to.display())
            }
            ElevatedOp::Remove { path } => write!(f, "remove {}", path.display()),
            ElevatedOp::Exists { path, kind } => {
                write!(f, "test {} {}", kind.test_flag(), path.display())
            }
        }
    }
}

/// Executes one allow-listed operation with elevated privileges.
pub trait Elevator: Send + Sync {
    fn run<'a>(&'a self, op: &'a ElevatedOp) -> BoxFuture<'a, Result<(), PrivilegeError>>;
}

/// Production elevator: `sudo -n <op>` or `pkexec <op>`.
#[derive(Debug, Clone, Copy)]
pub struct CommandElevator {
    tool: ElevationTool,
}

impl CommandElevator {
    pub fn new(tool: ElevationTool) -> Self {
        CommandElevator { tool }
    }

    async fn run_op(&self, op: &ElevatedOp) -> Result<(), PrivilegeError> {
        let output = Command::new(self.tool.program())
            .args(self.tool.prefix_args())
            .args(op.argv())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                PrivilegeError::Unavailable(format!(
                    "failed to execute {}: {}",
                    self.tool.program(),
                    e
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            log::info!("[Privilege] [{}] stdout: {}", op.name(), stdout.trim());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            log::info!("[Privilege] [{}] stderr: {}", op.name(), stderr.trim());
        }

        if output.status.success() {
            return Ok(());
        }

        Err(classify_failure(self.tool, op, output.status.code(), stderr.trim()))
    }
}

/// Map a failed elevated command to Denied or OperationFailed.
fn classify_failure(
    tool: ElevationTool,
    op: &ElevatedOp,
    code: Option<i32>,
    stderr: &str,
) -> PrivilegeError {
    let denied = match tool {
        ElevationTool::Sudo => {
            stderr.contains("a password is required")
                || stderr.contains("a terminal is required")
                || stderr.contains("is not in the sudoers file")
        }
        // 126: authentication dialog dismissed, 127: not authorized
        ElevationTool::Pkexec => matches!(code, Some(126) | Some(127)),
    };

    let reason = if stderr.is_empty() {
        format!("exit status {:?}", code)
    } else {
        stderr.to_string()
    };

    if denied {
        PrivilegeError::Denied {
            op: op.to_string(),
            reason,
        }
    } else {
        PrivilegeError::OperationFailed {
            op: op.to_string(),
            reason,
        }
    }
}

impl Elevator for CommandElevator {
    fn run<'a>(&'a self, op: &'a ElevatedOp) -> BoxFuture<'a, Result<(), PrivilegeError>> {
        Box::pin(self.run_op(op))
    }
}

/// Content staged in a caller-owned temp file, waiting to be committed.
///
/// Dropping it (including via [`PrivilegeBroker::commit`]) deletes the temp file.
#[derive(Debug)]
pub struct PrivilegedFile {
    temp: NamedTempFile,
    destination: PathBuf,
    owner: Ownership,
    mode: u32,
}

impl PrivilegedFile {
    /// Write `contents` to a new owner-only temp file.
    pub fn stage(
        contents: &[u8],
        destination: impl Into<PathBuf>,
        owner: Ownership,
        mode: u32,
    ) -> Result<Self, PrivilegeError> {
        let mut temp = NamedTempFile::new()
            .map_err(|e| PrivilegeError::Staging(format!("create temp file: {}", e)))?;
        temp.write_all(contents)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| PrivilegeError::Staging(format!("write {}: {}", temp.path().display(), e)))?;
        Ok(Self::from_temp(temp, destination, owner, mode))
    }

    /// Take ownership of a temp file the caller already filled.
    pub fn from_temp(
        temp: NamedTempFile,
        destination: impl Into<PathBuf>,
        owner: Ownership,
        mode: u32,
    ) -> Self {
        PrivilegedFile {
            temp,
            destination: destination.into(),
            owner,
            mode,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

/// Hidden sibling of `destination` used as the copy target before the final rename.
pub fn staging_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let staging_name = format!(".{}.stagehand-staging", name);
    match destination.parent() {
        Some(parent) => parent.join(staging_name),
        None => PathBuf::from(staging_name),
    }
}

/// Commits staged files and directories through an [`Elevator`].
pub struct PrivilegeBroker {
    elevator: Arc<dyn Elevator>,
    retry: RetryPolicy,
}

impl PrivilegeBroker {
    pub fn new(elevator: Arc<dyn Elevator>, retry: RetryPolicy) -> Self {
        PrivilegeBroker { elevator, retry }
    }

    /// Move `file` to its destination with its owner and mode applied.
    ///
    /// On failure the destination keeps its previous content. The temp
    /// file is removed in every case.
    pub async fn commit(&self, file: PrivilegedFile) -> Result<(), PrivilegeError> {
        let staging = staging_path(&file.destination);
        log::info!(
            "[Privilege] Committing {} ({}, {:o})",
            file.destination.display(),
            file.owner,
            file.mode
        );

        let steps = [
            ElevatedOp::Copy {
                from: file.temp.path().to_path_buf(),
                to: staging.clone(),
            },
            ElevatedOp::Chown {
                path: staging.clone(),
                owner: file.owner.clone(),
            },
            ElevatedOp::Chmod {
                path: staging.clone(),
                mode: file.mode,
            },
            ElevatedOp::Rename {
                from: staging.clone(),
                to: file.destination.clone(),
            },
        ];

        let mut result = Ok(());
        for op in &steps {
            if let Err(e) = self.run_with_retry(op).await {
                result = Err(e);
                break;
            }
        }

        if let Err(e) = &result {
            log::error!(
                "[Privilege] ✗ Commit of {} failed: {}",
                file.destination.display(),
                e
            );
            let cleanup = ElevatedOp::Remove {
                path: staging.clone(),
            };
            if let Err(cleanup_err) = self.elevator.run(&cleanup).await {
                log::warn!(
                    "[Privilege] Could not remove staging file {}: {}",
                    staging.display(),
                    cleanup_err
                );
            }
        } else {
            log::info!("[Privilege] ✓ {} in place", file.destination.display());
        }

        let temp_path = file.temp.path().to_path_buf();
        if let Err(e) = file.temp.close() {
            log::warn!(
                "[Privilege] Could not remove temp file {}: {}",
                temp_path.display(),
                e
            );
        }

        result
    }

    /// Create `path` (and parents) and apply owner and mode.
    pub async fn ensure_directory(
        &self,
        path: &Path,
        owner: &Ownership,
        mode: u32,
    ) -> Result<(), PrivilegeError> {
        let steps = [
            ElevatedOp::CreateDir {
                path: path.to_path_buf(),
            },
            ElevatedOp::Chown {
                path: path.to_path_buf(),
                owner: owner.clone(),
            },
            ElevatedOp::Chmod {
                path: path.to_path_buf(),
                mode,
            },
        ];
        for op in &steps {
            self.run_with_retry(op).await?;
        }
        log::info!(
            "[Privilege] ✓ Directory {} ready ({}, {:o})",
            path.display(),
            owner,
            mode
        );
        Ok(())
    }

    /// Whether `path` exists as `kind`, tested with elevated privileges so
    /// paths under directories the operator cannot traverse are still seen.
    ///
    /// A failed test means absent. Denied and Unavailable are errors.
    pub async fn path_exists(&self, path: &Path, kind: PathKind) -> Result<bool, PrivilegeError> {
        let op = ElevatedOp::Exists {
            path: path.to_path_buf(),
            kind,
        };
        match self.elevator.run(&op).await {
            Ok(()) => Ok(true),
            Err(PrivilegeError::OperationFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Denied and Unavailable are final; only a failed command is retried.
    async fn run_with_retry(&self, op: &ElevatedOp) -> Result<(), PrivilegeError> {
        let elevator = &self.elevator;
        retry_with_backoff(
            &self.retry,
            |e: &PrivilegeError| matches!(e, PrivilegeError::OperationFailed { .. }),
            |attempt, delay, e| {
                log::warn!(
                    "[Privilege] {} failed (attempt {}), retrying in {:?}: {}",
                    op,
                    attempt,
                    delay,
                    e
                )
            },
            |_| elevator.run(op),
        )
        .await
        .result
    }
}
