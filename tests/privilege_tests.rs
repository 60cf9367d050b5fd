//! Integration tests for the privilege broker
//!
//! Uses a local elevator that performs each allow-listed operation with
//! plain filesystem calls inside a temp directory, and can be told to fail
//! a chosen operation.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use stagehand::error::PrivilegeError;
use stagehand::orchestrator::RetryPolicy;
use stagehand::system::privilege::{
    staging_path, ElevatedOp, Elevator, Ownership, PathKind, PrivilegeBroker, PrivilegedFile,
};
use tempfile::TempDir;

/// Scripted failure: the next `remaining` runs of `op` return `error`.
struct Failure {
    op: &'static str,
    remaining: u32,
    error: PrivilegeError,
}

#[derive(Default)]
struct LocalElevator {
    log: Mutex<Vec<ElevatedOp>>,
    failures: Mutex<Vec<Failure>>,
}

impl LocalElevator {
    fn failing(op: &'static str, remaining: u32, error: PrivilegeError) -> Self {
        let elevator = LocalElevator::default();
        elevator.failures.lock().unwrap().push(Failure {
            op,
            remaining,
            error,
        });
        elevator
    }

    fn op_names(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().iter().map(|op| op.name()).collect()
    }

    fn scripted_failure(&self, op: &ElevatedOp) -> Option<PrivilegeError> {
        let mut failures = self.failures.lock().unwrap();
        let failure = failures
            .iter_mut()
            .find(|f| f.op == op.name() && f.remaining > 0)?;
        failure.remaining -= 1;
        Some(failure.error.clone())
    }

    fn apply(op: &ElevatedOp) -> std::io::Result<()> {
        match op {
            ElevatedOp::CreateDir { path } => fs::create_dir_all(path),
            ElevatedOp::Copy { from, to } => fs::copy(from, to).map(|_| ()),
            // Ownership changes need root; recorded only
            ElevatedOp::Chown { .. } => Ok(()),
            ElevatedOp::Chmod { path, mode } => {
                fs::set_permissions(path, fs::Permissions::from_mode(*mode))
            }
            ElevatedOp::Rename { from, to } => fs::rename(from, to),
            ElevatedOp::Remove { path } => match fs::remove_file(path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
            ElevatedOp::Exists { path, kind } => {
                let found = match kind {
                    PathKind::File => path.is_file(),
                    PathKind::Directory => path.is_dir(),
                };
                if found {
                    Ok(())
                } else {
                    Err(std::io::Error::new(std::io::ErrorKind::NotFound, "test failed"))
                }
            }
        }
    }
}

impl Elevator for LocalElevator {
    fn run<'a>(&'a self, op: &'a ElevatedOp) -> BoxFuture<'a, Result<(), PrivilegeError>> {
        Box::pin(async move {
            self.log.lock().unwrap().push(op.clone());
            if let Some(error) = self.scripted_failure(op) {
                return Err(error);
            }
            Self::apply(op).map_err(|e| PrivilegeError::OperationFailed {
                op: op.to_string(),
                reason: e.to_string(),
            })
        })
    }
}

fn broker(elevator: &Arc<LocalElevator>) -> PrivilegeBroker {
    let elevator: Arc<dyn Elevator> = elevator.clone();
    PrivilegeBroker::new(elevator, RetryPolicy::new(3, Duration::ZERO))
}

fn operation_failed(op: &str) -> PrivilegeError {
    PrivilegeError::OperationFailed {
        op: op.to_string(),
        reason: "Input/output error".to_string(),
    }
}

fn mode_of(path: &Path) -> u32 {
    fs::metadata(path).unwrap().permissions().mode() & 0o777
}

#[tokio::test]
async fn test_commit_replaces_destination_with_mode() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join(".env");
    fs::write(&destination, "OLD=1\n").unwrap();

    let elevator = Arc::new(LocalElevator::default());
    let file = PrivilegedFile::stage(b"NEW=2\n", &destination, Ownership::root(), 0o600).unwrap();
    let temp_path = file.temp_path().to_path_buf();

    broker(&elevator).commit(file).await.unwrap();

    assert_eq!(fs::read_to_string(&destination).unwrap(), "NEW=2\n");
    assert_eq!(mode_of(&destination), 0o600);
    assert!(!temp_path.exists());
    assert!(!staging_path(&destination).exists());
    assert_eq!(elevator.op_names(), vec!["copy", "chown", "chmod", "rename"]);
}

#[tokio::test]
async fn test_commit_failure_keeps_previous_content() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("server.key");
    fs::write(&destination, "previous key").unwrap();

    let elevator = Arc::new(LocalElevator::failing("chmod", 10, operation_failed("chmod")));
    let file =
        PrivilegedFile::stage(b"replacement key", &destination, Ownership::root(), 0o600).unwrap();
    let temp_path = file.temp_path().to_path_buf();

    let err = broker(&elevator).commit(file).await.unwrap_err();

    assert!(matches!(err, PrivilegeError::OperationFailed { .. }));
    assert_eq!(fs::read_to_string(&destination).unwrap(), "previous key");
    assert!(!staging_path(&destination).exists(), "staging file left behind");
    assert!(!temp_path.exists(), "temp file left behind");
    assert_eq!(
        elevator.op_names(),
        vec!["copy", "chown", "chmod", "chmod", "chmod", "remove"]
    );
}

#[tokio::test]
async fn test_commit_to_missing_directory_cleans_up() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("missing").join("cert.pem");

    let elevator = Arc::new(LocalElevator::default());
    let file = PrivilegedFile::stage(b"cert", &destination, Ownership::root(), 0o644).unwrap();
    let temp_path = file.temp_path().to_path_buf();

    assert!(broker(&elevator).commit(file).await.is_err());
    assert!(!destination.exists());
    assert!(!temp_path.exists());
}

#[tokio::test]
async fn test_failed_operation_is_retried() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("config.toml");

    let elevator = Arc::new(LocalElevator::failing("chown", 1, operation_failed("chown")));
    let file = PrivilegedFile::stage(b"x = 1\n", &destination, Ownership::new("app", "app"), 0o640)
        .unwrap();

    broker(&elevator).commit(file).await.unwrap();

    assert_eq!(fs::read_to_string(&destination).unwrap(), "x = 1\n");
    assert_eq!(mode_of(&destination), 0o640);
    assert_eq!(
        elevator.op_names(),
        vec!["copy", "chown", "chown", "chmod", "rename"]
    );
}

#[tokio::test]
async fn test_denied_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join(".env");

    let denied = PrivilegeError::Denied {
        op: "copy".to_string(),
        reason: "sudo: a password is required".to_string(),
    };
    let elevator = Arc::new(LocalElevator::failing("copy", 10, denied.clone()));
    let file = PrivilegedFile::stage(b"A=1\n", &destination, Ownership::root(), 0o600).unwrap();

    let err = broker(&elevator).commit(file).await.unwrap_err();

    assert_eq!(err, denied);
    assert!(!destination.exists());
    assert_eq!(elevator.op_names(), vec!["copy", "remove"]);
}

#[tokio::test]
async fn test_ensure_directory_creates_with_mode() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("opt").join("stagehand").join("data");

    let elevator = Arc::new(LocalElevator::default());
    broker(&elevator)
        .ensure_directory(&target, &Ownership::new("stagehand", "stagehand"), 0o750)
        .await
        .unwrap();

    assert!(target.is_dir());
    assert_eq!(mode_of(&target), 0o750);
    let log = elevator.log.lock().unwrap().clone();
    assert_eq!(
        log[1],
        ElevatedOp::Chown {
            path: target.clone(),
            owner: Ownership::new("stagehand", "stagehand"),
        }
    );
}

#[tokio::test]
async fn test_path_exists_reports_kind() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("cert.pem");
    fs::write(&file, "cert").unwrap();

    let elevator = Arc::new(LocalElevator::default());
    let broker = broker(&elevator);

    assert!(broker.path_exists(&file, PathKind::File).await.unwrap());
    assert!(!broker.path_exists(&file, PathKind::Directory).await.unwrap());
    assert!(broker.path_exists(dir.path(), PathKind::Directory).await.unwrap());
    assert!(!broker
        .path_exists(&dir.path().join("key.pem"), PathKind::File)
        .await
        .unwrap());
    // A negative answer is not retried
    assert_eq!(elevator.op_names().len(), 4);
}

#[tokio::test]
async fn test_path_exists_propagates_denial() {
    let dir = TempDir::new().unwrap();
    let denied = PrivilegeError::Denied {
        op: "test".to_string(),
        reason: "sudo: a password is required".to_string(),
    };
    let elevator = Arc::new(LocalElevator::failing("test", 1, denied.clone()));

    let err = broker(&elevator)
        .path_exists(dir.path(), PathKind::Directory)
        .await
        .unwrap_err();
    assert_eq!(err, denied);
}
