//! Error taxonomy shared by every sandbox component.
//!
//! Validation errors abort an operation before any storage call is made.
//! Storage errors keep the failed operation's name and the underlying cause.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::types::ProcessState;

pub type Result<T, E = SandboxError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("path cannot be empty")]
    EmptyPath,

    #[error("PATH_OUTSIDE_WORKSPACE: {input} resolves to {}", resolved.display())]
    PathOutsideWorkspace { input: String, resolved: PathBuf },

    #[error("invalid workspace path {}: {source}", path.display())]
    InvalidWorkspace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("symlink loop while resolving {}", path.display())]
    SymlinkLoop { path: PathBuf },

    #[error("failed to {op} {}: {source}", path.display())]
    Storage {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("process is not running")]
    NotRunning,

    #[error("process is already {state}")]
    AlreadyRunning { state: ProcessState },

    #[error("failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("process {op} failed: {source}")]
    ProcessIo {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("request timed out after {}s", timeout.as_secs_f64())]
    RequestTimeout { timeout: Duration },

    #[error("{message}")]
    CapacityExhausted { message: String },

    #[error("{message}")]
    ProcessExitNonZero { code: Option<i32>, message: String },

    #[error("Workspace not selected")]
    WorkspaceNotSelected,
}

impl SandboxError {
    pub(crate) fn storage(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        SandboxError::Storage {
            op,
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable code for RPC clients and exit code mapping.
    pub fn code(&self) -> &'static str {
        match self {
            SandboxError::EmptyPath => "EMPTY_PATH",
            SandboxError::PathOutsideWorkspace { .. } => "PATH_OUTSIDE_WORKSPACE",
            SandboxError::InvalidWorkspace { .. } => "INVALID_WORKSPACE",
            SandboxError::SymlinkLoop { .. } => "SYMLINK_LOOP",
            SandboxError::Storage { .. } => "STORAGE_ERROR",
            SandboxError::NotRunning => "NOT_RUNNING",
            SandboxError::AlreadyRunning { .. } => "ALREADY_RUNNING",
            SandboxError::SpawnFailed { .. } => "SPAWN_FAILED",
            SandboxError::ProcessIo { .. } => "PROCESS_IO",
            SandboxError::RequestTimeout { .. } => "REQUEST_TIMEOUT",
            SandboxError::CapacityExhausted { .. } => "CAPACITY_EXHAUSTED",
            SandboxError::ProcessExitNonZero { .. } => "PROCESS_EXIT_NON_ZERO",
            SandboxError::WorkspaceNotSelected => "WORKSPACE_NOT_SELECTED",
        }
    }
}
