//! Explicit session context: one selected workspace with its gateways and
//! supervised process.
//!
//! A [`SessionHost`] owns the currently selected [`Session`] and replaces it
//! when a different workspace is selected.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::info;

use crate::core::boundary::to_slash;
use crate::core::types::ProcessState;
use crate::error::{Result, SandboxError};
use crate::io::config::{SendMode, WardenConfig};
use crate::io::events::EventBus;
use crate::io::execution::ExecutionGateway;
use crate::io::file_gateway::FileGateway;
use crate::io::path_validator::PathValidator;
use crate::io::supervisor::{ProcessSupervisor, SupervisorOptions};

/// What `send` did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the supervised process.
    Delivered,
    /// Executed as a one-shot prompt; carries the captured output.
    Output(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatus {
    pub running: bool,
    pub state: ProcessState,
    pub workspace: Option<String>,
    pub pid: Option<u32>,
    pub restart_count: u32,
}

impl ProcessStatus {
    pub fn idle(workspace: Option<String>) -> Self {
        Self {
            running: false,
            state: ProcessState::Stopped,
            workspace,
            pid: None,
            restart_count: 0,
        }
    }
}

pub struct Session {
    config: WardenConfig,
    events: EventBus,
    files: FileGateway,
    execution: ExecutionGateway,
    supervisor: Mutex<Option<ProcessSupervisor>>,
}

impl Session {
    /// Open a session rooted at `root`. Fails if the root is not an existing directory.
    pub fn open(root: impl AsRef<Path>, config: WardenConfig, events: EventBus) -> Result<Self> {
        let validator = PathValidator::for_root(root)?;
        let root = validator.workspace_root().to_path_buf();
        let execution = ExecutionGateway::from_config(&config, &root, events.clone());
        info!(root = %root.display(), "session opened");
        Ok(Self {
            config,
            events,
            files: FileGateway::new(validator),
            execution,
            supervisor: Mutex::new(None),
        })
    }

    pub fn workspace_root(&self) -> &Path {
        self.files.workspace_root()
    }

    pub fn files(&self) -> &FileGateway {
        &self.files
    }

    pub fn execution(&self) -> &ExecutionGateway {
        &self.execution
    }

    /// Start the interactive tool, stopping any process this session already runs.
    ///
    /// `dir` selects the working directory inside the workspace (default: the root).
    pub async fn start_process(&self, dir: Option<&str>) -> Result<()> {
        let cwd = match dir.filter(|dir| !dir.is_empty()) {
            Some(dir) => self.files.validator().validate(dir)?.into_path_buf(),
            None => self.workspace_root().to_path_buf(),
        };
        let mut slot = self.supervisor.lock().await;
        if let Some(existing) = slot.take() {
            existing.stop(false).await?;
        }
        let supervisor = ProcessSupervisor::new(
            SupervisorOptions::from_config(&self.config, cwd),
            self.events.clone(),
        );
        let started = supervisor.start().await;
        *slot = Some(supervisor);
        started
    }

    pub async fn stop_process(&self, force: bool) -> Result<()> {
        let slot = self.supervisor.lock().await;
        match slot.as_ref() {
            Some(supervisor) => supervisor.stop(force).await,
            None => Ok(()),
        }
    }

    /// Deliver `message` according to the configured send mode.
    pub async fn send(&self, message: &str) -> Result<SendOutcome> {
        match self.config.send_mode {
            SendMode::Interactive => {
                let supervisor = self
                    .supervisor
                    .lock()
                    .await
                    .clone()
                    .ok_or(SandboxError::NotRunning)?;
                supervisor.send(message).await?;
                Ok(SendOutcome::Delivered)
            }
            SendMode::OneShot => {
                let output = self.execution.execute_prompt(message).await?;
                Ok(SendOutcome::Output(output))
            }
        }
    }

    pub async fn status(&self) -> ProcessStatus {
        let supervisor = self.supervisor.lock().await.clone();
        let Some(supervisor) = supervisor else {
            return ProcessStatus::idle(Some(to_slash(self.workspace_root())));
        };
        let state = supervisor.state().await;
        ProcessStatus {
            running: state == ProcessState::Running,
            state,
            workspace: Some(to_slash(supervisor.workspace())),
            pid: supervisor.pid().await,
            restart_count: supervisor.restart_count().await,
        }
    }

    pub async fn supervisor(&self) -> Option<ProcessSupervisor> {
        self.supervisor.lock().await.clone()
    }

    /// Force-stop the supervised process, if any.
    pub async fn close(&self) {
        if let Some(supervisor) = self.supervisor.lock().await.take() {
            supervisor.shutdown().await;
        }
        info!(root = %self.workspace_root().display(), "session closed");
    }
}

/// Owner of the currently selected session.
pub struct SessionHost {
    config: WardenConfig,
    events: EventBus,
    current: RwLock<Option<Arc<Session>>>,
    root_tx: watch::Sender<Option<PathBuf>>,
}

impl SessionHost {
    pub fn new(config: WardenConfig, events: EventBus) -> Self {
        let (root_tx, _) = watch::channel(None);
        Self {
            config,
            events,
            current: RwLock::new(None),
            root_tx,
        }
    }

    /// Open a session for `path`, closing the previous one.
    ///
    /// `None` means the selection was cancelled: the current session is kept
    /// and `None` is returned.
    pub async fn select_workspace(&self, path: Option<&Path>) -> Result<Option<PathBuf>> {
        let Some(path) = path else {
            return Ok(None);
        };
        let session = Arc::new(Session::open(path, self.config.clone(), self.events.clone())?);
        let root = session.workspace_root().to_path_buf();
        let previous = self.current.write().await.replace(session);
        if let Some(previous) = previous {
            previous.close().await;
        }
        self.root_tx.send_replace(Some(root.clone()));
        Ok(Some(root))
    }

    /// The selected session, or `WorkspaceNotSelected`.
    pub async fn current(&self) -> Result<Arc<Session>> {
        self.current
            .read()
            .await
            .clone()
            .ok_or(SandboxError::WorkspaceNotSelected)
    }

    /// Follow the selected workspace root.
    pub fn watch_workspace(&self) -> watch::Receiver<Option<PathBuf>> {
        self.root_tx.subscribe()
    }

    pub async fn close(&self) {
        let previous = self.current.write().await.take();
        if let Some(session) = previous {
            session.close().await;
        }
        self.root_tx.send_replace(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::workspace_fixture;

    #[tokio::test]
    async fn operations_require_selection() {
        let host = SessionHost::new(WardenConfig::default(), EventBus::new());
        let err = host.current().await.err().expect("no session");
        assert!(matches!(err, SandboxError::WorkspaceNotSelected));
        assert_eq!(err.to_string(), "Workspace not selected");
    }

    #[tokio::test]
    async fn cancelled_selection_keeps_current_session() {
        let temp = workspace_fixture();
        let host = SessionHost::new(WardenConfig::default(), EventBus::new());
        let root = host
            .select_workspace(Some(temp.path()))
            .await
            .expect("select")
            .expect("root");
        assert!(host.select_workspace(None).await.expect("cancel").is_none());
        let session = host.current().await.expect("session");
        assert_eq!(session.workspace_root(), root);
    }

    #[tokio::test]
    async fn selection_is_published_to_watchers() {
        let temp = workspace_fixture();
        let host = SessionHost::new(WardenConfig::default(), EventBus::new());
        let mut rx = host.watch_workspace();
        host.select_workspace(Some(temp.path()))
            .await
            .expect("select");
        rx.changed().await.expect("changed");
        let selected = rx.borrow().clone().expect("root");
        assert_eq!(selected, std::fs::canonicalize(temp.path()).expect("canonical"));
    }

    #[tokio::test]
    async fn invalid_selection_is_rejected() {
        let temp = workspace_fixture();
        let host = SessionHost::new(WardenConfig::default(), EventBus::new());
        let err = host
            .select_workspace(Some(&temp.path().join("file1.txt")))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidWorkspace { .. }));
    }

    #[tokio::test]
    async fn interactive_send_without_process_is_not_running() {
        let temp = workspace_fixture();
        let session =
            Session::open(temp.path(), WardenConfig::default(), EventBus::new()).expect("open");
        let err = session.send("hello").await.unwrap_err();
        assert!(matches!(err, SandboxError::NotRunning));
        let status = session.status().await;
        assert!(!status.running);
        assert_eq!(status.state, ProcessState::Stopped);
    }

    #[tokio::test]
    async fn start_outside_workspace_is_rejected() {
        let temp = workspace_fixture();
        let session =
            Session::open(temp.path(), WardenConfig::default(), EventBus::new()).expect("open");
        let err = session.start_process(Some("../")).await.unwrap_err();
        assert!(matches!(err, SandboxError::PathOutsideWorkspace { .. }));
        assert!(session.supervisor().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_replaces_existing_process() {
        let temp = workspace_fixture();
        let mut config = WardenConfig::default();
        config.tool.program = "/bin/cat".to_string();
        let session = Session::open(temp.path(), config, EventBus::new()).expect("open");

        session.start_process(None).await.expect("first start");
        let first_pid = session.status().await.pid;
        session
            .start_process(Some("folder1"))
            .await
            .expect("second start");
        let status = session.status().await;
        assert!(status.running);
        assert_ne!(status.pid, first_pid);
        assert!(status.workspace.expect("workspace").ends_with("folder1"));

        session.send("ping").await.expect("send");
        session.close().await;
        assert!(session.supervisor().await.is_none());
    }
}
