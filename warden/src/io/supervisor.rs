//! Lifecycle supervision of the long-lived interactive tool process.
//!
//! The supervisor owns one child at a time and drives the state machine
//! `Stopped -> Starting -> Running -> Stopping -> Stopped` (or `-> Error` on a
//! failed spawn). Output is buffered and re-published on the [`EventBus`].
//!
//! Exits are observed by a monitor task. Automatic restarts are scheduled as
//! separate tasks that re-enter [`ProcessSupervisor::start`] through an epoch
//! check, so an explicit `start`/`stop` issued during the delay cancels them.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::core::restart::{ExitAction, RestartPolicy, on_exit};
use crate::core::types::{ProcessState, StreamKind};
use crate::error::{Result, SandboxError};
use crate::io::config::WardenConfig;
use crate::io::events::{EventBus, GatewayEvent};
use crate::io::process::{
    BoundedText, OutputChunk, Termination, ToolCommand, exit_signal, signal_tree, spawn_reader,
};

/// How long the monitor waits for readers to drain after the child exits.
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

/// Static description of the process to supervise.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub restart: RestartPolicy,
    pub stop_grace: Duration,
    pub output_limit_bytes: usize,
}

impl SupervisorOptions {
    /// Options for the interactive tool, running in `cwd`.
    pub fn from_config(config: &WardenConfig, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: config.tool.program.clone(),
            args: config.tool.interactive_args.clone(),
            cwd: cwd.into(),
            restart: config.supervisor.restart_policy(),
            stop_grace: config.supervisor.stop_grace(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

/// Stdin is shared with in-flight `send` calls, which write without holding
/// the state lock.
type SharedStdin = Arc<Mutex<ChildStdin>>;

struct RunningChild {
    pid: Option<u32>,
    stdin: Option<SharedStdin>,
    exited: watch::Receiver<bool>,
}

struct Inner {
    state: ProcessState,
    child: Option<RunningChild>,
    restart_count: u32,
    output: BoundedText,
    /// Bumped by every explicit start/stop; scheduled restarts carry the value they saw.
    epoch: u64,
}

struct Shared {
    options: SupervisorOptions,
    events: EventBus,
    inner: Mutex<Inner>,
}

/// Handle to a supervised process. Clones share the same process.
#[derive(Clone)]
pub struct ProcessSupervisor {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("program", &self.shared.options.program)
            .field("cwd", &self.shared.options.cwd)
            .finish_non_exhaustive()
    }
}

impl ProcessSupervisor {
    pub fn new(options: SupervisorOptions, events: EventBus) -> Self {
        let output = BoundedText::new(options.output_limit_bytes);
        Self {
            shared: Arc::new(Shared {
                options,
                events,
                inner: Mutex::new(Inner {
                    state: ProcessState::Stopped,
                    child: None,
                    restart_count: 0,
                    output,
                    epoch: 0,
                }),
            }),
        }
    }

    /// Spawn the process. Fails unless the supervisor is `Stopped` or `Error`.
    pub async fn start(&self) -> Result<()> {
        start_inner(&self.shared, None).await
    }

    /// Stop the process: SIGTERM, then SIGKILL after the grace window.
    /// `force` skips straight to SIGKILL. Stopping an idle supervisor is a no-op.
    #[instrument(skip(self), fields(program = %self.shared.options.program))]
    pub async fn stop(&self, force: bool) -> Result<()> {
        let mut inner = self.shared.inner.lock().await;
        inner.epoch += 1;
        let Some(child) = inner.child.as_mut() else {
            debug!(state = %inner.state, "stop on idle supervisor");
            return Ok(());
        };
        let pid = child.pid;
        let mut exited = child.exited.clone();
        // Closing stdin lets well-behaved tools exit on their own.
        child.stdin = None;
        set_state(&self.shared, &mut inner, ProcessState::Stopping);
        drop(inner);

        if let Some(pid) = pid {
            if force {
                terminate(pid, Termination::Forced);
            } else {
                terminate(pid, Termination::Graceful);
                let grace = self.shared.options.stop_grace;
                if tokio::time::timeout(grace, wait_exited(&mut exited))
                    .await
                    .is_err()
                {
                    warn!(pid, grace_secs = grace.as_secs(), "process ignored SIGTERM, killing");
                    terminate(pid, Termination::Forced);
                }
            }
        }
        wait_exited(&mut exited).await;
        self.shared.events.emit(GatewayEvent::Stopped);
        info!("process stopped");
        Ok(())
    }

    pub async fn restart(&self) -> Result<()> {
        self.stop(false).await?;
        self.start().await
    }

    /// Write `message` to the process's stdin, newline-terminated.
    ///
    /// The write happens outside the state lock, so a tool that stops reading
    /// stdin blocks only this call; `stop` still kills it, which fails the write.
    pub async fn send(&self, message: &str) -> Result<()> {
        let stdin = {
            let inner = self.shared.inner.lock().await;
            if inner.state != ProcessState::Running {
                return Err(SandboxError::NotRunning);
            }
            inner
                .child
                .as_ref()
                .and_then(|child| child.stdin.clone())
                .ok_or(SandboxError::NotRunning)?
        };

        let mut payload = message.to_string();
        if !payload.ends_with('\n') {
            payload.push('\n');
        }
        let mut stdin = stdin.lock().await;
        stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|source| SandboxError::ProcessIo {
                op: "write stdin",
                source,
            })?;
        stdin.flush().await.map_err(|source| SandboxError::ProcessIo {
            op: "flush stdin",
            source,
        })?;
        drop(stdin);

        self.shared.events.emit(GatewayEvent::Sent {
            message: message.to_string(),
        });
        Ok(())
    }

    pub async fn state(&self) -> ProcessState {
        self.shared.inner.lock().await.state
    }

    pub async fn is_running(&self) -> bool {
        self.state().await == ProcessState::Running
    }

    /// Buffered stdout and stderr, in arrival order.
    pub async fn output(&self) -> String {
        self.shared.inner.lock().await.output.as_str().to_string()
    }

    pub async fn clear_output(&self) {
        self.shared.inner.lock().await.output.clear();
    }

    pub async fn restart_count(&self) -> u32 {
        self.shared.inner.lock().await.restart_count
    }

    pub async fn reset_restart_count(&self) {
        self.shared.inner.lock().await.restart_count = 0;
    }

    pub async fn pid(&self) -> Option<u32> {
        self.shared
            .inner
            .lock()
            .await
            .child
            .as_ref()
            .and_then(|child| child.pid)
    }

    /// Working directory of the supervised process.
    pub fn workspace(&self) -> &Path {
        &self.shared.options.cwd
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.shared.events.subscribe()
    }

    /// Kill the process immediately and cancel any pending restart.
    pub async fn shutdown(&self) {
        if let Err(err) = self.stop(true).await {
            warn!(err = %err, "shutdown failed");
        }
    }
}

fn set_state(shared: &Shared, inner: &mut Inner, state: ProcessState) {
    if inner.state == state {
        return;
    }
    debug!(from = %inner.state, to = %state, "state change");
    inner.state = state;
    shared.events.emit(GatewayEvent::State { state });
}

fn terminate(pid: u32, termination: Termination) {
    if let Err(err) = signal_tree(pid, termination) {
        warn!(pid, ?termination, err = %err, "failed to signal process");
    }
}

async fn wait_exited(exited: &mut watch::Receiver<bool>) {
    let _ = exited.wait_for(|done| *done).await;
}

/// `scheduled` carries the epoch seen when an automatic restart was scheduled;
/// a mismatch means an explicit start or stop superseded it.
#[instrument(skip_all, fields(program = %shared.options.program, scheduled = scheduled.is_some()))]
async fn start_inner(shared: &Arc<Shared>, scheduled: Option<u64>) -> Result<()> {
    let mut inner = shared.inner.lock().await;
    match scheduled {
        Some(epoch) if epoch != inner.epoch => {
            debug!("scheduled restart superseded");
            return Ok(());
        }
        Some(_) => {}
        None => inner.epoch += 1,
    }
    if !inner.state.can_start() {
        return Err(SandboxError::AlreadyRunning { state: inner.state });
    }

    set_state(shared, &mut inner, ProcessState::Starting);
    let command = ToolCommand::new(&shared.options.program, &shared.options.cwd)
        .args(shared.options.args.iter().cloned())
        .pipe_stdin(true);
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            set_state(shared, &mut inner, ProcessState::Error);
            shared.events.emit(GatewayEvent::Error {
                message: err.to_string(),
            });
            return Err(err);
        }
    };

    let pid = child.id();
    let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, StreamKind::Stdout, chunk_tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, StreamKind::Stderr, chunk_tx.clone());
    }
    drop(chunk_tx);

    let (exit_tx, exit_rx) = watch::channel(false);
    inner.child = Some(RunningChild {
        pid,
        stdin: child.stdin.take().map(|stdin| Arc::new(Mutex::new(stdin))),
        exited: exit_rx,
    });
    set_state(shared, &mut inner, ProcessState::Running);
    shared.events.emit(GatewayEvent::Started { pid });
    info!(pid = ?pid, "process started");
    drop(inner);

    let pump = tokio::spawn(pump_output(Arc::clone(shared), chunk_rx));
    tokio::spawn(monitor(Arc::clone(shared), child, pump, exit_tx));
    Ok(())
}

async fn pump_output(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<OutputChunk>) {
    while let Some(chunk) = rx.recv().await {
        shared.inner.lock().await.output.push(&chunk.data);
        shared.events.emit(GatewayEvent::Output {
            stream: chunk.stream,
            data: chunk.data,
        });
    }
}

async fn monitor(
    shared: Arc<Shared>,
    mut child: Child,
    pump: JoinHandle<()>,
    exit_tx: watch::Sender<bool>,
) {
    let (code, signal) = match child.wait().await {
        Ok(status) => (status.code(), exit_signal(&status)),
        Err(err) => {
            warn!(err = %err, "failed to wait for process");
            (None, None)
        }
    };
    // Grandchildren may keep the pipes open; do not wait on them forever.
    if tokio::time::timeout(OUTPUT_DRAIN, pump).await.is_err() {
        debug!("output still open after exit, detaching readers");
    }
    shared.events.emit(GatewayEvent::Exited { code, signal });

    let mut inner = shared.inner.lock().await;
    let was_running = inner.state == ProcessState::Running;
    inner.child = None;
    set_state(&shared, &mut inner, ProcessState::Stopped);

    let policy = shared.options.restart;
    match on_exit(&policy, code, was_running, inner.restart_count) {
        ExitAction::ResetCounter => {
            debug!("clean exit, restart counter reset");
            inner.restart_count = 0;
        }
        ExitAction::Restart { attempt, delay } => {
            inner.restart_count = attempt;
            info!(attempt, max_restarts = policy.max_restarts, code = ?code, "scheduling restart");
            shared.events.emit(GatewayEvent::Restarting {
                attempt,
                max_restarts: policy.max_restarts,
            });
            schedule_restart(Arc::clone(&shared), inner.epoch, delay);
        }
        ExitAction::StayStopped => {
            if was_running {
                warn!(code = ?code, signal = ?signal, "process exited abnormally");
            }
        }
    }
    drop(inner);
    let _ = exit_tx.send(true);
}

fn schedule_restart(shared: Arc<Shared>, epoch: u64, delay: Duration) {
    let task: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
        tokio::time::sleep(delay).await;
        if let Err(err) = start_inner(&shared, Some(epoch)).await {
            warn!(err = %err, "automatic restart failed");
        }
    });
    tokio::spawn(task);
}
