//! One-shot prompt execution against the external tool.
//!
//! Each call spawns an independent process with a deadline. A failure whose
//! text looks like capacity exhaustion is retried once with the fallback model.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::core::capacity::CapacityClassifier;
use crate::core::types::StreamKind;
use crate::error::{Result, SandboxError};
use crate::io::config::{ToolConfig, WardenConfig};
use crate::io::events::{EventBus, GatewayEvent, NoticeKind};
use crate::io::process::{
    BoundedText, OutputChunk, Termination, ToolCommand, signal_tree, spawn_reader,
};

/// Upper bound on waiting for a killed process to be reaped.
const REAP_GRACE: Duration = Duration::from_secs(2);

/// How long output readers may lag behind a process that already exited.
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

/// Arguments for a single non-interactive invocation.
pub fn build_invocation_args(prompt: &str, model: &str, output_format: &str) -> Vec<String> {
    vec![
        "-p".to_string(),
        prompt.to_string(),
        "--output-format".to_string(),
        output_format.to_string(),
        "--extensions".to_string(),
        "none".to_string(),
        "--model".to_string(),
        model.to_string(),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Pending,
    Resolved,
    Rejected,
}

/// State of one in-flight invocation. Output arriving after settlement is dropped.
#[derive(Debug)]
struct PendingRequest {
    deadline: Instant,
    stdout: BoundedText,
    stderr: BoundedText,
    settlement: Settlement,
}

impl PendingRequest {
    fn new(timeout: Duration, output_limit: usize) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            stdout: BoundedText::new(output_limit),
            stderr: BoundedText::new(output_limit),
            settlement: Settlement::Pending,
        }
    }

    /// Returns false when the chunk was discarded because the request already settled.
    fn accept(&mut self, chunk: OutputChunk) -> bool {
        if self.settlement != Settlement::Pending {
            trace!(
                stream = chunk.stream.as_str(),
                bytes = chunk.data.len(),
                "late output discarded"
            );
            return false;
        }
        match chunk.stream {
            StreamKind::Stdout => self.stdout.push(&chunk.data),
            StreamKind::Stderr => self.stderr.push(&chunk.data),
        }
        true
    }

    fn report_truncation(&self) {
        let stdout = self.stdout.dropped_bytes();
        let stderr = self.stderr.dropped_bytes();
        if stdout > 0 || stderr > 0 {
            warn!(stdout, stderr, "tool output exceeded the limit, oldest bytes dropped");
        }
    }

    fn settle(&mut self, settlement: Settlement) {
        if self.settlement == Settlement::Pending {
            self.settlement = settlement;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionGateway {
    tool: ToolConfig,
    cwd: PathBuf,
    output_limit_bytes: usize,
    /// `None` only if even the default signatures failed to compile.
    classifier: Option<CapacityClassifier>,
    events: EventBus,
    single_flight: Option<Arc<Semaphore>>,
}

impl ExecutionGateway {
    pub fn new(
        tool: ToolConfig,
        cwd: impl Into<PathBuf>,
        output_limit_bytes: usize,
        events: EventBus,
    ) -> Self {
        let classifier = CapacityClassifier::new(&tool.capacity_signatures)
            .or_else(|err| {
                warn!(err = %format!("{err:#}"), "invalid capacity signatures, using defaults");
                CapacityClassifier::with_defaults()
            })
            .map_err(|err| {
                error!(err = %format!("{err:#}"), "capacity classification disabled");
            })
            .ok();
        let single_flight = tool.single_flight.then(|| Arc::new(Semaphore::new(1)));
        Self {
            tool,
            cwd: cwd.into(),
            output_limit_bytes,
            classifier,
            events,
            single_flight,
        }
    }

    pub fn from_config(config: &WardenConfig, cwd: impl Into<PathBuf>, events: EventBus) -> Self {
        Self::new(config.tool.clone(), cwd, config.output_limit_bytes, events)
    }

    pub fn tool(&self) -> &ToolConfig {
        &self.tool
    }

    /// Run `prompt` once, retrying at most once with the fallback model on capacity exhaustion.
    #[instrument(skip_all, fields(model = %self.tool.model, prompt_bytes = prompt.len()))]
    pub async fn execute_prompt(&self, prompt: &str) -> Result<String> {
        let _permit = match &self.single_flight {
            Some(gate) => gate.acquire().await.ok(),
            None => None,
        };

        match self.run_once(prompt, &self.tool.model).await {
            Err(SandboxError::CapacityExhausted { message }) => {
                let Some(fallback) = self.tool.effective_fallback() else {
                    return Err(SandboxError::CapacityExhausted { message });
                };
                warn!(
                    primary = %self.tool.model,
                    fallback,
                    "capacity exhausted, retrying with fallback model"
                );
                self.events.emit(GatewayEvent::Notice {
                    kind: NoticeKind::Fallback,
                    message: format!(
                        "{} is out of capacity; retrying with {fallback}",
                        self.tool.model
                    ),
                });
                self.run_once(prompt, fallback).await
            }
            other => other,
        }
    }

    #[instrument(skip_all, fields(model = %model, timeout_secs = self.tool.timeout_secs))]
    async fn run_once(&self, prompt: &str, model: &str) -> Result<String> {
        let args = build_invocation_args(prompt, model, &self.tool.output_format);
        let mut child = ToolCommand::new(&self.tool.program, &self.cwd)
            .args(args)
            .spawn()?;
        let pid = child.id();

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, StreamKind::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, StreamKind::Stderr, tx.clone());
        }
        drop(tx);

        let timeout = self.tool.timeout();
        let mut request = PendingRequest::new(timeout, self.output_limit_bytes);
        let deadline = tokio::time::sleep_until(request.deadline);
        tokio::pin!(deadline);

        let status = loop {
            tokio::select! {
                _ = &mut deadline => break None,
                Some(chunk) = rx.recv() => {
                    request.accept(chunk);
                }
                status = child.wait() => break Some(status),
            }
        };

        let Some(status) = status else {
            request.settle(Settlement::Rejected);
            self.kill_after_timeout(pid, &mut child).await;
            while let Ok(chunk) = rx.try_recv() {
                request.accept(chunk);
            }
            self.events.emit(GatewayEvent::Notice {
                kind: NoticeKind::Timeout,
                message: format!("request timed out after {}s", timeout.as_secs()),
            });
            return Err(SandboxError::RequestTimeout { timeout });
        };
        let status = status.map_err(|source| SandboxError::ProcessIo { op: "wait", source })?;

        let drained = tokio::time::timeout(OUTPUT_DRAIN, async {
            while let Some(chunk) = rx.recv().await {
                request.accept(chunk);
            }
        })
        .await;
        if drained.is_err() {
            debug!("output pipes still open after exit");
        }

        request.report_truncation();
        if status.success() {
            request.settle(Settlement::Resolved);
            debug!(bytes = request.stdout.as_str().len(), "request resolved");
            return Ok(request.stdout.into_string());
        }

        request.settle(Settlement::Rejected);
        let stderr = request.stderr.as_str().trim();
        let message = if stderr.is_empty() {
            match status.code() {
                Some(code) => format!("{} exited with code {code}", self.tool.program),
                None => format!("{} was terminated by a signal", self.tool.program),
            }
        } else {
            stderr.to_string()
        };
        let is_capacity = self
            .classifier
            .as_ref()
            .is_some_and(|classifier| classifier.is_capacity_error(&message));
        if is_capacity {
            info!("failure classified as capacity exhaustion");
            return Err(SandboxError::CapacityExhausted { message });
        }
        Err(SandboxError::ProcessExitNonZero {
            code: status.code(),
            message,
        })
    }

    async fn kill_after_timeout(&self, pid: Option<u32>, child: &mut Child) {
        warn!(
            pid = ?pid,
            timeout_secs = self.tool.timeout_secs,
            "request timed out, killing process tree"
        );
        match pid {
            Some(pid) => {
                if let Err(err) = signal_tree(pid, Termination::Forced) {
                    warn!(pid, err = %err, "failed to kill process tree");
                }
            }
            None => {
                if let Err(err) = child.start_kill() {
                    warn!(err = %err, "failed to kill process");
                }
            }
        }
        if tokio::time::timeout(REAP_GRACE, child.wait()).await.is_err() {
            warn!(pid = ?pid, "process still running after kill");
        }
    }
}
