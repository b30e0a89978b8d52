//! Spawn, stream, and terminate primitives shared by the supervisor and the
//! one-shot execution gateway.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, trace, warn};

use crate::core::types::StreamKind;
use crate::error::{Result, SandboxError};

/// Environment applied to every tool process so its output stays machine-parseable.
pub const SANITIZED_ENV: &[(&str, &str)] =
    &[("NO_COLOR", "1"), ("FORCE_COLOR", "0"), ("TERM", "dumb")];

const READ_CHUNK_BYTES: usize = 8192;

/// Builder for an external tool invocation. The program runs directly, never through a shell.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    pipe_stdin: bool,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            pipe_stdin: false,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Keep stdin open as a pipe instead of `/dev/null`.
    pub fn pipe_stdin(mut self, pipe: bool) -> Self {
        self.pipe_stdin = pipe;
        self
    }

    /// Spawn with piped stdout/stderr. On Unix the child leads its own process group.
    #[instrument(skip_all, fields(program = %self.program, cwd = %self.cwd.display()))]
    pub fn spawn(&self) -> Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .stdin(if self.pipe_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in SANITIZED_ENV {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        debug!("spawning tool process");
        let child = cmd.spawn().map_err(|source| {
            error!(err = %source, "failed to spawn tool process");
            SandboxError::SpawnFailed {
                program: self.program.clone(),
                source,
            }
        })?;
        debug!(pid = ?child.id(), "tool process spawned");
        Ok(child)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// SIGTERM, or `taskkill /T` on Windows.
    Graceful,
    /// SIGKILL, or `taskkill /T /F` on Windows.
    Forced,
}

/// Signal the process tree rooted at `pid`. A tree that is already gone is not an error.
#[cfg(unix)]
pub fn signal_tree(pid: u32, termination: Termination) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let signal = match termination {
        Termination::Graceful => Signal::SIGTERM,
        Termination::Forced => Signal::SIGKILL,
    };
    let raw = i32::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    debug!(pid, ?signal, "signalling process group");
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(std::io::Error::from(errno)),
    }
}

/// Signal the process tree rooted at `pid`. A tree that is already gone is not an error.
#[cfg(windows)]
pub fn signal_tree(pid: u32, termination: Termination) -> std::io::Result<()> {
    let mut cmd = std::process::Command::new("taskkill");
    cmd.args(["/PID", &pid.to_string(), "/T"]);
    if termination == Termination::Forced {
        cmd.arg("/F");
    }
    debug!(pid, ?termination, "running taskkill");
    let output = cmd.stdout(Stdio::null()).stderr(Stdio::null()).status()?;
    if !output.success() {
        trace!(pid, code = ?output.code(), "taskkill reported failure, process likely gone");
    }
    Ok(())
}

/// Signal number that terminated the process, if any.
pub fn exit_signal(status: &ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}

/// Incremental UTF-8 decoder that holds back sequences split across reads.
///
/// Invalid bytes are replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left, replacing an incomplete trailing sequence.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Text buffer capped at `limit` bytes that discards the oldest text first.
#[derive(Debug, Clone)]
pub struct BoundedText {
    text: String,
    limit: usize,
    dropped: usize,
}

impl BoundedText {
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
            dropped: 0,
        }
    }

    pub fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        if self.text.len() > self.limit {
            let mut cut = self.text.len() - self.limit;
            while !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.drain(..cut);
            self.dropped += cut;
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.dropped = 0;
    }

    /// Bytes discarded from the front since the last clear.
    pub fn dropped_bytes(&self) -> usize {
        self.dropped
    }
}

/// One decoded chunk read from a child's stdout or stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: StreamKind,
    pub data: String,
}

/// Forward a pipe to `tx` chunk by chunk until EOF or until the receiver is gone.
pub fn spawn_reader<R>(
    reader: R,
    stream: StreamKind,
    tx: mpsc::UnboundedSender<OutputChunk>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = reader;
        let mut decoder = Utf8ChunkDecoder::default();
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let data = decoder.decode(&buf[..n]);
                    if data.is_empty() {
                        continue;
                    }
                    if tx.send(OutputChunk { stream, data }).is_err() {
                        trace!(stream = stream.as_str(), "output receiver closed");
                        return;
                    }
                }
                Err(err) => {
                    warn!(stream = stream.as_str(), err = %err, "failed to read tool output");
                    break;
                }
            }
        }
        let data = decoder.finish();
        if !data.is_empty() {
            let _ = tx.send(OutputChunk { stream, data });
        }
    })
}
