//! Spawned interactive process with piped stdin/stdout/stderr.
//!
//! Output is pushed through a single ordered event channel. Each stream keeps
//! production order; stdout and stderr are independent of each other. Exactly
//! one `ProcessEvent::Exited` is delivered, after both streams have drained.

use std::borrow::Cow;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{SpawnError, WriteError};

const READ_CHUNK_SIZE: usize = 4096;

/// How long stream readers may keep draining after the process is reaped.
/// A descendant that inherited the pipes must not hold up the exit event.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// What to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Executable name or path
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory (inherits the server's when `None`)
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program and arguments joined for logging
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Which stream produced a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputSource {
    Stdout,
    Stderr,
}

/// An immutable piece of process output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub source: OutputSource,
    pub data: Arc<[u8]>,
}

impl OutputChunk {
    pub fn new(source: OutputSource, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            source,
            data: data.into(),
        }
    }

    pub fn stdout(data: impl AsRef<[u8]>) -> Self {
        Self::new(OutputSource::Stdout, data.as_ref())
    }

    pub fn stderr(data: impl AsRef<[u8]>) -> Self {
        Self::new(OutputSource::Stderr, data.as_ref())
    }

    /// Lossy UTF-8 view of the payload. Chunks read from a process never
    /// end inside a multibyte sequence, so only truly invalid bytes are replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// How a process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitReason {
    /// Normal exit with a status code
    Exited { code: i32 },
    /// Killed by a signal (Unix)
    Signaled { signal: i32 },
    /// I/O failure on the process or its streams
    Failed { message: String },
}

impl ExitReason {
    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited { code };
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signaled { signal };
            }
        }
        Self::Exited { code: -1 }
    }

    /// Exit code, when the process exited normally
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Exited { code } => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code } => write!(f, "exited with code {}", code),
            Self::Signaled { signal } => write!(f, "terminated by signal {}", signal),
            Self::Failed { message } => write!(f, "failed: {}", message),
        }
    }
}

/// Push notification from a running process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Output(OutputChunk),
    Exited(ExitReason),
}

/// Receiving half of a process's event stream
#[derive(Debug)]
pub struct ProcessEvents {
    rx: mpsc::UnboundedReceiver<ProcessEvent>,
}

impl ProcessEvents {
    /// Next event; `None` after the exit event has been consumed
    pub async fn recv(&mut self) -> Option<ProcessEvent> {
        self.rx.recv().await
    }
}

/// Owns one spawned process: its stdin, pid and exit state
pub struct ProcessHandle {
    pid: Option<u32>,
    program: String,
    stdin: Mutex<Option<ChildStdin>>,
    exit_rx: watch::Receiver<Option<ExitReason>>,
    kill: CancellationToken,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("program", &self.program)
            .field("exited", &self.is_exited())
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Spawn `spec` and start pumping its output.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn spawn(spec: &ProcessSpec) -> Result<(Self, ProcessEvents), SpawnError> {
        if spec.program.trim().is_empty() {
            return Err(SpawnError::EmptyCommand);
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        // Own process group, so terminate() reaches every descendant.
        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd.spawn().map_err(|source| SpawnError::Io {
            program: spec.program.clone(),
            source,
        })?;

        let pid = child.id();
        let stdin = child.stdin.take().ok_or(SpawnError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SpawnError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SpawnError::MissingPipe("stderr"))?;

        info!(pid = ?pid, command = %spec.command_line(), "Spawned interactive process");

        let (tx, rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let kill = CancellationToken::new();

        let readers = [
            tokio::spawn(pump(stdout, OutputSource::Stdout, tx.clone(), kill.clone())),
            tokio::spawn(pump(stderr, OutputSource::Stderr, tx.clone(), kill.clone())),
        ];
        tokio::spawn(supervise(child, pid, readers, tx, exit_tx, kill.clone()));

        Ok((
            Self {
                pid,
                program: spec.program.clone(),
                stdin: Mutex::new(Some(stdin)),
                exit_rx,
                kill,
            },
            ProcessEvents { rx },
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exit_rx.borrow().clone()
    }

    /// Write raw bytes to stdin. Fails once the process has exited.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), WriteError> {
        if self.is_exited() {
            return Err(WriteError::ProcessExited);
        }

        let mut stdin = self.stdin.lock().await;
        let pipe = stdin.as_mut().ok_or(WriteError::ProcessExited)?;

        let result = match pipe.write_all(bytes).await {
            Ok(()) => pipe.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            if pipe_is_gone(&e, self.is_exited()) {
                *stdin = None;
                return Err(WriteError::ProcessExited);
            }
            return Err(WriteError::Io(e));
        }
        Ok(())
    }

    /// Forcibly kill the process and its descendants.
    ///
    /// Idempotent; a no-op once the process has exited.
    pub fn terminate(&self) {
        if self.is_exited() || self.kill.is_cancelled() {
            return;
        }
        debug!(pid = ?self.pid, "Termination requested");
        self.kill.cancel();
    }

    /// Wait for the exit reason
    pub async fn wait(&self) -> ExitReason {
        let mut rx = self.exit_rx.clone();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone(),
            Err(_) => None,
        };
        result.unwrap_or_else(|| ExitReason::Failed {
            message: "process supervisor stopped".to_string(),
        })
    }
}

/// Whether a failed stdin write means the pipe can never be written again
fn pipe_is_gone(err: &io::Error, exited: bool) -> bool {
    exited || err.kind() == io::ErrorKind::BrokenPipe
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.kill.cancel();
    }
}

async fn pump<R>(
    mut stream: R,
    source: OutputSource,
    tx: mpsc::UnboundedSender<ProcessEvent>,
    kill: CancellationToken,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut carry = Utf8Carry::default();
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                let rest = carry.finish();
                if !rest.is_empty() {
                    let _ = tx.send(ProcessEvent::Output(OutputChunk::new(source, rest)));
                }
                return Ok(());
            }
            Ok(n) => {
                let complete = carry.push(&buf[..n]);
                if complete.is_empty() {
                    continue;
                }
                let chunk = OutputChunk::new(source, complete);
                if tx.send(ProcessEvent::Output(chunk)).is_err() {
                    return Ok(());
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // A broken output stream leaves the process unusable.
                warn!(source = ?source, error = %e, "Process stream read failed");
                kill.cancel();
                return Err(e);
            }
        }
    }
}

/// Holds back a UTF-8 sequence cut off at the end of a read until the rest
/// of it arrives.
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    /// Append `bytes` and return everything up to the last complete sequence
    fn push(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(bytes);
        let keep = incomplete_tail_len(&data);
        self.pending = data.split_off(data.len() - keep);
        data
    }

    /// Whatever is still held back once the stream ends
    fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }
}

/// Length of a truncated multibyte sequence at the end of `buf`, or 0
fn incomplete_tail_len(buf: &[u8]) -> usize {
    for back in 1..=buf.len().min(3) {
        let byte = buf[buf.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let needed = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return 0,
        };
        return if needed > back { back } else { 0 };
    }
    0
}

async fn supervise(
    mut child: tokio::process::Child,
    pid: Option<u32>,
    readers: [JoinHandle<io::Result<()>>; 2],
    tx: mpsc::UnboundedSender<ProcessEvent>,
    exit_tx: watch::Sender<Option<ExitReason>>,
    kill: CancellationToken,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.cancelled() => {
            if let Some(pid) = pid {
                kill_tree(pid);
            }
            if let Err(e) = child.start_kill() {
                debug!(pid = ?pid, error = %e, "start_kill failed (already exited?)");
            }
            child.wait().await
        }
    };

    // Jobs the shell left running in the background share its group.
    match pid {
        Some(pid) if cfg!(unix) => kill_tree(pid),
        _ => {}
    }

    let mut stream_error = None;
    for mut reader in readers {
        match tokio::time::timeout(READER_DRAIN_TIMEOUT, &mut reader).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => stream_error = Some(e.to_string()),
            Ok(Err(join_err)) => stream_error = Some(join_err.to_string()),
            Err(_) => {
                debug!(pid = ?pid, "Output stream still open after exit, abandoning");
                reader.abort();
            }
        }
    }

    let reason = match (status, stream_error) {
        (Err(e), _) => ExitReason::Failed {
            message: e.to_string(),
        },
        (Ok(_), Some(message)) => ExitReason::Failed { message },
        (Ok(status), None) => ExitReason::from_status(status),
    };

    info!(pid = ?pid, reason = %reason, "Interactive process ended");
    exit_tx.send_replace(Some(reason.clone()));
    let _ = tx.send(ProcessEvent::Exited(reason));
}

/// Best-effort kill of the whole process tree rooted at `pid`.
#[cfg(unix)]
fn kill_tree(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "PID exceeds i32::MAX, cannot signal process group");
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid, error = %e, "Failed to kill process group"),
    }
}

#[cfg(windows)]
fn kill_tree(pid: u32) {
    let spawned = Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/f", "/t"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    if let Err(e) = spawned {
        warn!(pid, error = %e, "Failed to run taskkill");
    }
}

#[cfg(not(any(unix, windows)))]
fn kill_tree(_pid: u32) {}

#[cfg(all(test, unix))]
mod tests;
