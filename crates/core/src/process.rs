//! Subprocess execution shared by every external engine.
//!
//! Provides [`run_command`]: spawn, optionally feed stdin, capture
//! stdout/stderr, and block until the child exits or the timeout fires.
//! Callers build a [`tokio::process::Command`] for their engine and hand
//! it over together with a [`ProcessInput`].

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Per-invocation process settings.
#[derive(Debug, Clone)]
pub struct ProcessInput {
    /// Text written to the child's stdin, which is then closed.
    /// `None` attaches stdin to `/dev/null`.
    pub stdin: Option<String>,
    /// Additional environment variables set for the child process.
    pub env_vars: Vec<(String, String)>,
    /// Working directory for the child process (uses current dir if `None`).
    pub working_directory: Option<PathBuf>,
    /// Maximum wall-clock time before the process is killed.
    pub timeout: Duration,
}

impl ProcessInput {
    pub fn new(timeout: Duration) -> Self {
        Self {
            stdin: None,
            env_vars: Vec::new(),
            working_directory: None,
            timeout,
        }
    }

    pub fn with_stdin(mut self, text: impl Into<String>) -> Self {
        self.stdin = Some(text.into());
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }
}

/// Captured result of a process that ran to completion.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Errors raised before a process could run to completion.
///
/// A non-zero exit is not an error at this level; it is reported through
/// [`ProcessOutput::exit_code`].
#[derive(Debug)]
pub enum ProcessError {
    /// The program could not be found on `PATH` or at the given path.
    NotFound(String),
    /// The process exceeded its timeout and was killed.
    Timeout {
        /// Elapsed wall-clock time before the process was killed.
        elapsed_ms: u64,
    },
    /// Spawning or communicating with the process failed.
    IoError(std::io::Error),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(program) => write!(f, "Program not found: {program}"),
            Self::Timeout { elapsed_ms } => write!(f, "Process timed out after {elapsed_ms}ms"),
            Self::IoError(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(err) => Some(err),
            _ => None,
        }
    }
}

/// Spawn `cmd`, feed `input.stdin`, capture output and wait for exit.
///
/// The child is killed if the timeout elapses (`kill_on_drop`).
pub async fn run_command(
    cmd: &mut Command,
    input: ProcessInput,
) -> Result<ProcessOutput, ProcessError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();

    let stdin_mode = if input.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    };
    cmd.stdin(stdin_mode)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, value) in &input.env_vars {
        cmd.env(key, value);
    }

    if let Some(dir) = &input.working_directory {
        cmd.current_dir(dir);
    }

    let start = Instant::now();

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ProcessError::NotFound(program.clone()),
        _ => ProcessError::IoError(e),
    })?;

    let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
    let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

    // Fed from its own task: an engine that never drains stdin must still
    // be bounded by the timeout.
    if let (Some(mut stdin), Some(text)) = (child.stdin.take(), input.stdin) {
        tokio::spawn(async move {
            // The engine may exit without draining stdin; that shows up in its exit status.
            let _ = stdin.write_all(text.as_bytes()).await;
        });
    }

    let waited = tokio::time::timeout(input.timeout, child.wait()).await;
    match waited {
        Ok(Ok(status)) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            let stdout_bytes = stdout_task.await.unwrap_or_default();
            let stderr_bytes = stderr_task.await.unwrap_or_default();

            tracing::debug!(
                program = %program,
                exit_code = ?status.code(),
                duration_ms,
                "Process exited",
            );

            Ok(ProcessOutput {
                stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
                exit_code: status.code(),
                duration_ms,
            })
        }
        Ok(Err(e)) => Err(ProcessError::IoError(e)),
        Err(_elapsed) => {
            let elapsed_ms = start.elapsed().as_millis() as u64;
            tracing::warn!(program = %program, elapsed_ms, "Process timed out, killing");
            let _ = child.start_kill();
            Err(ProcessError::Timeout { elapsed_ms })
        }
    }
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
