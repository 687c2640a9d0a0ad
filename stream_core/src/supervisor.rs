//! Generator process supervision.
//!
//! A [`Supervisor`] turns a [`JobDescription`] into a running generator. The
//! description is written to a temporary JSON file and the generator is told
//! to stream raw PCM to its stdout (`-`). The returned [`GeneratorProcess`]
//! is the single owner of the child, its pipes and the temporary file; every
//! exit path ends in [`GeneratorProcess::terminate`], which is idempotent.
//! If an owner drops the handle without terminating it, `Drop` kills the
//! child and removes the file.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::job::JobDescription;

/// Default executable name of the generator.
pub const DEFAULT_GENERATOR: &str = "synapseq";
/// Grace period between SIGTERM and SIGKILL.
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);
/// Diagnostic bytes kept from the generator's stderr.
pub const MAX_DIAGNOSTIC_BYTES: usize = 64 * 1024;

/// Upper bound on waiting for the stderr drain after the child is gone.
/// Grandchildren that inherited the pipe could otherwise hold it open.
const STDERR_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to serialize job description: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write job description: {0}")]
    JobFile(#[source] io::Error),

    #[error("failed to start generator '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("generator produced no output within {0:?}")]
    StartupTimeout(Duration),

    #[error("generator exited before producing output: {diagnostics}")]
    ExitedEarly { diagnostics: String },

    #[error("failed to read generator output: {0}")]
    Read(#[source] io::Error),

    #[error("failed to wait for generator: {0}")]
    Wait(#[source] io::Error),

    #[error("generator is still running")]
    StillRunning,

    #[error("generator output is closed")]
    Closed,
}

/// How the generator ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    Failure {
        code: Option<i32>,
        diagnostics: String,
    },
}

impl ExitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Success)
    }
}

/// One read from the generator's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Data(Bytes),
    Eof,
}

/// Executable plus arguments placed before the fixed generator arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorCommand {
    pub program: PathBuf,
    pub leading_args: Vec<String>,
}

impl GeneratorCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Full argument list for a job file: quiet mode, JSON input, and `-`
    /// as the output target so PCM goes to stdout.
    pub fn args_for(&self, job_file: &Path) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.push("-quiet".to_string());
        args.push("-json".to_string());
        args.push(job_file.to_string_lossy().into_owned());
        args.push("-".to_string());
        args
    }
}

impl Default for GeneratorCommand {
    fn default() -> Self {
        Self::new(DEFAULT_GENERATOR)
    }
}

/// Starts generator processes. The HTTP layer only sees this trait.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn start(&self, description: &JobDescription) -> Result<GeneratorProcess, SupervisorError>;
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    command: GeneratorCommand,
    terminate_grace: Duration,
}

impl Supervisor {
    pub fn new(command: GeneratorCommand) -> Self {
        Self {
            command,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
        }
    }

    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    pub fn command(&self) -> &GeneratorCommand {
        &self.command
    }

    fn write_job_file(description: &JobDescription) -> Result<NamedTempFile, SupervisorError> {
        use std::io::Write;

        let json = description.to_json()?;
        let mut file = tempfile::Builder::new()
            .prefix("stream-job-")
            .suffix(".json")
            .tempfile()
            .map_err(SupervisorError::JobFile)?;
        file.write_all(&json).map_err(SupervisorError::JobFile)?;
        file.flush().map_err(SupervisorError::JobFile)?;
        Ok(file)
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(GeneratorCommand::default())
    }
}

#[async_trait]
impl Launcher for Supervisor {
    async fn start(&self, description: &JobDescription) -> Result<GeneratorProcess, SupervisorError> {
        let job_file = Self::write_job_file(description)?;
        let args = self.command.args_for(job_file.path());

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so termination also reaches anything the
        // generator forks.
        #[cfg(unix)]
        cmd.process_group(0);

        // On failure `job_file` is dropped here, which deletes it.
        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            program: self.command.program.display().to_string(),
            source,
        })?;

        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_diagnostics(stderr)));

        info!(
            pid = ?pid,
            program = %self.command.program.display(),
            job = %job_file.path().display(),
            "Generator started"
        );

        Ok(GeneratorProcess {
            child,
            pid,
            stdout,
            stderr_task,
            diagnostics: None,
            job_file: Some(job_file),
            pending: None,
            outcome: None,
            drained: false,
            eof_sent: false,
            released: false,
            terminate_grace: self.terminate_grace,
        })
    }
}

/// Live handle on one generator run.
#[derive(Debug)]
pub struct GeneratorProcess {
    child: Child,
    pid: Option<u32>,
    stdout: Option<ChildStdout>,
    stderr_task: Option<JoinHandle<Vec<u8>>>,
    diagnostics: Option<String>,
    job_file: Option<NamedTempFile>,
    pending: Option<Bytes>,
    outcome: Option<ExitOutcome>,
    drained: bool,
    eof_sent: bool,
    released: bool,
    terminate_grace: Duration,
}

impl GeneratorProcess {
    /// OS process id, if the child was running when spawned.
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Location of the job description file, while it still exists.
    pub fn job_path(&self) -> Option<&Path> {
        self.job_file.as_ref().map(|f| f.path())
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Waits up to `timeout` for the first bytes of output. They are kept
    /// and returned by the next [`read_chunk`](Self::read_chunk).
    ///
    /// A generator that exits successfully without any output is accepted;
    /// one that fails before writing anything is reported as
    /// [`SupervisorError::ExitedEarly`] so the caller can still send a clean
    /// error response.
    pub async fn await_output(&mut self, max_bytes: usize, timeout: Duration) -> Result<(), SupervisorError> {
        if self.pending.is_some() || self.drained {
            return Ok(());
        }
        match tokio::time::timeout(timeout, self.read_stdout(max_bytes)).await {
            Err(_) => Err(SupervisorError::StartupTimeout(timeout)),
            Ok(Err(e)) => Err(e),
            Ok(Ok(Some(bytes))) => {
                self.pending = Some(bytes);
                Ok(())
            }
            Ok(Ok(None)) => {
                self.reap().await?;
                match &self.outcome {
                    Some(ExitOutcome::Failure { diagnostics, code }) => Err(SupervisorError::ExitedEarly {
                        diagnostics: if diagnostics.is_empty() {
                            format!("exit code {:?}", code)
                        } else {
                            diagnostics.clone()
                        },
                    }),
                    _ => Ok(()),
                }
            }
        }
    }

    /// Reads up to `max_bytes` of output.
    ///
    /// Returns [`Chunk::Eof`] exactly once, after stdout closed and the
    /// child has been reaped. Any later call fails with
    /// [`SupervisorError::Closed`].
    pub async fn read_chunk(&mut self, max_bytes: usize) -> Result<Chunk, SupervisorError> {
        if self.released || self.eof_sent {
            return Err(SupervisorError::Closed);
        }
        if let Some(bytes) = self.pending.take() {
            return Ok(Chunk::Data(bytes));
        }
        if !self.drained {
            if let Some(bytes) = self.read_stdout(max_bytes).await? {
                return Ok(Chunk::Data(bytes));
            }
        }
        self.reap().await?;
        self.eof_sent = true;
        Ok(Chunk::Eof)
    }

    /// Exit outcome, once the generator has exited and been reaped.
    pub fn exit_status(&self) -> Result<&ExitOutcome, SupervisorError> {
        self.outcome.as_ref().ok_or(SupervisorError::StillRunning)
    }

    /// Stops the generator if it is still running and releases every
    /// resource held for it. Safe to call repeatedly and after a natural
    /// exit; later calls are no-ops.
    pub async fn terminate(&mut self) -> Result<(), SupervisorError> {
        if self.released {
            return Ok(());
        }

        let mut result = Ok(());
        if self.outcome.is_none() {
            result = self.stop().await;
        }

        self.stdout = None;
        self.pending = None;
        self.collect_diagnostics().await;
        self.attach_diagnostics();
        self.release_job_file();
        self.released = true;

        debug!(pid = ?self.pid, outcome = ?self.outcome, "Generator released");
        result
    }

    async fn stop(&mut self) -> Result<(), SupervisorError> {
        if let Some(status) = self.child.try_wait().map_err(SupervisorError::Wait)? {
            self.record_exit(status);
            return Ok(());
        }

        self.signal_terminate();
        match tokio::time::timeout(self.terminate_grace, self.child.wait()).await {
            Ok(status) => {
                let status = status.map_err(SupervisorError::Wait)?;
                self.record_exit(status);
            }
            Err(_) => {
                warn!(
                    pid = ?self.pid,
                    grace = ?self.terminate_grace,
                    "Generator ignored termination request, killing"
                );
                self.signal_kill();
                let status = self.child.wait().await.map_err(SupervisorError::Wait)?;
                self.record_exit(status);
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn signal_terminate(&mut self) {
        match self.pid {
            Some(pid) => signal_group(pid, libc::SIGTERM),
            None => {
                let _ = self.child.start_kill();
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&mut self) {
        let _ = self.child.start_kill();
    }

    fn signal_kill(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            signal_group(pid, libc::SIGKILL);
        }
        let _ = self.child.start_kill();
    }

    async fn read_stdout(&mut self, max_bytes: usize) -> Result<Option<Bytes>, SupervisorError> {
        let Some(stdout) = self.stdout.as_mut() else {
            self.drained = true;
            return Ok(None);
        };
        let mut buf = vec![0u8; max_bytes.max(1)];
        let n = stdout.read(&mut buf).await.map_err(SupervisorError::Read)?;
        if n == 0 {
            self.stdout = None;
            self.drained = true;
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }

    async fn reap(&mut self) -> Result<(), SupervisorError> {
        if self.outcome.is_none() {
            let status = self.child.wait().await.map_err(SupervisorError::Wait)?;
            self.record_exit(status);
        }
        self.collect_diagnostics().await;
        self.attach_diagnostics();
        Ok(())
    }

    /// Copies captured stderr into a failure outcome recorded before the
    /// stderr reader finished.
    fn attach_diagnostics(&mut self) {
        if let Some(ExitOutcome::Failure { diagnostics, .. }) = self.outcome.as_mut() {
            if diagnostics.is_empty() {
                if let Some(text) = &self.diagnostics {
                    *diagnostics = text.clone();
                }
            }
        }
    }

    fn record_exit(&mut self, status: ExitStatus) {
        let outcome = if status.success() {
            ExitOutcome::Success
        } else {
            ExitOutcome::Failure {
                code: status.code(),
                diagnostics: self.diagnostics.clone().unwrap_or_default(),
            }
        };
        debug!(pid = ?self.pid, ?status, "Generator exited");
        self.outcome = Some(outcome);
    }

    async fn collect_diagnostics(&mut self) {
        let Some(mut task) = self.stderr_task.take() else {
            return;
        };
        let bytes = match tokio::time::timeout(STDERR_JOIN_TIMEOUT, &mut task).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                warn!(pid = ?self.pid, "Diagnostic reader failed: {e}");
                Vec::new()
            }
            Err(_) => {
                task.abort();
                warn!(pid = ?self.pid, "Generator stderr still open after exit");
                Vec::new()
            }
        };
        self.diagnostics = Some(String::from_utf8_lossy(&bytes).trim().to_string());
    }

    fn release_job_file(&mut self) {
        if let Some(file) = self.job_file.take() {
            let path = file.path().to_path_buf();
            if let Err(e) = file.close() {
                warn!(path = %path.display(), "Failed to remove job description: {e}");
            }
        }
    }
}

impl Drop for GeneratorProcess {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(pid = ?self.pid, "Generator handle dropped without terminate, killing");
        if self.outcome.is_none() {
            self.signal_kill();
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        self.release_job_file();
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) takes no pointers; a negative pid addresses the
    // process group created for this child at spawn time.
    let ret = unsafe { libc::kill(-pid, signal) };
    if ret != 0 {
        debug!(pid, signal, "kill failed: {}", io::Error::last_os_error());
    }
}

/// Reads the whole stream, keeping the first [`MAX_DIAGNOSTIC_BYTES`]. The
/// pipe is drained to the end so a chatty generator never blocks on it.
async fn drain_diagnostics<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut kept = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = MAX_DIAGNOSTIC_BYTES.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    kept
}
