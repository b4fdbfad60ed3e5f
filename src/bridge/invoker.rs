//! Process invoker: spawns an external executable and exposes its output
//! either all at once (`collect_all`) or line by line (`iterate_lines`).
//!
//! Children are spawned with `kill_on_drop`, so a handle that goes away
//! before the process exits takes the process with it. A nonzero exit is
//! data, not an error. Callers decide what it means.

use std::ffi::OsString;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::bridge::error::BridgeError;

/// Log target for script stderr.
pub const SCRIPT_LOG_TARGET: &str = "medbridge::script";

const STDERR_GRACE: Duration = Duration::from_secs(1);

/// Termination state of a spawned process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Pending,
    /// `None` when the process was terminated by a signal.
    Exited(Option<i32>),
}

/// Everything a finished process wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// One live external process.
#[derive(Debug)]
pub struct ProcessHandle {
    command: String,
    args: Vec<OsString>,
    child: Child,
    status: ProcessStatus,
}

/// Spawn `program` with positional `args`.
pub fn invoke(program: &Path, args: &[OsString]) -> Result<ProcessHandle, BridgeError> {
    let command = program.display().to_string();

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| BridgeError::Spawn {
            command: command.clone(),
            source,
        })?;

    tracing::debug!(
        command = %command,
        arg_count = args.len(),
        pid = ?child.id(),
        "Script spawned"
    );

    Ok(ProcessHandle {
        command,
        args: args.to_vec(),
        child,
        status: ProcessStatus::Pending,
    })
}

impl ProcessHandle {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    /// Wait for exit and return both streams decoded as text.
    ///
    /// Stdout and stderr are drained concurrently, so a chatty stderr
    /// cannot stall the child.
    pub async fn collect_all(self) -> Result<ProcessOutput, BridgeError> {
        self.collect_until(std::future::pending())
            .await?
            .ok_or_else(|| BridgeError::Io(std::io::Error::other("script stopped early")))
    }

    /// Like `collect_all`, but if `stop` resolves first the child is killed
    /// and reaped, and `None` is returned.
    pub async fn collect_until<F>(mut self, stop: F) -> Result<Option<ProcessOutput>, BridgeError>
    where
        F: Future<Output = ()>,
    {
        let stdout = read_pipe(self.child.stdout.take());
        let stderr = read_pipe(self.child.stderr.take());

        tokio::select! {
            status = self.child.wait() => {
                let exit_code = status?.code();
                log_exit(&self.command, exit_code);
                Ok(Some(ProcessOutput {
                    stdout: join_text(stdout).await?,
                    stderr: join_text(stderr).await?,
                    exit_code,
                }))
            }
            () = stop => {
                tracing::info!(command = %self.command, pid = ?self.child.id(), "Stopping script");
                // kill() also waits, so the child is reaped on return.
                if let Err(e) = self.child.kill().await {
                    tracing::warn!(command = %self.command, error = %e, "Failed to kill script");
                }
                stdout.abort();
                stderr.abort();
                Ok(None)
            }
        }
    }

    /// Switch to line mode. Stderr is logged in the background and never
    /// shows up in the returned lines.
    pub fn iterate_lines(mut self) -> Result<OutputLines, BridgeError> {
        let stdout = self.child.stdout.take().ok_or_else(|| {
            BridgeError::Io(std::io::Error::other("child stdout was not captured"))
        })?;
        let stderr_task = self
            .child
            .stderr
            .take()
            .map(|stderr| drain_stderr(stderr, self.command.clone()));

        Ok(OutputLines {
            command: self.command,
            reader: BufReader::new(stdout),
            child: Some(self.child),
            status: self.status,
            stderr_task,
            buf: Vec::new(),
        })
    }
}

/// Stdout of a running process, one line at a time. Not restartable.
#[derive(Debug)]
pub struct OutputLines {
    command: String,
    reader: BufReader<ChildStdout>,
    /// `None` once the child has been reaped.
    child: Option<Child>,
    status: ProcessStatus,
    stderr_task: Option<JoinHandle<()>>,
    buf: Vec<u8>,
}

impl OutputLines {
    /// Next stdout line without its line terminator, or `None` once stdout
    /// is closed. At that point the child has been reaped.
    pub async fn next_line(&mut self) -> Option<String> {
        if self.child.is_none() {
            return None;
        }

        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(0) => {
                self.reap().await;
                None
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&self.buf);
                Some(line.trim_end_matches(['\n', '\r']).to_string())
            }
            Err(e) => {
                tracing::warn!(command = %self.command, error = %e, "Script stdout read failed");
                self.terminate().await;
                None
            }
        }
    }

    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    /// Whether the child is still running (or at least not yet reaped).
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Kill the child if it is still running and wait for it to go away.
    pub async fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            tracing::info!(command = %self.command, pid = ?child.id(), "Terminating script");
            if let Err(e) = child.kill().await {
                tracing::warn!(command = %self.command, error = %e, "Failed to kill script");
            }
            self.status = ProcessStatus::Exited(None);
            if let Some(task) = self.stderr_task.take() {
                task.abort();
            }
        }
    }

    async fn reap(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.wait().await {
                Ok(status) => {
                    self.status = ProcessStatus::Exited(status.code());
                    log_exit(&self.command, status.code());
                }
                Err(e) => {
                    self.status = ProcessStatus::Exited(None);
                    tracing::warn!(command = %self.command, error = %e, "Failed to reap script");
                }
            }
            self.finish_stderr().await;
        }
    }

    /// Let the stderr logger flush what is left. A grandchild holding the
    /// pipe open must not stall the caller.
    async fn finish_stderr(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            if tokio::time::timeout(STDERR_GRACE, task).await.is_err() {
                tracing::debug!(command = %self.command, "Script stderr still open after exit");
            }
        }
    }
}

fn read_pipe<R>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok(buf)
    })
}

async fn join_text(task: JoinHandle<std::io::Result<Vec<u8>>>) -> Result<String, BridgeError> {
    let bytes = task.await.map_err(|e| BridgeError::Io(std::io::Error::other(e)))??;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn drain_stderr<R>(stderr: R, command: String) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end();
                    if !line.is_empty() {
                        tracing::warn!(target: SCRIPT_LOG_TARGET, command = %command, "{line}");
                    }
                }
                Err(e) => {
                    tracing::debug!(command = %command, error = %e, "Script stderr closed");
                    break;
                }
            }
        }
    })
}

fn log_exit(command: &str, exit_code: Option<i32>) {
    match exit_code {
        Some(0) => tracing::info!(command = %command, "Script exited cleanly"),
        Some(code) => tracing::warn!(command = %command, code, "Script exited with failure"),
        None => tracing::warn!(command = %command, "Script terminated by signal"),
    }
}
