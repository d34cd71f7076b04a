//! Prover process lifecycle.

use std::{io, process::Stdio, time::Duration};

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use coqide_core::{Interrupt, ProverHandle};
use thiserror::Error;
use tokio::process::{ChildStdin, ChildStdout, Command};

/// Default time a terminated prover gets to exit on its own.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(500);

/// Process error.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Child {0} pipe was not captured")]
    MissingPipe(&'static str),
    #[error("Signal delivery failed: {0}")]
    Signal(#[source] io::Error),
    #[error("No prover process is running")]
    NotRunning,
}

/// Owns at most one prover child and its pipes.
///
/// The child runs in its own process group so interrupts aimed at the
/// caller's terminal never reach it.
pub struct Supervisor {
    program: String,
    child: Option<AsyncGroupChild>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    grace: Duration,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: String::new(),
            child: None,
            stdin: None,
            stdout: None,
            grace: DEFAULT_GRACE,
        }
    }

    /// Set how long `terminate` waits before killing the child.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Start `program`, terminating any child already running.
    ///
    /// # Errors
    /// Returns error if the process cannot be started or its pipes are missing.
    pub async fn spawn(&mut self, program: &str, args: &[String]) -> Result<(), ProcessError> {
        self.terminate().await;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.group_spawn().map_err(|source| ProcessError::Spawn {
            program: program.to_owned(),
            source,
        })?;

        let stdin = child.inner().stdin.take();
        let stdout = child.inner().stdout.take();
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(ProcessError::MissingPipe("stdio"));
        };

        tracing::info!(program, ?args, pid = child.id(), "Spawned prover");
        self.program = program.to_owned();
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout = Some(stdout);
        Ok(())
    }

    /// OS process id of the running child.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(AsyncGroupChild::id)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Hand the child's pipes to their single owner.
    ///
    /// # Errors
    /// Returns error if nothing is running or the pipes were already taken.
    pub fn take_stdio(&mut self) -> Result<(ChildStdin, ChildStdout), ProcessError> {
        if self.child.is_none() {
            return Err(ProcessError::NotRunning);
        }
        let stdin = self.stdin.take().ok_or(ProcessError::MissingPipe("stdin"))?;
        let stdout = self.stdout.take().ok_or(ProcessError::MissingPipe("stdout"))?;
        Ok((stdin, stdout))
    }

    /// Handle that interrupts the running child's current computation.
    ///
    /// # Errors
    /// Returns error if nothing is running.
    pub fn interrupter(&self) -> Result<Interrupter, ProcessError> {
        self.id()
            .map(|pid| Interrupter { pid })
            .ok_or(ProcessError::NotRunning)
    }

    /// Close stdin, ask the child to exit, then kill it once the grace
    /// period runs out. A no-op when nothing is running.
    pub async fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        self.stdin = None;
        self.stdout = None;

        if let Ok(Some(status)) = child.try_wait() {
            tracing::debug!(program = %self.program, %status, "Prover already exited");
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            if let Err(e) = signal_group(pid, nix::sys::signal::Signal::SIGTERM) {
                tracing::debug!(pid, "Failed to send SIGTERM: {e}");
            }
        }

        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(program = %self.program, %status, "Prover exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(program = %self.program, "Failed to reap prover: {e}");
            }
            Err(_) => {
                tracing::warn!(
                    program = %self.program,
                    grace_ms = self.grace.as_millis(),
                    "Prover ignored termination, killing"
                );
                if let Err(e) = child.start_kill() {
                    tracing::warn!("Failed to kill prover: {e}");
                }
                if let Err(e) = child.wait().await {
                    tracing::warn!("Failed to reap prover: {e}");
                }
            }
        }
    }
}

#[async_trait]
impl ProverHandle for Supervisor {
    async fn terminate(&mut self) {
        Self::terminate(self).await;
    }

    fn id(&self) -> Option<u32> {
        Self::id(self)
    }
}

/// Delivers SIGINT to one prover process.
#[derive(Debug, Clone, Copy)]
pub struct Interrupter {
    pid: u32,
}

impl Interrupter {
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }
}

impl Interrupt for Interrupter {
    #[cfg(unix)]
    fn interrupt(&self) -> io::Result<()> {
        use nix::{sys::signal, unistd::Pid};

        let pid = i32::try_from(self.pid)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        signal::kill(Pid::from_raw(pid), signal::Signal::SIGINT).map_err(io::Error::from)?;
        tracing::debug!(pid, "Sent SIGINT to prover");
        Ok(())
    }

    #[cfg(not(unix))]
    fn interrupt(&self) -> io::Result<()> {
        tracing::warn!(pid = self.pid, "Interrupting the prover is not supported on this platform");
        Ok(())
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, sig: nix::sys::signal::Signal) -> Result<(), ProcessError> {
    use nix::{sys::signal, unistd::Pid};

    let pid = i32::try_from(pid)
        .map_err(|e| ProcessError::Signal(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
    signal::killpg(Pid::from_raw(pid), sig).map_err(|e| ProcessError::Signal(e.into()))
}
