//! Seams between the session layer and the process that backs it.

use std::{io, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// Session identifier.
pub type SessionId = Uuid;

/// Byte stream carrying the prover's output.
pub type ProverReader = Box<dyn AsyncRead + Send + Unpin>;

/// Byte stream carrying calls to the prover.
pub type ProverWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Asks the prover to abandon the call it is working on.
pub trait Interrupt: Send + Sync {
    /// Deliver the interrupt. The prover answers the abandoned call with a
    /// failure.
    ///
    /// # Errors
    /// Returns an error when the signal cannot be delivered.
    fn interrupt(&self) -> io::Result<()>;
}

/// Ownership of a running prover process.
#[async_trait]
pub trait ProverHandle: Send {
    /// Stop the process and reap it. Calling this twice is a no-op.
    async fn terminate(&mut self);

    /// OS process id, while one is running.
    fn id(&self) -> Option<u32>;
}

/// A freshly launched prover with its pipes split out.
pub struct SpawnedProver {
    pub reader: ProverReader,
    pub writer: ProverWriter,
    pub interrupter: Arc<dyn Interrupt>,
    pub handle: Box<dyn ProverHandle>,
}

/// Launch error.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("Command build error: {0}")]
    CommandBuild(String),
}

/// Something that can start a prover.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Start a prover, appending `extra_args` after the protocol flags.
    async fn launch(&self, extra_args: &[String]) -> Result<SpawnedProver, LaunchError>;
}
