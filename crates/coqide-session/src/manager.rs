//! Collaborator-facing prover session.

use std::sync::Arc;

use coqide_core::{
    FeedbackStore, Launcher, Notification, ProverHandle, Response, SessionConfig, SpawnedProver,
    StateId,
};
use coqide_protocol::{CallError, CoqtopLauncher, Dispatcher};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::session::{ProofSession, SessionError};

/// Lifecycle of the prover behind a [`Coqtop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Ready,
    Terminated,
}

enum Slot {
    Uninitialized,
    Ready {
        session: ProofSession,
        handle: Box<dyn ProverHandle>,
    },
    Terminated,
}

/// Owns one prover process and the session running on it.
///
/// Launching always starts from scratch: any running prover is terminated
/// and its history discarded.
pub struct Coqtop<L: Launcher> {
    launcher: L,
    config: SessionConfig,
    feedback: Arc<FeedbackStore>,
    slot: Slot,
}

impl Coqtop<CoqtopLauncher> {
    /// Session backed by a real `coqtop` per `config`.
    #[must_use]
    pub fn from_config(config: SessionConfig) -> Self {
        Self::new(CoqtopLauncher::from_config(&config), config)
    }
}

impl<L: Launcher> Coqtop<L> {
    #[must_use]
    pub fn new(launcher: L, config: SessionConfig) -> Self {
        Self {
            launcher,
            config,
            feedback: Arc::new(FeedbackStore::new()),
            slot: Slot::Uninitialized,
        }
    }

    /// Start a prover and initialize a session on it.
    ///
    /// Returns `false` when the prover could not be started or refused to
    /// initialize; the cause is logged.
    pub async fn launch(&mut self, extra_args: &[String]) -> bool {
        match self.try_launch(extra_args).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to launch prover: {e}");
                false
            }
        }
    }

    /// Like [`Self::launch`], with the cause.
    ///
    /// # Errors
    /// Returns error if the prover cannot be started or initialized. The
    /// session is left uninitialized.
    pub async fn try_launch(&mut self, extra_args: &[String]) -> Result<(), SessionError> {
        self.shutdown().await;
        self.slot = Slot::Uninitialized;
        self.feedback.clear();

        let SpawnedProver {
            reader,
            writer,
            interrupter,
            mut handle,
        } = self.launcher.launch(extra_args).await?;
        let dispatcher = Dispatcher::new(reader, writer, interrupter, Arc::clone(&self.feedback));

        match ProofSession::initialize(dispatcher, self.config.clone()).await {
            Ok(session) => {
                self.slot = Slot::Ready { session, handle };
                Ok(())
            }
            Err(e) => {
                handle.terminate().await;
                Err(e)
            }
        }
    }

    /// See [`ProofSession::advance`].
    ///
    /// # Errors
    /// Returns `NotRunning` unless a session is ready, or the session's error.
    pub async fn advance(&mut self, command: &str) -> Result<Response, SessionError> {
        let result = self.session_mut()?.advance(command).await;
        self.settle(result).await
    }

    /// See [`ProofSession::rewind`].
    ///
    /// # Errors
    /// Returns `NotRunning` unless a session is ready, or the session's error.
    pub async fn rewind(&mut self, steps: usize) -> Result<Response, SessionError> {
        let result = self.session_mut()?.rewind(steps).await;
        self.settle(result).await
    }

    /// See [`ProofSession::query`].
    ///
    /// # Errors
    /// Returns `NotRunning` unless a session is ready, or the session's error.
    pub async fn query(&mut self, command: &str) -> Result<Response, SessionError> {
        let result = self.session_mut()?.query(command).await;
        self.settle(result).await
    }

    /// See [`ProofSession::goals`].
    ///
    /// # Errors
    /// Returns `NotRunning` unless a session is ready, or the session's error.
    pub async fn goals(&mut self) -> Result<Response, SessionError> {
        let result = self.session_mut()?.goals().await;
        self.settle(result).await
    }

    /// See [`ProofSession::status`].
    ///
    /// # Errors
    /// Returns `NotRunning` unless a session is ready, or the session's error.
    pub async fn status(&mut self, force: bool) -> Result<Response, SessionError> {
        let result = self.session_mut()?.status(force).await;
        self.settle(result).await
    }

    /// Accepted commands not yet rewound; zero without a session.
    #[must_use]
    pub fn history_depth(&self) -> usize {
        self.session().map_or(0, ProofSession::history_depth)
    }

    #[must_use]
    pub fn current_position(&self) -> Option<StateId> {
        self.session().map(ProofSession::current_position)
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        match self.slot {
            Slot::Uninitialized => SessionState::Uninitialized,
            Slot::Ready { .. } => SessionState::Ready,
            Slot::Terminated => SessionState::Terminated,
        }
    }

    /// The running session, if any.
    #[must_use]
    pub const fn session(&self) -> Option<&ProofSession> {
        match &self.slot {
            Slot::Ready { session, .. } => Some(session),
            _ => None,
        }
    }

    /// Live prover notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.feedback.subscribe()
    }

    /// Notifications of the current prover, with history.
    #[must_use]
    pub fn feedback(&self) -> Arc<FeedbackStore> {
        Arc::clone(&self.feedback)
    }

    /// Terminate the prover. A no-op unless a session is ready.
    pub async fn shutdown(&mut self) {
        match std::mem::replace(&mut self.slot, Slot::Terminated) {
            Slot::Ready {
                session,
                mut handle,
            } => {
                tracing::info!(session = %session.id(), pid = handle.id(), "Shutting down prover");
                // Closes the prover's stdin before it is signalled.
                drop(session);
                handle.terminate().await;
            }
            other => self.slot = other,
        }
    }

    fn session_mut(&mut self) -> Result<&mut ProofSession, SessionError> {
        match &mut self.slot {
            Slot::Ready { session, .. } => Ok(session),
            _ => Err(SessionError::NotRunning),
        }
    }

    async fn settle(
        &mut self,
        result: Result<Response, SessionError>,
    ) -> Result<Response, SessionError> {
        if matches!(result, Err(SessionError::Call(CallError::StreamDied))) {
            tracing::error!("Prover output ended, terminating session");
            self.shutdown().await;
        }
        result
    }
}
