//! Proof-session state machine for one prover process.

use coqide_core::{
    CallClass, Failure, Method, Response, SessionConfig, SessionId, StateId, Value,
};
use coqide_protocol::{CallError, Dispatcher};
use thiserror::Error;
use uuid::Uuid;

/// Session error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Launch failed: {0}")]
    Launch(#[from] coqide_core::LaunchError),
    #[error("Call failed: {0}")]
    Call(#[from] CallError),
    #[error("Prover rejected initialization: {0}")]
    InitRejected(Failure),
    #[error("Cannot rewind {requested} step(s) with {depth} in history")]
    InvariantViolation { requested: usize, depth: usize },
    #[error("Unexpected reply to {method}: {value:?}")]
    UnexpectedReply { method: Method, value: Value },
    #[error("No prover is running")]
    NotRunning,
}

/// Document position tracking against one prover.
///
/// `history` holds the position before each accepted advance, so its length
/// is the number of advances not yet rewound.
pub struct ProofSession {
    id: SessionId,
    dispatcher: Dispatcher,
    config: SessionConfig,
    root: StateId,
    current: StateId,
    history: Vec<StateId>,
}

impl ProofSession {
    /// Send `Init` and establish the root position.
    ///
    /// # Errors
    /// Returns error if the call fails, the prover refuses, or the reply
    /// carries no state id.
    pub async fn initialize(
        mut dispatcher: Dispatcher,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let id = Uuid::new_v4();
        let response = dispatcher
            .call(Method::Init, &Value::none(), config.timeout_for(CallClass::Probe))
            .await?;
        let root = match response {
            Response::Success { value, .. } => match value.as_state_id() {
                Some(root) => root,
                None => {
                    return Err(SessionError::UnexpectedReply {
                        method: Method::Init,
                        value,
                    });
                }
            },
            Response::Failure(failure) => return Err(SessionError::InitRejected(failure)),
        };
        tracing::info!(session = %id, %root, "Session initialized");
        Ok(Self {
            id,
            dispatcher,
            config,
            root,
            current: root,
            history: Vec::new(),
        })
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub const fn root(&self) -> StateId {
        self.root
    }

    /// Position new commands are added after.
    #[must_use]
    pub fn current_position(&self) -> StateId {
        if self.history.is_empty() {
            self.root
        } else {
            self.current
        }
    }

    /// Positions before each accepted advance, oldest first.
    #[must_use]
    pub fn history(&self) -> &[StateId] {
        &self.history
    }

    #[must_use]
    pub fn history_depth(&self) -> usize {
        self.history.len()
    }

    /// Commit `command` at the current position.
    ///
    /// The goal state is refetched after the prover accepts the command; the
    /// position only moves once both calls succeed. A prover failure from
    /// either call is returned as `Ok(Response::Failure)`.
    ///
    /// # Errors
    /// Returns error if a call fails or the Add reply has no state id.
    #[tracing::instrument(skip(self), fields(session = %self.id))]
    pub async fn advance(&mut self, command: &str) -> Result<Response, SessionError> {
        let at = self.current_position();
        let arg = Value::pair(
            Value::pair(Value::string(command), Value::Int(-1)),
            Value::pair(Value::StateId(at), Value::Bool(true)),
        );
        let timeout = self.config.timeout_for(CallClass::StateChange);

        let added = self.dispatcher.call(Method::Add, &arg, timeout).await?;
        let Response::Success { value, .. } = &added else {
            tracing::debug!(%at, "Prover rejected command");
            return Ok(added);
        };
        let Some(next) = value.as_pair().and_then(|(id, _)| id.as_state_id()) else {
            return Err(SessionError::UnexpectedReply {
                method: Method::Add,
                value: value.clone(),
            });
        };

        let goals = self.dispatcher.call(Method::Goal, &Value::Unit, timeout).await?;
        if let Response::Failure(failure) = goals {
            tracing::debug!(%next, "Goal refresh failed, position unchanged");
            return Ok(Response::Failure(failure));
        }

        self.history.push(self.current);
        self.current = next;
        tracing::debug!(from = %at, to = %next, depth = self.history.len(), "Advanced");
        Ok(added)
    }

    /// Step back `steps` accepted commands and tell the prover.
    ///
    /// # Errors
    /// Returns `InvariantViolation` without touching state unless
    /// `1 <= steps <= history_depth()`, or error if the `Edit_at` call fails.
    #[tracing::instrument(skip(self), fields(session = %self.id))]
    pub async fn rewind(&mut self, steps: usize) -> Result<Response, SessionError> {
        let depth = self.history.len();
        if steps == 0 || steps > depth {
            tracing::error!(requested = steps, depth, "Rewind outside of history");
            return Err(SessionError::InvariantViolation {
                requested: steps,
                depth,
            });
        }

        let target = depth - steps;
        self.current = self.history[target];
        self.history.truncate(target);
        tracing::debug!(to = %self.current, depth = target, "Rewound");

        let timeout = self.config.timeout_for(CallClass::StateChange);
        let response = self
            .dispatcher
            .call(Method::EditAt, &Value::StateId(self.current), timeout)
            .await?;
        Ok(response)
    }

    /// Run a read-only command at the current position.
    ///
    /// # Errors
    /// Returns error if the call fails.
    #[tracing::instrument(skip(self), fields(session = %self.id))]
    pub async fn query(&mut self, command: &str) -> Result<Response, SessionError> {
        let arg = Value::pair(Value::string(command), Value::StateId(self.current_position()));
        self.probe(Method::Query, &arg).await
    }

    /// Fetch the current goals.
    ///
    /// # Errors
    /// Returns error if the call fails.
    pub async fn goals(&mut self) -> Result<Response, SessionError> {
        self.probe(Method::Goal, &Value::Unit).await
    }

    /// Fetch the prover's status record, forcing pending work when `force`.
    ///
    /// # Errors
    /// Returns error if the call fails.
    pub async fn status(&mut self, force: bool) -> Result<Response, SessionError> {
        self.probe(Method::Status, &Value::Bool(force)).await
    }

    async fn probe(&mut self, method: Method, arg: &Value) -> Result<Response, SessionError> {
        let timeout = self.config.timeout_for(CallClass::Probe);
        Ok(self.dispatcher.call(method, arg, timeout).await?)
    }
}
