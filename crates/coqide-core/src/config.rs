//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which calls the configured timeout bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutScope {
    /// Read-only calls only. State-changing calls wait for their reply so
    /// the prover's tip never moves unrecorded.
    #[default]
    Probes,
    /// Every call.
    All,
}

/// Whether a call can move the prover's tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallClass {
    Probe,
    StateChange,
}

/// Settings for one prover session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base command, split like a shell would.
    pub program: String,

    /// Arguments appended after the protocol flags.
    pub extra_args: Vec<String>,

    /// Call timeout in seconds. Zero disables it.
    pub timeout_secs: u64,

    pub timeout_scope: TimeoutScope,

    /// How long a terminated prover gets to exit before it is killed.
    pub shutdown_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            program: "coqtop".to_owned(),
            extra_args: Vec::new(),
            timeout_secs: 0,
            timeout_scope: TimeoutScope::default(),
            shutdown_grace_ms: 500,
        }
    }
}

impl SessionConfig {
    /// The configured timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        match self.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Timeout applying to a call of the given class.
    #[must_use]
    pub const fn timeout_for(&self, class: CallClass) -> Option<Duration> {
        match (self.timeout_scope, class) {
            (TimeoutScope::Probes, CallClass::StateChange) => None,
            _ => self.timeout(),
        }
    }

    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
