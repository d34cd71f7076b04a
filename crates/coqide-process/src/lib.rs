//! Prover subprocess management.
//!
//! Provides:
//! - `Supervisor` - spawn, interrupt and terminate a prover in its own process group
//! - `Interrupter` - cloneable SIGINT handle for the dispatcher's timeouts

pub mod supervisor;

pub use supervisor::{DEFAULT_GRACE, Interrupter, ProcessError, Supervisor};
