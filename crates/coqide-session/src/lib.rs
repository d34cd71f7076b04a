//! Proof sessions against a Coq prover.
//!
//! Provides:
//! - `ProofSession` - advance, rewind, query and goals against one prover
//! - `Coqtop` - launch, relaunch and shutdown around a session

pub mod manager;
pub mod session;

pub use manager::{Coqtop, SessionState};
pub use session::{ProofSession, SessionError};
