//! Coq ideslave protocol plumbing.
//!
//! Provides:
//! - Command building for the prover's machine-interface mode
//! - `Dispatcher` - one call in flight, timeouts with interrupt
//! - `CoqtopLauncher` - the real `Launcher`

pub mod command;
pub mod dispatcher;
pub mod launcher;

pub use command::{CommandBuildError, CommandBuilder, CommandParts, PROTOCOL_ARGS};
pub use dispatcher::{CallError, Dispatcher};
pub use launcher::CoqtopLauncher;
