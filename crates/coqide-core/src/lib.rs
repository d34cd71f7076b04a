//! Core building blocks for driving a Coq prover over its XML protocol.
//!
//! This crate provides:
//! - `Value` / `Response` / `Notification` - the protocol data model
//! - `codec` - call encoding and incremental reply decoding
//! - `FeedbackStore` - broadcast + history of prover notifications
//! - `SessionConfig` - serde-loadable session settings
//! - `Launcher` and `ProverHandle` traits

pub mod codec;
pub mod config;
pub mod feedback;
pub mod traits;
pub mod value;
pub mod xml;

pub use codec::{CodecError, Decoded, Frame, FrameCodec, FrameError, FrameKind, Method};
pub use config::{CallClass, SessionConfig, TimeoutScope};
pub use feedback::FeedbackStore;
pub use traits::{
    Interrupt, LaunchError, Launcher, ProverHandle, ProverReader, ProverWriter, SessionId,
    SpawnedProver,
};
pub use value::{
    Failure, FailureMessage, Goal, GoalSet, Message, MessageLevel, Notification, OptionState,
    OptionValue, Response, StateId, Status, Value,
};
