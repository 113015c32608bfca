//! Simulator shell around the admission engine.

mod replay;
mod session;

pub use replay::{replay, ReplayOutcome, ReplayScript, ReplayStep};
pub use session::{format_decision, Session, EXIT_COMMAND};
