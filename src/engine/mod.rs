//! The orchestration engine: turn loop, run handles, and client events.

mod events;
mod runner;

pub use events::{ClientEvent, FileArtifact, StatusPhase};
pub use runner::{Engine, EngineConfig, EngineOutcome, EngineRequest, RunHandle, RunStatus};
