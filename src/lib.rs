//! Aether — an agentic orchestration engine for tool-using language models.
//!
//! Aether drives the full multi-turn loop: it streams a model turn, parses
//! incremental deltas and tool calls off the wire, executes the requested
//! tools in parallel against a shared virtual project, feeds the results back,
//! and repeats until the model finishes or a ceiling is hit. Anthropic
//! Messages and OpenAI Chat Completions are both spoken natively behind one
//! canonical transcript shape.
//!
//! # Quick Start
//!
//! ```no_run
//! use aether::prelude::*;
//!
//! # async fn example() -> aether::error::Result<()> {
//! let pool = std::sync::Arc::new(EnvCredentialPool::from_env()?);
//! let engine = Engine::new(EngineConfig::default(), pool);
//!
//! let mut handle = engine.start(
//!     EngineRequest::builder()
//!         .system_prompt("You are a helpful web developer.")
//!         .prompt("Build me a landing page for a coffee shop.")
//!         .build(),
//! );
//! while let Some(event) = handle.next_event().await {
//!     print!("{}", event.to_frame());
//! }
//! # Ok(())
//! # }
//! ```

pub mod compact;
pub mod engine;
pub mod error;
pub mod keys;
pub mod prelude;
pub mod provider;
pub mod sanitize;
pub mod stream;
pub mod tools;
pub mod transport;
pub mod types;
