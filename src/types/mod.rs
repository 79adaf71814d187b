//! Core types for Aether.

pub mod message;
pub mod turn;

pub use message::*;
pub use turn::*;
