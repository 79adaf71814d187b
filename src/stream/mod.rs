//! Incremental parsing of provider response streams.

pub mod parser;

pub use parser::TurnParser;
