//! Prompt context for protocol recommendation models.
//!
//! This crate renders the matching engine's output for an external model and
//! parses the model's structured reply. It never calls a model itself.

pub mod prompts;
pub mod response;

pub use prompts::*;
pub use response::*;
