//! Conversation context optimizer for LLM chat transcripts
//!
//! The [`context::ContextOptimizer`] facade ingests turns, tracks estimated
//! token usage against the model's context window and compacts or merges
//! turns so the transcript handed to the completion service stays in budget.

pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod telemetry;

pub use config::OptimizerConfig;
pub use context::{ContextOptimizer, NewTurn, OptimizerCallbacks, Role, Turn};
pub use error::{ContextError, Result};
