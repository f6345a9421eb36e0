//! Conversation context optimization with token budget enforcement
//!
//! Keeps a dialogue transcript inside a model's context window by estimating
//! token cost, compacting older turns into a summary and merging short turns
//! when the transcript is read.

pub mod artifact_detector;
pub mod compaction;
pub mod consolidator;
pub mod models;
pub mod optimizer;
mod patterns;
pub mod skills;
pub mod summarizer;
pub mod token_budget;
pub mod token_estimator;

pub use artifact_detector::ArtifactType;
pub use compaction::{CompactionStrategy, ImportanceWeights};
pub use consolidator::{ConsolidationReport, Consolidator};
pub use models::{ContentBlock, MessageContent, NewTurn, OptimizerStats, Role, Summary, ToolCall, Turn};
pub use optimizer::{ContextOptimizer, OptimizerCallbacks, OptimizerSnapshot};
pub use skills::{Skill, SkillContext, SkillError};
pub use summarizer::{HeuristicSummarizer, LLMSummarizer, Summarizer, SummarizerConfig, SummarizerError};
pub use token_budget::{BudgetState, BudgetTracker, TokenUsage};
pub use token_estimator::{EstimatorWeights, HeuristicEstimator, TiktokenEstimator, TokenEstimator};
