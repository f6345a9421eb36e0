//! Configuration for the context optimizer

use crate::context::artifact_detector::ArtifactType;
use crate::context::compaction::{CompactionStrategy, ImportanceWeights};
use crate::context::token_estimator::EstimatorWeights;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Context window used when neither the config nor the model table knows better
pub const DEFAULT_CONTEXT_TOKENS: usize = 200_000;

/// Context window size for a model name
pub fn model_context_limit(model: &str) -> usize {
    let model = model.to_lowercase();
    if model.starts_with("claude") {
        200_000
    } else if model.starts_with("gpt-4o") || model.starts_with("gpt-4-turbo") {
        128_000
    } else if model.starts_with("gpt-4") {
        8_192
    } else if model.starts_with("gpt-3.5") {
        16_385
    } else {
        DEFAULT_CONTEXT_TOKENS
    }
}

/// Optimizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Target model, used to look up the context window
    #[serde(default = "default_model")]
    pub model: String,

    /// Explicit context window; overrides the model table
    #[serde(default)]
    pub max_context_tokens: Option<usize>,

    /// Share of the available budget that triggers compaction
    #[serde(default = "default_target_usage_ratio")]
    pub target_usage_ratio: f64,

    /// Tokens held back for the completion
    #[serde(default = "default_reserve_output_tokens")]
    pub reserve_output_tokens: usize,

    #[serde(default = "default_true")]
    pub enable_auto_compaction: bool,

    #[serde(default)]
    pub compaction_strategy: CompactionStrategy,

    /// Turns never compacted
    #[serde(default = "default_keep_recent_count")]
    pub keep_recent_count: usize,

    /// Output cap passed to the summarizer
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: usize,

    #[serde(default = "default_true")]
    pub enable_consolidation: bool,

    /// Turns below this estimate are merge candidates
    #[serde(default = "default_consolidate_threshold")]
    pub consolidate_threshold: usize,

    #[serde(default = "default_max_consolidated_count")]
    pub max_consolidated_count: usize,

    #[serde(default = "default_true")]
    pub enable_artifact_detection: bool,

    /// Assistant turns above this estimate are checked for artifacts
    #[serde(default = "default_artifact_threshold")]
    pub artifact_threshold: usize,

    #[serde(default = "default_artifact_types")]
    pub artifact_types: Vec<ArtifactType>,

    /// Reference note prefixed to the first optimized turn
    #[serde(default)]
    pub project_knowledge_ref: Option<String>,

    #[serde(default)]
    pub importance_weights: ImportanceWeights,

    #[serde(default)]
    pub estimator_weights: EstimatorWeights,

    /// Upper bound on one summarizer call
    #[serde(default = "default_summarizer_timeout_ms")]
    pub summarizer_timeout_ms: u64,
}

fn default_model() -> String {
    "claude-sonnet-4".to_string()
}

fn default_target_usage_ratio() -> f64 {
    0.85
}

fn default_reserve_output_tokens() -> usize {
    8192
}

fn default_true() -> bool {
    true
}

fn default_keep_recent_count() -> usize {
    10
}

fn default_summary_max_tokens() -> usize {
    2000
}

fn default_consolidate_threshold() -> usize {
    50
}

fn default_max_consolidated_count() -> usize {
    5
}

fn default_artifact_threshold() -> usize {
    500
}

fn default_artifact_types() -> Vec<ArtifactType> {
    ArtifactType::ALL.to_vec()
}

fn default_summarizer_timeout_ms() -> u64 {
    30_000
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_context_tokens: None,
            target_usage_ratio: default_target_usage_ratio(),
            reserve_output_tokens: default_reserve_output_tokens(),
            enable_auto_compaction: true,
            compaction_strategy: CompactionStrategy::default(),
            keep_recent_count: default_keep_recent_count(),
            summary_max_tokens: default_summary_max_tokens(),
            enable_consolidation: true,
            consolidate_threshold: default_consolidate_threshold(),
            max_consolidated_count: default_max_consolidated_count(),
            enable_artifact_detection: true,
            artifact_threshold: default_artifact_threshold(),
            artifact_types: default_artifact_types(),
            project_knowledge_ref: None,
            importance_weights: ImportanceWeights::default(),
            estimator_weights: EstimatorWeights::default(),
            summarizer_timeout_ms: default_summarizer_timeout_ms(),
        }
    }
}

impl OptimizerConfig {
    /// Resolved context window
    pub fn context_limit(&self) -> usize {
        self.max_context_tokens
            .unwrap_or_else(|| model_context_limit(&self.model))
    }

    pub fn summarizer_timeout(&self) -> Duration {
        Duration::from_millis(self.summarizer_timeout_ms)
    }

    /// Clamp out-of-range values instead of rejecting them
    pub fn sanitized(mut self) -> Self {
        if !self.target_usage_ratio.is_finite() || self.target_usage_ratio <= 0.0 {
            self.target_usage_ratio = default_target_usage_ratio();
        }
        self.target_usage_ratio = self.target_usage_ratio.min(1.0);
        self.keep_recent_count = self.keep_recent_count.max(1);
        self.max_consolidated_count = self.max_consolidated_count.max(1);
        self.summary_max_tokens = self.summary_max_tokens.max(1);

        let weights = &mut self.importance_weights;
        if !weights.selection_ratio.is_finite() || weights.selection_ratio <= 0.0 {
            weights.selection_ratio = ImportanceWeights::default().selection_ratio;
        }
        weights.selection_ratio = weights.selection_ratio.min(1.0);

        let est = &mut self.estimator_weights;
        if !est.prose_chars_per_token.is_finite() || est.prose_chars_per_token <= 0.0 {
            est.prose_chars_per_token = EstimatorWeights::default().prose_chars_per_token;
        }
        if !est.code_chars_per_token.is_finite() || est.code_chars_per_token <= 0.0 {
            est.code_chars_per_token = EstimatorWeights::default().code_chars_per_token;
        }
        self
    }

    /// Load from an optional file plus `OPTIMIZER_*` environment variables
    ///
    /// A `.env` file in the working directory is read first. Nested fields use
    /// a double underscore, e.g. `OPTIMIZER_IMPORTANCE_WEIGHTS__CODE_BLOCK`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("OPTIMIZER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: OptimizerConfig = builder.build()?.try_deserialize()?;
        debug!("Loaded optimizer config for model {}", config.model);
        Ok(config.sanitized())
    }
}
