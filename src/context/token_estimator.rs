//! Token estimation for turns and structured content
//!
//! Counts are approximations. The heuristic estimator charges code and prose
//! at different character ratios; the tiktoken estimator uses cl100k_base for
//! text and shares the fixed image, document and per-turn costs.

use super::models::{ContentBlock, MessageContent, ToolCall};
use super::patterns::FENCED_CODE;
use crate::error::{ContextError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Ratios and fixed costs used by the estimators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorWeights {
    #[serde(default = "default_prose_chars_per_token")]
    pub prose_chars_per_token: f64,
    #[serde(default = "default_code_chars_per_token")]
    pub code_chars_per_token: f64,
    #[serde(default = "default_image_tokens_per_tile")]
    pub image_tokens_per_tile: usize,
    #[serde(default = "default_document_overhead")]
    pub document_overhead: usize,
    #[serde(default = "default_message_overhead")]
    pub message_overhead: usize,
    #[serde(default = "default_tool_call_overhead")]
    pub tool_call_overhead: usize,
}

fn default_prose_chars_per_token() -> f64 { 4.0 }
fn default_code_chars_per_token() -> f64 { 3.0 }
fn default_image_tokens_per_tile() -> usize { 85 }
fn default_document_overhead() -> usize { 100 }
fn default_message_overhead() -> usize { 4 }
fn default_tool_call_overhead() -> usize { 50 }

impl Default for EstimatorWeights {
    fn default() -> Self {
        Self {
            prose_chars_per_token: default_prose_chars_per_token(),
            code_chars_per_token: default_code_chars_per_token(),
            image_tokens_per_tile: default_image_tokens_per_tile(),
            document_overhead: default_document_overhead(),
            message_overhead: default_message_overhead(),
            tool_call_overhead: default_tool_call_overhead(),
        }
    }
}

/// Token estimator trait for different tokenization strategies
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text
    fn estimate(&self, text: &str) -> usize;

    /// Estimate text known to be prose (document bodies)
    fn estimate_prose(&self, text: &str) -> usize {
        self.estimate(text)
    }

    /// Fixed costs shared by all content kinds
    fn weights(&self) -> &EstimatorWeights;

    /// Estimate plain or structured content
    fn estimate_content(&self, content: &MessageContent) -> usize {
        match content {
            MessageContent::Text(text) => self.estimate(text),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => self.estimate(text),
                    ContentBlock::Image { tiles } => {
                        self.weights().image_tokens_per_tile * tiles.unwrap_or(1) as usize
                    }
                    ContentBlock::Document { text } => {
                        self.estimate_prose(text) + self.weights().document_overhead
                    }
                })
                .sum(),
        }
    }

    /// Estimate a whole turn: content plus role and tool-call overhead
    fn estimate_message_tokens(&self, content: &MessageContent, tool_calls: &[ToolCall]) -> usize {
        let weights = self.weights();
        self.estimate_content(content)
            + weights.message_overhead
            + tool_calls.len() * weights.tool_call_overhead
    }
}

fn ratio_tokens(chars: usize, chars_per_token: f64) -> usize {
    if chars == 0 {
        return 0;
    }
    (chars as f64 / chars_per_token.max(f64::EPSILON)).ceil() as usize
}

/// Character-ratio estimator that charges fenced code more densely than prose
#[derive(Debug, Clone, Default)]
pub struct HeuristicEstimator {
    weights: EstimatorWeights,
}

impl HeuristicEstimator {
    pub fn new(weights: EstimatorWeights) -> Self {
        Self { weights }
    }

    /// Split text into (code chars, prose chars)
    fn split_chars(text: &str) -> (usize, usize) {
        let total = text.chars().count();
        let code: usize = FENCED_CODE
            .find_iter(text)
            .map(|m| m.as_str().chars().count())
            .sum();
        (code, total - code)
    }
}

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> usize {
        let (code, prose) = Self::split_chars(text);
        ratio_tokens(code, self.weights.code_chars_per_token)
            + ratio_tokens(prose, self.weights.prose_chars_per_token)
    }

    fn estimate_prose(&self, text: &str) -> usize {
        ratio_tokens(text.chars().count(), self.weights.prose_chars_per_token)
    }

    fn weights(&self) -> &EstimatorWeights {
        &self.weights
    }
}

/// Tiktoken-based token estimator using cl100k_base (GPT-4, GPT-3.5-turbo)
pub struct TiktokenEstimator {
    bpe: Arc<CoreBPE>,
    weights: EstimatorWeights,
}

impl TiktokenEstimator {
    /// Create a new tiktoken estimator with cl100k_base encoding
    pub fn new(weights: EstimatorWeights) -> Result<Self> {
        let bpe = cl100k_base().map_err(|e| ContextError::Internal(e.to_string()))?;
        Ok(Self {
            bpe: Arc::new(bpe),
            weights,
        })
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    fn weights(&self) -> &EstimatorWeights {
        &self.weights
    }
}
