//! Compaction strategies: reduce a block of older turns to one summary text
//!
//! Scoring for the smart strategy is a pure function of the turn and its
//! position so it can be tested without a summarizer.

use super::models::{Role, Turn};
use super::patterns::{EARLIER_CONTEXT_NOTE, FENCED_CODE, PROPER_NOUN_PAIR, SIGNIFICANT_NUMBER};
use super::summarizer::{heuristic_summary_of, Summarizer, SummarizerError, PREVIOUS_SUMMARY_MARKER};
use crate::metrics::METRICS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Compaction algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompactionStrategy {
    /// Importance-scored selection, then summarization
    #[default]
    Smart,
    /// Count-only placeholder, content is dropped
    SlidingWindow,
    /// Summarize every compacted turn
    SummarizeAll,
}

impl CompactionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompactionStrategy::Smart => "smart",
            CompactionStrategy::SlidingWindow => "sliding-window",
            CompactionStrategy::SummarizeAll => "summarize-all",
        }
    }
}

impl fmt::Display for CompactionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompactionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "smart" => Ok(CompactionStrategy::Smart),
            "sliding-window" | "sliding_window" => Ok(CompactionStrategy::SlidingWindow),
            "summarize-all" | "summarize_all" => Ok(CompactionStrategy::SummarizeAll),
            other => Err(format!("unknown compaction strategy: {}", other)),
        }
    }
}

/// Weights for importance scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportanceWeights {
    #[serde(default = "default_code_block")]
    pub code_block: f64,
    #[serde(default = "default_question")]
    pub question: f64,
    #[serde(default = "default_proper_noun")]
    pub proper_noun: f64,
    #[serde(default = "default_numeric_data")]
    pub numeric_data: f64,
    #[serde(default = "default_tool_call")]
    pub tool_call: f64,
    /// Bonus for the newest turn; earlier turns get a proportional share
    #[serde(default = "default_recency")]
    pub recency: f64,
    /// Share of compacted turns forwarded to summarization
    #[serde(default = "default_selection_ratio")]
    pub selection_ratio: f64,
}

fn default_code_block() -> f64 { 30.0 }
fn default_question() -> f64 { 20.0 }
fn default_proper_noun() -> f64 { 10.0 }
fn default_numeric_data() -> f64 { 15.0 }
fn default_tool_call() -> f64 { 25.0 }
fn default_recency() -> f64 { 20.0 }
fn default_selection_ratio() -> f64 { 0.3 }

impl Default for ImportanceWeights {
    fn default() -> Self {
        Self {
            code_block: default_code_block(),
            question: default_question(),
            proper_noun: default_proper_noun(),
            numeric_data: default_numeric_data(),
            tool_call: default_tool_call(),
            recency: default_recency(),
            selection_ratio: default_selection_ratio(),
        }
    }
}

/// Importance of the turn at `index` among `total` compacted turns
pub fn score_turn(turn: &Turn, index: usize, total: usize, weights: &ImportanceWeights) -> f64 {
    let text = turn.text();
    let mut score = 0.0;

    if FENCED_CODE.is_match(&text) {
        score += weights.code_block;
    }
    if text.contains('?') {
        score += weights.question;
    }
    if PROPER_NOUN_PAIR.is_match(&text) {
        score += weights.proper_noun;
    }
    if SIGNIFICANT_NUMBER.is_match(&text) {
        score += weights.numeric_data;
    }
    if turn.has_tool_calls() {
        score += weights.tool_call;
    }
    if total > 0 {
        score += index as f64 / total as f64 * weights.recency;
    }

    score
}

/// Pick the highest scoring share of `turns`, returned in original order
pub fn select_important(turns: &[Turn], weights: &ImportanceWeights) -> Vec<Turn> {
    if turns.is_empty() {
        return Vec::new();
    }

    let total = turns.len();
    let keep = ((total as f64 * weights.selection_ratio).ceil() as usize).clamp(1, total);

    let mut ranked: Vec<(usize, f64)> = turns
        .iter()
        .enumerate()
        .map(|(i, t)| (i, score_turn(t, i, total, weights)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut picked: Vec<usize> = ranked.into_iter().take(keep).map(|(i, _)| i).collect();
    picked.sort_unstable();

    debug!("Selected {} of {} turns for summarization", picked.len(), total);

    picked.into_iter().map(|i| turns[i].clone()).collect()
}

/// Count-only note left by the sliding-window strategy.
///
/// Counts from an earlier note in `previous` are added in; any other earlier
/// summary lines are kept above the note.
pub fn sliding_window_summary(turns: &[Turn], previous: Option<&str>) -> String {
    let mut users = turns.iter().filter(|t| t.role == Role::User).count();
    let mut assistants = turns.len() - users;
    let mut lines: Vec<&str> = Vec::new();

    for line in previous.unwrap_or_default().lines() {
        if let Some(caps) = EARLIER_CONTEXT_NOTE.captures(line) {
            users += caps[1].parse::<usize>().unwrap_or(0);
            assistants += caps[2].parse::<usize>().unwrap_or(0);
        } else if !line.trim().is_empty() {
            lines.push(line);
        }
    }

    let note = format!(
        "[Earlier context: {} user turns, {} assistant turns - context trimmed]",
        users, assistants
    );
    lines.push(&note);
    lines.join("\n")
}

/// Collaborators and limits for producing a summary
#[derive(Clone)]
pub struct CompactionContext<'a> {
    pub summarizer: Option<Arc<dyn Summarizer>>,
    pub max_tokens: usize,
    pub timeout: Duration,
    pub weights: &'a ImportanceWeights,
    /// Text of the summary being replaced, carried into the new one
    pub previous_summary: Option<&'a str>,
    /// Turns already folded into `previous_summary`
    pub previous_turn_count: usize,
}

impl CompactionStrategy {
    /// Produce the summary text for `turns`. Never fails: summarizer errors
    /// and timeouts fall back to the heuristic summary.
    pub async fn summarize(&self, turns: &[Turn], ctx: &CompactionContext<'_>) -> String {
        let replaced = ctx.previous_turn_count + turns.len();
        match self {
            CompactionStrategy::SlidingWindow => sliding_window_summary(turns, ctx.previous_summary),
            CompactionStrategy::SummarizeAll => {
                let input = with_previous(turns.to_vec(), ctx.previous_summary);
                summarize_or_fallback(&input, replaced, ctx).await
            }
            CompactionStrategy::Smart => {
                let selected = select_important(turns, ctx.weights);
                let input = with_previous(selected, ctx.previous_summary);
                summarize_or_fallback(&input, replaced, ctx).await
            }
        }
    }
}

fn with_previous(mut turns: Vec<Turn>, previous: Option<&str>) -> Vec<Turn> {
    if let Some(text) = previous {
        let carrier = format!("{}\n{}", PREVIOUS_SUMMARY_MARKER, text);
        turns.insert(0, Turn::new(Role::Assistant, carrier.into(), Vec::new(), 0));
    }
    turns
}

async fn summarize_or_fallback(
    turns: &[Turn],
    replaced: usize,
    ctx: &CompactionContext<'_>,
) -> String {
    let Some(summarizer) = ctx.summarizer.as_ref() else {
        return heuristic_summary_of(turns, replaced);
    };

    let result = match tokio::time::timeout(ctx.timeout, summarizer.summarize(turns, ctx.max_tokens)).await {
        Ok(result) => result,
        Err(_) => Err(SummarizerError::Timeout(ctx.timeout)),
    };

    match result {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            warn!("Summarizer returned an empty summary, using heuristic summary");
            METRICS.summarizer_failures.inc();
            heuristic_summary_of(turns, replaced)
        }
        Err(e) => {
            warn!("Summarizer failed: {}, using heuristic summary", e);
            METRICS.summarizer_failures.inc();
            heuristic_summary_of(turns, replaced)
        }
    }
}
