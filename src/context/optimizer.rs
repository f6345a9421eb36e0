//! Conversation context optimizer
//!
//! Keeps the transcript of one conversation within a token budget:
//! - Token estimation per turn
//! - Budget tracking with a compaction threshold
//! - Strategy-driven compaction of older turns into a single summary
//! - Read-time consolidation of short consecutive turns
//! - Artifact suggestions for large structured assistant output
//!
//! Calls on one instance must be serialized by the caller; `add_message` and
//! `compact` take `&mut self` and may await the summarizer.

use super::artifact_detector::{self, ArtifactType};
use super::compaction::CompactionContext;
use super::consolidator::Consolidator;
use super::models::{ContentBlock, MessageContent, NewTurn, OptimizerStats, Role, Summary, Turn};
use super::summarizer::Summarizer;
use super::token_budget::{BudgetState, BudgetTracker, TokenUsage};
use super::token_estimator::{HeuristicEstimator, TokenEstimator};
use crate::config::OptimizerConfig;
use crate::error::Result;
use crate::metrics::METRICS;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Usage share above which the token warning fires
pub const TOKEN_WARNING_RATIO: f64 = 0.9;

/// Assistant reply that follows the injected summary
pub const SUMMARY_ACKNOWLEDGEMENT: &str = "I understand the previous context. Let's continue.";

type CompactionCallback = Box<dyn Fn(&str, usize) + Send + Sync>;
type TokenWarningCallback = Box<dyn Fn(usize, usize) + Send + Sync>;
type ArtifactCallback = Box<dyn Fn(&str, ArtifactType) + Send + Sync>;

/// Optional event hooks, invoked synchronously
#[derive(Default)]
pub struct OptimizerCallbacks {
    on_compaction: Option<CompactionCallback>,
    on_token_warning: Option<TokenWarningCallback>,
    on_artifact_suggestion: Option<ArtifactCallback>,
}

impl OptimizerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the summary text and the number of turns it replaced
    pub fn on_compaction(mut self, f: impl Fn(&str, usize) + Send + Sync + 'static) -> Self {
        self.on_compaction = Some(Box::new(f));
        self
    }

    /// Called with (current, available) when usage exceeds the warning ratio
    pub fn on_token_warning(mut self, f: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.on_token_warning = Some(Box::new(f));
        self
    }

    pub fn on_artifact_suggestion(
        mut self,
        f: impl Fn(&str, ArtifactType) + Send + Sync + 'static,
    ) -> Self {
        self.on_artifact_suggestion = Some(Box::new(f));
        self
    }
}

/// Full optimizer state for export and import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSnapshot {
    pub history: Vec<Turn>,
    pub summary: Option<Summary>,
    pub budget: BudgetState,
    pub stats: OptimizerStats,
    /// Whether consolidation of the current history was already counted in stats
    #[serde(default)]
    pub consolidation_counted: bool,
}

impl OptimizerSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Token-budgeted transcript for one conversation
pub struct ContextOptimizer {
    config: OptimizerConfig,
    estimator: Arc<dyn TokenEstimator>,
    summarizer: Option<Arc<dyn Summarizer>>,
    callbacks: OptimizerCallbacks,
    budget: BudgetTracker,
    history: Vec<Turn>,
    summary: Option<Summary>,
    stats: OptimizerStats,
    consolidation_counted: bool,
}

impl ContextOptimizer {
    /// Create an optimizer with the heuristic estimator and no external summarizer
    pub fn new(config: OptimizerConfig) -> Self {
        let config = config.sanitized();
        let estimator = Arc::new(HeuristicEstimator::new(config.estimator_weights.clone()));
        let budget = BudgetTracker::new(
            config.context_limit(),
            config.reserve_output_tokens,
            config.target_usage_ratio,
        );

        debug!(
            "Optimizer created: limit={}, reserve={}, strategy={}",
            config.context_limit(),
            config.reserve_output_tokens,
            config.compaction_strategy
        );

        Self {
            config,
            estimator,
            summarizer: None,
            callbacks: OptimizerCallbacks::default(),
            budget,
            history: Vec::new(),
            summary: None,
            stats: OptimizerStats::default(),
            consolidation_counted: false,
        }
    }

    /// Use an external summarizer for smart and summarize-all compaction
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Replace the token estimator. Call before adding turns.
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_callbacks(mut self, callbacks: OptimizerCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Append a turn, compacting older history if the budget requires it
    pub async fn add_message(&mut self, turn: NewTurn) -> TokenUsage {
        let NewTurn {
            role,
            content,
            tool_calls,
        } = turn;

        let tokens = self.estimator.estimate_message_tokens(&content, &tool_calls);

        if role == Role::Assistant
            && self.config.enable_artifact_detection
            && tokens > self.config.artifact_threshold
        {
            self.suggest_artifact(&content.as_text());
        }

        self.history.push(Turn::new(role, content, tool_calls, tokens));
        self.consolidation_counted = false;
        self.budget.record_addition(tokens);
        self.stats.total_turns += 1;
        METRICS.record_turn(role.as_str(), self.budget.percentage());

        debug!(
            "Added {} turn: tokens={}, current={}, history={}",
            role.as_str(),
            tokens,
            self.budget.state().current,
            self.history.len()
        );

        if self.config.enable_auto_compaction && self.budget.needs_compaction() {
            warn!(
                "Context exceeds compaction threshold: {} tokens of {} available",
                self.budget.state().current,
                self.budget.state().available()
            );
            self.compact().await;
        }

        let usage = self.budget.usage();
        if usage.percentage > TOKEN_WARNING_RATIO {
            warn!(
                "Token usage at {:.0}% of available budget",
                usage.percentage * 100.0
            );
            METRICS.token_warnings.inc();
            if let Some(callback) = &self.callbacks.on_token_warning {
                callback(usage.current, usage.available);
            }
        }

        usage
    }

    /// Compact all but the most recent turns into the summary.
    ///
    /// Returns false without changes when history is already short enough.
    pub async fn compact(&mut self) -> bool {
        let keep = self.config.keep_recent_count;
        if self.history.len() <= keep {
            debug!(
                "Skipping compaction: {} turns, keeping {}",
                self.history.len(),
                keep
            );
            return false;
        }

        let split = self.history.len() - keep;
        let strategy = self.config.compaction_strategy;

        let text = {
            let ctx = CompactionContext {
                summarizer: self.summarizer.clone(),
                max_tokens: self.config.summary_max_tokens,
                timeout: self.config.summarizer_timeout(),
                weights: &self.config.importance_weights,
                previous_summary: self.summary.as_ref().map(|s| s.text.as_str()),
                previous_turn_count: self.summary.as_ref().map_or(0, |s| s.replaced_turn_count),
            };
            strategy.summarize(&self.history[..split], &ctx).await
        };

        let removed: Vec<Turn> = self.history.drain(..split).collect();
        let removed_tokens: usize = removed.iter().map(|t| t.estimated_tokens).sum();
        let previous = self.summary.take();
        let previous_tokens = previous.as_ref().map_or(0, |s| s.estimated_tokens);
        let previous_count = previous.as_ref().map_or(0, |s| s.replaced_turn_count);

        let summary_tokens = self.framed_summary_tokens(&text);
        let old_tokens = removed_tokens + previous_tokens;
        self.budget.record_compaction(old_tokens, summary_tokens);

        let saved = old_tokens.saturating_sub(summary_tokens) as u64;
        self.stats.compactions += 1;
        self.stats.tokens_saved += saved;
        self.consolidation_counted = false;
        METRICS.record_compaction(strategy.as_str(), saved);

        info!(
            "Compacted {} turns with {} strategy: {} -> {} tokens",
            removed.len(),
            strategy,
            old_tokens,
            summary_tokens
        );

        if let Some(callback) = &self.callbacks.on_compaction {
            callback(&text, removed.len());
        }

        self.summary = Some(Summary {
            text,
            replaced_turn_count: previous_count + removed.len(),
            estimated_tokens: summary_tokens,
            created_at: Utc::now(),
        });

        true
    }

    /// Final transcript: summary framing, then consolidated history
    pub fn get_optimized_messages(&mut self) -> Vec<Turn> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);

        if let Some(summary) = &self.summary {
            messages.extend(self.summary_turns(summary));
        }

        if self.config.enable_consolidation {
            let consolidator = Consolidator::new(
                self.estimator.as_ref(),
                self.config.consolidate_threshold,
                self.config.max_consolidated_count,
            );
            let (turns, report) = consolidator.consolidate(&self.history);

            if !self.consolidation_counted {
                self.stats.consolidations += report.merges;
                self.stats.tokens_saved += report.tokens_saved;
                METRICS.record_consolidation(report.merges, report.tokens_saved);
                self.consolidation_counted = true;
            }
            messages.extend(turns);
        } else {
            messages.extend(self.history.iter().cloned());
        }

        if let Some(reference) = &self.config.project_knowledge_ref {
            if let Some(first) = messages.first_mut() {
                prefix_content(&mut first.content, &format!("[Project knowledge: {}]\n\n", reference));
            }
        }

        messages
    }

    pub fn get_token_usage(&self) -> TokenUsage {
        self.budget.usage()
    }

    pub fn get_stats(&self) -> OptimizerStats {
        self.stats.clone()
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Start a new conversation
    pub fn reset(&mut self) {
        self.history.clear();
        self.summary = None;
        self.budget.reset();
        self.stats = OptimizerStats::default();
        self.consolidation_counted = false;
        info!("Optimizer reset");
    }

    pub fn export(&self) -> OptimizerSnapshot {
        OptimizerSnapshot {
            history: self.history.clone(),
            summary: self.summary.clone(),
            budget: self.budget.state().clone(),
            stats: self.stats.clone(),
            consolidation_counted: self.consolidation_counted,
        }
    }

    /// Restore state from `export`, replacing everything held now
    pub fn import(&mut self, snapshot: OptimizerSnapshot) {
        debug!(
            "Importing snapshot: {} turns, summary={}",
            snapshot.history.len(),
            snapshot.summary.is_some()
        );
        self.history = snapshot.history;
        self.summary = snapshot.summary;
        self.budget.restore(snapshot.budget);
        self.stats = snapshot.stats;
        self.consolidation_counted = snapshot.consolidation_counted;
    }

    fn suggest_artifact(&mut self, text: &str) {
        let Some(kind) = artifact_detector::detect(text) else {
            return;
        };
        if !self.config.artifact_types.contains(&kind) {
            return;
        }

        self.stats.artifacts_suggested += 1;
        METRICS.record_artifact_suggestion(kind.as_str());
        info!("Suggesting {} artifact for assistant turn", kind);

        if let Some(callback) = &self.callbacks.on_artifact_suggestion {
            callback(text, kind);
        }
    }

    fn framed_summary_text(summary: &str) -> String {
        format!("[Previous conversation context]\n{}\n[End of context]", summary)
    }

    fn framed_summary_tokens(&self, summary: &str) -> usize {
        let framed = MessageContent::Text(Self::framed_summary_text(summary));
        let ack = MessageContent::from(SUMMARY_ACKNOWLEDGEMENT);
        self.estimator.estimate_message_tokens(&framed, &[])
            + self.estimator.estimate_message_tokens(&ack, &[])
    }

    fn summary_turns(&self, summary: &Summary) -> [Turn; 2] {
        let framed = MessageContent::Text(Self::framed_summary_text(&summary.text));
        let ack = MessageContent::from(SUMMARY_ACKNOWLEDGEMENT);
        [
            Turn {
                role: Role::User,
                estimated_tokens: self.estimator.estimate_message_tokens(&framed, &[]),
                content: framed,
                created_at: summary.created_at,
                consolidated_count: None,
                tool_calls: Vec::new(),
            },
            Turn {
                role: Role::Assistant,
                estimated_tokens: self.estimator.estimate_message_tokens(&ack, &[]),
                content: ack,
                created_at: summary.created_at,
                consolidated_count: None,
                tool_calls: Vec::new(),
            },
        ]
    }
}

fn prefix_content(content: &mut MessageContent, prefix: &str) {
    match content {
        MessageContent::Text(text) => text.insert_str(0, prefix),
        MessageContent::Blocks(blocks) => blocks.insert(
            0,
            ContentBlock::Text {
                text: prefix.to_string(),
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::compaction::CompactionStrategy;
    use crate::context::models::ToolCall;
    use crate::context::summarizer::SummarizerError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn small_config() -> OptimizerConfig {
        OptimizerConfig {
            max_context_tokens: Some(1000),
            reserve_output_tokens: 0,
            ..OptimizerConfig::default()
        }
    }

    /// 64 prose chars: 16 content tokens + 4 overhead
    fn twenty_token_text(i: usize) -> String {
        format!("turn {:02} {}", i, "x".repeat(56))
    }

    fn assert_budget_invariant(optimizer: &ContextOptimizer) {
        let history: usize = optimizer.history().iter().map(|t| t.estimated_tokens).sum();
        let summary = optimizer.summary().map_or(0, |s| s.estimated_tokens);
        assert_eq!(optimizer.get_token_usage().current, history + summary);
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _turns: &[Turn], _max: usize) -> std::result::Result<String, SummarizerError> {
            Err(SummarizerError::NetworkError("unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_add_message_updates_usage_and_stats() {
        let mut optimizer = ContextOptimizer::new(OptimizerConfig::default());
        let usage = optimizer.add_message(NewTurn::user("Hello world")).await;

        assert_eq!(usage.current, 7);
        assert_eq!(usage.peak, 7);
        assert_eq!(usage.available, 200_000 - 8192);
        assert!(!usage.needs_compaction);
        assert_eq!(optimizer.get_stats().total_turns, 1);
        assert_eq!(optimizer.history()[0].estimated_tokens, 7);
    }

    #[tokio::test]
    async fn test_malformed_content_still_accepted() {
        let mut optimizer = ContextOptimizer::new(OptimizerConfig::default());
        let usage = optimizer
            .add_message(NewTurn::assistant(MessageContent::Blocks(vec![])))
            .await;
        assert_eq!(usage.current, 4);
        assert_eq!(optimizer.history().len(), 1);
    }

    #[tokio::test]
    async fn test_single_compaction_for_twelve_pairs() {
        let compactions = Arc::new(AtomicUsize::new(0));
        let seen = compactions.clone();
        let config = OptimizerConfig {
            // 430 token threshold: crossed by the 22nd turn, not the 21st
            target_usage_ratio: 0.43,
            enable_consolidation: false,
            ..small_config()
        };
        let mut optimizer = ContextOptimizer::new(config).with_callbacks(
            OptimizerCallbacks::new().on_compaction(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        for pair in 0..12 {
            optimizer.add_message(NewTurn::user(twenty_token_text(pair * 2))).await;
            optimizer.add_message(NewTurn::assistant(twenty_token_text(pair * 2 + 1))).await;
            assert_budget_invariant(&optimizer);

            if pair == 10 {
                assert_eq!(optimizer.history().len(), 10);
                assert_eq!(optimizer.summary().unwrap().replaced_turn_count, 12);
            }
        }

        assert_eq!(compactions.load(Ordering::SeqCst), 1);
        assert_eq!(optimizer.get_stats().compactions, 1);
        assert_eq!(optimizer.history().len(), 12);
        assert_eq!(optimizer.get_stats().total_turns, 24);
    }

    #[tokio::test]
    async fn test_compact_noop_on_short_history() {
        let mut optimizer = ContextOptimizer::new(small_config());
        optimizer.add_message(NewTurn::user("hi")).await;
        assert!(!optimizer.compact().await);
        assert!(optimizer.summary().is_none());
        assert_eq!(optimizer.get_stats().compactions, 0);
    }

    #[tokio::test]
    async fn test_manual_compaction_reports_savings() {
        let config = OptimizerConfig {
            keep_recent_count: 2,
            enable_auto_compaction: false,
            ..OptimizerConfig::default()
        };
        let mut optimizer = ContextOptimizer::new(config);
        for i in 0..6 {
            optimizer.add_message(NewTurn::user("y".repeat(400 + i))).await;
        }
        let before = optimizer.get_token_usage().current;

        assert!(optimizer.compact().await);
        assert_eq!(optimizer.history().len(), 2);
        assert_budget_invariant(&optimizer);

        let after = optimizer.get_token_usage();
        assert!(after.current < before);
        assert_eq!(after.peak, before);
        let stats = optimizer.get_stats();
        assert_eq!(stats.compactions, 1);
        assert_eq!(stats.tokens_saved as usize, before - after.current);
    }

    #[tokio::test]
    async fn test_repeated_compaction_replaces_summary() {
        let config = OptimizerConfig {
            keep_recent_count: 2,
            enable_auto_compaction: false,
            compaction_strategy: CompactionStrategy::SummarizeAll,
            ..OptimizerConfig::default()
        };
        let mut optimizer = ContextOptimizer::new(config);
        for text in ["What is the plan?", "- ship v1", "ok", "ok"] {
            optimizer.add_message(NewTurn::user(text)).await;
        }
        assert!(optimizer.compact().await);
        for text in ["Any risks?", "none", "ok"] {
            optimizer.add_message(NewTurn::user(text)).await;
        }
        assert!(optimizer.compact().await);

        let summary = optimizer.summary().unwrap();
        assert_eq!(summary.replaced_turn_count, 5);
        assert!(summary.text.starts_with("[Summary of 5 earlier turns]"));
        assert!(summary.text.contains("Q: What is the plan?"));
        assert!(summary.text.contains("Q: Any risks?"));
        assert!(summary.text.contains("- ship v1"));
        assert_budget_invariant(&optimizer);
    }

    #[tokio::test]
    async fn test_earlier_questions_and_languages_survive_recompaction() {
        let config = OptimizerConfig {
            keep_recent_count: 2,
            enable_auto_compaction: false,
            compaction_strategy: CompactionStrategy::SummarizeAll,
            ..OptimizerConfig::default()
        };
        let mut optimizer = ContextOptimizer::new(config);
        for text in ["What is the plan?", "```rust\nfn a() {}\n```", "ok", "ok"] {
            optimizer.add_message(NewTurn::user(text)).await;
        }
        assert!(optimizer.compact().await);
        assert_eq!(
            optimizer.summary().unwrap().text,
            "[Summary of 2 earlier turns]\nQ: What is the plan?\nCode discussed: rust"
        );

        for text in ["Any risks?", "none", "ok"] {
            optimizer.add_message(NewTurn::user(text)).await;
        }
        assert!(optimizer.compact().await);

        let summary = optimizer.summary().unwrap();
        assert_eq!(summary.replaced_turn_count, 5);
        assert_eq!(
            summary.text,
            "[Summary of 5 earlier turns]\n\
             Q: What is the plan?\n\
             Q: Any risks?\n\
             Code discussed: rust"
        );
        assert_budget_invariant(&optimizer);
    }

    #[tokio::test]
    async fn test_smart_recompaction_keeps_earlier_summary() {
        let config = OptimizerConfig {
            keep_recent_count: 2,
            enable_auto_compaction: false,
            ..OptimizerConfig::default()
        };
        let mut optimizer = ContextOptimizer::new(config);
        for text in ["Which region do we use?", "ok", "ok", "ok"] {
            optimizer.add_message(NewTurn::user(text)).await;
        }
        optimizer.compact().await;
        for text in ["Who owns billing?", "ok", "ok", "ok"] {
            optimizer.add_message(NewTurn::user(text)).await;
        }
        optimizer.compact().await;

        let summary = optimizer.summary().unwrap();
        assert_eq!(summary.replaced_turn_count, 6);
        assert!(summary.text.starts_with("[Summary of 6 earlier turns]"));
        assert!(summary.text.contains("Q: Which region do we use?"));
        assert!(summary.text.contains("Q: Who owns billing?"));
    }

    #[tokio::test]
    async fn test_summarizer_failure_falls_back() {
        let config = OptimizerConfig {
            keep_recent_count: 1,
            enable_auto_compaction: false,
            ..OptimizerConfig::default()
        };
        let mut optimizer = ContextOptimizer::new(config).with_summarizer(Arc::new(FailingSummarizer));
        optimizer.add_message(NewTurn::user("Which database should we use?")).await;
        optimizer.add_message(NewTurn::assistant("Postgres.")).await;

        assert!(optimizer.compact().await);
        assert_eq!(
            optimizer.summary().unwrap().text,
            "[Summary of 1 earlier turns]\nQ: Which database should we use?"
        );
        assert_eq!(optimizer.history().len(), 1);
    }

    #[tokio::test]
    async fn test_sliding_window_strategy() {
        let config = OptimizerConfig {
            keep_recent_count: 2,
            enable_auto_compaction: false,
            compaction_strategy: CompactionStrategy::SlidingWindow,
            ..OptimizerConfig::default()
        };
        let mut optimizer = ContextOptimizer::new(config);
        for i in 0..5 {
            let turn = if i % 2 == 0 { NewTurn::user("q") } else { NewTurn::assistant("a") };
            optimizer.add_message(turn).await;
        }
        assert!(optimizer.compact().await);
        assert_eq!(
            optimizer.summary().unwrap().text,
            "[Earlier context: 2 user turns, 1 assistant turns - context trimmed]"
        );
    }

    #[tokio::test]
    async fn test_sliding_window_note_tracks_all_dropped_turns() {
        let config = OptimizerConfig {
            keep_recent_count: 2,
            enable_auto_compaction: false,
            compaction_strategy: CompactionStrategy::SlidingWindow,
            ..OptimizerConfig::default()
        };
        let mut optimizer = ContextOptimizer::new(config);
        let turn = |i: usize| if i % 2 == 0 { NewTurn::user("q") } else { NewTurn::assistant("a") };

        for i in 0..7 {
            optimizer.add_message(turn(i)).await;
        }
        assert!(optimizer.compact().await);
        for i in 7..10 {
            optimizer.add_message(turn(i)).await;
        }
        assert!(optimizer.compact().await);

        let summary = optimizer.summary().unwrap();
        assert_eq!(summary.replaced_turn_count, 8);
        assert_eq!(
            summary.text,
            "[Earlier context: 4 user turns, 4 assistant turns - context trimmed]"
        );
    }

    #[tokio::test]
    async fn test_optimized_messages_frame_summary() {
        let config = OptimizerConfig {
            keep_recent_count: 2,
            enable_auto_compaction: false,
            enable_consolidation: false,
            ..OptimizerConfig::default()
        };
        let mut optimizer = ContextOptimizer::new(config);
        for text in ["one", "two", "three", "four"] {
            optimizer.add_message(NewTurn::user(text)).await;
        }
        optimizer.compact().await;

        let messages = optimizer.get_optimized_messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(
            messages[0].text(),
            "[Previous conversation context]\nGeneral discussion\n[End of context]"
        );
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].text(), SUMMARY_ACKNOWLEDGEMENT);
        assert_eq!(messages[2].text(), "three");
        assert_eq!(
            messages[0].estimated_tokens + messages[1].estimated_tokens,
            optimizer.summary().unwrap().estimated_tokens
        );
    }

    #[tokio::test]
    async fn test_consolidation_counted_once_per_history() {
        let mut optimizer = ContextOptimizer::new(OptimizerConfig::default());
        optimizer.add_message(NewTurn::user("ten token message here ok")).await;
        optimizer.add_message(NewTurn::user("another short one here")).await;

        let first = optimizer.get_optimized_messages();
        let second = optimizer.get_optimized_messages();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].consolidated_count, Some(2));
        assert_eq!(optimizer.get_stats().consolidations, 1);
        assert_eq!(optimizer.history().len(), 2);

        optimizer.add_message(NewTurn::user("third")).await;
        optimizer.get_optimized_messages();
        assert_eq!(optimizer.get_stats().consolidations, 2);
    }

    #[tokio::test]
    async fn test_project_knowledge_prefix() {
        let config = OptimizerConfig {
            project_knowledge_ref: Some("docs/architecture.md".to_string()),
            ..OptimizerConfig::default()
        };
        let mut optimizer = ContextOptimizer::new(config);
        optimizer.add_message(NewTurn::user("hello")).await;

        let messages = optimizer.get_optimized_messages();
        assert_eq!(
            messages[0].text(),
            "[Project knowledge: docs/architecture.md]\n\nhello"
        );
        assert_eq!(optimizer.history()[0].text(), "hello");
    }

    #[tokio::test]
    async fn test_artifact_suggestion() {
        let suggested = Arc::new(Mutex::new(Vec::new()));
        let sink = suggested.clone();
        let mut optimizer = ContextOptimizer::new(OptimizerConfig::default()).with_callbacks(
            OptimizerCallbacks::new().on_artifact_suggestion(move |_, kind| {
                sink.lock().unwrap().push(kind);
            }),
        );

        let json = format!("[{}]", vec!["{\"id\": 12345, \"ok\": true}"; 100].join(","));
        optimizer.add_message(NewTurn::assistant(json.clone())).await;
        // user turns are never checked
        optimizer.add_message(NewTurn::user(json)).await;
        // small assistant turns are never checked
        optimizer.add_message(NewTurn::assistant("{\"a\": 1}")).await;

        assert_eq!(*suggested.lock().unwrap(), vec![ArtifactType::Json]);
        assert_eq!(optimizer.get_stats().artifacts_suggested, 1);
    }

    #[tokio::test]
    async fn test_artifact_type_filter() {
        let config = OptimizerConfig {
            artifact_types: vec![ArtifactType::Code],
            ..OptimizerConfig::default()
        };
        let mut optimizer = ContextOptimizer::new(config);
        let json = format!("[{}]", vec!["{\"id\": 12345, \"ok\": true}"; 100].join(","));
        optimizer.add_message(NewTurn::assistant(json)).await;
        assert_eq!(optimizer.get_stats().artifacts_suggested, 0);
    }

    #[tokio::test]
    async fn test_token_warning_fires() {
        let warnings = Arc::new(Mutex::new(Vec::new()));
        let sink = warnings.clone();
        let config = OptimizerConfig {
            enable_auto_compaction: false,
            ..small_config()
        };
        let mut optimizer = ContextOptimizer::new(config).with_callbacks(
            OptimizerCallbacks::new().on_token_warning(move |current, available| {
                sink.lock().unwrap().push((current, available));
            }),
        );

        optimizer.add_message(NewTurn::user("z".repeat(3500))).await; // 879 tokens
        assert!(warnings.lock().unwrap().is_empty());
        optimizer.add_message(NewTurn::user("z".repeat(100))).await; // 29 tokens
        assert_eq!(*warnings.lock().unwrap(), vec![(908, 1000)]);
    }

    #[tokio::test]
    async fn test_tool_calls_count_toward_budget() {
        let mut optimizer = ContextOptimizer::new(OptimizerConfig::default());
        let usage = optimizer
            .add_message(
                NewTurn::assistant("Hello world")
                    .with_tool_call(ToolCall::new("search", serde_json::json!({"q": "x"}))),
            )
            .await;
        assert_eq!(usage.current, 57);
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let config = OptimizerConfig {
            keep_recent_count: 1,
            enable_auto_compaction: false,
            ..OptimizerConfig::default()
        };
        let mut optimizer = ContextOptimizer::new(config);
        optimizer.add_message(NewTurn::user("a")).await;
        optimizer.add_message(NewTurn::user("b")).await;
        optimizer.compact().await;

        optimizer.reset();
        assert!(optimizer.history().is_empty());
        assert!(optimizer.summary().is_none());
        assert_eq!(optimizer.get_token_usage().current, 0);
        assert_eq!(optimizer.get_stats(), OptimizerStats::default());
        assert!(optimizer.get_optimized_messages().is_empty());
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let config = OptimizerConfig {
            keep_recent_count: 3,
            enable_auto_compaction: false,
            ..OptimizerConfig::default()
        };
        let mut original = ContextOptimizer::new(config.clone());
        for text in ["Why is the build slow?", "cache misses", "ok", "ok", "thanks"] {
            original.add_message(NewTurn::user(text)).await;
        }
        original.compact().await;
        original.get_optimized_messages();

        let json = original.export().to_json().unwrap();
        let mut restored = ContextOptimizer::new(config);
        restored.import(OptimizerSnapshot::from_json(&json).unwrap());

        assert_eq!(restored.get_optimized_messages(), original.get_optimized_messages());
        assert_eq!(restored.get_stats(), original.get_stats());
        assert_eq!(restored.get_token_usage(), original.get_token_usage());
        assert_budget_invariant(&restored);
    }

    #[test]
    fn test_snapshot_from_bad_json() {
        assert!(OptimizerSnapshot::from_json("{not json").is_err());
    }
}
