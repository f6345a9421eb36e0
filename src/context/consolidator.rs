//! Read-time merging of short consecutive same-role turns

use super::models::{ContentBlock, MessageContent, Turn};
use super::token_estimator::TokenEstimator;
use tracing::debug;

/// Separator placed between merged contents
pub const MERGE_SEPARATOR: &str = "\n\n";

/// Outcome of one consolidation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    /// Number of merged output turns produced from 2+ inputs
    pub merges: u64,
    pub tokens_saved: u64,
}

/// Merges short turns to cut per-turn overhead
pub struct Consolidator<'a> {
    estimator: &'a dyn TokenEstimator,
    threshold: usize,
    max_count: usize,
}

impl<'a> Consolidator<'a> {
    pub fn new(estimator: &'a dyn TokenEstimator, threshold: usize, max_count: usize) -> Self {
        Self {
            estimator,
            threshold,
            max_count: max_count.max(1),
        }
    }

    /// Merge runs of small same-role turns. The input is not modified.
    pub fn consolidate(&self, turns: &[Turn]) -> (Vec<Turn>, ConsolidationReport) {
        let mut output = Vec::with_capacity(turns.len());
        let mut buffer: Vec<&Turn> = Vec::new();
        let mut report = ConsolidationReport::default();

        for turn in turns {
            if turn.estimated_tokens >= self.threshold {
                self.flush(&mut buffer, &mut output, &mut report);
                output.push(turn.clone());
                continue;
            }

            let role_changed = buffer.first().is_some_and(|first| first.role != turn.role);
            if role_changed || buffer.len() >= self.max_count {
                self.flush(&mut buffer, &mut output, &mut report);
            }
            buffer.push(turn);
        }
        self.flush(&mut buffer, &mut output, &mut report);

        if report.merges > 0 {
            debug!(
                "Consolidated {} turns into {} ({} tokens saved)",
                turns.len(),
                output.len(),
                report.tokens_saved
            );
        }

        (output, report)
    }

    fn flush(&self, buffer: &mut Vec<&Turn>, output: &mut Vec<Turn>, report: &mut ConsolidationReport) {
        match buffer.len() {
            0 => {}
            1 => output.push(buffer[0].clone()),
            _ => {
                let merged = self.merge(buffer);
                let original: usize = buffer.iter().map(|t| t.estimated_tokens).sum();
                report.merges += 1;
                report.tokens_saved += original.saturating_sub(merged.estimated_tokens) as u64;
                output.push(merged);
            }
        }
        buffer.clear();
    }

    /// Plain-text turns are joined with the separator; if any turn carries
    /// blocks, the block lists are concatenated so images and documents survive.
    fn merge(&self, turns: &[&Turn]) -> Turn {
        let all_text = turns
            .iter()
            .all(|t| matches!(t.content, MessageContent::Text(_)));
        let content = if all_text {
            let text = turns
                .iter()
                .map(|t| t.text())
                .collect::<Vec<_>>()
                .join(MERGE_SEPARATOR);
            MessageContent::Text(text)
        } else {
            MessageContent::Blocks(turns.iter().flat_map(|t| blocks_of(&t.content)).collect())
        };
        let tool_calls: Vec<_> = turns.iter().flat_map(|t| t.tool_calls.iter().cloned()).collect();
        let estimated_tokens = self.estimator.estimate_message_tokens(&content, &tool_calls);

        Turn {
            role: turns[0].role,
            content,
            estimated_tokens,
            created_at: turns[0].created_at,
            consolidated_count: Some(turns.iter().map(|t| t.consolidated_count.unwrap_or(1)).sum()),
            tool_calls,
        }
    }
}

fn blocks_of(content: &MessageContent) -> Vec<ContentBlock> {
    match content {
        MessageContent::Text(text) if text.is_empty() => Vec::new(),
        MessageContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
        MessageContent::Blocks(blocks) => blocks.clone(),
    }
}
