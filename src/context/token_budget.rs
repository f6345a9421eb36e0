//! Token budget tracking against a model's context window
//!
//! The usable budget is the context limit minus the tokens reserved for the
//! completion. Compaction is signalled once usage crosses a configurable share
//! of that budget.

use serde::{Deserialize, Serialize};

/// Raw budget counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetState {
    pub limit: usize,
    pub reserve: usize,
    pub current: usize,
    pub peak: usize,
}

impl BudgetState {
    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.reserve)
    }
}

/// Derived view of the budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub current: usize,
    pub peak: usize,
    pub limit: usize,
    pub reserve: usize,
    pub available: usize,
    /// current / available
    pub percentage: f64,
    pub remaining: usize,
    pub needs_compaction: bool,
}

/// Token budget tracker
#[derive(Debug, Clone)]
pub struct BudgetTracker {
    state: BudgetState,
    target_usage_ratio: f64,
}

impl BudgetTracker {
    /// Create a tracker for a context window of `limit` tokens
    pub fn new(limit: usize, reserve: usize, target_usage_ratio: f64) -> Self {
        Self {
            state: BudgetState {
                limit,
                reserve,
                current: 0,
                peak: 0,
            },
            target_usage_ratio,
        }
    }

    /// Record tokens added to the transcript
    pub fn record_addition(&mut self, tokens: usize) {
        self.state.current = self.state.current.saturating_add(tokens);
        self.bump_peak();
    }

    /// Record a compaction or consolidation that replaced `old_tokens` with `new_tokens`
    pub fn record_compaction(&mut self, old_tokens: usize, new_tokens: usize) {
        if new_tokens >= old_tokens {
            self.state.current = self.state.current.saturating_add(new_tokens - old_tokens);
        } else {
            self.state.current = self.state.current.saturating_sub(old_tokens - new_tokens);
        }
        self.bump_peak();
    }

    fn bump_peak(&mut self) {
        self.state.peak = self.state.peak.max(self.state.current);
    }

    /// Check whether usage crossed the compaction threshold
    pub fn needs_compaction(&self) -> bool {
        self.state.current as f64 > self.state.available() as f64 * self.target_usage_ratio
    }

    /// Current usage relative to the available budget
    pub fn percentage(&self) -> f64 {
        self.state.current as f64 / self.state.available().max(1) as f64
    }

    /// Get the usage view
    pub fn usage(&self) -> TokenUsage {
        let available = self.state.available();
        TokenUsage {
            current: self.state.current,
            peak: self.state.peak,
            limit: self.state.limit,
            reserve: self.state.reserve,
            available,
            percentage: self.percentage(),
            remaining: available.saturating_sub(self.state.current),
            needs_compaction: self.needs_compaction(),
        }
    }

    pub fn state(&self) -> &BudgetState {
        &self.state
    }

    /// Replace the counters, e.g. from a snapshot
    pub fn restore(&mut self, state: BudgetState) {
        self.state = state;
    }

    /// Zero usage while keeping limit and reserve
    pub fn reset(&mut self) {
        self.state.current = 0;
        self.state.peak = 0;
    }
}
