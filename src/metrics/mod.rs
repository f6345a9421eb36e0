//! Metrics collection for observability

use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_with_registry, Counter, CounterVec, Histogram, Opts, Registry,
};
use std::sync::Arc;
use once_cell::sync::Lazy;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    pub turns: CounterVec,
    pub compactions: CounterVec,
    pub summarizer_failures: Counter,
    pub tokens_saved: Counter,
    pub consolidations: Counter,
    pub artifact_suggestions: CounterVec,
    pub token_warnings: Counter,
    pub context_usage_ratio: Histogram,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let registry = Registry::new();

        let turns = register_counter_vec_with_registry!(
            Opts::new("optimizer_turns_total", "Total turns added to conversations"),
            &["role"],
            registry
        )?;

        let compactions = register_counter_vec_with_registry!(
            Opts::new("optimizer_compactions_total", "Total history compactions"),
            &["strategy"],
            registry
        )?;

        let summarizer_failures = register_counter_with_registry!(
            Opts::new(
                "optimizer_summarizer_failures_total",
                "Summarizer calls that fell back to the heuristic summary"
            ),
            registry
        )?;

        let tokens_saved = register_counter_with_registry!(
            Opts::new("optimizer_tokens_saved_total", "Tokens saved by compaction and consolidation"),
            registry
        )?;

        let consolidations = register_counter_with_registry!(
            Opts::new("optimizer_consolidations_total", "Total merged turn groups"),
            registry
        )?;

        let artifact_suggestions = register_counter_vec_with_registry!(
            Opts::new("optimizer_artifact_suggestions_total", "Total artifact suggestions"),
            &["type"],
            registry
        )?;

        let token_warnings = register_counter_with_registry!(
            Opts::new("optimizer_token_warnings_total", "Times usage crossed the warning level"),
            registry
        )?;

        let context_usage_ratio = register_histogram_with_registry!(
            "optimizer_context_usage_ratio",
            "Share of the available budget in use after each turn",
            vec![0.1, 0.25, 0.5, 0.75, 0.85, 0.9, 1.0],
            registry
        )?;

        Ok(Self {
            registry,
            turns,
            compactions,
            summarizer_failures,
            tokens_saved,
            consolidations,
            artifact_suggestions,
            token_warnings,
            context_usage_ratio,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a turn and the resulting usage ratio
    pub fn record_turn(&self, role: &str, usage_ratio: f64) {
        self.turns.with_label_values(&[role]).inc();
        self.context_usage_ratio.observe(usage_ratio);
    }

    /// Record a compaction event
    pub fn record_compaction(&self, strategy: &str, tokens_saved: u64) {
        self.compactions.with_label_values(&[strategy]).inc();
        self.tokens_saved.inc_by(tokens_saved as f64);
    }

    /// Record a consolidation pass
    pub fn record_consolidation(&self, merges: u64, tokens_saved: u64) {
        self.consolidations.inc_by(merges as f64);
        self.tokens_saved.inc_by(tokens_saved as f64);
    }

    pub fn record_artifact_suggestion(&self, artifact_type: &str) {
        self.artifact_suggestions.with_label_values(&[artifact_type]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}
