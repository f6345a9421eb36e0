//! Simulated chat session showing compaction, consolidation and metrics
//!
//! Run with: RUST_LOG=debug cargo run --example chat_session

use context_optimizer::{
    context::{CompactionStrategy, OptimizerCallbacks},
    metrics::METRICS,
    telemetry, ContextOptimizer, NewTurn, OptimizerConfig,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing(false);

    let mut config = OptimizerConfig::load(Some("optimizer"))?;
    config.max_context_tokens = Some(2_000);
    config.reserve_output_tokens = 500;
    config.compaction_strategy = CompactionStrategy::Smart;
    config.project_knowledge_ref = Some("docs/runbook.md".to_string());

    let callbacks = OptimizerCallbacks::new()
        .on_compaction(|summary, replaced| {
            info!("Compacted {} turns into:\n{}", replaced, summary);
        })
        .on_token_warning(|current, available| {
            info!("Token warning: {} / {}", current, available);
        })
        .on_artifact_suggestion(|_, kind| {
            info!("Consider moving this {} output into an artifact", kind);
        });

    let mut optimizer = ContextOptimizer::new(config).with_callbacks(callbacks);

    for round in 0..20 {
        optimizer
            .add_message(NewTurn::user(format!(
                "Round {}: why does the deploy of Service Gamma take {}% longer?",
                round,
                round * 5
            )))
            .await;
        let usage = optimizer
            .add_message(NewTurn::assistant(format!(
                "Likely causes:\n- cold cache on node {}\n- image pull of 1200 MB\n```bash\nkubectl rollout status deploy/gamma\n```",
                round
            )))
            .await;
        info!(
            "Round {}: {} / {} tokens ({:.0}%)",
            round,
            usage.current,
            usage.available,
            usage.percentage * 100.0
        );
    }

    let messages = optimizer.get_optimized_messages();
    info!("Sending {} turns to the completion service", messages.len());
    info!("Stats: {:?}", optimizer.get_stats());

    let snapshot = optimizer.export().to_json()?;
    info!("Snapshot is {} bytes", snapshot.len());

    println!("{}", METRICS.export_prometheus());
    Ok(())
}
