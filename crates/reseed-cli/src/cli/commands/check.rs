//! `reseed check` – availability pipeline over the claim set.

use anyhow::Result;
use reseed_core::config::ReseedConfig;
use reseed_core::pipeline::{ClaimSelection, Pipeline, PipelineOptions};
use reseed_core::rpc::DaemonClient;
use std::sync::Arc;

pub async fn run_check(
    cfg: &ReseedConfig,
    name: Option<String>,
    limit: Option<usize>,
    window: Option<usize>,
    max_attempts: Option<u32>,
) -> Result<()> {
    let daemon = Arc::new(DaemonClient::new(cfg.daemon_addr.clone()));
    let options = PipelineOptions {
        window: window.unwrap_or(cfg.window),
        max_attempts: max_attempts.unwrap_or(cfg.max_attempts),
        download_timeout: cfg.download_timeout(),
        completion_timeout: cfg.completion_timeout(),
    };
    let pipeline = Pipeline::new(
        Arc::clone(&daemon),
        Arc::clone(&daemon),
        Arc::clone(&daemon),
        options,
    );
    let selection = ClaimSelection {
        names: name.into_iter().collect(),
        limit,
    };

    let report = pipeline.run_availability(&selection).await?;

    println!("{}", report.stats);
    for (attempts, count) in &report.attempts {
        println!("  {count} name(s) took {attempts} probe attempt(s)");
    }
    for item in &report.items {
        println!("available: {}", item.name());
    }
    Ok(())
}
