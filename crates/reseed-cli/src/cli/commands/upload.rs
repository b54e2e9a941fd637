//! `reseed upload` – replication pipeline: download descriptors, push them
//! to the given reflector destinations.

use anyhow::{bail, Result};
use reseed_core::config::ReseedConfig;
use reseed_core::pipeline::{ClaimSelection, Pipeline, PipelineOptions};
use reseed_core::reflector::Destination;
use reseed_core::rpc::DaemonClient;
use std::sync::Arc;
use std::time::Duration;

pub async fn run_upload(
    cfg: &ReseedConfig,
    destinations: Vec<String>,
    names: Vec<String>,
    limit: Option<usize>,
    window: Option<usize>,
    timeout_secs: Option<u64>,
    completion_timeout_secs: Option<u64>,
) -> Result<()> {
    let specs = if destinations.is_empty() {
        cfg.destinations.clone()
    } else {
        destinations
    };
    if specs.is_empty() {
        bail!("no destinations given on the command line or in config");
    }
    let destinations = specs
        .iter()
        .map(|spec| Destination::parse(spec))
        .collect::<Result<Vec<_>, _>>()?;

    let daemon = Arc::new(DaemonClient::new(cfg.daemon_addr.clone()));
    let options = PipelineOptions {
        window: window.unwrap_or(cfg.window),
        max_attempts: cfg.max_attempts,
        download_timeout: timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| cfg.download_timeout()),
        completion_timeout: completion_timeout_secs
            .map(Duration::from_secs)
            .or_else(|| cfg.completion_timeout()),
    };
    let pipeline = Pipeline::new(
        Arc::clone(&daemon),
        Arc::clone(&daemon),
        Arc::clone(&daemon),
        options,
    );
    let selection = ClaimSelection { names, limit };

    let report = pipeline.run_replication(&selection, &destinations).await?;

    println!("{}", report.stats);
    for outcome in &report.destinations {
        if outcome.delivered {
            println!("{}: delivered", outcome.destination);
        } else {
            println!("{}: failed", outcome.destination);
        }
    }
    Ok(())
}
