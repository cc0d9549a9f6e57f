mod config;
mod cron;

use config::JobsConfig;
use cron::JobRunner;
use dotenv::dotenv;
use std::sync::Arc;
use subscription_engine::memory::{MemoryBackend, Seed};
use subscription_engine::{BatchOrchestrator, EngineConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn load_seed(path: &str) -> Result<Seed, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let seed: Seed = serde_json::from_str(&content)?;
    Ok(seed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("subscription_jobs=info,subscription_engine=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting subscription jobs");

    let engine_config = EngineConfig::from_env().inspect_err(|e| {
        error!("Invalid engine configuration: {}", e);
    })?;
    let jobs_config = JobsConfig::from_env().inspect_err(|e| {
        error!("Invalid job configuration: {}", e);
    })?;

    info!(
        timezone = %engine_config.timezone,
        worker_concurrency = engine_config.worker_concurrency,
        item_timeout_secs = engine_config.item_timeout_secs,
        status_cron = %jobs_config.status_run_cron,
        order_cron = %jobs_config.order_run_cron,
        "Loaded configuration"
    );

    let backend = match &jobs_config.seed_path {
        Some(path) => {
            let seed = load_seed(path).inspect_err(|e| {
                error!("Failed to load seed from {}: {}", path, e);
            })?;
            info!(
                path = %path,
                users = seed.users.len(),
                subscriptions = seed.subscriptions.len(),
                "Loaded seed"
            );
            MemoryBackend::from_seed(seed)
        }
        None => {
            warn!("SEED_PATH not set - starting with an empty book");
            MemoryBackend::new()
        }
    };

    let orchestrator = Arc::new(BatchOrchestrator::new(
        engine_config,
        backend.collaborators(),
    )?);

    let runner = JobRunner::new(Arc::clone(&orchestrator)).await?;
    runner.register(&jobs_config).await?;

    if jobs_config.run_on_start {
        info!("RUN_ON_START set - running both jobs now");
        runner.run_now().await;
    }

    runner.start().await?;

    info!("Subscription jobs running, waiting for shutdown signal");

    tokio::signal::ctrl_c().await?;

    info!("Received shutdown signal, stopping scheduler...");

    if let Err(e) = runner.shutdown().await {
        warn!("Scheduler did not shut down cleanly: {}", e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_seed_parses() {
        let seed: Seed = serde_json::from_str(include_str!("../seed.example.json")).unwrap();
        assert_eq!(seed.users.len(), 2);
        assert_eq!(seed.subscriptions.len(), 3);
        assert_eq!(seed.sequence_start, Some(1000));

        let backend = MemoryBackend::from_seed(seed);
        assert_eq!(backend.subscriptions.len(), 3);
    }
}
