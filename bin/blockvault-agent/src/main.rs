//! BlockVault Agent
//!
//! Binds a block store to its backend and runs until Ctrl-C or `kill_agent`.

use anyhow::{Context, Result};
use blockvault_agent::cli::Args;
use blockvault_agent::telemetry::init_tracing;
use blockvault_agent::{AgentService, PeerRegistry, UsageFlushWorker};
use blockvault_store::StoreFactory;
use blockvault_util::{run_background_worker, wait_until};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const DRAIN_POLL: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;
    init_tracing(&config.logging);

    info!("Starting BlockVault agent {}", config.agent.name);
    if let Some(path) = &args.config {
        info!("Config file: {}", path.display());
    }
    info!(
        "Backend: {} container={} base_path={}",
        config.store.backend.provider(),
        config.store.backend.container(),
        config.store.base_path
    );

    let store = StoreFactory::create(&config.store).context("failed to create block store")?;
    store.init().await.context("failed to initialize block store")?;
    match store.test_store_validity().await {
        Ok(()) => info!("Store validity check passed"),
        Err(e) if e.is_taxonomy() => error!(
            code = e.rpc_code(),
            "Store target unusable until it is re-provisioned or credentials are rotated: {e}"
        ),
        Err(e) => warn!(code = e.rpc_code(), "Store validity check failed: {e}"),
    }
    let info = store.get_block_store_info();
    info!("Blocks path: {}", info.blocks_path);

    let peers = Arc::new(PeerRegistry::new());
    let service = Arc::new(AgentService::new(
        config.agent.name.clone(),
        Arc::clone(&store),
        peers,
    ));

    let flush_interval = Duration::from_millis(config.store.usage_flush_interval_ms);
    let flusher = run_background_worker(Arc::new(UsageFlushWorker::new(
        Arc::clone(&store),
        flush_interval,
    )));

    let mut shutdown = service.subscribe_shutdown();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down"),
        _ = shutdown.wait_for(|stop| *stop) => info!("kill_agent received, shutting down"),
    }
    flusher.abort();

    let drained = wait_until(
        || {
            let service = Arc::clone(&service);
            async move { service.pending_replications() == 0 }
        },
        Some(DRAIN_TIMEOUT),
        DRAIN_POLL,
    )
    .await;
    if drained.is_err() {
        warn!(
            "{} replications still running after {:?}",
            service.pending_replications(),
            DRAIN_TIMEOUT
        );
    }

    if let Err(e) = store.flush_usage().await {
        error!("Final usage flush failed: {e}");
    }
    let stats = store.io_stats();
    info!(
        "Agent {} stopped: reads={} writes={} read_errors={} write_errors={}",
        service.name(),
        stats.reads,
        stats.writes,
        stats.read_errors,
        stats.write_errors
    );
    Ok(())
}
