//! `reef` service binary.
//!
//! Wires the in-memory stores, the scheduler, and the component runner into
//! one process and serves the HTTP surface until interrupted.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use reef_api::config::Config;
use reef_api::invoker::RunnerInvoker;
use reef_api::metrics::install_recorder;
use reef_api::server::{AppState, Server};
use reef_core::observability::{init_logging, LogFormat};
use reef_inventory::{InMemoryInventory, Inventory};
use reef_reconciler::actions::ActionRegistry;
use reef_reconciler::callback::LoggingCallbackHandler;
use reef_reconciler::chart::LocalChartProvider;
use reef_reconciler::kubernetes::CachingClientFactory;
use reef_reconciler::ComponentRunner;
use reef_scheduler::{
    ClusterStatusTransition, InMemoryReconciliationRepository, ReconciliationRepository, Scheduler,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    });

    let metrics = install_recorder().map_err(|e| anyhow::anyhow!("metrics recorder: {e}"))?;

    if let Some(dsn) = &config.database_url {
        tracing::warn!(
            dsn = %dsn,
            "persistence driver not bundled with this build; using in-memory stores"
        );
    }

    let inventory: Arc<dyn Inventory> = Arc::new(InMemoryInventory::new());
    let repository: Arc<dyn ReconciliationRepository> =
        Arc::new(InMemoryReconciliationRepository::new());
    let transition = ClusterStatusTransition::new(inventory.clone(), repository);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal.cancel();
        }
    });

    let runner = Arc::new(ComponentRunner::new(
        Arc::new(LocalChartProvider::new(&config.charts_dir)),
        Arc::new(CachingClientFactory::new()),
        Arc::new(ActionRegistry::new()),
        config.runner.clone(),
    ));
    let invoker = Arc::new(RunnerInvoker::new(
        inventory.clone(),
        runner,
        Arc::new(LoggingCallbackHandler),
        shutdown.clone(),
    ));

    let scheduler = Scheduler::new(transition.clone(), invoker, config.scheduler.clone());
    let scheduler_shutdown = shutdown.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    let state = Arc::new(AppState {
        inventory,
        transition,
        pre_components: config.scheduler.pre_components.clone(),
        metrics,
    });
    Server::new(config, state).serve(shutdown).await?;

    scheduler_task.await?;
    tracing::info!("service stopped");
    Ok(())
}
