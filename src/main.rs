use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use aptforge::config::Config;
use aptforge::context::AppContext;
use aptforge::jobs::{JobQueue, WorkerPool, run_scheduler};
use aptforge::repodrv::RepreproDriver;
use aptforge::store::Store;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("aptforge=debug,info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();

    for dir in [&config.workspace_dir, &config.mirror_base_path] {
        std::fs::create_dir_all(dir)?;
    }
    if let Some(parent) = config.state_file.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let store = Arc::new(Store::open(&config.state_file)?);
    let (queue, receiver) = JobQueue::new();
    let driver = Arc::new(RepreproDriver::new(Arc::clone(&store), &config));

    let worker_count = config.worker_count;
    let ctx = Arc::new(AppContext::new(config, store, driver, queue));

    let cancel = CancellationToken::new();
    let pool = WorkerPool::start(Arc::clone(&ctx), receiver, worker_count, cancel.clone());
    let scheduler = tokio::spawn(run_scheduler(Arc::clone(&ctx), cancel.clone()));

    info!(node = %ctx.config.node_name, workers = worker_count, "aptforge running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, draining workers");
    cancel.cancel();

    let _ = scheduler.await;
    pool.join().await;
    info!("shutdown complete");
    Ok(())
}
