use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use romstore_server::{Cli, Dispatcher, RomStore, ServiceConfig, init_logging, transport};
use romstore_store::FsSnapshotStore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log).context("installing log subscriber")?;
    run(ServiceConfig::from(cli)).await
}

async fn run(config: ServiceConfig) -> anyhow::Result<()> {
    info!(
        rom_dir = %config.rom_dir.display(),
        state_dir = %config.state_dir.display(),
        bind = %config.bind,
        "romstore starting"
    );

    let store = Arc::new(FsSnapshotStore::new(&config.state_dir));
    let service = RomStore::new(store, &config.rom_dir);

    let listener = transport::bind(config.bind)
        .await
        .context("starting TCP transport")?;
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(transport::serve(
        listener,
        Dispatcher::new(service.clone()),
        shutdown.clone(),
    ));

    // Events arriving before the catalog is installed are rejected.
    tokio::select! {
        result = service.bootstrap(config.bootstrap()) => {
            if let Err(err) = result {
                shutdown.cancel();
                if let Err(err) = server.await {
                    error!(error = %err, "transport task failed");
                }
                return Err(err).context("loading ROM catalog");
            }
            wait_for_ctrl_c().await;
        }
        _ = wait_for_ctrl_c() => {}
    }

    info!("shutting down");
    shutdown.cancel();
    if let Err(err) = server.await {
        error!(error = %err, "transport task failed");
    }

    match service.shutdown(config.shutdown_timeout).await {
        Some(report) if report.failed > 0 => {
            warn!(failed = report.failed, "some snapshots were not persisted");
        }
        Some(_) => {}
        None => warn!("exiting with unflushed snapshots"),
    }
    Ok(())
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
