//! cloud-lifecycle-controller: prunes Nodes whose cloud instance is gone.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cloud_lifecycle_controller::cloud;
use cloud_lifecycle_controller::config::{Args, LogFormat};
use cloud_lifecycle_controller::controller::{
    run_controller, ControllerState, KubeEventSink, KubeNodeStore, Reconciler,
};
use cloud_lifecycle_controller::rest_api::run_server;

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cloud_lifecycle_controller=info,kube=warn,tower_http=warn".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = args
        .reconciler_config()
        .context("Unable to initialize cloud provider")?;
    let requeues = args.requeue_tracker()?;

    info!(
        "Starting cloud-lifecycle-controller (cloud: {}, dry run: {})",
        config.provider.family(),
        config.dry_run
    );

    let instances = cloud::instances_for(&config.provider)
        .await
        .context("Unable to set up cloud instances provider")?;

    let client = Client::try_default()
        .await
        .context("Unable to create Kubernetes client")?;

    let reconciler = Reconciler::new(
        config,
        Arc::new(KubeNodeStore::new(client.clone())),
        Arc::new(KubeEventSink::new(client.clone())),
        instances,
    );
    let state = Arc::new(ControllerState {
        reconciler,
        requeues,
    });

    tokio::select! {
        res = run_controller(client, state) => {
            if let Err(e) = &res {
                error!("Controller exited with error: {}", e);
            }
            res?;
        }
        res = run_server(args.metrics_bind_address, args.health_probe_bind_address) => {
            if let Err(e) = &res {
                error!("HTTP server exited with error: {}", e);
            }
            res?;
        }
    }

    info!("Shutting down");
    Ok(())
}
