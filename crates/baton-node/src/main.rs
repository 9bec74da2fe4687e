#![forbid(unsafe_code)]

use std::sync::Arc;

use baton_node::{
    load_directory, ActivationError, Backoff, Coordinator, LogFormat, NodeConfig, RemoteSubstrate,
    TracingSink,
};
use baton_time::SystemClock;
use baton_token::{InMemorySubstrate, Substrate};
use baton_trigger::{ObjectDirectory, ObjectId};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::load()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init(),
    }

    let directory = Arc::new(load_directory(&config.directory)?);
    let objects: Vec<ObjectId> = if config.objects.is_empty() {
        directory
            .ids()
            .into_iter()
            .filter(|id| directory.linked_body(id).is_some())
            .collect()
    } else {
        config.objects.clone()
    };
    if objects.is_empty() {
        anyhow::bail!("no objects to activate in {}", config.directory.display());
    }

    let substrate: Arc<dyn Substrate> = match &config.remote {
        Some(remote) => {
            tracing::info!(url = %remote.url, "using remote coordination server");
            Arc::new(RemoteSubstrate::new(
                remote.clone(),
                config.client_id.clone(),
            ))
        }
        None => {
            tracing::info!("no server configured; coordinating in-process");
            Arc::new(InMemorySubstrate::new())
        }
    };

    let coordinator = Coordinator::new(
        config.client_id.clone(),
        substrate,
        directory,
        Arc::new(TracingSink::new()),
        Arc::new(SystemClock),
        config.coordinator.clone(),
    );
    tracing::info!(client = %coordinator.client(), objects = objects.len(), "baton-node starting");

    let startup = activate_all(&coordinator, &objects, &config);
    tokio::select! {
        result = startup => result?,
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received during startup");
            coordinator.shutdown().await?;
            return Ok(());
        }
    }

    shutdown_signal().await;
    tracing::info!("shutdown signal received");
    if let Err(err) = coordinator.shutdown().await {
        tracing::warn!("shutdown incomplete: {err}");
    }
    Ok(())
}

/// Activate each object, retrying while the substrate is unreachable. Misconfigured objects are
/// skipped with an error log.
async fn activate_all(
    coordinator: &Coordinator,
    objects: &[ObjectId],
    config: &NodeConfig,
) -> anyhow::Result<()> {
    for object in objects {
        let mut backoff = Backoff::new(
            config.coordinator.retry_initial,
            config.coordinator.retry_max,
        );
        loop {
            match coordinator.activate(object).await {
                Ok(()) => break,
                Err(ActivationError::Token(err)) if err.is_unavailable() => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        object = %object,
                        retry_ms = delay.as_millis() as u64,
                        "activation failed: {err}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err @ ActivationError::Misconfigured { .. }) => {
                    tracing::error!("skipping object: {err}");
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = sigterm => {},
    }
}
