//! Signal handling for graceful shutdown and config reload.

use crate::config::ConfigLoader;
use crate::config::runtime::{ConsumerConfig, WebhookSettings};
use purgeq_core::config::ConfigStore;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Spawns a task that flips `shutdown_tx` to `true` on SIGTERM or SIGINT.
pub fn spawn_shutdown_listener(shutdown_tx: Arc<watch::Sender<bool>>) -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }
        shutdown_tx.send_replace(true);
    });
    Ok(())
}

/// Resolves once `shutdown_rx` reads `true` or its sender is gone.
pub async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

/// Spawns a task that listens for SIGHUP and reloads the configuration.
///
/// Webhook settings and consumer tunables are swapped in place. Queue
/// backend, CDN provider, listen address and worker count only change on
/// restart.
pub fn spawn_config_reload_handler(
    config_loader: Arc<ConfigLoader>,
    webhook_store: ConfigStore<WebhookSettings>,
    consumer_store: ConfigStore<ConsumerConfig>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<JoinHandle<()>> {
    let mut sighup = signal(SignalKind::hangup())?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    tracing::info!("Received SIGHUP, reloading configuration");
                    match config_loader.reload() {
                        Ok(loaded_config) => {
                            let running_workers = consumer_store.snapshot().workers;
                            if loaded_config.consumer.workers != running_workers {
                                tracing::warn!(
                                    running = running_workers,
                                    configured = loaded_config.consumer.workers,
                                    "consumer.workers changes take effect after restart"
                                );
                            }
                            webhook_store.update(loaded_config.webhook);
                            consumer_store.update(ConsumerConfig {
                                workers: running_workers,
                                ..loaded_config.consumer
                            });
                            tracing::info!("Configuration reloaded successfully");
                        }
                        Err(e) => {
                            tracing::error!("Failed to reload configuration: {}", e);
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::debug!("Config reload handler shutting down");
                        break;
                    }
                }
            }
        }
    }))
}
