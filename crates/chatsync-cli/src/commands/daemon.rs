use tokio::sync::broadcast::error::RecvError;

use crate::commands::common::Facade;
use crate::error::CliError;

/// Run periodic sync until Ctrl-C, logging resolved conflicts
pub async fn run_daemon(facade: &Facade) -> Result<(), CliError> {
    let mut conflicts = facade.subscribe_conflicts();
    facade.start();
    if let Err(error) = facade.recover_settings().await {
        tracing::warn!(%error, "Settings recovery failed");
    }
    tracing::info!(
        user_id = %facade.user_id(),
        chat_interval = ?facade.config().chat_sync_interval,
        settings_interval = ?facade.config().settings_sync_interval,
        "Sync daemon running, press Ctrl-C to stop"
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            event = conflicts.recv() => match event {
                Ok(event) => tracing::info!(
                    key = %event.setting_key,
                    local = %event.local_value,
                    server = %event.server_value,
                    accepted = %event.accepted_value,
                    "Settings conflict resolved"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Missed settings conflict events");
                }
                Err(RecvError::Closed) => {
                    tokio::signal::ctrl_c().await?;
                    break;
                }
            },
        }
    }

    facade.shutdown().await;
    tracing::info!("Sync daemon stopped");
    Ok(())
}
