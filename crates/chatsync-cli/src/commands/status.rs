use chatsync_core::models::{SettingsState, StreamSyncStatus, Timestamp, CHAT_LIST_STREAM};
use chatsync_core::LocalReplicaStore;
use serde::Serialize;

use crate::commands::common::{format_timestamp, print_json, Facade};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub user_id: String,
    pub remote_configured: bool,
    pub settings_state: SettingsState,
    pub pending_settings: Vec<String>,
    pub chat_count: usize,
    pub chat_stream_status: StreamSyncStatus,
    pub chat_cursor: Option<Timestamp>,
    pub chat_last_error: Option<String>,
}

pub async fn collect_status(facade: &Facade) -> Result<StatusReport, CliError> {
    let user_id = facade.user_id();
    let settings = facade.settings().await?;
    let pending = facade.store().pending_settings(user_id).await?;
    let chats = facade.chat_list().await?;
    let stream = facade.store().sync_metadata(CHAT_LIST_STREAM).await?;

    Ok(StatusReport {
        user_id: user_id.to_string(),
        remote_configured: facade.config().is_remote_configured(),
        settings_state: settings.metadata.state(),
        pending_settings: pending
            .into_iter()
            .map(|record| record.key.to_string())
            .collect(),
        chat_count: chats.len(),
        chat_stream_status: stream.sync_status,
        chat_cursor: stream.last_sync_timestamp,
        chat_last_error: stream.last_error,
    })
}

pub fn format_status_lines(report: &StatusReport) -> Vec<String> {
    let mut lines = vec![
        format!("User:              {}", report.user_id),
        format!(
            "Remote:            {}",
            if report.remote_configured {
                "configured"
            } else {
                "not configured"
            }
        ),
        format!("Settings:          {:?}", report.settings_state),
    ];
    if report.pending_settings.is_empty() {
        lines.push("Pending settings:  none".to_string());
    } else {
        lines.push(format!(
            "Pending settings:  {}",
            report.pending_settings.join(", ")
        ));
    }
    lines.push(format!("Chats:             {}", report.chat_count));
    lines.push(format!(
        "Chat sync:         {}",
        report.chat_stream_status.as_str()
    ));
    lines.push(format!(
        "Chat cursor:       {}",
        report
            .chat_cursor
            .map_or_else(|| "never synced".to_string(), format_timestamp)
    ));
    if let Some(error) = &report.chat_last_error {
        lines.push(format!("Last chat error:   {error}"));
    }
    lines
}

pub async fn run_status(facade: &Facade, as_json: bool) -> Result<(), CliError> {
    let report = collect_status(facade).await?;
    if as_json {
        return print_json(&report);
    }
    for line in format_status_lines(&report) {
        println!("{line}");
    }
    Ok(())
}
