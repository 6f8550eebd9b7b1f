use chatsync_core::models::SettingKey;
use chatsync_core::SyncOutcome;

use crate::commands::common::Facade;
use crate::error::CliError;

pub async fn run_sync_settings(
    facade: &Facade,
    key: Option<&str>,
) -> Result<SyncOutcome, CliError> {
    let user_id = facade.user_id();
    let outcome = match key {
        Some(key) => {
            let key = key.parse::<SettingKey>()?;
            facade.sync_one_setting(user_id, key).await
        }
        None => facade.sync_all_pending_settings(user_id).await,
    };
    println!("Settings sync: {outcome}");
    Ok(outcome)
}

pub async fn run_sync_chats(facade: &Facade) -> Result<SyncOutcome, CliError> {
    let outcome = facade.sync_chat_deltas().await;
    let chats = facade.chat_list().await?;
    println!("Chat sync: {outcome} ({} chats)", chats.len());
    Ok(outcome)
}
