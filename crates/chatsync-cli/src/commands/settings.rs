use chatsync_core::models::SettingKey;
use chatsync_core::SyncOutcome;

use crate::commands::common::{format_setting_lines, print_json, settings_to_items, Facade};
use crate::error::CliError;

pub async fn run_settings_list(facade: &Facade, as_json: bool) -> Result<(), CliError> {
    let settings = facade.settings().await?;

    if as_json {
        return print_json(&settings_to_items(&settings));
    }

    if settings.entries.is_empty() {
        println!("No settings stored.");
        return Ok(());
    }
    for line in format_setting_lines(&settings) {
        println!("{line}");
    }
    Ok(())
}

/// Store a setting locally; with `push`, sync it before returning
pub async fn run_settings_set(
    facade: &Facade,
    key: &str,
    value: &str,
    push: bool,
) -> Result<SyncOutcome, CliError> {
    let key = key.parse::<SettingKey>()?;
    let record = facade.update_setting(key.clone(), value).await?;

    if !push {
        println!(
            "Stored {key} = {} (version {}, pending)",
            record.value, record.local_version
        );
        return Ok(SyncOutcome::Success);
    }

    let outcome = facade.sync_one_setting(facade.user_id(), key.clone()).await;
    println!("Stored {key} = {} (sync: {outcome})", record.value);
    Ok(outcome)
}

/// Seed settings from the server backup, or defaults when it is unavailable
pub async fn run_settings_recover(facade: &Facade) -> Result<(), CliError> {
    let settings = facade.recover_settings().await?;
    println!("Settings state: {:?}", settings.metadata.state());
    for line in format_setting_lines(&settings) {
        println!("{line}");
    }
    Ok(())
}
