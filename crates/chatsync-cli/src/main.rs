//! chatsync CLI - inspect the local messenger replica and run sync jobs
//!
//! Sync commands exit with 0 on success, 75 when the job should be retried
//! later and 1 on permanent failure, so cron or systemd can own backoff.

mod cli;
mod commands;
mod error;


use chatsync_core::SyncOutcome;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{ChatsCommands, Cli, Commands, SettingsCommands, SyncCommands};
use crate::commands::chats::{run_chats_list, run_chats_show};
use crate::commands::common::{open_facade, GlobalOptions, OpenMode};
use crate::commands::daemon::run_daemon;
use crate::commands::settings::{run_settings_list, run_settings_recover, run_settings_set};
use crate::commands::status::run_status;
use crate::commands::sync::{run_sync_chats, run_sync_settings};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(outcome) => std::process::exit(outcome.exit_code()),
        Err(error) => {
            eprintln!("Error: {error}");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<SyncOutcome, CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chatsync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = GlobalOptions::resolve(cli.db_path, cli.config, cli.user);

    match cli.command {
        Commands::Settings { command } => match command {
            SettingsCommands::List { json } => {
                let facade = open_facade(&options, OpenMode::Local).await?;
                run_settings_list(&facade, json).await?;
            }
            SettingsCommands::Set { key, value, push } => {
                let mode = if push {
                    OpenMode::RequireRemote
                } else {
                    OpenMode::Local
                };
                let facade = open_facade(&options, mode).await?;
                return run_settings_set(&facade, &key, &value, push).await;
            }
            SettingsCommands::Recover => {
                let facade = open_facade(&options, OpenMode::Local).await?;
                run_settings_recover(&facade).await?;
            }
        },
        Commands::Chats { command } => {
            let facade = open_facade(&options, OpenMode::Local).await?;
            match command {
                ChatsCommands::List { limit, json } => run_chats_list(&facade, limit, json).await?,
                ChatsCommands::Show { id, json } => run_chats_show(&facade, &id, json).await?,
            }
        }
        Commands::Sync { command } => {
            let facade = open_facade(&options, OpenMode::RequireRemote).await?;
            return match command {
                SyncCommands::Settings { key } => run_sync_settings(&facade, key.as_deref()).await,
                SyncCommands::Chats => run_sync_chats(&facade).await,
            };
        }
        Commands::Status { json } => {
            let facade = open_facade(&options, OpenMode::Local).await?;
            run_status(&facade, json).await?;
        }
        Commands::Daemon => {
            let facade = open_facade(&options, OpenMode::RequireRemote).await?;
            run_daemon(&facade).await?;
        }
    }

    Ok(SyncOutcome::Success)
}
