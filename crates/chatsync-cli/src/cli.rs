use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chatsync")]
#[command(about = "Keep the local messenger replica in sync with the server")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to a JSON config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// User id (UUID) whose settings are read and synced
    #[arg(long, global = true, value_name = "UUID")]
    pub user: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read or change settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
    /// Inspect the local chat list
    Chats {
        #[command(subcommand)]
        command: ChatsCommands,
    },
    /// Run one sync job and exit with its outcome (0 ok, 75 retry, 1 failure)
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Show sync state of the local replica
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run periodic sync until interrupted
    Daemon,
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// List settings with their sync state
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change a setting locally
    Set {
        /// Setting key
        key: String,
        /// New value
        value: String,
        /// Push right away instead of leaving the edit pending
        #[arg(long)]
        push: bool,
    },
    /// Restore settings from the server backup if none are stored
    Recover,
}

#[derive(Subcommand)]
pub enum ChatsCommands {
    /// List chats, most recently active first
    List {
        /// Number of chats to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one chat with its messages
    Show {
        /// Chat ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Push pending settings
    Settings {
        /// Push only this key
        #[arg(long)]
        key: Option<String>,
    },
    /// Pull chat list changes
    Chats,
}
