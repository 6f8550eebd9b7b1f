//! chatsync-core - Client-side consistency layer for a messenger
//!
//! This crate keeps an on-device replica of user settings and the chat list
//! in sync with the server: optimistic local writes, per-key settings pushes
//! with conflict resolution, cursor-based chat delta sync, and the message
//! delivery-status state machine. The CLI and any UI talk to it through
//! [`ConsistencyFacade`].

pub mod config;
pub mod conflict;
pub mod db;
pub mod delivery;
pub mod error;
pub mod facade;
pub mod models;
pub mod remote;
pub mod sync;
pub mod util;

pub use config::SyncConfig;
pub use conflict::{ConflictResolver, ServerWins};
pub use db::{LocalReplicaStore, Revision, SqliteReplicaStore};
pub use error::{Error, LocalStorageError, RemoteError, Result};
pub use facade::{ConsistencyFacade, Observer, SyncJob};
pub use remote::{HttpRemoteSyncClient, RemoteSyncClient};
pub use sync::{SyncOutcome, SyncScheduler};
