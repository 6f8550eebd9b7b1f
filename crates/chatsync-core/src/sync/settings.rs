//! Settings replication: optimistic local edits pushed one key at a time

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use super::{SyncOutcome, SyncScheduler};
use crate::conflict::ConflictResolver;
use crate::config::SyncConfig;
use crate::db::LocalReplicaStore;
use crate::error::{Error, Result};
use crate::models::{
    SettingKey, SettingRecord, Settings, SettingsConflictEvent, SyncStatus, Timestamp,
    UiLanguage, UserId,
};
use crate::remote::{PushResponse, RemoteSyncClient, SettingPush};

type FlightKey = (UserId, SettingKey);
type FlightMap = Mutex<HashMap<FlightKey, InFlight>>;

/// Result of one key sync as seen by batch callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeySync {
    Outcome(SyncOutcome),
    /// The server cannot be reached at all; later keys would fail too
    Unreachable,
}

impl KeySync {
    const fn outcome(self) -> SyncOutcome {
        match self {
            Self::Outcome(outcome) => outcome,
            Self::Unreachable => SyncOutcome::Retry,
        }
    }
}

/// A running push for one key
struct InFlight {
    done: watch::Receiver<Option<KeySync>>,
    /// Another caller asked for this key while the push was running
    rerun: bool,
}

/// Role of a caller in the single-flight protocol
enum Flight {
    /// Runs the push and publishes the result
    Leader(watch::Sender<Option<KeySync>>),
    /// Waits for the leader's result
    Follower(watch::Receiver<Option<KeySync>>),
}

/// Removes a flight entry if its runner is dropped before finishing
struct FlightGuard<'a> {
    flights: &'a FlightMap,
    key: Option<FlightKey>,
}

impl FlightGuard<'_> {
    fn disarm(&mut self) {
        self.key = None;
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            lock(self.flights).remove(&key);
            tracing::debug!(user_id = %key.0, key = %key.1, "Settings push cancelled");
        }
    }
}

fn lock(flights: &FlightMap) -> std::sync::MutexGuard<'_, HashMap<FlightKey, InFlight>> {
    flights.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read-side view of the keys with a push in flight.
///
/// `Syncing` is never persisted; readers overlay it from here so a
/// cancelled push cannot leave a record stuck in that state.
#[derive(Clone)]
pub struct InFlightSettings {
    flights: Arc<FlightMap>,
}

impl InFlightSettings {
    /// Whether a push for `key` is running
    pub fn contains(&self, user_id: UserId, key: &SettingKey) -> bool {
        lock(&self.flights).contains_key(&(user_id, key.clone()))
    }

    /// Show unconfirmed entries with a running push as `Syncing`
    pub fn mark(&self, settings: &mut Settings) {
        let flights = lock(&self.flights);
        let user_id = settings.user_id;
        for (key, entry) in &mut settings.entries {
            if entry.sync_status != SyncStatus::Synced
                && flights.contains_key(&(user_id, key.clone()))
            {
                entry.sync_status = SyncStatus::Syncing;
            }
        }
    }
}

impl std::fmt::Debug for InFlightSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightSettings")
            .field("pushes", &lock(&self.flights).len())
            .finish()
    }
}

/// Pushes local setting edits to the server and reconciles conflicts.
///
/// At most one push per `(user, key)` is in flight; concurrent requests for
/// the same key wait for it and schedule one follow-up push.
pub struct SettingsSyncCoordinator<S, R> {
    store: Arc<S>,
    remote: Arc<R>,
    resolver: Arc<dyn ConflictResolver>,
    scheduler: SyncScheduler,
    conflicts: broadcast::Sender<SettingsConflictEvent>,
    flights: Arc<FlightMap>,
    debounce: Duration,
}

impl<S, R> Clone for SettingsSyncCoordinator<S, R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            remote: Arc::clone(&self.remote),
            resolver: Arc::clone(&self.resolver),
            scheduler: self.scheduler.clone(),
            conflicts: self.conflicts.clone(),
            flights: Arc::clone(&self.flights),
            debounce: self.debounce,
        }
    }
}

impl<S: LocalReplicaStore, R: RemoteSyncClient> SettingsSyncCoordinator<S, R> {
    /// Create a coordinator
    pub fn new(
        store: Arc<S>,
        remote: Arc<R>,
        resolver: Arc<dyn ConflictResolver>,
        scheduler: SyncScheduler,
        config: &SyncConfig,
    ) -> Self {
        let (conflicts, _) = broadcast::channel(config.conflict_channel_capacity.max(1));
        Self {
            store,
            remote,
            resolver,
            scheduler,
            conflicts,
            flights: Arc::new(Mutex::new(HashMap::new())),
            debounce: config.settings_debounce,
        }
    }

    /// Resolved conflicts, for observability
    pub fn subscribe_conflicts(&self) -> broadcast::Receiver<SettingsConflictEvent> {
        self.conflicts.subscribe()
    }

    /// Keys with a push in flight
    pub fn in_flight(&self) -> InFlightSettings {
        InFlightSettings {
            flights: Arc::clone(&self.flights),
        }
    }

    /// Restore a user's settings from the server backup when the replica
    /// holds none.
    ///
    /// Returns `false` when local settings exist; they are never replaced.
    /// An empty or unreachable backup falls back to the built-in defaults,
    /// which are then pushed like any local edit.
    pub async fn recover(&self, user_id: UserId) -> Result<bool> {
        if !self.store.settings(user_id).await?.is_empty() {
            tracing::debug!(%user_id, "Local settings present, skipping recovery");
            return Ok(false);
        }

        let now = Timestamp::now();
        let mut records: Vec<SettingRecord> = match self.remote.fetch_settings(user_id).await {
            Ok(backup) => backup
                .into_iter()
                .map(|setting| {
                    SettingRecord::recovered(
                        user_id,
                        setting.key,
                        setting.value,
                        setting.server_version,
                        now,
                    )
                })
                .collect(),
            Err(error) => {
                tracing::warn!(%user_id, %error, "Settings backup unavailable, using defaults");
                Vec::new()
            }
        };
        let restored = records.len();
        if !records.iter().any(|record| record.key == SettingKey::ui_language()) {
            records.push(SettingRecord::default_value(
                user_id,
                SettingKey::ui_language(),
                UiLanguage::default().as_str().to_string(),
                now,
            ));
        }

        let has_defaults = records.iter().any(SettingRecord::is_dirty);

        if !self.store.seed_settings(user_id, records).await? {
            tracing::debug!(%user_id, "Settings written locally during recovery, keeping them");
            return Ok(false);
        }
        tracing::info!(%user_id, restored, "Recovered settings");

        if has_defaults {
            let this = self.clone();
            self.scheduler.spawn_foreground("settings_push", async move {
                this.sync_all_pending(user_id).await;
            });
        }
        Ok(true)
    }

    /// Record a local edit and schedule its push.
    ///
    /// The edit is durable when this returns; the push runs as a foreground
    /// task after the configured debounce if the scheduler is running.
    pub async fn upsert_local(
        &self,
        user_id: UserId,
        key: SettingKey,
        value: impl Into<String>,
    ) -> Result<SettingRecord> {
        let value = value.into();
        let now = Timestamp::now();
        let record = self
            .store
            .update_setting(user_id, key.clone(), move |current| {
                let record = match current {
                    Some(record) => record.edited(value, now),
                    None => SettingRecord::new_local(user_id, key, value, now),
                };
                Ok((Some(record.clone()), record))
            })
            .await?;
        tracing::debug!(
            %user_id,
            key = %record.key,
            local_version = record.local_version,
            "Stored local setting"
        );

        let this = self.clone();
        let key = record.key.clone();
        let scheduled = self.scheduler.spawn_foreground("settings_push", async move {
            if !this.debounce.is_zero() {
                tokio::time::sleep(this.debounce).await;
            }
            this.sync_one(user_id, key).await;
        });
        if !scheduled {
            tracing::debug!(%user_id, key = %record.key, "Scheduler not running, push deferred");
        }
        Ok(record)
    }

    /// Push one key if it has unconfirmed changes
    pub async fn sync_one(&self, user_id: UserId, key: SettingKey) -> SyncOutcome {
        self.sync_key(user_id, key).await.outcome()
    }

    /// Push every dirty key of a user, one after another.
    ///
    /// Stops early with `Retry` when the server is unreachable; keys already
    /// reconciled stay reconciled.
    pub async fn sync_all_pending(&self, user_id: UserId) -> SyncOutcome {
        let pending = match self.store.pending_settings(user_id).await {
            Ok(pending) => pending,
            Err(error) => {
                tracing::warn!(%user_id, %error, "Failed to list pending settings");
                return SyncOutcome::from_error(&error);
            }
        };
        tracing::debug!(%user_id, count = pending.len(), "Syncing pending settings");

        let mut outcome = SyncOutcome::Success;
        for record in pending {
            match self.sync_key(user_id, record.key).await {
                KeySync::Outcome(item) => outcome = outcome.combine(item),
                KeySync::Unreachable => {
                    tracing::info!(%user_id, "Server unreachable, stopping settings sync");
                    return SyncOutcome::Retry;
                }
            }
        }
        outcome
    }

    /// Single-flight wrapper around [`Self::push_once`]
    async fn sync_key(&self, user_id: UserId, key: SettingKey) -> KeySync {
        let flight_key = (user_id, key.clone());
        let role = {
            let mut flights = lock(&self.flights);
            if let Some(flight) = flights.get_mut(&flight_key) {
                flight.rerun = true;
                Flight::Follower(flight.done.clone())
            } else {
                let (done, rx) = watch::channel(None);
                flights.insert(
                    flight_key.clone(),
                    InFlight {
                        done: rx,
                        rerun: false,
                    },
                );
                Flight::Leader(done)
            }
        };

        let done = match role {
            Flight::Leader(done) => done,
            Flight::Follower(mut done) => {
                tracing::debug!(%user_id, %key, "Joining in-flight settings push");
                return match done.wait_for(Option::is_some).await {
                    Ok(result) => result.unwrap_or(KeySync::Outcome(SyncOutcome::Retry)),
                    Err(_) => KeySync::Outcome(SyncOutcome::Retry),
                };
            }
        };

        let mut guard = FlightGuard {
            flights: &self.flights,
            key: Some(flight_key.clone()),
        };
        let result = loop {
            let result = self.push_once(user_id, &key).await;
            let mut flights = lock(&self.flights);
            let rerun = matches!(result, KeySync::Outcome(SyncOutcome::Success))
                && flights.get(&flight_key).is_some_and(|flight| flight.rerun);
            if rerun {
                if let Some(flight) = flights.get_mut(&flight_key) {
                    flight.rerun = false;
                }
                continue;
            }
            flights.remove(&flight_key);
            break result;
        };
        guard.disarm();
        done.send_replace(Some(result));
        result
    }

    /// Push and reconcile one key.
    ///
    /// Nothing is written before the network call, so a cancelled push
    /// leaves the record as it was.
    async fn push_once(&self, user_id: UserId, key: &SettingKey) -> KeySync {
        let record = match self.store.setting(user_id, key.clone()).await {
            Ok(Some(record)) if record.is_dirty() => record,
            Ok(Some(_)) => return KeySync::Outcome(SyncOutcome::Success),
            Ok(None) => {
                tracing::warn!(%user_id, %key, "Setting to sync does not exist");
                return KeySync::Outcome(SyncOutcome::Failure);
            }
            Err(error) => {
                tracing::warn!(%user_id, %key, %error, "Failed to load setting for sync");
                return KeySync::Outcome(SyncOutcome::from_error(&error));
            }
        };

        let push = SettingPush {
            user_id,
            key: key.clone(),
            value: record.value.clone(),
            client_version: record.local_version,
            last_known_server_version: record.server_version,
            modified_at: record.modified_at,
        };
        tracing::debug!(
            %user_id,
            %key,
            client_version = push.client_version,
            "Pushing setting"
        );

        let reconciled = match self.remote.push_setting(push).await {
            Ok(PushResponse::Accepted { server_version }) => {
                self.confirm(&record, server_version).await
            }
            Ok(PushResponse::Conflict {
                server_value,
                server_version,
                ..
            }) => self.reconcile(&record, server_value, server_version).await,
            Err(error) => {
                tracing::warn!(%user_id, %key, %error, "Settings push failed");
                self.mark_failed(&record).await;
                return if error.is_unreachable() {
                    KeySync::Unreachable
                } else {
                    KeySync::Outcome(SyncOutcome::from_remote(&error))
                };
            }
        };

        match reconciled {
            Ok(()) => KeySync::Outcome(SyncOutcome::Success),
            Err(error) => {
                tracing::warn!(%user_id, %key, %error, "Failed to store sync result");
                KeySync::Outcome(SyncOutcome::from_error(&error))
            }
        }
    }

    /// The server stored the pushed version
    async fn confirm(&self, pushed: &SettingRecord, server_version: i64) -> Result<()> {
        let pushed_version = pushed.local_version;
        let (user_id, key) = (pushed.user_id, pushed.key.clone());
        self.store
            .update_setting(user_id, key.clone(), move |current| {
                let mut record = current.ok_or_else(|| Error::SettingNotFound {
                    user_id,
                    key: key.to_string(),
                })?;
                record.synced_version = record.synced_version.max(pushed_version);
                record.server_version = server_version;
                record.sync_status = if record.local_version == pushed_version {
                    SyncStatus::Synced
                } else {
                    SyncStatus::Pending
                };
                Ok((Some(record), ()))
            })
            .await?;
        tracing::debug!(%user_id, key = %pushed.key, server_version, "Setting accepted");
        Ok(())
    }

    /// The server holds a different value; apply the resolver's choice.
    ///
    /// When a newer local edit landed during the push, that edit wins locally
    /// and is pushed next against `server_version`; the event reports it as
    /// the accepted value.
    async fn reconcile(
        &self,
        pushed: &SettingRecord,
        server_value: String,
        server_version: i64,
    ) -> Result<()> {
        let accepted = self.resolver.resolve(&pushed.value, &server_value);
        let pushed_version = pushed.local_version;
        let (user_id, key) = (pushed.user_id, pushed.key.clone());

        let (accepted_value, superseded) = self
            .store
            .update_setting(user_id, key.clone(), move |current| {
                let mut record = current.ok_or_else(|| Error::SettingNotFound {
                    user_id,
                    key: key.to_string(),
                })?;
                record.server_version = server_version;
                if record.local_version != pushed_version {
                    let newer = record.value.clone();
                    return Ok((Some(record), (newer, true)));
                }
                let version = record.local_version.max(server_version);
                record.value = accepted.clone();
                record.local_version = version;
                record.synced_version = version;
                record.sync_status = SyncStatus::Synced;
                Ok((Some(record), (accepted, false)))
            })
            .await?;

        if superseded {
            tracing::info!(
                %user_id,
                key = %pushed.key,
                server_version,
                "Settings conflict superseded by a newer local edit"
            );
        } else {
            tracing::info!(
                %user_id,
                key = %pushed.key,
                strategy = self.resolver.name(),
                server_version,
                "Resolved settings conflict"
            );
        }
        let event = SettingsConflictEvent {
            user_id,
            setting_key: pushed.key.clone(),
            local_value: pushed.value.clone(),
            server_value,
            accepted_value,
            conflicted_at: Timestamp::now(),
        };
        // No subscribers is fine
        self.conflicts.send(event).ok();
        Ok(())
    }

    async fn mark_failed(&self, pushed: &SettingRecord) {
        let pushed_version = pushed.local_version;
        let result = self
            .store
            .update_setting(pushed.user_id, pushed.key.clone(), move |current| {
                Ok((
                    current
                        .filter(|record| record.local_version == pushed_version && record.is_dirty())
                        .map(|mut record| {
                            record.sync_status = SyncStatus::Failed;
                            record
                        }),
                    (),
                ))
            })
            .await;
        if let Err(error) = result {
            tracing::warn!(key = %pushed.key, %error, "Failed to mark setting as failed");
        }
    }
}
