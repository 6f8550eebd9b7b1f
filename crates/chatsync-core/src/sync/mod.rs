//! Sync coordinators, outcomes and the task scheduler

mod chats;
mod outcome;
mod scheduler;
mod settings;

pub use chats::ChatDeltaSyncEngine;
pub use outcome::SyncOutcome;
pub use scheduler::{SchedulerState, SyncScheduler, TaskClass};
pub use settings::{InFlightSettings, SettingsSyncCoordinator};
