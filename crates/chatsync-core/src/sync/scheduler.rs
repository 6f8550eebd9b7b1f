//! Owned task scope for sync work

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use super::SyncOutcome;

/// Lifecycle of a [`SyncScheduler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Constructed, not accepting tasks yet
    Idle,
    /// Accepting tasks
    Running,
    /// Shut down for good
    Stopped,
}

/// Whether a task survives [`SyncScheduler::cancel_foreground`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskClass {
    /// Triggered by the user or the UI; cancelled on teardown
    Foreground,
    /// Periodic or system-triggered; cancelled only on shutdown
    Background,
}

struct Inner {
    state: Mutex<SchedulerState>,
    permits: Arc<Semaphore>,
    foreground: Mutex<JoinSet<()>>,
    background: Mutex<JoinSet<()>>,
}

/// Bounded pool running sync tasks with an explicit start/shutdown lifecycle.
///
/// Cloning yields another handle to the same scope. Tasks are refused unless
/// the scheduler is running.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("state", &self.state())
            .field("available_workers", &self.inner.permits.available_permits())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SyncScheduler {
    /// Create an idle scheduler running at most `worker_pool_size` tasks at once
    pub fn new(worker_pool_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SchedulerState::Idle),
                permits: Arc::new(Semaphore::new(worker_pool_size.max(1))),
                foreground: Mutex::new(JoinSet::new()),
                background: Mutex::new(JoinSet::new()),
            }),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SchedulerState {
        *lock(&self.inner.state)
    }

    /// Whether tasks are accepted
    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Start accepting tasks; returns `false` if already running or stopped
    pub fn start(&self) -> bool {
        let mut state = lock(&self.inner.state);
        if *state == SchedulerState::Idle {
            *state = SchedulerState::Running;
            tracing::debug!("Sync scheduler started");
            true
        } else {
            false
        }
    }

    /// Spawn a task cancelled by [`Self::cancel_foreground`]
    pub fn spawn_foreground<F>(&self, name: &'static str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(TaskClass::Foreground, name, task)
    }

    /// Spawn a task that survives [`Self::cancel_foreground`]
    pub fn spawn_background<F>(&self, name: &'static str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(TaskClass::Background, name, task)
    }

    /// Run `job` every `interval` as a background task, starting immediately
    pub fn spawn_periodic<F, Fut>(&self, name: &'static str, interval: Duration, job: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncOutcome> + Send + 'static,
    {
        let permits = Arc::clone(&self.inner.permits);
        self.spawn_unbounded(TaskClass::Background, async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Ok(_permit) = permits.acquire().await else {
                    return;
                };
                let outcome = job().await;
                tracing::debug!(job = name, %outcome, "Periodic sync finished");
            }
        })
    }

    /// Spawn a task of the given class; returns `false` when refused
    pub fn spawn<F>(&self, class: TaskClass, name: &'static str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.inner.permits);
        self.spawn_unbounded(class, async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            tracing::trace!(task = name, "Sync task running");
            task.await;
        })
    }

    /// Abort all foreground tasks; background tasks keep running
    pub fn cancel_foreground(&self) {
        let mut tasks = lock(&self.inner.foreground);
        let count = tasks.len();
        tasks.abort_all();
        tracing::debug!(count, "Cancelled foreground sync tasks");
    }

    /// Stop accepting tasks, abort everything and wait for tasks to wind down
    pub async fn shutdown(&self) {
        *lock(&self.inner.state) = SchedulerState::Stopped;
        self.inner.permits.close();

        let mut foreground = std::mem::take(&mut *lock(&self.inner.foreground));
        let mut background = std::mem::take(&mut *lock(&self.inner.background));
        foreground.abort_all();
        background.abort_all();
        while foreground.join_next().await.is_some() {}
        while background.join_next().await.is_some() {}
        tracing::debug!("Sync scheduler stopped");
    }

    /// Number of unfinished tasks per class: `(foreground, background)`
    pub fn active_tasks(&self) -> (usize, usize) {
        let mut foreground = lock(&self.inner.foreground);
        let mut background = lock(&self.inner.background);
        reap(&mut foreground);
        reap(&mut background);
        (foreground.len(), background.len())
    }

    fn spawn_unbounded<F>(&self, class: TaskClass, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let state = lock(&self.inner.state);
        if *state != SchedulerState::Running {
            return false;
        }
        let mut tasks = match class {
            TaskClass::Foreground => lock(&self.inner.foreground),
            TaskClass::Background => lock(&self.inner.background),
        };
        reap(&mut tasks);
        tasks.spawn(task);
        drop(state);
        true
    }
}

/// Drop bookkeeping of finished tasks, logging panics
fn reap(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        if let Err(error) = result {
            if error.is_panic() {
                tracing::error!(%error, "Sync task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread")]
    async fn refuses_tasks_unless_running() {
        let scheduler = SyncScheduler::new(2);
        assert!(!scheduler.spawn_foreground("early", async {}));

        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert!(scheduler.spawn_foreground("ok", async {}));

        scheduler.shutdown().await;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(!scheduler.spawn_background("late", async {}));
        assert!(!scheduler.start());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_foreground_keeps_background_tasks() {
        let scheduler = SyncScheduler::new(4);
        scheduler.start();
        scheduler.spawn_foreground("fg", std::future::pending());
        scheduler.spawn_background("bg", std::future::pending());
        tokio::task::yield_now().await;

        scheduler.cancel_foreground();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(scheduler.active_tasks(), (0, 1));
        scheduler.shutdown().await;
        assert_eq!(scheduler.active_tasks(), (0, 0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pool_bounds_concurrency() {
        let scheduler = SyncScheduler::new(1);
        scheduler.start();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            scheduler.spawn_background("bounded", async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.active_tasks(), (0, 0));
        scheduler.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn periodic_jobs_repeat() {
        let scheduler = SyncScheduler::new(1);
        scheduler.start();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        scheduler.spawn_periodic("tick", Duration::from_millis(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                SyncOutcome::Success
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.shutdown().await;

        assert!(runs.load(Ordering::SeqCst) >= 2);
    }
}
