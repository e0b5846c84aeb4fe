//! Periodic garbage collection over expired authorization state
//!
//! Background maintenance only: the request path never depends on the
//! sweep. The job enumerates stored state entries and purges the ones
//! whose TTL lapsed. Runs are idempotent and safe to overlap with request
//! handling.
//!
//! Lifecycle follows the explicit start/stop pattern: a cancellation token
//! plus a held join handle, so hosts can shut the task down cleanly.

use std::sync::Arc;
use std::time::Duration;

use authrelay_core::StateStore;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Scheduler-specific errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Scheduler is already running
    #[error("scheduler already running")]
    AlreadyRunning,

    /// Scheduler is not running
    #[error("scheduler not running")]
    NotRunning,

    /// Task join failed
    #[error("task join failed: {0}")]
    TaskJoinFailed(String),
}

/// Configuration for the state GC scheduler.
#[derive(Debug, Clone)]
pub struct StateGcConfig {
    /// Sweep interval
    pub interval: Duration,
}

impl Default for StateGcConfig {
    fn default() -> Self {
        // Entries live for minutes; a daily sweep keeps the store bounded
        Self { interval: Duration::from_secs(24 * 60 * 60) }
    }
}

type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Periodic sweep over expired authorization state entries.
pub struct StateGcScheduler {
    states: Arc<StateStore>,
    config: StateGcConfig,
    cancellation_token: CancellationToken,
    task_handle: TaskHandle,
}

impl StateGcScheduler {
    /// Create a scheduler over the given state store.
    #[must_use]
    pub fn new(states: Arc<StateStore>, config: StateGcConfig) -> Self {
        Self {
            states,
            config,
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// The background task is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .map_or(false, |h| h.as_ref().map_or(false, |handle| !handle.is_finished()))
    }

    /// Start the background sweep task.
    ///
    /// # Errors
    /// Returns [`SchedulerError::AlreadyRunning`] when a task is active.
    pub async fn start(&mut self) -> Result<(), SchedulerError> {
        if self.task_handle.lock().await.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!(interval_secs = self.config.interval.as_secs(), "starting state GC scheduler");

        // Fresh token so the scheduler supports restart after stop
        self.cancellation_token = CancellationToken::new();
        let cancel = self.cancellation_token.clone();
        let states = Arc::clone(&self.states);
        let interval = self.config.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would sweep at startup; skip it
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match states.sweep().await {
                            Ok(purged) => info!(purged, "state GC sweep completed"),
                            Err(e) => error!(error = %e, "state GC sweep failed"),
                        }
                    }
                }
            }
        });

        *self.task_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Stop the background task and wait for it to finish.
    ///
    /// # Errors
    /// Returns [`SchedulerError::NotRunning`] when no task is active, or
    /// [`SchedulerError::TaskJoinFailed`] when the task panicked.
    pub async fn stop(&mut self) -> Result<(), SchedulerError> {
        let Some(handle) = self.task_handle.lock().await.take() else {
            return Err(SchedulerError::NotRunning);
        };

        info!("stopping state GC scheduler");
        self.cancellation_token.cancel();
        handle.await.map_err(|e| SchedulerError::TaskJoinFailed(e.to_string()))?;
        Ok(())
    }

    /// Run one sweep immediately, outside the schedule.
    ///
    /// # Errors
    /// Propagates the state store's error.
    pub async fn sweep_now(&self) -> authrelay_domain::Result<usize> {
        self.states.sweep().await
    }
}
