//! Exclusive background jobs
//!
//! Some maintenance work (a full health sweep, a repair pass) must never run
//! twice at the same time. A [`JobCoordinator`] hands out at most one
//! [`JobHandle`]; the slot frees itself when the handle is dropped.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Description of the running job
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunningJobInfo {
    /// Name given to [`JobCoordinator::try_start`]
    pub name: String,
    /// When it started
    pub started_at: DateTime<Utc>,
    /// Whether [`JobCoordinator::cancel`] has been called for it
    pub cancel_requested: bool,
}

#[derive(Debug)]
struct RunningJob {
    id: Uuid,
    name: String,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

type Slot = Arc<Mutex<Option<RunningJob>>>;

fn lock(slot: &Slot) -> std::sync::MutexGuard<'_, Option<RunningJob>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Lets at most one job run at a time
///
/// # Example
///
/// ```
/// use nntp_stream::JobCoordinator;
///
/// let jobs = JobCoordinator::new();
/// let handle = jobs.try_start("health sweep").unwrap();
/// assert!(jobs.try_start("repair").is_none());
/// drop(handle);
/// assert!(jobs.try_start("repair").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct JobCoordinator {
    slot: Slot,
}

impl JobCoordinator {
    /// Coordinator with no job running
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `name`, or `None` when another job holds it
    pub fn try_start(&self, name: &str) -> Option<JobHandle> {
        let mut slot = lock(&self.slot);
        if let Some(running) = slot.as_ref() {
            debug!("job '{}' not started, '{}' is running", name, running.name);
            return None;
        }

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        *slot = Some(RunningJob {
            id,
            name: name.to_string(),
            started_at: Utc::now(),
            cancel: cancel.clone(),
        });
        info!("job '{}' started", name);

        Some(JobHandle {
            slot: self.slot.clone(),
            id,
            name: name.to_string(),
            cancel,
        })
    }

    /// Ask the running job to stop; `false` when nothing is running
    pub fn cancel(&self) -> bool {
        match lock(&self.slot).as_ref() {
            Some(running) => {
                info!("cancelling job '{}'", running.name);
                running.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// The running job, if any
    pub fn status(&self) -> Option<RunningJobInfo> {
        lock(&self.slot).as_ref().map(|running| RunningJobInfo {
            name: running.name.clone(),
            started_at: running.started_at,
            cancel_requested: running.cancel.is_cancelled(),
        })
    }

    /// Whether a job is running
    pub fn is_busy(&self) -> bool {
        lock(&self.slot).is_some()
    }
}

/// Proof of holding the job slot; releases it on drop
#[derive(Debug)]
pub struct JobHandle {
    slot: Slot,
    id: Uuid,
    name: String,
    cancel: CancellationToken,
}

impl JobHandle {
    /// Job name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Token cancelled by [`JobCoordinator::cancel`]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the job was asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        let mut slot = lock(&self.slot);
        if slot.as_ref().is_some_and(|running| running.id == self.id) {
            *slot = None;
            debug!("job '{}' finished", self.name);
        }
    }
}
