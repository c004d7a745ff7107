// src/engine/services.rs

//! Collaborators invoked by the queue as side effects: job persistence and
//! start/expiration schedules.
//!
//! Failures are reported as `Result`s; the queue logs them and carries on.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::engine::RuntimeEvent;
use crate::engine::job::ClientBundle;
use crate::errors::{JobGridError, Result};
use crate::types::JobUuid;

/// Stores job submissions so they survive a restart.
pub trait JobPersistence: Send + Sync {
    fn store_job(&self, bundle: &ClientBundle) -> Result<()>;

    fn delete_job(&self, uuid: &str) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPersistence;

impl JobPersistence for NoopPersistence {
    fn store_job(&self, _bundle: &ClientBundle) -> Result<()> {
        Ok(())
    }

    fn delete_job(&self, _uuid: &str) -> Result<()> {
        Ok(())
    }
}

/// Keeps persisted submissions in memory, merged per uuid.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    jobs: Mutex<BTreeMap<JobUuid, ClientBundle>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored_uuids(&self) -> Vec<JobUuid> {
        self.jobs.lock().keys().cloned().collect()
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.jobs.lock().contains_key(uuid)
    }

    /// Every stored job, flagged as coming from persistence so that
    /// resubmitting it does not store it again.
    pub fn load_all(&self) -> Vec<ClientBundle> {
        self.jobs
            .lock()
            .values()
            .cloned()
            .map(|mut bundle| {
                bundle.from_persistence = true;
                bundle
            })
            .collect()
    }
}

impl JobPersistence for InMemoryPersistence {
    fn store_job(&self, bundle: &ClientBundle) -> Result<()> {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(&bundle.uuid) {
            Some(stored) => stored.tasks.extend(bundle.tasks.iter().cloned()),
            None => {
                jobs.insert(bundle.uuid.clone(), bundle.clone());
            }
        }
        debug!(job = %bundle.uuid, tasks = bundle.tasks.len(), "job persisted");
        Ok(())
    }

    fn delete_job(&self, uuid: &str) -> Result<()> {
        if self.jobs.lock().remove(uuid).is_some() {
            debug!(job = %uuid, "persisted job deleted");
        }
        Ok(())
    }
}

/// A schedule that fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleEvent {
    /// The job's start delay elapsed; it should be resumed.
    Start { uuid: JobUuid },
    /// The job expired; it should be cancelled.
    Expire { uuid: JobUuid },
}

impl ScheduleEvent {
    pub fn uuid(&self) -> &str {
        match self {
            ScheduleEvent::Start { uuid } | ScheduleEvent::Expire { uuid } => uuid,
        }
    }
}

/// Registers per-job start and expiration timers.
pub trait ScheduleService: Send + Sync {
    fn schedule_start(&self, uuid: &str, delay: Duration) -> Result<()>;

    fn schedule_expiration(&self, uuid: &str, after: Duration) -> Result<()>;

    /// Disarm every timer of the job. Unknown uuids are ignored.
    fn clear_schedules(&self, uuid: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScheduleService;

impl ScheduleService for NoopScheduleService {
    fn schedule_start(&self, _uuid: &str, _delay: Duration) -> Result<()> {
        Ok(())
    }

    fn schedule_expiration(&self, _uuid: &str, _after: Duration) -> Result<()> {
        Ok(())
    }

    fn clear_schedules(&self, _uuid: &str) {}
}

/// Schedules backed by tokio timers. A fired timer is delivered as a
/// [`RuntimeEvent::Schedule`] on the dispatch loop channel.
#[derive(Debug)]
pub struct TimerScheduleService {
    handle: Handle,
    tx: mpsc::Sender<RuntimeEvent>,
    timers: Mutex<HashMap<JobUuid, Vec<JoinHandle<()>>>>,
}

impl TimerScheduleService {
    /// Must be called from within a tokio runtime.
    pub fn new(tx: mpsc::Sender<RuntimeEvent>) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            JobGridError::IllegalState(format!("timer schedules need a tokio runtime: {e}"))
        })?;
        Ok(Self {
            handle,
            tx,
            timers: Mutex::new(HashMap::new()),
        })
    }

    /// Number of jobs with at least one armed (possibly already fired) timer.
    pub fn scheduled_jobs(&self) -> usize {
        self.timers.lock().len()
    }

    fn arm(&self, uuid: &str, delay: Duration, event: ScheduleEvent) {
        let tx = self.tx.clone();
        let handle = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            trace!(?event, "schedule fired");
            if tx.send(RuntimeEvent::Schedule(event)).await.is_err() {
                debug!("dispatch loop gone; dropping schedule event");
            }
        });
        self.timers
            .lock()
            .entry(uuid.to_string())
            .or_default()
            .push(handle);
    }
}

impl ScheduleService for TimerScheduleService {
    fn schedule_start(&self, uuid: &str, delay: Duration) -> Result<()> {
        debug!(job = %uuid, ?delay, "start schedule armed");
        self.arm(
            uuid,
            delay,
            ScheduleEvent::Start {
                uuid: uuid.to_string(),
            },
        );
        Ok(())
    }

    fn schedule_expiration(&self, uuid: &str, after: Duration) -> Result<()> {
        debug!(job = %uuid, ?after, "expiration schedule armed");
        self.arm(
            uuid,
            after,
            ScheduleEvent::Expire {
                uuid: uuid.to_string(),
            },
        );
        Ok(())
    }

    fn clear_schedules(&self, uuid: &str) {
        if let Some(handles) = self.timers.lock().remove(uuid) {
            for handle in handles {
                handle.abort();
            }
            debug!(job = %uuid, "schedules cleared");
        }
    }
}
