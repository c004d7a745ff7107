// src/engine/queue.rs

//! The priority job queue: the single store of every job awaiting dispatch.
//!
//! One lock guards the job map, the priority index and the size index.
//! Side effects that may re-enter the queue (listener notifications,
//! resubmission of buffered bundles) and statistics updates are collected
//! while the lock is held and applied after it is released.
//!
//! Lock order: queue state, then dependency graph.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::dag::{DependentTask, JobDependencyGraph};
use crate::engine::broadcast::BroadcastRegistry;
use crate::engine::dependencies::{JobDependenciesHandler, QueuedDecision};
use crate::engine::events::{QueueEvent, QueueListener};
use crate::engine::job::{ClientBundle, JobProgress, JobSnapshot, NodeDispatch, ServerJob};
use crate::engine::services::{JobPersistence, NoopPersistence, NoopScheduleService, ScheduleService};
use crate::engine::stats::QueueStats;
use crate::errors::{JobGridError, Result};
use crate::types::{JobState, JobUuid, Position};

/// Tuning of the queue's blocking behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Upper bound on how long `add_bundle` waits for an ended job with the
    /// same uuid to be removed.
    pub removal_wait_timeout: Duration,
    /// Length of each condition-variable wait while doing so.
    pub removal_poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            removal_wait_timeout: Duration::from_secs(5),
            removal_poll_interval: Duration::from_millis(50),
        }
    }
}

/// Where a job currently sits in the priority and size indices.
#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    priority: i32,
    size: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    job_map: HashMap<JobUuid, ServerJob>,
    /// priority -> uuids, FIFO per bucket. Iterated highest first.
    priority_map: BTreeMap<i32, VecDeque<JobUuid>>,
    /// pending task count -> uuids.
    size_map: BTreeMap<usize, BTreeSet<JobUuid>>,
    indexed: HashMap<JobUuid, IndexEntry>,
    /// Woken when the job with that uuid leaves the job map.
    removal_signals: HashMap<JobUuid, Arc<Condvar>>,
    broadcast: BroadcastRegistry,
    closed: bool,
}

impl QueueState {
    fn is_indexed(&self, uuid: &str) -> bool {
        self.indexed.contains_key(uuid)
    }

    /// Put the job at the tail of its priority bucket, if it has pending
    /// tasks and is not indexed yet.
    fn index_tail(&mut self, uuid: &str) {
        let Some(job) = self.job_map.get(uuid) else {
            return;
        };
        if job.cancelled || job.pending_count() == 0 || self.indexed.contains_key(uuid) {
            return;
        }

        let entry = IndexEntry {
            priority: job.priority(),
            size: job.pending_count(),
        };
        self.priority_map
            .entry(entry.priority)
            .or_default()
            .push_back(uuid.to_string());
        self.size_map
            .entry(entry.size)
            .or_default()
            .insert(uuid.to_string());
        self.indexed.insert(uuid.to_string(), entry);
    }

    /// Drop the job from the priority and size indices. Returns whether it
    /// was indexed.
    fn unindex(&mut self, uuid: &str) -> bool {
        let Some(entry) = self.indexed.remove(uuid) else {
            return false;
        };

        if let Some(bucket) = self.priority_map.get_mut(&entry.priority) {
            bucket.retain(|u| u != uuid);
            if bucket.is_empty() {
                self.priority_map.remove(&entry.priority);
            }
        }
        if let Some(jobs) = self.size_map.get_mut(&entry.size) {
            jobs.remove(uuid);
            if jobs.is_empty() {
                self.size_map.remove(&entry.size);
            }
        }
        true
    }

    fn removal_signal(&mut self, uuid: &str) -> Arc<Condvar> {
        Arc::clone(self.removal_signals.entry(uuid.to_string()).or_default())
    }
}

fn is_ended(state: &QueueState, uuid: &str) -> bool {
    state
        .job_map
        .get(uuid)
        .is_some_and(|j| j.state == JobState::Ended)
}

fn not_tracked(uuid: &str) -> JobGridError {
    JobGridError::IllegalState(format!("job {uuid} is not in the queue"))
}

/// Work deferred until the queue lock is released.
#[derive(Debug, Default)]
struct Effects {
    events: Vec<QueueEvent>,
    resubmit: Vec<ClientBundle>,
    jobs_queued: usize,
    tasks_added: usize,
    tasks_requeued: usize,
    tasks_dropped: usize,
    dispatched: Vec<(usize, Duration)>,
}

pub struct PriorityJobQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    dependencies: JobDependenciesHandler,
    persistence: Arc<dyn JobPersistence>,
    schedules: Arc<dyn ScheduleService>,
    listeners: RwLock<Vec<Arc<dyn QueueListener>>>,
    stats: QueueStats,
}

impl fmt::Debug for PriorityJobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityJobQueue")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Default for PriorityJobQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl PriorityJobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            dependencies: JobDependenciesHandler::default(),
            persistence: Arc::new(NoopPersistence),
            schedules: Arc::new(NoopScheduleService),
            listeners: RwLock::new(Vec::new()),
            stats: QueueStats::new(),
        }
    }

    /// Share an existing dependency graph instead of a private one.
    pub fn with_dependency_graph(mut self, graph: Arc<JobDependencyGraph>) -> Self {
        self.dependencies = JobDependenciesHandler::new(graph);
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn JobPersistence>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_schedule_service(mut self, schedules: Arc<dyn ScheduleService>) -> Self {
        self.schedules = schedules;
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn QueueListener>) {
        self.listeners.write().push(listener);
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    pub fn dependencies(&self) -> &JobDependenciesHandler {
        &self.dependencies
    }

    pub fn dependency_graph(&self) -> &Arc<JobDependencyGraph> {
        self.dependencies.graph()
    }

    /// Submit a client bundle.
    ///
    /// A bundle for a uuid that is already queued is merged into that job.
    /// If the job with that uuid has ended but is not removed yet, this
    /// blocks until it is, up to the configured timeout. Broadcast bundles
    /// are fanned out to one job per registered worker.
    pub fn add_bundle(&self, bundle: ClientBundle) -> Result<()> {
        if bundle.is_broadcast_root() {
            let derived = {
                let mut st = self.state.lock();
                if st.closed {
                    return Err(closed());
                }
                st.broadcast.fan_out_or_park(bundle)
            };
            for copy in derived {
                self.add_bundle(copy)?;
            }
            return Ok(());
        }

        let mut fx = Effects::default();
        let result = {
            let mut st = self.state.lock();
            self.add_locked(&mut st, bundle, &mut fx)
        };
        self.apply(fx);
        result
    }

    fn add_locked(
        &self,
        st: &mut MutexGuard<'_, QueueState>,
        bundle: ClientBundle,
        fx: &mut Effects,
    ) -> Result<()> {
        self.wait_for_removal(st, &bundle.uuid)?;
        if st.closed {
            return Err(closed());
        }

        let uuid = bundle.uuid.clone();
        let existing = st.job_map.get(&uuid).map(|j| (j.state, j.cancelled));
        match existing {
            Some((_, true)) => {
                warn!(job = %uuid, tasks = bundle.tasks.len(), "dropping submission for a cancelled job");
                Ok(())
            }
            Some((JobState::DispatchingLast, _)) => {
                debug!(job = %uuid, tasks = bundle.tasks.len(), "job dispatching its last tasks; buffering submission");
                if let Some(job) = st.job_map.get_mut(&uuid) {
                    job.completion_bundles.push(bundle);
                }
                Ok(())
            }
            Some(_) => {
                let count = bundle.tasks.len();
                if count == 0 {
                    return Ok(());
                }
                st.unindex(&uuid);
                let appended = match st.job_map.get_mut(&uuid) {
                    Some(job) => job.append(bundle.tasks),
                    None => Ok(()),
                };
                st.index_tail(&uuid);
                appended?;

                debug!(job = %uuid, tasks = count, "tasks appended to queued job");
                fx.tasks_added += count;
                fx.events.push(QueueEvent::BundleAdded {
                    uuid,
                    tasks: count,
                    requeued: false,
                });
                Ok(())
            }
            None => self.create_job(st, bundle, fx),
        }
    }

    fn create_job(&self, st: &mut QueueState, bundle: ClientBundle, fx: &mut Effects) -> Result<()> {
        if bundle.tasks.is_empty() {
            return Err(JobGridError::IllegalState(format!(
                "job {} submitted without tasks",
                bundle.uuid
            )));
        }

        let to_store = (bundle.sla.persistent && !bundle.from_persistence).then(|| bundle.clone());
        let job = ServerJob::new(bundle)?;
        let uuid = job.uuid().to_string();
        let sla = job.sla().clone();
        let count = job.pending_count();

        if let Some(stored) = to_store {
            if let Err(err) = self.persistence.store_job(&stored) {
                warn!(job = %uuid, error = %err, "failed to persist job");
            }
        }
        if let Some(delay) = sla.start_delay {
            if let Err(err) = self.schedules.schedule_start(&uuid, delay) {
                warn!(job = %uuid, error = %err, "failed to register start schedule");
            }
        }
        if let Some(after) = sla.expiration {
            if let Err(err) = self.schedules.schedule_expiration(&uuid, after) {
                warn!(job = %uuid, error = %err, "failed to register expiration schedule");
            }
        }

        info!(
            job = %uuid,
            name = %job.name(),
            priority = sla.priority,
            tasks = count,
            suspended = job.suspended,
            "job queued"
        );
        st.job_map.insert(uuid.clone(), job);
        st.index_tail(&uuid);

        fx.jobs_queued += 1;
        fx.tasks_added += count;
        fx.events.push(QueueEvent::JobQueued {
            uuid: uuid.clone(),
            priority: sla.priority,
        });

        match self.dependencies.job_queued(&uuid, &sla.dependency_spec) {
            QueuedDecision::Proceed => fx.events.push(QueueEvent::BundleAdded {
                uuid,
                tasks: count,
                requeued: false,
            }),
            QueuedDecision::Refuse => self.cancel_all(st, vec![uuid], fx),
            QueuedDecision::Cycle { cancel, .. } => {
                let mut work = cancel;
                work.push(uuid);
                self.cancel_all(st, work, fx);
            }
        }
        Ok(())
    }

    /// Block on the per-uuid signal while an ended job with this uuid is
    /// still in the job map. The queue lock is released while waiting.
    fn wait_for_removal(&self, st: &mut MutexGuard<'_, QueueState>, uuid: &str) -> Result<()> {
        if !is_ended(st, uuid) {
            return Ok(());
        }

        let started = Instant::now();
        let deadline = started + self.config.removal_wait_timeout;
        debug!(job = %uuid, "waiting for removal of the ended job with the same uuid");

        while is_ended(st, uuid) {
            let now = Instant::now();
            if now >= deadline {
                if st
                    .removal_signals
                    .get(uuid)
                    .is_some_and(|cv| Arc::strong_count(cv) == 1)
                {
                    st.removal_signals.remove(uuid);
                }
                warn!(job = %uuid, waited = ?(now - started), "ended job was not removed in time");
                return Err(JobGridError::RemovalTimeout {
                    uuid: uuid.to_string(),
                    waited: now - started,
                });
            }
            let signal = st.removal_signal(uuid);
            let slice = (deadline - now).min(self.config.removal_poll_interval);
            signal.wait_for(st, slice);
        }
        Ok(())
    }

    /// Hand out up to `nb_tasks` tasks of the job `uuid`.
    ///
    /// Only tasks whose intra-job dependencies are done are handed out. If
    /// this drains the job's pending tasks it leaves the priority index;
    /// otherwise it moves to the tail of its priority bucket.
    pub fn next_bundle(&self, uuid: &str, nb_tasks: usize) -> Result<NodeDispatch> {
        let mut fx = Effects::default();
        let dispatch = {
            let mut st = self.state.lock();
            let job = st.job_map.get(uuid).ok_or_else(|| not_tracked(uuid))?;
            if job.pending_count() == 0 {
                return Err(JobGridError::IllegalState(format!(
                    "job {uuid} has no pending tasks"
                )));
            }
            let effective = nb_tasks.min(job.available_pending_count());

            st.unindex(uuid);
            let job = st.job_map.get_mut(uuid).ok_or_else(|| not_tracked(uuid))?;
            let tasks = job.take_available(effective);
            let waited = job.queue_entry_time.elapsed();
            let remaining = job.pending_count();
            job.state = if remaining == 0 {
                JobState::DispatchingLast
            } else {
                JobState::PartiallyDispatched
            };
            let dispatch = NodeDispatch {
                job_uuid: uuid.to_string(),
                job_name: job.name().to_string(),
                tasks,
            };
            st.index_tail(uuid);

            debug!(
                job = %uuid,
                requested = nb_tasks,
                taken = dispatch.len(),
                remaining,
                "tasks taken from queue"
            );
            if !dispatch.is_empty() {
                fx.dispatched.push((dispatch.len(), waited));
                fx.events.push(QueueEvent::BundleRemoved {
                    uuid: uuid.to_string(),
                    tasks: dispatch.len(),
                });
            }
            dispatch
        };
        self.apply(fx);
        Ok(dispatch)
    }

    /// Record that the dispatched task at `position` finished (or was
    /// cancelled by the execution layer). `None` if the job is unknown.
    ///
    /// On [`JobProgress::Ended`] the caller removes the job with
    /// [`remove_bundle`](Self::remove_bundle).
    pub fn task_completed(&self, uuid: &str, position: Position) -> Option<JobProgress> {
        let mut st = self.state.lock();
        let job = st.job_map.get_mut(uuid)?;
        if !job.task_done(position) {
            debug!(job = %uuid, position, "completion for a task that is not outstanding");
        }

        let progress = job.progress();
        if progress == JobProgress::Ended && job.state != JobState::Ended {
            job.state = JobState::Ended;
            info!(job = %uuid, completed = job.completed_count(), "job ended");
        }
        Some(progress)
    }

    /// Drop the job from the priority index and, if `remove_from_job_map`,
    /// from the queue altogether. Returns whether anything was removed.
    ///
    /// Full removal clears the job's schedules and persisted state, releases
    /// its dependents, wakes submitters waiting on its uuid and resubmits
    /// the bundles buffered while it was finishing.
    pub fn remove_bundle(&self, uuid: &str, remove_from_job_map: bool) -> bool {
        let mut fx = Effects::default();
        let removed = {
            let mut st = self.state.lock();
            if remove_from_job_map {
                self.remove_locked(&mut st, uuid, &mut fx)
            } else {
                st.unindex(uuid)
            }
        };
        self.apply(fx);
        removed
    }

    fn remove_locked(&self, st: &mut QueueState, uuid: &str, fx: &mut Effects) -> bool {
        st.unindex(uuid);
        let Some(mut job) = st.job_map.remove(uuid) else {
            return false;
        };
        job.state = JobState::Ended;
        fx.tasks_dropped += job.pending_count();

        self.schedules.clear_schedules(uuid);
        if job.sla().persistent {
            if let Err(err) = self.persistence.delete_job(uuid) {
                warn!(job = %uuid, error = %err, "failed to delete persisted job");
            }
        }

        info!(
            job = %uuid,
            completed = job.completed_count(),
            cancelled = job.cancelled,
            "job removed from queue"
        );
        fx.events.push(QueueEvent::JobEnded {
            uuid: uuid.to_string(),
        });
        for released in self.dependencies.job_ended(uuid) {
            info!(job = %released, after = %uuid, "job released by completed dependency");
            fx.events.push(QueueEvent::JobReleased { uuid: released });
        }

        if let Some(signal) = st.removal_signals.remove(uuid) {
            signal.notify_all();
        }
        if !job.completion_bundles.is_empty() {
            debug!(job = %uuid, bundles = job.completion_bundles.len(), "resubmitting buffered bundles");
            fx.resubmit.append(&mut job.completion_bundles);
        }
        true
    }

    /// Put a tracked job back into the priority index.
    pub fn requeue(&self, uuid: &str) -> Result<()> {
        let mut fx = Effects::default();
        {
            let mut st = self.state.lock();
            let job = st.job_map.get_mut(uuid).ok_or_else(|| not_tracked(uuid))?;
            let pending = job.pending_count();
            if pending > 0 && !job.cancelled {
                job.state = JobState::Queued;
            }
            let was_indexed = st.is_indexed(uuid);
            st.index_tail(uuid);
            if !was_indexed && st.is_indexed(uuid) {
                debug!(job = %uuid, pending, "job requeued");
                fx.events.push(QueueEvent::BundleAdded {
                    uuid: uuid.to_string(),
                    tasks: pending,
                    requeued: true,
                });
            }
        }
        self.apply(fx);
        Ok(())
    }

    /// Return the tasks of a dispatch that could not be executed to the
    /// front of their job's pending list and requeue the job.
    ///
    /// Tasks returned for a cancelled job are dropped instead.
    pub fn requeue_dispatch(&self, dispatch: &NodeDispatch) -> Result<JobProgress> {
        let uuid = dispatch.job_uuid.as_str();
        let mut fx = Effects::default();
        let progress = {
            let mut st = self.state.lock();
            let cancelled = st
                .job_map
                .get(uuid)
                .map(|j| j.cancelled)
                .ok_or_else(|| not_tracked(uuid))?;

            if cancelled {
                let job = st.job_map.get_mut(uuid).ok_or_else(|| not_tracked(uuid))?;
                for task in &dispatch.tasks {
                    job.task_done(task.position());
                }
                let progress = job.progress();
                if progress == JobProgress::Ended {
                    job.state = JobState::Ended;
                }
                progress
            } else {
                st.unindex(uuid);
                let job = st.job_map.get_mut(uuid).ok_or_else(|| not_tracked(uuid))?;
                let returned = job.return_tasks(&dispatch.tasks);
                if job.pending_count() > 0 {
                    job.state = JobState::Queued;
                }
                let progress = job.progress();
                st.index_tail(uuid);

                warn!(job = %uuid, returned, "dispatched tasks returned to the queue");
                if returned > 0 {
                    fx.tasks_requeued += returned;
                    fx.events.push(QueueEvent::BundleAdded {
                        uuid: uuid.to_string(),
                        tasks: returned,
                        requeued: true,
                    });
                }
                progress
            }
        };
        self.apply(fx);
        Ok(progress)
    }

    /// Request cancellation of the job `uuid`. Returns whether it was
    /// tracked.
    ///
    /// Pending tasks are dropped and the job leaves the dispatch pool. If
    /// nothing is in flight it is removed at once; otherwise it ends when its
    /// outstanding tasks report back. Cascades to dependents if its SLA asks
    /// for it.
    pub fn cancel_job(&self, uuid: &str) -> bool {
        let mut fx = Effects::default();
        let found = {
            let mut st = self.state.lock();
            let found = st.job_map.contains_key(uuid);
            self.cancel_all(&mut st, vec![uuid.to_string()], &mut fx);
            found
        };
        self.apply(fx);
        found
    }

    fn cancel_all(&self, st: &mut QueueState, mut work: Vec<JobUuid>, fx: &mut Effects) {
        while let Some(uuid) = work.pop() {
            let cascade = self.cancel_locked(st, &uuid, fx);
            work.extend(cascade);
        }
    }

    fn cancel_locked(&self, st: &mut QueueState, uuid: &str, fx: &mut Effects) -> Vec<JobUuid> {
        let spec = match st.job_map.get(uuid) {
            Some(job) if !job.cancelled => job.sla().dependency_spec.clone(),
            _ => return Vec::new(),
        };

        st.unindex(uuid);
        let Some(job) = st.job_map.get_mut(uuid) else {
            return Vec::new();
        };
        job.cancelled = true;
        let dropped = job.drop_pending();
        let finished = job.is_finished();
        job.state = if finished {
            JobState::Ended
        } else {
            JobState::DispatchingLast
        };
        info!(job = %uuid, dropped, outstanding = job.outstanding_count(), "job cancelled");

        fx.tasks_dropped += dropped;
        fx.events.push(QueueEvent::JobCancelled {
            uuid: uuid.to_string(),
        });

        let cascade = self.dependencies.job_cancelled(uuid, &spec);
        if finished {
            self.remove_locked(st, uuid, fx);
        }
        cascade
    }

    /// Move a job to another priority bucket, at its tail.
    pub fn update_priority(&self, uuid: &str, priority: i32) -> bool {
        let mut fx = Effects::default();
        let updated = {
            let mut st = self.state.lock();
            let current = st.job_map.get(uuid).map(|j| j.priority());
            match current {
                Some(old) if old != priority => {
                    let was_indexed = st.unindex(uuid);
                    let suspended = match st.job_map.get_mut(uuid) {
                        Some(job) => {
                            job.sla.priority = priority;
                            job.suspended
                        }
                        None => false,
                    };
                    if was_indexed {
                        st.index_tail(uuid);
                    }
                    info!(job = %uuid, from = old, to = priority, "job priority updated");
                    fx.events.push(QueueEvent::JobUpdated {
                        uuid: uuid.to_string(),
                        priority,
                        suspended,
                    });
                    true
                }
                _ => false,
            }
        };
        self.apply(fx);
        updated
    }

    /// Keep the job out of dispatch until it is resumed.
    pub fn suspend_job(&self, uuid: &str) -> bool {
        self.set_suspended(uuid, true)
    }

    pub fn resume_job(&self, uuid: &str) -> bool {
        self.set_suspended(uuid, false)
    }

    fn set_suspended(&self, uuid: &str, suspended: bool) -> bool {
        let mut fx = Effects::default();
        let changed = {
            let mut st = self.state.lock();
            match st.job_map.get_mut(uuid) {
                Some(job) => {
                    if !suspended {
                        job.awaiting_start = false;
                    }
                    if job.suspended == suspended {
                        false
                    } else {
                        job.suspended = suspended;
                        info!(job = %uuid, suspended, "job suspension changed");
                        fx.events.push(QueueEvent::JobUpdated {
                            uuid: uuid.to_string(),
                            priority: job.priority(),
                            suspended,
                        });
                        true
                    }
                }
                None => false,
            }
        };
        self.apply(fx);
        changed
    }

    /// Make `worker` known to the queue. Broadcasts parked until a worker
    /// exists are fanned out to it.
    pub fn register_worker(&self, worker: &str) {
        let derived = self.state.lock().broadcast.register_worker(worker);
        for bundle in derived {
            let uuid = bundle.uuid.clone();
            if let Err(err) = self.add_bundle(bundle) {
                warn!(job = %uuid, worker, error = %err, "failed to queue broadcast copy");
            }
        }
    }

    pub fn unregister_worker(&self, worker: &str) -> bool {
        self.state.lock().broadcast.unregister_worker(worker)
    }

    pub fn workers(&self) -> Vec<String> {
        self.state
            .lock()
            .broadcast
            .workers()
            .map(str::to_string)
            .collect()
    }

    /// The first job that can be dispatched right now: highest priority
    /// first, FIFO within a bucket.
    pub fn next_dispatchable(&self) -> Option<JobUuid> {
        self.select_dispatchable(None)
    }

    /// Like [`next_dispatchable`](Self::next_dispatchable), skipping
    /// broadcast copies aimed at other workers.
    pub fn next_dispatchable_for(&self, worker: &str) -> Option<JobUuid> {
        self.select_dispatchable(Some(worker))
    }

    fn select_dispatchable(&self, worker: Option<&str>) -> Option<JobUuid> {
        let st = self.state.lock();
        for bucket in st.priority_map.values().rev() {
            for uuid in bucket {
                let Some(job) = st.job_map.get(uuid) else {
                    continue;
                };
                if job.suspended || job.cancelled {
                    continue;
                }
                if let (Some(worker), Some(target)) = (worker, job.sla().broadcast_target.as_deref()) {
                    if worker != target {
                        continue;
                    }
                }
                if job.available_pending_count() == 0 {
                    continue;
                }
                if let Some(id) = job.sla().dependency_spec.id.as_deref() {
                    if self.dependencies.has_pending_dependency_or_cancelled(id) {
                        continue;
                    }
                }
                return Some(uuid.clone());
            }
        }
        None
    }

    /// Whether some job is still waiting for its start schedule.
    pub fn has_pending_start(&self) -> bool {
        self.state.lock().job_map.values().any(|j| j.awaiting_start)
    }

    /// Number of tasks of the job still waiting to be dispatched.
    pub fn pending_task_count(&self, uuid: &str) -> Result<usize> {
        self.state
            .lock()
            .job_map
            .get(uuid)
            .map(|j| j.pending_count())
            .ok_or_else(|| not_tracked(uuid))
    }

    pub fn job(&self, uuid: &str) -> Option<JobSnapshot> {
        self.state.lock().job_map.get(uuid).map(|j| j.snapshot())
    }

    pub fn all_job_uuids(&self) -> Vec<JobUuid> {
        let mut uuids: Vec<JobUuid> = self.state.lock().job_map.keys().cloned().collect();
        uuids.sort();
        uuids
    }

    /// Uuids in the priority index, in dispatch order.
    pub fn jobs_in_priority_order(&self) -> Vec<JobUuid> {
        self.state
            .lock()
            .priority_map
            .values()
            .rev()
            .flat_map(|bucket| bucket.iter().cloned())
            .collect()
    }

    /// Largest pending task count among indexed jobs.
    pub fn max_bundle_size(&self) -> Option<usize> {
        self.state.lock().size_map.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.state.lock().job_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().job_map.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Drop every job and refuse further submissions. Waiting submitters
    /// are woken.
    pub fn close(&self) {
        let mut st = self.state.lock();
        st.closed = true;

        let dropped: usize = st.job_map.values().map(|j| j.pending_count()).sum();
        for uuid in st.job_map.keys() {
            self.schedules.clear_schedules(uuid);
        }
        let jobs = st.job_map.len();
        st.job_map.clear();
        st.priority_map.clear();
        st.size_map.clear();
        st.indexed.clear();
        for (_, signal) in st.removal_signals.drain() {
            signal.notify_all();
        }
        drop(st);

        self.stats.record_tasks_dropped(dropped);
        info!(jobs, dropped, "queue closed");
    }

    fn apply(&self, fx: Effects) {
        for _ in 0..fx.jobs_queued {
            self.stats.record_job_queued();
        }
        if fx.tasks_added > 0 {
            self.stats.record_tasks_added(fx.tasks_added);
        }
        if fx.tasks_requeued > 0 {
            self.stats.record_tasks_requeued(fx.tasks_requeued);
        }
        if fx.tasks_dropped > 0 {
            self.stats.record_tasks_dropped(fx.tasks_dropped);
        }
        for (count, waited) in fx.dispatched {
            self.stats.record_tasks_dispatched(count, waited);
        }

        if !fx.events.is_empty() {
            let listeners: Vec<Arc<dyn QueueListener>> = self.listeners.read().clone();
            for event in &fx.events {
                for listener in &listeners {
                    listener.on_event(event);
                }
            }
        }

        for bundle in fx.resubmit {
            let uuid = bundle.uuid.clone();
            if let Err(err) = self.add_bundle(bundle) {
                warn!(job = %uuid, error = %err, "failed to resubmit buffered bundle");
            }
        }
    }
}

fn closed() -> JobGridError {
    JobGridError::IllegalState("queue is closed".to_string())
}
