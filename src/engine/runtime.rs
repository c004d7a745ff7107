// src/engine/runtime.rs

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::types::JobUuid;

use super::events::QueueEvent;
use super::job::{JobProgress, NodeDispatch};
use super::queue::PriorityJobQueue;
use super::services::ScheduleEvent;
use super::{DispatchOptions, RuntimeEvent, WorkerId};

/// Outcome of a dispatch loop run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Jobs that ended normally, in the order they left the queue.
    pub completed: Vec<JobUuid>,
    /// Jobs cancelled (explicitly, by cascade, by a cycle or by expiry).
    pub cancelled: Vec<JobUuid>,
    /// Jobs still queued when the loop stopped.
    pub stuck: Vec<JobUuid>,
    pub tasks_executed: usize,
}

/// Pulls work from a [`PriorityJobQueue`] for a fixed set of workers and
/// hands it to an [`ExecutorBackend`].
///
/// The queue is only ever touched from this loop and from the caller that
/// submits jobs; executors and timers talk back through `RuntimeEvent`s.
pub struct Dispatcher<E: ExecutorBackend> {
    queue: Arc<PriorityJobQueue>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    queue_events: mpsc::UnboundedReceiver<QueueEvent>,
    executor: E,
    options: DispatchOptions,
    idle: BTreeSet<WorkerId>,
    busy: HashMap<WorkerId, NodeDispatch>,
    report: DispatchReport,
}

impl<E: ExecutorBackend> fmt::Debug for Dispatcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("options", &self.options)
            .field("idle", &self.idle)
            .field("busy", &self.busy.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Dispatcher<E> {
    /// Create the loop and register `workers` with the queue.
    ///
    /// Build the dispatcher before submitting jobs so that cancellations
    /// decided at submission time show up in the report.
    pub fn new(
        queue: Arc<PriorityJobQueue>,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
        workers: impl IntoIterator<Item = WorkerId>,
        options: DispatchOptions,
    ) -> Self {
        let (tx, queue_events) = mpsc::unbounded_channel();
        queue.add_listener(Arc::new(tx));

        let idle: BTreeSet<WorkerId> = workers.into_iter().collect();
        for worker in &idle {
            queue.register_worker(worker);
        }

        Self {
            queue,
            event_rx,
            queue_events,
            executor,
            options,
            idle,
            busy: HashMap::new(),
            report: DispatchReport::default(),
        }
    }

    /// Main event loop.
    ///
    /// Dispatches to idle workers, then waits for executor or schedule
    /// events. Stops when the queue is empty, when nothing can make progress
    /// anymore, or on shutdown.
    pub async fn run(mut self) -> Result<DispatchReport> {
        info!(workers = self.idle.len(), "dispatcher started");
        self.dispatch_idle().await?;

        loop {
            self.drain_queue_events();
            if self.is_finished() {
                break;
            }

            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("dispatch event channel closed; exiting");
                    break;
                }
            };
            debug!(?event, "dispatcher received event");

            if !self.handle_event(event)? {
                info!("shutdown requested; stopping dispatcher");
                break;
            }
            self.dispatch_idle().await?;
        }

        self.drain_queue_events();
        self.report.stuck = self.queue.all_job_uuids();
        for uuid in &self.report.stuck {
            warn!(job = %uuid, "job still queued when dispatch stopped (unresolved dependency?)");
        }
        info!(
            completed = self.report.completed.len(),
            cancelled = self.report.cancelled.len(),
            stuck = self.report.stuck.len(),
            "dispatcher exiting"
        );
        Ok(self.report)
    }

    fn is_finished(&self) -> bool {
        if !self.busy.is_empty() {
            return false;
        }
        if self.queue.is_empty() {
            debug!("queue drained");
            return true;
        }
        if self.queue.has_pending_start() {
            return false;
        }
        self.idle
            .iter()
            .all(|w| self.queue.next_dispatchable_for(w).is_none())
    }

    /// Returns false when the loop should stop.
    fn handle_event(&mut self, event: RuntimeEvent) -> Result<bool> {
        match event {
            RuntimeEvent::TaskCompleted {
                worker,
                job,
                position,
            } => {
                self.report.tasks_executed += 1;
                match self.queue.task_completed(&job, position) {
                    Some(JobProgress::Ended) => self.finish_job(&job),
                    Some(JobProgress::Running { .. }) => {}
                    None => debug!(job = %job, position, worker = %worker, "completion for unknown job"),
                }
            }
            RuntimeEvent::WorkerIdle { worker } => {
                self.busy.remove(&worker);
                self.idle.insert(worker);
            }
            RuntimeEvent::DispatchFailed { worker, dispatch } => {
                warn!(worker = %worker, job = %dispatch.job_uuid, tasks = dispatch.len(), "dispatch failed");
                self.busy.remove(&worker);
                self.idle.insert(worker);
                if self.queue.requeue_dispatch(&dispatch)? == JobProgress::Ended {
                    self.finish_job(&dispatch.job_uuid);
                }
            }
            RuntimeEvent::Schedule(ScheduleEvent::Start { uuid }) => {
                info!(job = %uuid, "start schedule fired");
                self.queue.resume_job(&uuid);
            }
            RuntimeEvent::Schedule(ScheduleEvent::Expire { uuid }) => {
                info!(job = %uuid, "job expired");
                self.queue.cancel_job(&uuid);
            }
            RuntimeEvent::ShutdownRequested => return Ok(false),
        }
        Ok(true)
    }

    fn finish_job(&mut self, uuid: &str) {
        if !self.queue.remove_bundle(uuid, true) {
            debug!(job = %uuid, "ended job already removed");
        }
    }

    fn drain_queue_events(&mut self) {
        while let Ok(event) = self.queue_events.try_recv() {
            match event {
                QueueEvent::JobCancelled { uuid } => self.report.cancelled.push(uuid),
                QueueEvent::JobEnded { uuid } => {
                    if !self.report.cancelled.contains(&uuid) {
                        info!(job = %uuid, "job completed");
                        self.report.completed.push(uuid);
                    }
                }
                QueueEvent::JobReleased { uuid } => debug!(job = %uuid, "job released"),
                _ => {}
            }
        }
    }

    async fn dispatch_idle(&mut self) -> Result<()> {
        let idle: Vec<WorkerId> = self.idle.iter().cloned().collect();
        for worker in idle {
            let Some(uuid) = self.queue.next_dispatchable_for(&worker) else {
                continue;
            };
            let dispatch = self.queue.next_bundle(&uuid, self.options.tasks_per_bundle)?;
            if dispatch.is_empty() {
                continue;
            }

            debug!(worker = %worker, job = %uuid, positions = ?dispatch.positions(), "dispatching tasks");
            self.idle.remove(&worker);
            self.busy.insert(worker.clone(), dispatch.clone());
            self.executor.dispatch(worker, dispatch).await?;
        }
        Ok(())
    }
}
