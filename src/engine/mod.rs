// src/engine/mod.rs

//! Scheduling engine.
//!
//! - [`queue`] is the priority job queue, the single store of jobs awaiting
//!   dispatch.
//! - [`dependencies`] gates jobs on the cross-job dependency graph.
//! - [`job`] holds the job-side data model.
//! - [`events`], [`stats`], [`services`] and [`broadcast`] are the queue's
//!   notifications, counters, collaborators and broadcast fan-out.
//! - [`runtime`] is the async dispatch loop feeding an executor backend.

use crate::types::{JobUuid, Position};

/// Identifier of a worker node.
pub type WorkerId = String;

/// Events flowing into the dispatch loop from executors and timers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A dispatched task finished on `worker`.
    TaskCompleted {
        worker: WorkerId,
        job: JobUuid,
        position: Position,
    },
    /// `worker` is done with its current dispatch.
    WorkerIdle { worker: WorkerId },
    /// `worker` could not run `dispatch`; its tasks go back to the queue.
    DispatchFailed {
        worker: WorkerId,
        dispatch: NodeDispatch,
    },
    /// A start or expiration schedule fired.
    Schedule(ScheduleEvent),
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

/// Knobs of the dispatch loop.
#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    /// Upper bound passed to `next_bundle` for each dispatch.
    pub tasks_per_bundle: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            tasks_per_bundle: 1,
        }
    }
}

pub mod broadcast;
pub mod dependencies;
pub mod events;
pub mod job;
pub mod queue;
pub mod runtime;
pub mod services;
pub mod stats;

pub use dependencies::{JobDependenciesHandler, QueuedDecision};
pub use events::{QueueEvent, QueueListener};
pub use job::{
    ClientBundle, DependencySpec, JobProgress, JobSla, JobSnapshot, NodeDispatch, ServerJob, Task,
};
pub use queue::{PriorityJobQueue, QueueConfig};
pub use runtime::{DispatchReport, Dispatcher};
pub use services::{
    InMemoryPersistence, JobPersistence, NoopPersistence, NoopScheduleService, ScheduleEvent,
    ScheduleService, TimerScheduleService,
};
pub use stats::{QueueStats, QueueStatsSnapshot};
