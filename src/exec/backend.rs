// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The dispatcher talks to an `ExecutorBackend` instead of to workers
//! directly, so tests can swap in a fake executor.
//!
//! - `SimulatedExecutor` is the backend used by the `jobgrid` simulator. It
//!   keeps one executor loop per worker and runs each task for a fixed
//!   duration.
//! - Tests can provide their own `ExecutorBackend` that, for example,
//!   records dispatches and directly emits `TaskCompleted` events.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::engine::job::NodeDispatch;
use crate::engine::{RuntimeEvent, WorkerId};
use crate::errors::{Error, Result};

use super::executor_loop::spawn_worker;

/// Trait abstracting how dispatched tasks are executed.
pub trait ExecutorBackend: Send {
    /// Hand `dispatch` to `worker`.
    ///
    /// Completion is reported asynchronously through `RuntimeEvent`s: one
    /// `TaskCompleted` per task, then `WorkerIdle` (or `DispatchFailed`).
    fn dispatch(
        &mut self,
        worker: WorkerId,
        dispatch: NodeDispatch,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Simulated workers: every task takes `task_duration`.
pub struct SimulatedExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    task_duration: Duration,
    workers: HashMap<WorkerId, mpsc::Sender<NodeDispatch>>,
}

impl SimulatedExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, task_duration: Duration) -> Self {
        Self {
            runtime_tx,
            task_duration,
            workers: HashMap::new(),
        }
    }
}

impl ExecutorBackend for SimulatedExecutor {
    fn dispatch(
        &mut self,
        worker: WorkerId,
        dispatch: NodeDispatch,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let runtime_tx = self.runtime_tx.clone();
        let task_duration = self.task_duration;
        let tx = self
            .workers
            .entry(worker.clone())
            .or_insert_with(|| spawn_worker(worker, runtime_tx, task_duration))
            .clone();

        Box::pin(async move {
            tx.send(dispatch).await.map_err(Error::from)?;
            Ok(())
        })
    }
}
