// src/exec/task_runner.rs

//! Runs the tasks of one dispatch on a simulated worker.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::dag::DependentTask;
use crate::engine::job::NodeDispatch;
use crate::engine::RuntimeEvent;

/// Run every task of `dispatch` in order, reporting each completion, then
/// report the worker idle.
///
/// Returns false if the dispatch loop is gone.
pub async fn run_dispatch(
    worker: &str,
    dispatch: NodeDispatch,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    task_duration: Duration,
) -> bool {
    for task in &dispatch.tasks {
        if !task_duration.is_zero() {
            tokio::time::sleep(task_duration).await;
        }
        trace!(worker, job = %dispatch.job_uuid, position = task.position(), "task finished");

        let event = RuntimeEvent::TaskCompleted {
            worker: worker.to_string(),
            job: dispatch.job_uuid.clone(),
            position: task.position(),
        };
        if runtime_tx.send(event).await.is_err() {
            debug!(worker, "dispatch loop gone; abandoning dispatch");
            return false;
        }
    }

    runtime_tx
        .send(RuntimeEvent::WorkerIdle {
            worker: worker.to_string(),
        })
        .await
        .is_ok()
}
