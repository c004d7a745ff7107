// src/exec/executor_loop.rs

//! Per-worker executor loop.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::engine::job::NodeDispatch;
use crate::engine::{RuntimeEvent, WorkerId};
use crate::exec::task_runner::run_dispatch;

/// Spawn the loop of a simulated worker.
///
/// The returned sender accepts dispatches; they are run one after the
/// other, so a worker never holds more than one dispatch at a time.
pub fn spawn_worker(
    worker: WorkerId,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    task_duration: Duration,
) -> mpsc::Sender<NodeDispatch> {
    let (tx, mut rx) = mpsc::channel::<NodeDispatch>(8);

    tokio::spawn(async move {
        info!(worker = %worker, "worker loop started");

        while let Some(dispatch) = rx.recv().await {
            debug!(worker = %worker, job = %dispatch.job_uuid, tasks = dispatch.len(), "worker received dispatch");
            if !run_dispatch(&worker, dispatch, &runtime_tx, task_duration).await {
                break;
            }
        }

        info!(worker = %worker, "worker loop finished");
    });

    tx
}
