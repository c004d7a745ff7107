use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use jobgrid::engine::{NodeDispatch, RuntimeEvent, WorkerId};
use jobgrid::errors::Result;
use jobgrid::exec::ExecutorBackend;
use jobgrid::types::{JobUuid, Position};
use tokio::sync::mpsc;

/// One dispatch as seen by the fake executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDispatch {
    pub worker: WorkerId,
    pub job: JobUuid,
    pub positions: Vec<Position>,
    /// Whether the executor reported this dispatch as failed.
    pub failed: bool,
}

/// A fake executor that:
/// - records every dispatch it receives
/// - immediately reports `TaskCompleted` for each task, then `WorkerIdle`
/// - optionally fails the first `fail_first` dispatches with
///   `DispatchFailed`.
///
/// Events are sent from inside `dispatch`, so give the runtime channel
/// enough capacity for a whole round of dispatches.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    recorded: Arc<Mutex<Vec<RecordedDispatch>>>,
    fail_first: usize,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        recorded: Arc<Mutex<Vec<RecordedDispatch>>>,
    ) -> Self {
        Self {
            runtime_tx,
            recorded,
            fail_first: 0,
        }
    }

    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }
}

impl ExecutorBackend for FakeExecutor {
    fn dispatch(
        &mut self,
        worker: WorkerId,
        dispatch: NodeDispatch,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let recorded = Arc::clone(&self.recorded);
        let fail = self.fail_first > 0;
        if fail {
            self.fail_first -= 1;
        }

        Box::pin(async move {
            {
                let mut guard = recorded.lock().unwrap();
                guard.push(RecordedDispatch {
                    worker: worker.clone(),
                    job: dispatch.job_uuid.clone(),
                    positions: dispatch.positions(),
                    failed: fail,
                });
            }

            if fail {
                tx.send(RuntimeEvent::DispatchFailed { worker, dispatch })
                    .await
                    .map_err(anyhow::Error::from)?;
                return Ok(());
            }

            for position in dispatch.positions() {
                tx.send(RuntimeEvent::TaskCompleted {
                    worker: worker.clone(),
                    job: dispatch.job_uuid.clone(),
                    position,
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            tx.send(RuntimeEvent::WorkerIdle { worker })
                .await
                .map_err(anyhow::Error::from)?;
            Ok(())
        })
    }
}
