// src/engine/dependencies.rs

//! Mediates between the priority queue and the job dependency graph.
//!
//! The handler never calls back into the queue. It returns decisions (which
//! jobs to cancel, which were released) and the queue acts on them while it
//! still holds its own lock. Lock order is always queue, then graph.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::dag::JobDependencyGraph;
use crate::engine::job::DependencySpec;
use crate::errors::CycleError;
use crate::types::JobUuid;

/// Outcome of registering a newly queued job with the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuedDecision {
    /// The job may run once its dependencies complete.
    Proceed,
    /// The job's logical id was already cancelled; the job must not run.
    Refuse,
    /// The job closes a dependency cycle. It must be cancelled, along with
    /// the already queued jobs in `cancel`.
    Cycle {
        error: CycleError,
        cancel: Vec<JobUuid>,
    },
}

#[derive(Debug, Clone)]
pub struct JobDependenciesHandler {
    graph: Arc<JobDependencyGraph>,
}

impl Default for JobDependenciesHandler {
    fn default() -> Self {
        Self::new(Arc::new(JobDependencyGraph::new()))
    }
}

impl JobDependenciesHandler {
    pub fn new(graph: Arc<JobDependencyGraph>) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &Arc<JobDependencyGraph> {
        &self.graph
    }

    /// Register the job `uuid` under its dependency id, if it declares one.
    pub fn job_queued(&self, uuid: &str, spec: &DependencySpec) -> QueuedDecision {
        let Some(id) = spec.id.as_deref() else {
            return QueuedDecision::Proceed;
        };

        self.graph.execute_synchronized(|g| {
            match g.add_node(id, Some(uuid), &spec.depends_on) {
                Ok(()) => {
                    let Some(node) = g.node_mut(id) else {
                        return QueuedDecision::Proceed;
                    };
                    if spec.remove_upon_completion {
                        node.set_remove_upon_completion(true);
                    }
                    if node.is_cancelled() {
                        info!(job = %uuid, id, "dependency id already cancelled; refusing job");
                        QueuedDecision::Refuse
                    } else {
                        QueuedDecision::Proceed
                    }
                }
                Err(error) => {
                    let mut cancel = Vec::new();
                    for cycle_id in error.ids() {
                        let Some(node) = g.node_mut(cycle_id) else {
                            continue;
                        };
                        node.set_cancelled(true);
                        node.set_remove_upon_completion(true);
                        if let Some(bound) = node.job_uuid() {
                            if bound != uuid && !cancel.iter().any(|c| c == bound) {
                                cancel.push(bound.to_string());
                            }
                        }
                    }
                    error!(job = %uuid, id, cycle = %error, ?cancel, "job closes a dependency cycle; cancelling every job on it");
                    QueuedDecision::Cycle { error, cancel }
                }
            }
        })
    }

    /// Mark the job's node completed. Returns the uuids of the jobs for
    /// which it was the last pending dependency.
    pub fn job_ended(&self, uuid: &str) -> Vec<JobUuid> {
        self.graph.execute_synchronized(|g| {
            let released = g.job_ended(uuid);

            let removable = g
                .node_by_uuid(uuid)
                .filter(|n| n.remove_upon_completion())
                .map(|n| n.id().to_string());
            if let Some(id) = removable {
                g.remove_node(&id);
            }

            let released: Vec<JobUuid> = released
                .iter()
                .filter(|n| !n.is_cancelled())
                .filter_map(|n| n.job_uuid().map(str::to_string))
                .collect();
            if !released.is_empty() {
                debug!(job = %uuid, ?released, "dependents released");
            }
            released
        })
    }

    /// Mark the job's node cancelled. If the SLA asks for it, returns the
    /// uuids of the queued jobs directly depending on it that are neither
    /// completed nor already cancelled. Each of them is cancelled under its
    /// own SLA, which decides whether the cascade goes further.
    pub fn job_cancelled(&self, uuid: &str, spec: &DependencySpec) -> Vec<JobUuid> {
        self.graph.execute_synchronized(|g| {
            let Some(id) = g.node_by_uuid(uuid).map(|n| n.id().to_string()) else {
                return Vec::new();
            };
            let Some(node) = g.node_mut(&id) else {
                return Vec::new();
            };
            if !node.is_completed() {
                node.set_cancelled(true);
            }
            if !spec.cascade_cancellation {
                return Vec::new();
            }

            let dependents: Vec<String> = node.depended_on().iter().cloned().collect();
            let cancel: Vec<JobUuid> = dependents
                .iter()
                .filter_map(|dependent| g.node(dependent))
                .filter(|n| !n.is_completed() && !n.is_cancelled())
                .filter_map(|n| n.job_uuid().map(str::to_string))
                .collect();

            if !cancel.is_empty() {
                info!(job = %uuid, id = %id, ?cancel, "cascading cancellation to dependents");
            }
            cancel
        })
    }

    /// Dispatch gate: whether the node for `id` waits on an unfinished job
    /// or is itself cancelled. Unknown ids pass.
    pub fn has_pending_dependency_or_cancelled(&self, id: &str) -> bool {
        self.graph.execute_synchronized(|g| {
            g.node(id)
                .is_some_and(|n| n.is_cancelled() || g.has_pending_dependency(id))
        })
    }
}
