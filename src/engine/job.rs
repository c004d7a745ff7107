// src/engine/job.rs

//! Job-side data model: tasks, SLAs, client submissions and the queue's
//! per-job aggregate.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dag::{DependentTask, TaskGraph};
use crate::errors::{JobGridError, Result};
use crate::types::{JobState, JobUuid, Position};

/// A unit of work inside a job.
#[derive(Debug, Clone)]
pub struct Task {
    position: Position,
    dependencies: Vec<Arc<Task>>,
}

impl Task {
    pub fn new(position: Position) -> Self {
        Self {
            position,
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependencies(position: Position, dependencies: Vec<Arc<Task>>) -> Self {
        Self {
            position,
            dependencies,
        }
    }

    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }
}

impl DependentTask for Task {
    fn position(&self) -> Position {
        self.position
    }

    fn dependencies(&self) -> &[Arc<Self>] {
        &self.dependencies
    }
}

/// Cross-job dependency declaration carried by the SLA.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySpec {
    /// Logical id of this job in the dependency graph.
    pub id: Option<String>,
    /// Logical ids this job waits on.
    pub depends_on: Vec<String>,
    /// Cancel dependents when this job is cancelled.
    pub cascade_cancellation: bool,
    /// Drop this job's node (and its dependencies) from the graph once the
    /// job ends.
    pub remove_upon_completion: bool,
}

/// Service level agreement of a job.
#[derive(Debug, Clone, Default)]
pub struct JobSla {
    /// Higher runs first.
    pub priority: i32,
    pub dependency_spec: DependencySpec,
    pub broadcast: bool,
    pub persistent: bool,
    pub cancel_upon_client_disconnect: bool,
    /// Submitted suspended: never dispatched until resumed.
    pub suspended: bool,
    /// Keep the job suspended for this long after it is queued.
    pub start_delay: Option<Duration>,
    /// Cancel the job if it is still around this long after it is queued.
    pub expiration: Option<Duration>,
    /// Set on the per-worker copies of a broadcast job.
    pub broadcast_target: Option<String>,
}

/// A client submission: a batch of tasks for the job `uuid`.
#[derive(Debug, Clone)]
pub struct ClientBundle {
    pub uuid: JobUuid,
    pub name: String,
    pub sla: JobSla,
    pub tasks: Vec<Arc<Task>>,
    /// Reloaded from persistence, so it must not be stored again.
    pub from_persistence: bool,
}

impl ClientBundle {
    pub fn new(
        uuid: impl Into<JobUuid>,
        name: impl Into<String>,
        sla: JobSla,
        tasks: Vec<Arc<Task>>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            sla,
            tasks,
            from_persistence: false,
        }
    }

    /// Whether this is an original broadcast submission, not one of its
    /// per-worker copies.
    pub fn is_broadcast_root(&self) -> bool {
        self.sla.broadcast && self.sla.broadcast_target.is_none()
    }
}

/// Tasks handed to a worker by [`next_bundle`](super::PriorityJobQueue::next_bundle).
#[derive(Debug, Clone)]
pub struct NodeDispatch {
    pub job_uuid: JobUuid,
    pub job_name: String,
    pub tasks: Vec<Arc<Task>>,
}

impl NodeDispatch {
    pub fn positions(&self) -> Vec<Position> {
        self.tasks.iter().map(|t| t.position()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Where a job stands after one of its tasks completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobProgress {
    Running { pending: usize, outstanding: usize },
    /// Nothing pending nor outstanding: the job can be removed.
    Ended,
}

/// The queue's aggregate for one job uuid.
#[derive(Debug)]
pub struct ServerJob {
    pub(crate) uuid: JobUuid,
    pub(crate) name: String,
    pub(crate) sla: JobSla,
    /// Every task ever submitted under this uuid, in submission order.
    all_tasks: Vec<Arc<Task>>,
    pub(crate) pending: VecDeque<Arc<Task>>,
    /// Handed out, not completed yet.
    pub(crate) outstanding: BTreeSet<Position>,
    done: BTreeSet<Position>,
    /// Only present if at least one task declares dependencies.
    task_graph: Option<TaskGraph>,
    pub(crate) state: JobState,
    pub(crate) cancelled: bool,
    pub(crate) suspended: bool,
    /// Waiting for the start schedule to resume the job.
    pub(crate) awaiting_start: bool,
    /// Submissions that arrived while the job was dispatching its last tasks.
    pub(crate) completion_bundles: Vec<ClientBundle>,
    pub(crate) queue_entry_time: Instant,
}

impl ServerJob {
    pub fn new(bundle: ClientBundle) -> Result<Self> {
        let ClientBundle {
            uuid,
            name,
            sla,
            tasks,
            ..
        } = bundle;

        check_unique_positions(&uuid, &[], &tasks)?;
        let task_graph = build_graph(&tasks)?;
        let suspended = sla.suspended || sla.start_delay.is_some();
        let awaiting_start = sla.start_delay.is_some();

        Ok(Self {
            uuid,
            name,
            sla,
            pending: tasks.iter().cloned().collect(),
            all_tasks: tasks,
            outstanding: BTreeSet::new(),
            done: BTreeSet::new(),
            task_graph,
            state: JobState::Queued,
            cancelled: false,
            suspended,
            awaiting_start,
            completion_bundles: Vec::new(),
            queue_entry_time: Instant::now(),
        })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sla(&self) -> &JobSla {
        &self.sla
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn priority(&self) -> i32 {
        self.sla.priority
    }

    pub fn task_graph(&self) -> Option<&TaskGraph> {
        self.task_graph.as_ref()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    pub fn completed_count(&self) -> usize {
        self.done.len()
    }

    /// Append the tasks of another submission for the same uuid.
    ///
    /// Positions must not collide with tasks already known to the job. The
    /// task graph is rebuilt over every task, keeping done flags.
    pub(crate) fn append(&mut self, tasks: Vec<Arc<Task>>) -> Result<()> {
        check_unique_positions(&self.uuid, &self.all_tasks, &tasks)?;

        let mut all = self.all_tasks.clone();
        all.extend(tasks.iter().cloned());
        let mut graph = build_graph(&all)?;
        if let Some(g) = graph.as_mut() {
            for &pos in &self.done {
                g.node_done(pos);
            }
        }

        self.task_graph = graph;
        self.all_tasks = all;
        self.pending.extend(tasks);
        Ok(())
    }

    /// Whether the task at `position` may be dispatched now.
    pub fn is_task_available(&self, position: Position) -> bool {
        match &self.task_graph {
            Some(g) => g.is_available(position),
            None => !self.done.contains(&position),
        }
    }

    /// Number of pending tasks whose dependencies are all done.
    pub fn available_pending_count(&self) -> usize {
        match &self.task_graph {
            Some(_) => self
                .pending
                .iter()
                .filter(|t| self.is_task_available(t.position()))
                .count(),
            None => self.pending.len(),
        }
    }

    /// Take up to `n` available tasks from the front of the pending list,
    /// leaving unavailable ones in place and in order.
    pub(crate) fn take_available(&mut self, n: usize) -> Vec<Arc<Task>> {
        let mut taken = Vec::with_capacity(n);
        let mut kept = VecDeque::with_capacity(self.pending.len());

        while let Some(task) = self.pending.pop_front() {
            if taken.len() < n && self.is_task_available(task.position()) {
                self.outstanding.insert(task.position());
                taken.push(task);
            } else {
                kept.push_back(task);
            }
        }

        self.pending = kept;
        taken
    }

    /// Put dispatched tasks back at the front of the pending list.
    pub(crate) fn return_tasks(&mut self, tasks: &[Arc<Task>]) -> usize {
        let mut returned = 0;
        for task in tasks.iter().rev() {
            if self.outstanding.remove(&task.position()) {
                self.pending.push_front(Arc::clone(task));
                returned += 1;
            }
        }
        returned
    }

    /// Record the completion (or cancellation) of the outstanding task at
    /// `position`. Returns false if it was not outstanding.
    pub(crate) fn task_done(&mut self, position: Position) -> bool {
        if !self.outstanding.remove(&position) {
            return false;
        }
        self.done.insert(position);
        if let Some(g) = self.task_graph.as_mut() {
            g.node_done(position);
        }
        true
    }

    /// Drop every pending task. Returns how many were dropped.
    pub(crate) fn drop_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        for task in std::mem::take(&mut self.pending) {
            self.done.insert(task.position());
            if let Some(g) = self.task_graph.as_mut() {
                g.node_done(task.position());
            }
        }
        dropped
    }

    /// Nothing left to hand out and nothing in flight.
    pub fn is_finished(&self) -> bool {
        self.pending.is_empty() && self.outstanding.is_empty()
    }

    pub fn progress(&self) -> JobProgress {
        if self.is_finished() {
            JobProgress::Ended
        } else {
            JobProgress::Running {
                pending: self.pending.len(),
                outstanding: self.outstanding.len(),
            }
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            uuid: self.uuid.clone(),
            name: self.name.clone(),
            priority: self.sla.priority,
            state: self.state,
            pending: self.pending.iter().map(|t| t.position()).collect(),
            outstanding: self.outstanding.iter().copied().collect(),
            completed: self.done.len(),
            cancelled: self.cancelled,
            suspended: self.suspended,
            dependency_id: self.sla.dependency_spec.id.clone(),
            completion_bundles: self.completion_bundles.len(),
        }
    }
}

impl fmt::Display for ServerJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ServerJob[uuid={}, name={}, priority={}, state={}, pending={}, outstanding={}, cancelled={}, suspended={}]",
            self.uuid,
            self.name,
            self.sla.priority,
            self.state,
            self.pending.len(),
            self.outstanding.len(),
            self.cancelled,
            self.suspended
        )
    }
}

/// Point-in-time copy of a job's queue-visible state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub uuid: JobUuid,
    pub name: String,
    pub priority: i32,
    pub state: JobState,
    pub pending: Vec<Position>,
    pub outstanding: Vec<Position>,
    pub completed: usize,
    pub cancelled: bool,
    pub suspended: bool,
    pub dependency_id: Option<String>,
    pub completion_bundles: usize,
}

fn build_graph(tasks: &[Arc<Task>]) -> Result<Option<TaskGraph>> {
    if tasks.iter().any(|t| t.has_dependencies()) {
        TaskGraph::from_tasks(tasks).map(Some)
    } else {
        Ok(None)
    }
}

fn check_unique_positions(uuid: &str, known: &[Arc<Task>], added: &[Arc<Task>]) -> Result<()> {
    let mut seen: BTreeSet<Position> = known.iter().map(|t| t.position()).collect();
    for task in added {
        if !seen.insert(task.position()) {
            return Err(JobGridError::IllegalState(format!(
                "job {uuid} already has a task at position {}",
                task.position()
            )));
        }
    }
    Ok(())
}
