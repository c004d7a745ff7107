// src/config/model.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::job::{ClientBundle, DependencySpec, JobSla, Task};
use crate::engine::queue::QueueConfig;
use crate::engine::{DispatchOptions, WorkerId};
use crate::errors::{JobGridError, Result};
use crate::types::Position;

/// A grid plan exactly as read from TOML.
///
/// ```toml
/// [queue]
/// removal_wait_timeout_ms = 5000
///
/// [dispatch]
/// workers = 2
/// tasks_per_bundle = 4
///
/// [job.build]
/// priority = 5
/// dependency_id = "build"
/// depends_on = ["fetch"]
/// tasks = [{}, { after = [0] }]
/// ```
///
/// Convert into a [`ConfigFile`] with `TryFrom` to validate it.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub queue: QueueSection,

    #[serde(default)]
    pub dispatch: DispatchSection,

    /// Keyed by job name.
    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,
}

/// A validated grid plan.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub queue: QueueSection,
    pub dispatch: DispatchSection,
    pub job: BTreeMap<String, JobConfig>,
}

/// `[queue]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    /// How long a resubmission waits for the removal of an ended job with
    /// the same uuid.
    #[serde(default = "default_removal_wait_timeout_ms")]
    pub removal_wait_timeout_ms: u64,

    #[serde(default = "default_removal_poll_interval_ms")]
    pub removal_poll_interval_ms: u64,
}

fn default_removal_wait_timeout_ms() -> u64 {
    5_000
}

fn default_removal_poll_interval_ms() -> u64 {
    50
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            removal_wait_timeout_ms: default_removal_wait_timeout_ms(),
            removal_poll_interval_ms: default_removal_poll_interval_ms(),
        }
    }
}

/// `[dispatch]` section: the simulated workers.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSection {
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Upper bound on the tasks handed to a worker at once.
    #[serde(default = "default_tasks_per_bundle")]
    pub tasks_per_bundle: usize,

    /// Simulated run time of every task.
    #[serde(default = "default_task_duration_ms")]
    pub task_duration_ms: u64,
}

fn default_workers() -> usize {
    2
}

fn default_tasks_per_bundle() -> usize {
    4
}

fn default_task_duration_ms() -> u64 {
    10
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            tasks_per_bundle: default_tasks_per_bundle(),
            task_duration_ms: default_task_duration_ms(),
        }
    }
}

/// `[job.<name>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct JobConfig {
    /// Job uuid; defaults to the job name.
    #[serde(default)]
    pub uuid: Option<String>,

    #[serde(default)]
    pub priority: i32,

    /// Logical id other jobs use in `depends_on`.
    #[serde(default)]
    pub dependency_id: Option<String>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub cascade_cancellation: bool,

    #[serde(default)]
    pub remove_upon_completion: bool,

    #[serde(default)]
    pub broadcast: bool,

    #[serde(default)]
    pub persistent: bool,

    #[serde(default)]
    pub suspended: bool,

    #[serde(default)]
    pub start_delay_ms: Option<u64>,

    #[serde(default)]
    pub expiration_ms: Option<u64>,

    /// One entry per task; the task position is its index.
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

/// One task of a job.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TaskSpec {
    /// Positions of the tasks of the same job this one waits for.
    #[serde(default)]
    pub after: Vec<usize>,
}

impl JobConfig {
    pub fn effective_uuid(&self, name: &str) -> String {
        self.uuid.clone().unwrap_or_else(|| name.to_string())
    }

    pub fn sla(&self) -> JobSla {
        JobSla {
            priority: self.priority,
            dependency_spec: DependencySpec {
                id: self.dependency_id.clone(),
                depends_on: self.depends_on.clone(),
                cascade_cancellation: self.cascade_cancellation,
                remove_upon_completion: self.remove_upon_completion,
            },
            broadcast: self.broadcast,
            persistent: self.persistent,
            cancel_upon_client_disconnect: false,
            suspended: self.suspended,
            start_delay: self.start_delay_ms.map(Duration::from_millis),
            expiration: self.expiration_ms.map(Duration::from_millis),
            broadcast_target: None,
        }
    }

    /// Build the job's tasks with their dependency links.
    pub fn build_tasks(&self) -> Result<Vec<Arc<Task>>> {
        let mut built: HashMap<usize, Arc<Task>> = HashMap::with_capacity(self.tasks.len());
        let mut in_progress = Vec::new();
        (0..self.tasks.len())
            .map(|i| self.build_task(i, &mut built, &mut in_progress))
            .collect()
    }

    fn build_task(
        &self,
        index: usize,
        built: &mut HashMap<usize, Arc<Task>>,
        in_progress: &mut Vec<usize>,
    ) -> Result<Arc<Task>> {
        if let Some(task) = built.get(&index) {
            return Ok(Arc::clone(task));
        }
        let spec = self.tasks.get(index).ok_or_else(|| {
            JobGridError::ConfigError(format!("task index {index} is out of range"))
        })?;
        if in_progress.contains(&index) {
            return Err(JobGridError::TaskCycle(to_position(index)?));
        }

        in_progress.push(index);
        let mut deps = Vec::with_capacity(spec.after.len());
        for &dep in &spec.after {
            deps.push(self.build_task(dep, built, in_progress)?);
        }
        in_progress.pop();

        let task = Arc::new(Task::with_dependencies(to_position(index)?, deps));
        built.insert(index, Arc::clone(&task));
        Ok(task)
    }
}

fn to_position(index: usize) -> Result<Position> {
    Position::try_from(index)
        .map_err(|_| JobGridError::ConfigError(format!("task index {index} is too large")))
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        queue: QueueSection,
        dispatch: DispatchSection,
        job: BTreeMap<String, JobConfig>,
    ) -> Self {
        Self {
            queue,
            dispatch,
            job,
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            removal_wait_timeout: Duration::from_millis(self.queue.removal_wait_timeout_ms),
            removal_poll_interval: Duration::from_millis(self.queue.removal_poll_interval_ms),
        }
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            tasks_per_bundle: self.dispatch.tasks_per_bundle,
        }
    }

    pub fn task_duration(&self) -> Duration {
        Duration::from_millis(self.dispatch.task_duration_ms)
    }

    /// `worker-1` .. `worker-N`.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        (1..=self.dispatch.workers)
            .map(|i| format!("worker-{i}"))
            .collect()
    }

    /// One submission per job, in job name order.
    pub fn client_bundles(&self) -> Result<Vec<ClientBundle>> {
        self.job
            .iter()
            .map(|(name, job)| {
                Ok(ClientBundle::new(
                    job.effective_uuid(name),
                    name.clone(),
                    job.sla(),
                    job.build_tasks()?,
                ))
            })
            .collect()
    }
}
