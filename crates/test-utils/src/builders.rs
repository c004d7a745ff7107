#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use jobgrid::config::{
    ConfigFile, DispatchSection, JobConfig, QueueSection, RawConfigFile, TaskSpec,
};
use jobgrid::engine::{ClientBundle, JobSla, Task};
use jobgrid::types::Position;

/// Builder for a `ClientBundle` submission.
pub struct BundleBuilder {
    uuid: String,
    name: String,
    sla: JobSla,
    tasks: Vec<Arc<Task>>,
}

impl BundleBuilder {
    pub fn new(uuid: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            name: uuid.to_string(),
            sla: JobSla::default(),
            tasks: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.sla.priority = priority;
        self
    }

    pub fn dependency_id(mut self, id: &str) -> Self {
        self.sla.dependency_spec.id = Some(id.to_string());
        self
    }

    pub fn depends_on(mut self, id: &str) -> Self {
        self.sla.dependency_spec.depends_on.push(id.to_string());
        self
    }

    pub fn cascade_cancellation(mut self, val: bool) -> Self {
        self.sla.dependency_spec.cascade_cancellation = val;
        self
    }

    pub fn remove_upon_completion(mut self, val: bool) -> Self {
        self.sla.dependency_spec.remove_upon_completion = val;
        self
    }

    pub fn suspended(mut self, val: bool) -> Self {
        self.sla.suspended = val;
        self
    }

    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.sla.start_delay = Some(delay);
        self
    }

    pub fn expiration(mut self, after: Duration) -> Self {
        self.sla.expiration = Some(after);
        self
    }

    pub fn broadcast(mut self, val: bool) -> Self {
        self.sla.broadcast = val;
        self
    }

    pub fn persistent(mut self, val: bool) -> Self {
        self.sla.persistent = val;
        self
    }

    /// Add an independent task at `position`.
    pub fn task(mut self, position: Position) -> Self {
        self.tasks.push(Arc::new(Task::new(position)));
        self
    }

    /// Add independent tasks at each position of `positions`.
    pub fn tasks(mut self, positions: impl IntoIterator<Item = Position>) -> Self {
        for p in positions {
            self = self.task(p);
        }
        self
    }

    /// Add a task depending on tasks already added to this builder.
    pub fn task_after(mut self, position: Position, deps: &[Position]) -> Self {
        let deps = deps
            .iter()
            .map(|d| {
                self.tasks
                    .iter()
                    .find(|t| jobgrid::dag::DependentTask::position(t.as_ref()) == *d)
                    .cloned()
                    .unwrap_or_else(|| panic!("task {d} must be added before task {position}"))
            })
            .collect();
        self.tasks
            .push(Arc::new(Task::with_dependencies(position, deps)));
        self
    }

    /// Add `len` tasks starting at `start`, each depending on the previous.
    pub fn chain(mut self, start: Position, len: u32) -> Self {
        for p in start..start + len {
            self = if p == start {
                self.task(p)
            } else {
                self.task_after(p, &[p - 1])
            };
        }
        self
    }

    pub fn build(self) -> ClientBundle {
        ClientBundle::new(self.uuid, self.name, self.sla, self.tasks)
    }
}

/// Shorthand for a bundle of `n` independent tasks at positions `0..n`.
pub fn simple_bundle(uuid: &str, priority: i32, n: u32) -> ClientBundle {
    BundleBuilder::new(uuid).priority(priority).tasks(0..n).build()
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                queue: QueueSection::default(),
                dispatch: DispatchSection::default(),
                job: BTreeMap::new(),
            },
        }
    }

    pub fn with_job(mut self, name: &str, job: JobConfig) -> Self {
        self.config.job.insert(name.to_string(), job);
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.dispatch.workers = n;
        self
    }

    pub fn tasks_per_bundle(mut self, n: usize) -> Self {
        self.config.dispatch.tasks_per_bundle = n;
        self
    }

    pub fn task_duration_ms(mut self, ms: u64) -> Self {
        self.config.dispatch.task_duration_ms = ms;
        self
    }

    pub fn removal_wait(mut self, timeout_ms: u64, poll_ms: u64) -> Self {
        self.config.queue.removal_wait_timeout_ms = timeout_ms;
        self.config.queue.removal_poll_interval_ms = poll_ms;
        self
    }

    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a `[job.<name>]` section.
pub struct JobConfigBuilder {
    job: JobConfig,
}

impl JobConfigBuilder {
    pub fn new() -> Self {
        Self {
            job: JobConfig::default(),
        }
    }

    pub fn uuid(mut self, uuid: &str) -> Self {
        self.job.uuid = Some(uuid.to_string());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.job.priority = priority;
        self
    }

    pub fn dependency_id(mut self, id: &str) -> Self {
        self.job.dependency_id = Some(id.to_string());
        self
    }

    pub fn depends_on(mut self, id: &str) -> Self {
        self.job.depends_on.push(id.to_string());
        self
    }

    pub fn cascade_cancellation(mut self, val: bool) -> Self {
        self.job.cascade_cancellation = val;
        self
    }

    pub fn suspended(mut self, val: bool) -> Self {
        self.job.suspended = val;
        self
    }

    pub fn start_delay_ms(mut self, ms: u64) -> Self {
        self.job.start_delay_ms = Some(ms);
        self
    }

    pub fn expiration_ms(mut self, ms: u64) -> Self {
        self.job.expiration_ms = Some(ms);
        self
    }

    pub fn broadcast(mut self, val: bool) -> Self {
        self.job.broadcast = val;
        self
    }

    /// Append one task waiting on the tasks at `after`.
    pub fn task(mut self, after: &[usize]) -> Self {
        self.job.tasks.push(TaskSpec {
            after: after.to_vec(),
        });
        self
    }

    /// Append `n` independent tasks.
    pub fn tasks(mut self, n: usize) -> Self {
        for _ in 0..n {
            self = self.task(&[]);
        }
        self
    }

    pub fn build(self) -> JobConfig {
        self.job
    }
}

impl Default for JobConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
