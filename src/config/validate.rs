// src/config/validate.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, JobConfig, RawConfigFile};
use crate::errors::{JobGridError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = JobGridError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.queue, raw.dispatch, raw.job))
    }
}

/// Check a raw plan without consuming it.
///
/// Cross-job dependency cycles are not rejected here: they are detected and
/// handled when the jobs are queued.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    validate_raw_config(cfg)
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_jobs(cfg)?;
    validate_queue_section(cfg)?;
    validate_dispatch_section(cfg)?;
    validate_unique_uuids(cfg)?;
    for (name, job) in cfg.job.iter() {
        validate_job(name, job)?;
        validate_task_dag(name, job)?;
    }
    Ok(())
}

fn ensure_has_jobs(cfg: &RawConfigFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(JobGridError::ConfigError(
            "plan must contain at least one [job.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_queue_section(cfg: &RawConfigFile) -> Result<()> {
    let q = &cfg.queue;
    if q.removal_wait_timeout_ms == 0 {
        return Err(JobGridError::ConfigError(
            "[queue].removal_wait_timeout_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if q.removal_poll_interval_ms == 0 || q.removal_poll_interval_ms > q.removal_wait_timeout_ms {
        return Err(JobGridError::ConfigError(format!(
            "[queue].removal_poll_interval_ms must be between 1 and removal_wait_timeout_ms ({}), got {}",
            q.removal_wait_timeout_ms, q.removal_poll_interval_ms
        )));
    }
    Ok(())
}

fn validate_dispatch_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.dispatch.workers == 0 {
        return Err(JobGridError::ConfigError(
            "[dispatch].workers must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.dispatch.tasks_per_bundle == 0 {
        return Err(JobGridError::ConfigError(
            "[dispatch].tasks_per_bundle must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_unique_uuids(cfg: &RawConfigFile) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for (name, job) in cfg.job.iter() {
        let uuid = job.effective_uuid(name);
        if let Some(other) = seen.insert(uuid.clone(), name) {
            return Err(JobGridError::ConfigError(format!(
                "jobs '{other}' and '{name}' share the uuid '{uuid}'"
            )));
        }
    }
    Ok(())
}

fn validate_job(name: &str, job: &JobConfig) -> Result<()> {
    if job.tasks.is_empty() {
        return Err(JobGridError::ConfigError(format!(
            "job '{name}' must declare at least one task"
        )));
    }
    if !job.depends_on.is_empty() && job.dependency_id.is_none() {
        return Err(JobGridError::ConfigError(format!(
            "job '{name}' declares `depends_on` without a `dependency_id`"
        )));
    }
    if job.broadcast && job.dependency_id.is_some() {
        return Err(JobGridError::ConfigError(format!(
            "broadcast job '{name}' cannot take part in job dependencies"
        )));
    }

    for (pos, task) in job.tasks.iter().enumerate() {
        for &dep in task.after.iter() {
            if dep >= job.tasks.len() {
                return Err(JobGridError::ConfigError(format!(
                    "task {pos} of job '{name}' depends on unknown task {dep} in `after`"
                )));
            }
            if dep == pos {
                return Err(JobGridError::ConfigError(format!(
                    "task {pos} of job '{name}' cannot depend on itself in `after`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_task_dag(name: &str, job: &JobConfig) -> Result<()> {
    // Edge direction: dependency -> dependant.
    let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
    for (pos, task) in job.tasks.iter().enumerate() {
        graph.add_node(pos);
        for &dep in task.after.iter() {
            graph.add_edge(dep, pos, ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(JobGridError::ConfigError(format!(
            "cycle detected in the tasks of job '{name}' involving task {}",
            cycle.node_id()
        ))),
    }
}
