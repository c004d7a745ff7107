// tests/config_loading.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, JobConfigBuilder};

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use jobgrid::config::{load_and_validate, validate_config, ConfigFile};
use jobgrid::dag::{DependentTask, TaskGraph};
use jobgrid::errors::JobGridError;

fn write_plan(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn expect_config_error(result: Result<ConfigFile, JobGridError>, needle: &str) {
    match result {
        Err(JobGridError::ConfigError(msg)) => {
            assert!(msg.contains(needle), "unexpected message: {msg}")
        }
        other => panic!("expected a config error mentioning {needle:?}, got {other:?}"),
    }
}

#[test]
fn full_plan_is_loaded_with_defaults_filled_in() {
    let file = write_plan(
        r#"
[queue]
removal_wait_timeout_ms = 2000

[dispatch]
workers = 3

[job.fetch]
dependency_id = "fetch"
tasks = [{}]

[job.build]
priority = 5
dependency_id = "build"
depends_on = ["fetch"]
cascade_cancellation = true
start_delay_ms = 100
expiration_ms = 5000
tasks = [{}, { after = [0] }, { after = [0] }, { after = [1, 2] }]
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.job.len(), 2);

    let queue = cfg.queue_config();
    assert_eq!(queue.removal_wait_timeout, Duration::from_secs(2));
    assert_eq!(queue.removal_poll_interval, Duration::from_millis(50));
    assert_eq!(cfg.worker_ids(), vec!["worker-1", "worker-2", "worker-3"]);
    assert_eq!(cfg.dispatch_options().tasks_per_bundle, 4);

    let bundles = cfg.client_bundles().unwrap();
    let build = bundles.iter().find(|b| b.uuid == "build").unwrap();
    assert_eq!(build.sla.priority, 5);
    assert_eq!(build.sla.dependency_spec.depends_on, vec!["fetch"]);
    assert_eq!(build.sla.start_delay, Some(Duration::from_millis(100)));
    assert_eq!(build.tasks.len(), 4);
    assert_eq!(build.tasks[3].dependencies().len(), 2);

    let order = TaskGraph::from_tasks(&build.tasks)
        .unwrap()
        .topological_sort_dfs();
    assert_eq!(order.first(), Some(&0));
    assert_eq!(order.last(), Some(&3));
}

#[test]
fn explicit_uuid_overrides_the_job_name() {
    let file = write_plan(
        r#"
[job.nightly]
uuid = "job-42"
tasks = [{}]
"#,
    );
    let cfg = load_and_validate(file.path()).unwrap();
    let bundles = cfg.client_bundles().unwrap();
    assert_eq!(bundles[0].uuid, "job-42");
    assert_eq!(bundles[0].name, "nightly");
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = load_and_validate(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(JobGridError::IoError(_))));
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let file = write_plan("[job.a\ntasks = [");
    let result = load_and_validate(file.path());
    assert!(matches!(result, Err(JobGridError::TomlError(_))));
}

#[test]
fn plan_without_jobs_is_rejected() {
    let file = write_plan("[dispatch]\nworkers = 1\n");
    expect_config_error(load_and_validate(file.path()), "at least one [job");
}

#[test]
fn job_without_tasks_is_rejected() {
    let raw = ConfigFileBuilder::new()
        .with_job("empty", JobConfigBuilder::new().build())
        .build_raw();
    expect_config_error(ConfigFile::try_from(raw), "at least one task");
}

#[test]
fn task_references_must_be_in_range_and_not_self() {
    let raw = ConfigFileBuilder::new()
        .with_job("j", JobConfigBuilder::new().task(&[]).task(&[5]).build())
        .build_raw();
    expect_config_error(ConfigFile::try_from(raw), "unknown task 5");

    let raw = ConfigFileBuilder::new()
        .with_job("j", JobConfigBuilder::new().task(&[0]).build())
        .build_raw();
    expect_config_error(ConfigFile::try_from(raw), "cannot depend on itself");
}

#[test]
fn task_cycles_are_rejected() {
    let raw = ConfigFileBuilder::new()
        .with_job(
            "j",
            JobConfigBuilder::new().task(&[2]).task(&[0]).task(&[1]).build(),
        )
        .build_raw();
    expect_config_error(ConfigFile::try_from(raw), "cycle detected");
}

#[test]
fn numeric_bounds_are_checked() {
    let job = || JobConfigBuilder::new().tasks(1).build();

    let raw = ConfigFileBuilder::new().with_job("j", job()).workers(0).build_raw();
    expect_config_error(ConfigFile::try_from(raw), "workers");

    let raw = ConfigFileBuilder::new()
        .with_job("j", job())
        .tasks_per_bundle(0)
        .build_raw();
    expect_config_error(ConfigFile::try_from(raw), "tasks_per_bundle");

    let raw = ConfigFileBuilder::new()
        .with_job("j", job())
        .removal_wait(100, 200)
        .build_raw();
    expect_config_error(ConfigFile::try_from(raw), "removal_poll_interval_ms");
}

#[test]
fn depends_on_needs_a_dependency_id() {
    let raw = ConfigFileBuilder::new()
        .with_job("j", JobConfigBuilder::new().depends_on("x").tasks(1).build())
        .build_raw();
    expect_config_error(ConfigFile::try_from(raw), "without a `dependency_id`");
}

#[test]
fn duplicate_uuids_are_rejected() {
    let raw = ConfigFileBuilder::new()
        .with_job("a", JobConfigBuilder::new().uuid("same").tasks(1).build())
        .with_job("b", JobConfigBuilder::new().uuid("same").tasks(1).build())
        .build_raw();
    expect_config_error(ConfigFile::try_from(raw), "share the uuid");
}

#[test]
fn cross_job_cycles_are_left_to_the_queue() {
    let raw = ConfigFileBuilder::new()
        .with_job(
            "a",
            JobConfigBuilder::new().dependency_id("A").depends_on("B").tasks(1).build(),
        )
        .with_job(
            "b",
            JobConfigBuilder::new().dependency_id("B").depends_on("A").tasks(1).build(),
        )
        .build_raw();
    assert!(validate_config(&raw).is_ok());
}
