// tests/job_dependencies.rs

mod common;
use crate::common::builders::BundleBuilder;
use crate::common::init_tracing;

use std::sync::Arc;

use jobgrid::dag::{DependentTask, JobDependencyGraph};
use jobgrid::engine::{PriorityJobQueue, QueueConfig};

fn drain_job(q: &PriorityJobQueue, uuid: &str) {
    let n = q.pending_task_count(uuid).unwrap();
    let d = q.next_bundle(uuid, n).unwrap();
    for t in &d.tasks {
        q.task_completed(uuid, t.position());
    }
    assert!(q.remove_bundle(uuid, true));
}

#[test]
fn queues_sharing_a_graph_gate_each_other() {
    init_tracing();
    let graph = Arc::new(JobDependencyGraph::new());
    let upstream = PriorityJobQueue::new(QueueConfig::default())
        .with_dependency_graph(Arc::clone(&graph));
    let downstream = PriorityJobQueue::new(QueueConfig::default())
        .with_dependency_graph(Arc::clone(&graph));

    downstream
        .add_bundle(BundleBuilder::new("report").dependency_id("report").depends_on("etl").tasks(0..1).build())
        .unwrap();
    assert_eq!(downstream.next_dispatchable(), None);
    assert!(graph.node("etl").unwrap().is_placeholder());

    upstream
        .add_bundle(BundleBuilder::new("etl").dependency_id("etl").tasks(0..2).build())
        .unwrap();
    assert_eq!(graph.node("etl").unwrap().job_uuid(), Some("etl"));
    assert_eq!(downstream.next_dispatchable(), None);

    drain_job(&upstream, "etl");
    assert!(graph.node("etl").unwrap().is_completed());
    assert_eq!(downstream.next_dispatchable().as_deref(), Some("report"));
}

#[test]
fn remove_upon_completion_prunes_finished_chains() {
    init_tracing();
    let q = PriorityJobQueue::default();

    q.add_bundle(BundleBuilder::new("a").dependency_id("A").tasks(0..1).build())
        .unwrap();
    q.add_bundle(
        BundleBuilder::new("b")
            .dependency_id("B")
            .depends_on("A")
            .remove_upon_completion(true)
            .tasks(0..1)
            .build(),
    )
    .unwrap();
    assert_eq!(q.dependency_graph().len(), 2);

    drain_job(&q, "a");
    assert_eq!(q.dependency_graph().len(), 2);

    // B goes away together with what it depends on.
    drain_job(&q, "b");
    assert!(q.dependency_graph().is_empty());
}

#[test]
fn cancelling_without_cascade_releases_dependents() {
    init_tracing();
    let q = PriorityJobQueue::default();

    q.add_bundle(BundleBuilder::new("a").dependency_id("A").tasks(0..1).build())
        .unwrap();
    q.add_bundle(BundleBuilder::new("b").dependency_id("B").depends_on("A").tasks(0..1).build())
        .unwrap();
    assert_eq!(q.next_dispatchable().as_deref(), Some("a"));

    assert!(q.cancel_job("a"));
    let node = q.dependency_graph().node("A").unwrap();
    assert!(node.is_cancelled());
    assert!(node.is_completed());

    assert_eq!(q.all_job_uuids(), vec!["b"]);
    assert!(!q.dependencies().has_pending_dependency_or_cancelled("B"));
    assert_eq!(q.next_dispatchable().as_deref(), Some("b"));
}
