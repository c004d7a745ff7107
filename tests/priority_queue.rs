// tests/priority_queue.rs

mod common;
use crate::common::builders::{simple_bundle, BundleBuilder};
use crate::common::init_tracing;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;

use jobgrid::dag::DependentTask;
use jobgrid::engine::{JobProgress, PriorityJobQueue, QueueConfig, QueueEvent};
use jobgrid::errors::JobGridError;
use jobgrid::types::JobState;

/// Take every task of `uuid` and report them done, then remove the job.
fn run_to_completion(q: &PriorityJobQueue, uuid: &str) {
    loop {
        let pending = q.pending_task_count(uuid).unwrap();
        if pending == 0 {
            break;
        }
        let dispatch = q.next_bundle(uuid, pending).unwrap();
        assert!(!dispatch.is_empty(), "job {uuid} has pending tasks but none available");
        for task in &dispatch.tasks {
            q.task_completed(uuid, task.position());
        }
    }
    assert_eq!(q.job(uuid).map(|j| j.state), Some(JobState::Ended));
    assert!(q.remove_bundle(uuid, true));
}

fn listen(q: &PriorityJobQueue) -> mpsc::UnboundedReceiver<QueueEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    q.add_listener(Arc::new(tx));
    rx
}

fn drain(rx: &mut mpsc::UnboundedReceiver<QueueEvent>) -> Vec<QueueEvent> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    events
}

#[test]
fn submissions_for_the_same_uuid_are_merged() {
    init_tracing();
    let q = PriorityJobQueue::default();

    q.add_bundle(BundleBuilder::new("j").tasks(0..2).build()).unwrap();
    q.add_bundle(BundleBuilder::new("j").tasks(2..5).build()).unwrap();

    assert_eq!(q.len(), 1);
    assert_eq!(q.pending_task_count("j").unwrap(), 5);
    assert_eq!(q.max_bundle_size(), Some(5));
}

#[test]
fn higher_priority_first_then_fifo_within_a_bucket() {
    init_tracing();
    let q = PriorityJobQueue::default();

    q.add_bundle(simple_bundle("low", 0, 1)).unwrap();
    q.add_bundle(simple_bundle("first", 5, 1)).unwrap();
    q.add_bundle(simple_bundle("second", 5, 1)).unwrap();

    assert_eq!(q.jobs_in_priority_order(), vec!["first", "second", "low"]);
    assert_eq!(q.next_dispatchable().as_deref(), Some("first"));
}

#[test]
fn next_bundle_rotates_partially_dispatched_jobs_and_drops_drained_ones() {
    init_tracing();
    let q = PriorityJobQueue::default();
    q.add_bundle(simple_bundle("a", 0, 3)).unwrap();
    q.add_bundle(simple_bundle("b", 0, 3)).unwrap();

    let first = q.next_bundle("a", 2).unwrap();
    assert_eq!(first.positions(), vec![0, 1]);
    assert_eq!(q.jobs_in_priority_order(), vec!["b", "a"]);
    assert_eq!(q.job("a").unwrap().state, JobState::PartiallyDispatched);

    let last = q.next_bundle("a", 10).unwrap();
    assert_eq!(last.positions(), vec![2]);
    assert_eq!(q.jobs_in_priority_order(), vec!["b"]);
    assert_eq!(q.job("a").unwrap().state, JobState::DispatchingLast);

    // Drained but still tracked until its tasks report back.
    assert!(matches!(
        q.next_bundle("a", 1),
        Err(JobGridError::IllegalState(_))
    ));
}

#[test]
fn intra_job_dependencies_gate_what_next_bundle_hands_out() {
    init_tracing();
    let q = PriorityJobQueue::default();
    q.add_bundle(
        BundleBuilder::new("diamond")
            .task(0)
            .task_after(1, &[0])
            .task_after(2, &[0])
            .task_after(3, &[1, 2])
            .build(),
    )
    .unwrap();

    let d = q.next_bundle("diamond", 4).unwrap();
    assert_eq!(d.positions(), vec![0]);
    assert_eq!(q.next_dispatchable(), None);

    q.task_completed("diamond", 0);
    assert_eq!(q.next_dispatchable().as_deref(), Some("diamond"));
    let d = q.next_bundle("diamond", 4).unwrap();
    assert_eq!(d.positions(), vec![1, 2]);

    q.task_completed("diamond", 1);
    assert_eq!(q.next_dispatchable(), None);
    q.task_completed("diamond", 2);
    let d = q.next_bundle("diamond", 4).unwrap();
    assert_eq!(d.positions(), vec![3]);

    assert_eq!(
        q.task_completed("diamond", 3),
        Some(JobProgress::Ended)
    );
}

#[test]
fn dependent_jobs_wait_for_their_dependencies_to_complete() {
    init_tracing();
    let q = PriorityJobQueue::default();
    let mut rx = listen(&q);

    // Submitted in reverse order: C and B first see placeholders.
    q.add_bundle(
        BundleBuilder::new("c").dependency_id("C").depends_on("B").tasks(0..1).build(),
    )
    .unwrap();
    q.add_bundle(
        BundleBuilder::new("b").dependency_id("B").depends_on("A").tasks(0..1).build(),
    )
    .unwrap();
    q.add_bundle(BundleBuilder::new("a").dependency_id("A").tasks(0..1).build())
        .unwrap();

    assert_eq!(q.next_dispatchable().as_deref(), Some("a"));
    run_to_completion(&q, "a");
    assert!(drain(&mut rx).contains(&QueueEvent::JobReleased { uuid: "b".into() }));

    assert_eq!(q.next_dispatchable().as_deref(), Some("b"));
    run_to_completion(&q, "b");
    assert_eq!(q.next_dispatchable().as_deref(), Some("c"));
    run_to_completion(&q, "c");
    assert!(q.is_empty());
}

#[test]
fn cascading_cancellation_reaches_transitive_dependents() {
    init_tracing();
    let q = PriorityJobQueue::default();
    let mut rx = listen(&q);

    q.add_bundle(
        BundleBuilder::new("a").dependency_id("A").cascade_cancellation(true).tasks(0..2).build(),
    )
    .unwrap();
    q.add_bundle(
        BundleBuilder::new("b")
            .dependency_id("B")
            .depends_on("A")
            .cascade_cancellation(true)
            .tasks(0..1)
            .build(),
    )
    .unwrap();
    q.add_bundle(
        BundleBuilder::new("c").dependency_id("C").depends_on("B").tasks(0..1).build(),
    )
    .unwrap();
    q.add_bundle(simple_bundle("unrelated", 0, 1)).unwrap();
    drain(&mut rx);

    assert!(q.cancel_job("a"));

    let mut cancelled: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            QueueEvent::JobCancelled { uuid } => Some(uuid),
            _ => None,
        })
        .collect();
    cancelled.sort();
    assert_eq!(cancelled, vec!["a", "b", "c"]);
    assert_eq!(q.all_job_uuids(), vec!["unrelated"]);
}

#[test]
fn cascade_stops_at_a_dependent_that_does_not_cascade() {
    init_tracing();
    let q = PriorityJobQueue::default();
    let mut rx = listen(&q);

    q.add_bundle(
        BundleBuilder::new("a").dependency_id("A").cascade_cancellation(true).tasks(0..1).build(),
    )
    .unwrap();
    q.add_bundle(
        BundleBuilder::new("b").dependency_id("B").depends_on("A").tasks(0..1).build(),
    )
    .unwrap();
    q.add_bundle(
        BundleBuilder::new("c").dependency_id("C").depends_on("B").tasks(0..1).build(),
    )
    .unwrap();
    drain(&mut rx);

    assert!(q.cancel_job("a"));

    let mut cancelled: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            QueueEvent::JobCancelled { uuid } => Some(uuid),
            _ => None,
        })
        .collect();
    cancelled.sort();
    assert_eq!(cancelled, vec!["a", "b"]);

    // B ended without cascading, so C is released rather than cancelled.
    assert_eq!(q.all_job_uuids(), vec!["c"]);
    assert!(!q.job("c").unwrap().cancelled);
    assert_eq!(q.next_dispatchable().as_deref(), Some("c"));
}

#[test]
fn cancelling_a_job_with_tasks_in_flight_ends_it_when_they_report_back() {
    init_tracing();
    let q = PriorityJobQueue::default();
    q.add_bundle(simple_bundle("j", 0, 3)).unwrap();

    let d = q.next_bundle("j", 1).unwrap();
    assert!(q.cancel_job("j"));

    let snap = q.job("j").unwrap();
    assert!(snap.cancelled);
    assert!(snap.pending.is_empty());
    assert_eq!(snap.outstanding, vec![0]);
    assert_eq!(q.next_dispatchable(), None);

    assert_eq!(
        q.task_completed("j", d.tasks[0].position()),
        Some(JobProgress::Ended)
    );
    assert!(q.remove_bundle("j", true));
    assert!(q.is_empty());
}

#[test]
fn a_dependency_cycle_cancels_every_job_on_it() {
    init_tracing();
    let q = PriorityJobQueue::default();
    let mut rx = listen(&q);

    q.add_bundle(
        BundleBuilder::new("a").dependency_id("A").depends_on("B").tasks(0..1).build(),
    )
    .unwrap();
    q.add_bundle(
        BundleBuilder::new("b").dependency_id("B").depends_on("A").tasks(0..1).build(),
    )
    .unwrap();

    assert!(q.is_empty());
    let cancelled: Vec<QueueEvent> = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, QueueEvent::JobCancelled { .. }))
        .collect();
    assert_eq!(cancelled.len(), 2);

    // Cycle nodes are dropped from the graph once their jobs are gone.
    assert!(q.dependency_graph().is_empty());
}

#[test]
fn a_cycle_closing_submission_never_announces_new_work() {
    init_tracing();
    let q = PriorityJobQueue::default();
    let mut rx = listen(&q);

    q.add_bundle(
        BundleBuilder::new("a").dependency_id("A").depends_on("B").tasks(0..1).build(),
    )
    .unwrap();
    drain(&mut rx);
    q.add_bundle(
        BundleBuilder::new("b").dependency_id("B").depends_on("A").tasks(0..1).build(),
    )
    .unwrap();

    assert_eq!(
        drain(&mut rx),
        vec![
            QueueEvent::JobQueued { uuid: "b".into(), priority: 0 },
            QueueEvent::JobCancelled { uuid: "b".into() },
            QueueEvent::JobEnded { uuid: "b".into() },
            QueueEvent::JobCancelled { uuid: "a".into() },
            QueueEvent::JobEnded { uuid: "a".into() },
        ]
    );
}

#[test]
fn resubmission_blocks_until_the_ended_job_is_removed() {
    init_tracing();
    let q = Arc::new(PriorityJobQueue::new(QueueConfig {
        removal_wait_timeout: Duration::from_secs(5),
        removal_poll_interval: Duration::from_millis(10),
    }));
    q.add_bundle(simple_bundle("j", 0, 1)).unwrap();
    let d = q.next_bundle("j", 1).unwrap();
    assert_eq!(q.task_completed("j", d.tasks[0].position()), Some(JobProgress::Ended));

    let submitter = {
        let q = Arc::clone(&q);
        thread::spawn(move || q.add_bundle(simple_bundle("j", 0, 2)))
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!submitter.is_finished());
    assert!(q.remove_bundle("j", true));

    submitter.join().unwrap().unwrap();
    let snap = q.job("j").unwrap();
    assert_eq!(snap.state, JobState::Queued);
    assert_eq!(snap.pending, vec![0, 1]);
}

#[test]
fn submissions_during_the_last_dispatch_are_resubmitted_on_removal() {
    init_tracing();
    let q = PriorityJobQueue::default();
    let mut rx = listen(&q);
    q.add_bundle(simple_bundle("j", 0, 1)).unwrap();
    let d = q.next_bundle("j", 1).unwrap();

    q.add_bundle(BundleBuilder::new("j").tasks(5..7).build()).unwrap();
    assert_eq!(q.pending_task_count("j").unwrap(), 0);
    assert_eq!(q.job("j").unwrap().completion_bundles, 1);

    q.task_completed("j", d.tasks[0].position());
    assert!(q.remove_bundle("j", true));

    let snap = q.job("j").unwrap();
    assert_eq!(snap.pending, vec![5, 6]);
    let queued = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, QueueEvent::JobQueued { .. }))
        .count();
    assert_eq!(queued, 2);
}

#[test]
fn submissions_for_a_cancelled_job_in_flight_are_dropped() {
    init_tracing();
    let q = PriorityJobQueue::default();
    let mut rx = listen(&q);
    q.add_bundle(simple_bundle("j", 0, 1)).unwrap();
    let d = q.next_bundle("j", 1).unwrap();
    assert!(q.cancel_job("j"));

    q.add_bundle(BundleBuilder::new("j").tasks(5..7).build()).unwrap();
    assert_eq!(q.job("j").unwrap().completion_bundles, 0);

    q.task_completed("j", d.tasks[0].position());
    assert!(q.remove_bundle("j", true));
    assert!(q.is_empty());
    let queued = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, QueueEvent::JobQueued { .. }))
        .count();
    assert_eq!(queued, 1);
}

#[test]
fn failed_dispatch_goes_back_to_the_front_of_the_job() {
    init_tracing();
    let q = PriorityJobQueue::default();
    q.add_bundle(simple_bundle("j", 0, 3)).unwrap();

    let d = q.next_bundle("j", 2).unwrap();
    assert_eq!(q.requeue_dispatch(&d).unwrap(), JobProgress::Running { pending: 3, outstanding: 0 });

    let again = q.next_bundle("j", 3).unwrap();
    assert_eq!(again.positions(), vec![0, 1, 2]);
    let stats = q.stats().snapshot();
    assert_eq!(stats.tasks_queued_total, 3);
    assert_eq!(stats.tasks_in_queue, 0);
}

#[test]
fn suspended_jobs_are_skipped_until_resumed() {
    init_tracing();
    let q = PriorityJobQueue::default();
    q.add_bundle(BundleBuilder::new("held").priority(10).suspended(true).tasks(0..1).build())
        .unwrap();
    q.add_bundle(simple_bundle("free", 0, 1)).unwrap();

    assert_eq!(q.next_dispatchable().as_deref(), Some("free"));
    assert!(q.resume_job("held"));
    assert_eq!(q.next_dispatchable().as_deref(), Some("held"));
    assert!(q.suspend_job("held"));
    assert_eq!(q.next_dispatchable().as_deref(), Some("free"));
}

#[test]
fn broadcast_jobs_get_one_copy_per_worker() {
    init_tracing();
    let q = PriorityJobQueue::default();

    // No worker yet: parked.
    q.add_bundle(BundleBuilder::new("bc").broadcast(true).tasks(0..1).build())
        .unwrap();
    assert!(q.is_empty());

    q.register_worker("w1");
    q.register_worker("w2");
    assert_eq!(q.all_job_uuids(), vec!["bc:w1"]);

    q.add_bundle(BundleBuilder::new("bc2").broadcast(true).tasks(0..1).build())
        .unwrap();
    assert_eq!(q.all_job_uuids(), vec!["bc2:w1", "bc2:w2", "bc:w1"]);

    assert_eq!(q.next_dispatchable_for("w2").as_deref(), Some("bc2:w2"));
    assert_eq!(q.next_dispatchable_for("w1").as_deref(), Some("bc:w1"));
}

#[test]
fn listener_sees_the_lifecycle_of_a_job() {
    init_tracing();
    let q = PriorityJobQueue::default();
    let mut rx = listen(&q);

    q.add_bundle(simple_bundle("j", 3, 1)).unwrap();
    run_to_completion(&q, "j");

    assert_eq!(
        drain(&mut rx),
        vec![
            QueueEvent::JobQueued { uuid: "j".into(), priority: 3 },
            QueueEvent::BundleAdded { uuid: "j".into(), tasks: 1, requeued: false },
            QueueEvent::BundleRemoved { uuid: "j".into(), tasks: 1 },
            QueueEvent::JobEnded { uuid: "j".into() },
        ]
    );
}
