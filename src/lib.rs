// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::TaskGraph;
use crate::engine::{
    DispatchReport, Dispatcher, InMemoryPersistence, PriorityJobQueue, RuntimeEvent,
    TimerScheduleService,
};
use crate::exec::SimulatedExecutor;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - plan loading
/// - the priority queue with its timer and persistence collaborators
/// - the dispatcher and simulated workers
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let plan_path = PathBuf::from(&args.plan);
    let cfg = load_and_validate(&plan_path)?;

    if args.dry_run {
        print_dry_run(&cfg)?;
        return Ok(());
    }

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let schedules = TimerScheduleService::new(rt_tx.clone())?;
    let queue = Arc::new(
        PriorityJobQueue::new(cfg.queue_config())
            .with_persistence(Arc::new(InMemoryPersistence::new()))
            .with_schedule_service(Arc::new(schedules)),
    );

    let executor = SimulatedExecutor::new(rt_tx.clone(), cfg.task_duration());
    let dispatcher = Dispatcher::new(
        Arc::clone(&queue),
        rt_rx,
        executor,
        cfg.worker_ids(),
        cfg.dispatch_options(),
    );

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let bundles = cfg.client_bundles()?;
    info!(jobs = bundles.len(), "submitting plan");
    for bundle in bundles {
        queue.add_bundle(bundle)?;
    }

    let report = dispatcher.run().await?;
    print_report(&report, &queue);
    Ok(())
}

fn print_report(report: &DispatchReport, queue: &PriorityJobQueue) {
    println!("jobgrid run");
    println!("  tasks executed: {}", report.tasks_executed);
    println!("  completion order:");
    for (i, uuid) in report.completed.iter().enumerate() {
        println!("    {}. {uuid}", i + 1);
    }
    if !report.cancelled.is_empty() {
        println!("  cancelled: {:?}", report.cancelled);
    }
    if !report.stuck.is_empty() {
        println!("  stuck: {:?}", report.stuck);
    }

    let stats = queue.stats().snapshot();
    println!(
        "  queue: {} jobs queued, {} tasks queued in total",
        stats.jobs_queued, stats.tasks_queued_total
    );
    if let Some(wait) = stats.mean_wait {
        println!("  mean queue wait: {wait:?}");
    }
}

/// Print jobs, their dependency specs and task order.
fn print_dry_run(cfg: &ConfigFile) -> Result<()> {
    println!("jobgrid dry-run");
    println!(
        "  queue.removal_wait_timeout_ms = {}",
        cfg.queue.removal_wait_timeout_ms
    );
    println!(
        "  dispatch: {} workers, {} tasks per bundle",
        cfg.dispatch.workers, cfg.dispatch.tasks_per_bundle
    );
    println!();

    println!("jobs ({}):", cfg.job.len());
    for bundle in cfg.client_bundles()? {
        let sla = &bundle.sla;
        println!("  - {} (uuid {})", bundle.name, bundle.uuid);
        println!("      priority: {}", sla.priority);

        let spec = &sla.dependency_spec;
        if let Some(ref id) = spec.id {
            println!("      dependency_id: {id}");
            if !spec.depends_on.is_empty() {
                println!("      depends_on: {:?}", spec.depends_on);
            }
            if spec.cascade_cancellation {
                println!("      cascade_cancellation: true");
            }
            if spec.remove_upon_completion {
                println!("      remove_upon_completion: true");
            }
        }
        if sla.broadcast {
            println!("      broadcast: true");
        }
        if sla.suspended {
            println!("      suspended: true");
        }
        if let Some(delay) = sla.start_delay {
            println!("      start_delay: {delay:?}");
        }
        if let Some(expiration) = sla.expiration {
            println!("      expiration: {expiration:?}");
        }

        let graph = TaskGraph::from_tasks(&bundle.tasks)?;
        println!("      task order: {:?}", graph.topological_sort_dfs());
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
