// src/engine/stats.rs

//! Informational queue counters.
//!
//! Updated outside the queue lock, so a snapshot is only eventually
//! consistent with the queue contents.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct QueueStats {
    jobs_queued: AtomicUsize,
    tasks_queued_total: AtomicUsize,
    tasks_in_queue: AtomicI64,
    wait_time_total_us: AtomicU64,
    wait_samples: AtomicU64,
}

impl QueueStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_job_queued(&self) {
        self.jobs_queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Fresh tasks entered the dispatch pool.
    pub fn record_tasks_added(&self, count: usize) {
        self.tasks_queued_total.fetch_add(count, Ordering::Relaxed);
        self.tasks_in_queue.fetch_add(count as i64, Ordering::Relaxed);
    }

    /// Previously dispatched tasks returned to the pool.
    pub fn record_tasks_requeued(&self, count: usize) {
        self.tasks_in_queue.fetch_add(count as i64, Ordering::Relaxed);
    }

    /// Tasks left the pool after waiting `waited` since their job was queued.
    pub fn record_tasks_dispatched(&self, count: usize, waited: Duration) {
        self.tasks_in_queue.fetch_sub(count as i64, Ordering::Relaxed);
        self.wait_time_total_us
            .fetch_add(waited.as_micros() as u64 * count as u64, Ordering::Relaxed);
        self.wait_samples.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Tasks left the pool without being dispatched (cancellation, close).
    pub fn record_tasks_dropped(&self, count: usize) {
        self.tasks_in_queue.fetch_sub(count as i64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueStatsSnapshot {
        let samples = self.wait_samples.load(Ordering::Relaxed);
        let total_us = self.wait_time_total_us.load(Ordering::Relaxed);
        QueueStatsSnapshot {
            jobs_queued: self.jobs_queued.load(Ordering::Relaxed),
            tasks_queued_total: self.tasks_queued_total.load(Ordering::Relaxed),
            tasks_in_queue: self.tasks_in_queue.load(Ordering::Relaxed).max(0) as usize,
            mean_wait: (samples > 0).then(|| Duration::from_micros(total_us / samples)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatsSnapshot {
    pub jobs_queued: usize,
    pub tasks_queued_total: usize,
    pub tasks_in_queue: usize,
    /// Mean time a dispatched task spent queued.
    pub mean_wait: Option<Duration>,
}
