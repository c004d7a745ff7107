// src/engine/events.rs

//! Notifications emitted by the priority queue.
//!
//! Events are collected while the queue lock is held and delivered to the
//! registered listeners once it has been released, so a listener may call
//! back into the queue.

use tokio::sync::mpsc;
use tracing::trace;

use crate::types::JobUuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// A new job entered the queue.
    JobQueued { uuid: JobUuid, priority: i32 },
    /// Tasks were added to the dispatch pool.
    BundleAdded {
        uuid: JobUuid,
        tasks: usize,
        requeued: bool,
    },
    /// Tasks were peeled off a job by `next_bundle`.
    BundleRemoved { uuid: JobUuid, tasks: usize },
    /// The job left the job map.
    JobEnded { uuid: JobUuid },
    /// Priority or suspension state changed.
    JobUpdated {
        uuid: JobUuid,
        priority: i32,
        suspended: bool,
    },
    /// The last pending dependency of this job completed.
    JobReleased { uuid: JobUuid },
    JobCancelled { uuid: JobUuid },
}

impl QueueEvent {
    pub fn uuid(&self) -> &str {
        match self {
            QueueEvent::JobQueued { uuid, .. }
            | QueueEvent::BundleAdded { uuid, .. }
            | QueueEvent::BundleRemoved { uuid, .. }
            | QueueEvent::JobEnded { uuid }
            | QueueEvent::JobUpdated { uuid, .. }
            | QueueEvent::JobReleased { uuid }
            | QueueEvent::JobCancelled { uuid } => uuid,
        }
    }
}

/// Receives queue notifications.
pub trait QueueListener: Send + Sync {
    fn on_event(&self, event: &QueueEvent);
}

impl QueueListener for mpsc::UnboundedSender<QueueEvent> {
    fn on_event(&self, event: &QueueEvent) {
        if self.send(event.clone()).is_err() {
            trace!(?event, "queue event receiver dropped");
        }
    }
}
