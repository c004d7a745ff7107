// src/types.rs

use std::fmt;

/// Position of a task within its job. The only cross-process task identifier.
pub type Position = u32;

/// Canonical job uuid type used throughout the queue.
pub type JobUuid = String;

/// Lifecycle of a job as seen by the queue.
///
/// `Queued -> (PartiallyDispatched <-> Queued)* -> DispatchingLast -> Ended`.
/// `Ended` is terminal: a resubmission with the same uuid waits for the
/// ended job to be removed before a new `Queued` job can exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobState {
    /// Sitting in the priority index with nothing dispatched yet.
    #[default]
    Queued,
    /// Some tasks handed out, some still pending in the priority index.
    PartiallyDispatched,
    /// Every pending task has been handed out; waiting for completions.
    DispatchingLast,
    /// All tasks done or cancelled; removal from the job map pending.
    Ended,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::PartiallyDispatched => write!(f, "partially-dispatched"),
            JobState::DispatchingLast => write!(f, "dispatching-last"),
            JobState::Ended => write!(f, "ended"),
        }
    }
}
