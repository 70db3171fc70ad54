// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error type for scheduling operations.

use std::sync::Arc;

use thiserror::Error;

use crate::scheduler::Generation;
use crate::task::TaskId;
use crate::timer::TimerId;

/// Errors reported by timers and schedulers.
///
/// Panics raised by task callbacks are not errors of this type: they are
/// caught and logged at the [`crate::MainQueue`] drain boundary.
#[derive(Debug, Clone, Error)]
pub enum TimerError {
    /// The task is already held by a timer. A task belongs to at most one
    /// timer at a time; cancel it before scheduling it again.
    #[error("{task} may not be scheduled twice (already scheduled on {timer})")]
    AlreadyScheduled {
        /// The task that was handed in.
        task: TaskId,
        /// The timer that currently holds it.
        timer: TimerId,
    },
    /// The scheduler generation backing the timer has been disposed.
    #[error("scheduler generation {0} has been disposed")]
    SchedulerDisposed(Generation),
    /// Collecting due tasks from a timer failed. Fatal for the generation.
    #[error("{timer} failed while collecting due tasks: {reason}")]
    UpdateFailed {
        /// Label of the offending timer.
        timer: String,
        /// Panic message captured from the failed scan.
        reason: String,
    },
    /// The background waiter thread could not be started.
    #[error("failed to spawn scheduler thread: {0}")]
    Spawn(Arc<std::io::Error>),
}
