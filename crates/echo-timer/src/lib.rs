// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! echo-timer: deferred tasks executed on the host's main loop.
//!
//! Callers hand a [`Task`] to a [`Timer`]. Every running timer of one
//! [`Scheduler`] generation is watched by a single background waiter thread
//! which sleeps until the earliest deadline, then posts each due task onto the
//! [`MainQueue`]. The host drains that queue once per frame with
//! [`MainQueue::run_pending`], so task callbacks always run on the host thread.
//!
//! Lock order is fixed across the crate: scheduler state, then a timer's task
//! table, then a task's slot. The main queue's locks are independent of all
//! three.
#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod error;
pub mod frame;
pub mod lifecycle;
pub mod main_queue;
pub mod scheduler;
pub mod shared;
mod sync;
pub mod task;
pub mod timer;

pub use clock::{Clock, ManualClock, Stopwatch, SystemClock, NANOS_PER_MILLI};
pub use config::{ConfigError, SchedulerConfig};
pub use error::TimerError;
pub use frame::{ticks_to_duration, FrameTime, TICKS_PER_HOUR, TICKS_PER_MINUTE, TICKS_PER_SECOND};
pub use lifecycle::{Lifecycle, LifecycleListener, ListenerId};
pub use main_queue::{DrainReport, MainQueue};
pub use scheduler::{Generation, Scheduler, SchedulerBuilder};
pub use task::{Repeat, Task, TaskId, TaskState};
pub use timer::{Timer, TimerId};
