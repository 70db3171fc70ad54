// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reusable units of deferred work.
//!
//! A [`Task`] is a descriptor, not a one-shot token: it can be scheduled,
//! fire, be cancelled and be scheduled again. While scheduled it is held by
//! exactly one timer's table; the task itself keeps only a non-owning link
//! back to that timer (a `Weak` plus the timer id), so ownership stays
//! acyclic.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use crate::error::TimerError;
use crate::sync::lock;
use crate::timer::{Timer, TimerId, TimerLink};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique task identifier, issued in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying raw value.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Scheduling state of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Never scheduled, or released by [`Timer::clear`].
    Unscheduled,
    /// Held by a timer and waiting for its deadline.
    Scheduled,
    /// Cancelled explicitly, or detached after its final firing.
    Cancelled,
}

/// How many more times a task fires after its first firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    /// Fire once, then detach.
    Once,
    /// Fire once, then `n` more times at the interval.
    Times(u32),
    /// Fire at the interval until cancelled.
    Forever,
}

impl Repeat {
    /// Maps the integer convention: `0` fires once, a positive `n` repeats
    /// `n` more times, any negative value repeats forever.
    pub fn from_count(count: i32) -> Self {
        match u32::try_from(count) {
            Ok(0) => Self::Once,
            Ok(n) => Self::Times(n),
            Err(_) => Self::Forever,
        }
    }

    /// Inverse of [`Repeat::from_count`] (saturating at `i32::MAX`).
    pub fn count(self) -> i32 {
        match self {
            Self::Once => 0,
            Self::Times(n) => i32::try_from(n).unwrap_or(i32::MAX),
            Self::Forever => -1,
        }
    }

    /// The repeat after one more firing, or `None` once exhausted.
    pub(crate) fn after_firing(self) -> Option<Self> {
        match self {
            Self::Once | Self::Times(0) => None,
            Self::Times(1) => Some(Self::Once),
            Self::Times(n) => Some(Self::Times(n - 1)),
            Self::Forever => Some(Self::Forever),
        }
    }
}

impl From<i32> for Repeat {
    fn from(count: i32) -> Self {
        Self::from_count(count)
    }
}

/// Mutable scheduling fields, guarded by the task's own lock.
pub(crate) struct TaskSlot {
    pub(crate) state: TaskState,
    pub(crate) execute_at_millis: u64,
    pub(crate) interval_millis: u64,
    pub(crate) repeat: Repeat,
    pub(crate) owner: Option<TimerLink>,
}

impl TaskSlot {
    /// Drops the owner link and zeroes the deadline.
    pub(crate) fn detach(&mut self, state: TaskState) {
        self.owner = None;
        self.state = state;
        self.execute_at_millis = 0;
    }

    pub(crate) fn owned_by(&self, timer: TimerId) -> bool {
        self.owner.as_ref().is_some_and(|link| link.timer_id() == timer)
    }
}

struct TaskInner {
    id: TaskId,
    name: Option<Cow<'static, str>>,
    callback: Mutex<Box<dyn FnMut() + Send + 'static>>,
    slot: Mutex<TaskSlot>,
}

/// A schedulable callback with delay, interval and repeat state.
///
/// Clones are handles to the same task.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// A task running `callback` each time it fires.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::build(None, callback)
    }

    /// Like [`Task::new`], with a name used in logs and panic reports.
    pub fn named<N, F>(name: N, callback: F) -> Self
    where
        N: Into<Cow<'static, str>>,
        F: FnMut() + Send + 'static,
    {
        Self::build(Some(name.into()), callback)
    }

    fn build<F>(name: Option<Cow<'static, str>>, callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self {
            inner: Arc::new(TaskInner {
                id: TaskId::next(),
                name,
                callback: Mutex::new(Box::new(callback)),
                slot: Mutex::new(TaskSlot {
                    state: TaskState::Unscheduled,
                    execute_at_millis: 0,
                    interval_millis: 0,
                    repeat: Repeat::Once,
                    owner: None,
                }),
            }),
        }
    }

    /// This task's id.
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// This task's name, if any.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub(crate) fn label(&self) -> String {
        match self.name() {
            Some(name) => format!("{} \"{name}\"", self.id()),
            None => self.id().to_string(),
        }
    }

    /// Schedules this task on `timer`. Equivalent to [`Timer::schedule`].
    pub fn schedule(
        &self,
        timer: &Timer,
        delay: Duration,
        interval: Duration,
        repeat: Repeat,
    ) -> Result<(), TimerError> {
        timer.schedule(self, delay, interval, repeat).map(|_| ())
    }

    /// Runs the callback on the calling thread.
    ///
    /// Timers never call this themselves; they post it to the
    /// [`crate::MainQueue`]. A callback may cancel or reschedule its own task,
    /// but must not call `run` on itself.
    pub fn run(&self) {
        let mut guard = lock(&self.inner.callback);
        let callback: &mut (dyn FnMut() + Send) = &mut **guard;
        callback();
    }

    /// Stops future firings. Idempotent and callable from any thread at any
    /// time, including from inside this task's own callback.
    ///
    /// Cancellation prevents future firings only: if the waiter already
    /// posted a firing to the main queue, that firing still runs once.
    pub fn cancel(&self) {
        loop {
            let link = {
                let mut slot = self.lock_slot();
                match slot.owner.clone() {
                    Some(link) => link,
                    None => {
                        slot.execute_at_millis = 0;
                        return;
                    }
                }
            };

            let Some(timer) = link.upgrade() else {
                // The timer is being dropped; its drop releases held tasks.
                let mut slot = self.lock_slot();
                if slot.owned_by(link.timer_id()) {
                    slot.detach(TaskState::Cancelled);
                }
                return;
            };

            // Lock order: timer table, then task slot.
            let mut table = lock(timer.table());
            let mut slot = self.lock_slot();
            if slot.owned_by(link.timer_id()) {
                table.tasks.remove(&self.id());
                slot.detach(TaskState::Cancelled);
                debug!(task = %self.id(), timer = %link.timer_id(), "task cancelled");
                return;
            }
            // Fired, cleared or moved between the two locks; look again.
        }
    }

    /// True while a timer holds this task.
    ///
    /// This is a snapshot: the waiter may fire and detach the task right
    /// after it is taken.
    pub fn is_scheduled(&self) -> bool {
        self.lock_slot().owner.is_some()
    }

    /// Current scheduling state.
    pub fn state(&self) -> TaskState {
        self.lock_slot().state
    }

    /// Absolute deadline on the scheduler clock, in milliseconds (0 when not
    /// scheduled).
    pub fn execute_at_millis(&self) -> u64 {
        self.lock_slot().execute_at_millis
    }

    /// Repeat interval in milliseconds (0 for one-shot tasks).
    pub fn interval_millis(&self) -> u64 {
        self.lock_slot().interval_millis
    }

    /// Remaining repeats.
    pub fn repeat(&self) -> Repeat {
        self.lock_slot().repeat
    }

    /// The timer currently holding this task.
    pub fn timer_id(&self) -> Option<TimerId> {
        self.lock_slot().owner.as_ref().map(TimerLink::timer_id)
    }

    pub(crate) fn lock_slot(&self) -> MutexGuard<'_, TaskSlot> {
        lock(&self.inner.slot)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.lock_slot();
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &slot.state)
            .field("execute_at_millis", &slot.execute_at_millis)
            .field("interval_millis", &slot.interval_millis)
            .field("repeat", &slot.repeat)
            .finish()
    }
}
