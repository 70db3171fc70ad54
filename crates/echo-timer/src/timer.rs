// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Timers: owned collections of scheduled tasks.
//!
//! A timer's table is the authoritative record of which tasks it holds. The
//! waiter thread scans each running timer once per cycle via
//! [`TimerShared::update`], which posts due tasks to the main queue and
//! reports how long the waiter may sleep.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tracing::debug;

use crate::error::TimerError;
use crate::main_queue::MainQueue;
use crate::scheduler::Scheduler;
use crate::sync::{lock, millis};
use crate::task::{Repeat, Task, TaskId, TaskState};

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique timer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct TimerId(u64);

impl TimerId {
    fn next() -> Self {
        Self(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying raw value.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

pub(crate) struct TimerTable {
    pub(crate) tasks: BTreeMap<TaskId, Task>,
    /// Logical instant the timer was frozen at, while stopped.
    pub(crate) stopped_at_millis: Option<u64>,
}

impl TimerTable {
    fn shift(&self, by: u64) {
        if by == 0 {
            return;
        }
        for task in self.tasks.values() {
            let mut slot = task.lock_slot();
            slot.execute_at_millis = slot.execute_at_millis.saturating_add(by);
        }
    }
}

pub(crate) struct TimerShared {
    id: TimerId,
    name: Option<Cow<'static, str>>,
    table: Mutex<TimerTable>,
    #[cfg(test)]
    pub(crate) fail_next_update: std::sync::atomic::AtomicBool,
}

impl TimerShared {
    fn new(name: Option<Cow<'static, str>>) -> Self {
        Self {
            id: TimerId::next(),
            name,
            table: Mutex::new(TimerTable {
                tasks: BTreeMap::new(),
                stopped_at_millis: None,
            }),
            #[cfg(test)]
            fail_next_update: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> TimerId {
        self.id
    }

    pub(crate) fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} \"{name}\"", self.id),
            None => self.id.to_string(),
        }
    }

    pub(crate) fn table(&self) -> &Mutex<TimerTable> {
        &self.table
    }

    /// Moves every held deadline `by` milliseconds later.
    pub(crate) fn delay(&self, by: u64) {
        lock(&self.table).shift(by);
    }

    /// Posts every task due at `now` to `queue` and returns the smaller of
    /// `min_wait` and the time until this timer's next deadline.
    ///
    /// Due tasks are posted in deadline order, ties broken by task id, so a
    /// late scan still fires them in the order they came due. Due one-shot
    /// tasks are detached before their firing is posted, so a callback may
    /// reschedule its own task. Repeating tasks are re-armed at
    /// `now + interval`. Callbacks are never run here.
    pub(crate) fn update(&self, now: u64, min_wait: u64, queue: &MainQueue) -> u64 {
        self.check_injected_failure();
        let mut wait = min_wait;
        let mut due = Vec::new();
        {
            let mut table = lock(&self.table);
            table.tasks.retain(|_, task| {
                let mut slot = task.lock_slot();
                if slot.execute_at_millis > now {
                    wait = wait.min(slot.execute_at_millis - now);
                    return true;
                }
                due.push((slot.execute_at_millis, task.id(), task.clone()));
                match slot.repeat.after_firing() {
                    None => {
                        slot.detach(TaskState::Cancelled);
                        false
                    }
                    Some(next) => {
                        slot.execute_at_millis = now.saturating_add(slot.interval_millis);
                        wait = wait.min(slot.interval_millis);
                        slot.repeat = next;
                        true
                    }
                }
            });
        }

        due.sort_by_key(|(deadline, id, _)| (*deadline, *id));
        let timer_label = self.label();
        for (_, _, task) in due {
            let label = format!("{} on {timer_label}", task.label());
            queue.post_labeled(label, move || task.run());
        }
        wait
    }

    /// Detaches every held task as [`TaskState::Unscheduled`] and empties the
    /// table. The tasks are dropped after the table lock is released.
    pub(crate) fn release_all(&self) -> usize {
        let released = {
            let mut table = lock(&self.table);
            for task in table.tasks.values() {
                task.lock_slot().detach(TaskState::Unscheduled);
            }
            std::mem::take(&mut table.tasks)
        };
        released.len()
    }

    #[cfg(test)]
    #[allow(clippy::panic)]
    fn check_injected_failure(&self) {
        if self.fail_next_update.swap(false, Ordering::SeqCst) {
            panic!("injected update failure");
        }
    }

    #[cfg(not(test))]
    #[inline]
    fn check_injected_failure(&self) {}
}

impl Drop for TimerShared {
    fn drop(&mut self) {
        let id = self.id;
        let table = self.table.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in table.tasks.values() {
            let mut slot = task.lock_slot();
            if slot.owned_by(id) {
                slot.detach(TaskState::Unscheduled);
            }
        }
        table.tasks.clear();
    }
}

/// Non-owning back-reference from a task to the timer holding it.
#[derive(Clone)]
pub(crate) struct TimerLink {
    timer: Weak<TimerShared>,
    timer_id: TimerId,
}

impl TimerLink {
    fn new(timer: &Arc<TimerShared>) -> Self {
        Self {
            timer: Arc::downgrade(timer),
            timer_id: timer.id(),
        }
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<TimerShared>> {
        self.timer.upgrade()
    }

    pub(crate) fn timer_id(&self) -> TimerId {
        self.timer_id
    }
}

/// A set of scheduled tasks watched by one [`Scheduler`] generation.
///
/// Clones are handles to the same timer. A running timer stays registered
/// with its scheduler (and keeps firing) until it is stopped or the
/// generation is disposed, even if every handle is dropped.
#[derive(Clone)]
pub struct Timer {
    shared: Arc<TimerShared>,
    scheduler: Scheduler,
}

impl Timer {
    /// Creates a running timer on `scheduler`.
    pub fn new(scheduler: &Scheduler) -> Result<Self, TimerError> {
        Self::build(scheduler, None)
    }

    /// Like [`Timer::new`], with a name used in logs and error reports.
    pub fn named<N>(scheduler: &Scheduler, name: N) -> Result<Self, TimerError>
    where
        N: Into<Cow<'static, str>>,
    {
        Self::build(scheduler, Some(name.into()))
    }

    fn build(scheduler: &Scheduler, name: Option<Cow<'static, str>>) -> Result<Self, TimerError> {
        let timer = Self::from_parts(Arc::new(TimerShared::new(name)), scheduler.clone());
        scheduler.lock_state().register(&timer.shared);
        timer.start()?;
        Ok(timer)
    }

    pub(crate) fn from_parts(shared: Arc<TimerShared>, scheduler: Scheduler) -> Self {
        Self { shared, scheduler }
    }

    pub(crate) fn shared(&self) -> &Arc<TimerShared> {
        &self.shared
    }

    /// This timer's id.
    pub fn id(&self) -> TimerId {
        self.shared.id
    }

    /// This timer's name, if any.
    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    /// The scheduler generation this timer belongs to.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Schedules `task` to fire after `delay`, then `repeat` more times every
    /// `interval`. Returns a handle to the same task.
    ///
    /// Fails with [`TimerError::AlreadyScheduled`] if any timer already holds
    /// the task, and with [`TimerError::SchedulerDisposed`] once the
    /// generation is gone. While this timer is stopped, or the scheduler is
    /// paused, `delay` counts from the instant time was frozen.
    pub fn schedule(
        &self,
        task: &Task,
        delay: Duration,
        interval: Duration,
        repeat: Repeat,
    ) -> Result<Task, TimerError> {
        let execute_at = {
            let state = self.scheduler.lock_state();
            if state.disposed {
                return Err(TimerError::SchedulerDisposed(self.scheduler.generation()));
            }
            let mut table = lock(&self.shared.table);
            let now = table
                .stopped_at_millis
                .unwrap_or_else(|| state.logical_now(self.scheduler.clock().as_ref()));
            let mut slot = task.lock_slot();
            if let Some(link) = &slot.owner {
                return Err(TimerError::AlreadyScheduled {
                    task: task.id(),
                    timer: link.timer_id(),
                });
            }
            slot.execute_at_millis = now.saturating_add(millis(delay));
            slot.interval_millis = millis(interval);
            slot.repeat = repeat;
            slot.owner = Some(TimerLink::new(&self.shared));
            slot.state = TaskState::Scheduled;
            table.tasks.insert(task.id(), task.clone());
            slot.execute_at_millis
        };
        self.scheduler.wake();
        debug!(
            task = %task.id(),
            timer = %self.id(),
            execute_at,
            interval_ms = millis(interval),
            repeat = repeat.count(),
            "task scheduled"
        );
        Ok(task.clone())
    }

    /// Fires `task` once, as soon as possible but no sooner than the next
    /// waiter scan.
    pub fn post(&self, task: &Task) -> Result<Task, TimerError> {
        self.schedule(task, Duration::ZERO, Duration::ZERO, Repeat::Once)
    }

    /// Fires `task` once after `delay`.
    pub fn schedule_once(&self, task: &Task, delay: Duration) -> Result<Task, TimerError> {
        self.schedule(task, delay, Duration::ZERO, Repeat::Once)
    }

    /// Fires `task` after `delay`, then every `interval` until cancelled.
    pub fn schedule_repeating(
        &self,
        task: &Task,
        delay: Duration,
        interval: Duration,
    ) -> Result<Task, TimerError> {
        self.schedule(task, delay, interval, Repeat::Forever)
    }

    /// Wraps `callback` in a new task and fires it once after `delay`.
    pub fn run_after<F>(&self, delay: Duration, callback: F) -> Result<Task, TimerError>
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_once(&Task::new(callback), delay)
    }

    /// Wraps `callback` in a new task and schedules it with `repeat`.
    pub fn run_every<F>(
        &self,
        delay: Duration,
        interval: Duration,
        repeat: Repeat,
        callback: F,
    ) -> Result<Task, TimerError>
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule(&Task::new(callback), delay, interval, repeat)
    }

    /// Releases every held task back to [`TaskState::Unscheduled`].
    pub fn clear(&self) {
        let released = self.shared.release_all();
        debug!(timer = %self.id(), released, "timer cleared");
    }

    /// Leaves the scheduler's active set. Held tasks stay scheduled but are
    /// frozen: they do not fire, and the stopped time is not counted against
    /// their delays.
    pub fn stop(&self) {
        let mut state = self.scheduler.lock_state();
        if !state.deactivate(&self.shared) {
            return;
        }
        let frozen_at = state.logical_now(self.scheduler.clock().as_ref());
        lock(&self.shared.table).stopped_at_millis = Some(frozen_at);
        debug!(timer = %self.id(), frozen_at, "timer stopped");
    }

    /// Rejoins the scheduler's active set, shifting held deadlines by the
    /// time spent stopped. A no-op when already running.
    pub fn start(&self) -> Result<(), TimerError> {
        {
            let mut state = self.scheduler.lock_state();
            if state.disposed {
                return Err(TimerError::SchedulerDisposed(self.scheduler.generation()));
            }
            if state.is_active(&self.shared) {
                return Ok(());
            }
            let now = state.logical_now(self.scheduler.clock().as_ref());
            {
                let mut table = lock(&self.shared.table);
                if let Some(stopped_at) = table.stopped_at_millis.take() {
                    table.shift(now.saturating_sub(stopped_at));
                }
            }
            state.active.push(Arc::clone(&self.shared));
        }
        self.scheduler.wake();
        debug!(timer = %self.id(), "timer started");
        Ok(())
    }

    /// True while registered with the scheduler.
    pub fn is_running(&self) -> bool {
        self.scheduler.lock_state().is_active(&self.shared)
    }

    /// Moves every held deadline `by` later.
    pub fn delay(&self, by: Duration) {
        self.shared.delay(millis(by));
    }

    /// True when no task is held. A snapshot: the waiter may detach tasks at
    /// any time.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tasks held.
    pub fn len(&self) -> usize {
        lock(&self.shared.table).tasks.len()
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("generation", &self.scheduler.generation())
            .field("tasks", &self.len())
            .finish()
    }
}
