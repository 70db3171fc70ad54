// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The background waiter shared by every running timer of one generation.
//!
//! Each cycle the waiter locks the scheduler state, asks every active timer
//! to post its due tasks and report its next deadline, then sleeps on a
//! condvar until the earliest deadline or the configured ceiling. Scheduling,
//! starting a timer, pausing, resuming and disposing all notify the condvar,
//! so a new earlier deadline is picked up immediately.
//!
//! A generation ends when it is disposed (explicitly, through the lifecycle,
//! or by [`crate::shared`] noticing a newer generation) or when a timer scan
//! panics. Either way the waiter thread exits on its next wakeup.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, instrument, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::error::TimerError;
use crate::lifecycle::LifecycleListener;
use crate::main_queue::MainQueue;
use crate::sync::{lock, panic_message};
use crate::timer::{Timer, TimerShared};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Identifies one run of the owning host context.
///
/// Issued monotonically by [`Generation::next`]; zero is never issued. A
/// host that tears down and rebuilds its context asks for a new generation,
/// and [`crate::shared`] replaces any scheduler built for an older one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Generation(u64);

impl Generation {
    /// Issues a fresh generation, greater than every one issued before.
    pub fn next() -> Self {
        Self(NEXT_GENERATION.fetch_add(1, Ordering::Relaxed))
    }

    /// Constructs a generation from a raw value (tests and persisted ids).
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying raw value.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) struct SchedulerState {
    pub(crate) active: Vec<Arc<TimerShared>>,
    /// Every timer built on this generation, running or stopped.
    timers: Vec<Weak<TimerShared>>,
    pub(crate) paused_at_millis: Option<u64>,
    pub(crate) disposed: bool,
    failure: Option<TimerError>,
}

impl SchedulerState {
    /// The instant scheduling counts from: frozen while paused.
    pub(crate) fn logical_now(&self, clock: &dyn Clock) -> u64 {
        self.paused_at_millis.unwrap_or_else(|| clock.now_millis())
    }

    pub(crate) fn is_active(&self, timer: &Arc<TimerShared>) -> bool {
        self.active.iter().any(|t| Arc::ptr_eq(t, timer))
    }

    pub(crate) fn register(&mut self, timer: &Arc<TimerShared>) {
        self.timers.retain(|t| t.strong_count() > 0);
        self.timers.push(Arc::downgrade(timer));
    }

    /// Removes `timer` from the active set; false if it was not there.
    pub(crate) fn deactivate(&mut self, timer: &Arc<TimerShared>) -> bool {
        match self.active.iter().position(|t| Arc::ptr_eq(t, timer)) {
            Some(index) => {
                self.active.remove(index);
                true
            }
            None => false,
        }
    }
}

struct SchedulerShared {
    generation: Generation,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    queue: MainQueue,
    state: Mutex<SchedulerState>,
    wakeup: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
    default_timer: Mutex<Option<Arc<TimerShared>>>,
}

/// Releases the tasks held by every timer still alive in `timers`. Task
/// callbacks may hold handles to their own timer, so a disposed generation
/// is only freed once its tables are emptied.
fn release_timers(timers: Vec<Weak<TimerShared>>) -> usize {
    timers
        .iter()
        .filter_map(Weak::upgrade)
        .map(|timer| timer.release_all())
        .sum()
}

impl SchedulerShared {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        lock(&self.state)
    }

    /// One pass over the active timers. Returns the wait until the next
    /// deadline in milliseconds, floored at 1 so zero-interval repeats cannot
    /// spin the waiter.
    fn scan(&self, state: &mut SchedulerState) -> Result<u64, TimerError> {
        let ceiling = self.config.wait_ceiling_ms;
        if state.paused_at_millis.is_some() {
            return Ok(ceiling);
        }
        let now = self.clock.now_millis();
        let mut wait = ceiling;
        let mut failed = None;
        for timer in &state.active {
            match panic::catch_unwind(AssertUnwindSafe(|| timer.update(now, wait, &self.queue))) {
                Ok(next) => wait = next,
                Err(payload) => {
                    failed = Some(TimerError::UpdateFailed {
                        timer: timer.label(),
                        reason: panic_message(payload.as_ref()),
                    });
                    break;
                }
            }
        }
        if let Some(err) = failed {
            error!(generation = %self.generation, error = %err, "timer scan failed; disposing generation");
            state.failure = Some(err.clone());
            state.disposed = true;
            state.active.clear();
            release_timers(std::mem::take(&mut state.timers));
            self.wakeup.notify_all();
            return Err(err);
        }
        trace!(generation = %self.generation, now, wait, "scan complete");
        Ok(wait.max(1))
    }
}

/// Body of the waiter thread. Holds only a weak reference between cycles so
/// a generation nobody references can be freed.
fn run_waiter(weak: Weak<SchedulerShared>) {
    let mut generation = None;
    loop {
        let Some(shared) = weak.upgrade() else {
            break;
        };
        generation = Some(shared.generation);
        {
            let mut state = shared.lock_state();
            if state.disposed {
                break;
            }
            let Ok(wait) = shared.scan(&mut state) else {
                break;
            };
            let (state, _timeout) = shared
                .wakeup
                .wait_timeout(state, Duration::from_millis(wait))
                .unwrap_or_else(PoisonError::into_inner);
            drop(state);
        }
    }
    if let Some(generation) = generation {
        debug!(%generation, "waiter thread exiting");
    }
}

/// Builder for a [`Scheduler`] generation.
#[must_use]
pub struct SchedulerBuilder {
    generation: Generation,
    queue: MainQueue,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
}

impl SchedulerBuilder {
    /// Replaces the default configuration.
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the [`SystemClock`] deadlines are measured on.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn build(self) -> Scheduler {
        Scheduler {
            shared: Arc::new(SchedulerShared {
                generation: self.generation,
                config: self.config.normalized(),
                clock: self.clock,
                queue: self.queue,
                state: Mutex::new(SchedulerState {
                    active: Vec::new(),
                    timers: Vec::new(),
                    paused_at_millis: None,
                    disposed: false,
                    failure: None,
                }),
                wakeup: Condvar::new(),
                thread: Mutex::new(None),
                default_timer: Mutex::new(None),
            }),
        }
    }

    /// Builds a scheduler with no thread; the host drives it with
    /// [`Scheduler::tick`].
    pub fn manual(self) -> Scheduler {
        let scheduler = self.build();
        info!(generation = %scheduler.generation(), "manual scheduler ready");
        scheduler
    }

    /// Builds a scheduler and starts its waiter thread.
    pub fn spawn(self) -> Result<Scheduler, TimerError> {
        let scheduler = self.build();
        let generation = scheduler.generation();
        let name = format!("{}-{generation}", scheduler.shared.config.thread_name);
        let weak = Arc::downgrade(&scheduler.shared);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_waiter(weak))
            .map_err(|err| TimerError::Spawn(Arc::new(err)))?;
        *lock(&scheduler.shared.thread) = Some(handle);
        info!(%generation, thread = %name, "scheduler started");
        Ok(scheduler)
    }
}

/// Handle to one scheduler generation. Clones share the generation.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
}

impl Scheduler {
    /// Starts building the scheduler for `generation`, posting due tasks to
    /// `queue`.
    pub fn builder(generation: Generation, queue: MainQueue) -> SchedulerBuilder {
        SchedulerBuilder {
            generation,
            queue,
            config: SchedulerConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.shared.lock_state()
    }

    pub(crate) fn wake(&self) {
        self.shared.wakeup.notify_all();
    }

    /// Runs one scan on the calling thread and returns how long the waiter
    /// would sleep before the next one.
    ///
    /// This is the only driver of a [`SchedulerBuilder::manual`] scheduler.
    /// Fails once the generation is disposed, reporting the fatal scan
    /// failure if that is what ended it.
    pub fn tick(&self) -> Result<Duration, TimerError> {
        let mut state = self.lock_state();
        if state.disposed {
            return Err(state
                .failure
                .clone()
                .unwrap_or(TimerError::SchedulerDisposed(self.generation())));
        }
        let wait = self.shared.scan(&mut state)?;
        Ok(Duration::from_millis(wait))
    }

    /// Freezes every active timer until [`Scheduler::resume`].
    ///
    /// Ignored when already paused, when disposed, and when the
    /// configuration does not suspend on pause.
    #[instrument(skip(self), fields(generation = %self.generation()))]
    pub fn pause(&self) {
        if !self.shared.config.suspend_on_pause {
            debug!("pause ignored: suspend_on_pause is off");
            return;
        }
        {
            let mut state = self.lock_state();
            if state.disposed || state.paused_at_millis.is_some() {
                return;
            }
            state.paused_at_millis = Some(self.shared.clock.now_millis());
        }
        self.wake();
        info!("scheduler paused");
    }

    /// Leaves the paused state, delaying every active timer by the time
    /// spent paused. Ignored when not paused.
    #[instrument(skip(self), fields(generation = %self.generation()))]
    pub fn resume(&self) {
        let paused_for = {
            let mut state = self.lock_state();
            let Some(paused_at) = state.paused_at_millis.take() else {
                return;
            };
            let paused_for = self.shared.clock.now_millis().saturating_sub(paused_at);
            for timer in &state.active {
                timer.delay(paused_for);
            }
            paused_for
        };
        self.wake();
        info!(paused_for_ms = paused_for, "scheduler resumed");
    }

    /// Ends this generation: the waiter exits, timers can no longer be
    /// started or scheduled on, every task held by one of its timers is
    /// released as unscheduled, and the default timer is dropped.
    /// Idempotent.
    #[instrument(skip(self), fields(generation = %self.generation()))]
    pub fn dispose(&self) {
        let (active, timers) = {
            let mut state = self.lock_state();
            if state.disposed {
                return;
            }
            state.disposed = true;
            (
                std::mem::take(&mut state.active),
                std::mem::take(&mut state.timers),
            )
        };
        self.wake();
        let released = release_timers(timers);
        drop(active);
        lock(&self.shared.default_timer).take();
        info!(released, "scheduler disposed");
    }

    /// Waits for the waiter thread to exit. Returns immediately for manual
    /// schedulers, on repeat calls and when called from the waiter itself.
    pub fn join(&self) {
        let Some(handle) = lock(&self.shared.thread).take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!(generation = %self.generation(), "waiter thread panicked");
        }
    }

    /// This scheduler's generation.
    pub fn generation(&self) -> Generation {
        self.shared.generation
    }

    /// The effective configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// True between an effective [`Scheduler::pause`] and the matching
    /// [`Scheduler::resume`].
    pub fn is_paused(&self) -> bool {
        self.lock_state().paused_at_millis.is_some()
    }

    /// False once disposed or failed.
    pub fn is_alive(&self) -> bool {
        !self.lock_state().disposed
    }

    /// The scan failure that ended this generation, if any.
    pub fn failure(&self) -> Option<TimerError> {
        self.lock_state().failure.clone()
    }

    /// Number of running timers.
    pub fn active_timers(&self) -> usize {
        self.lock_state().active.len()
    }

    /// This generation's shared timer, created on first use.
    pub fn default_timer(&self) -> Result<Timer, TimerError> {
        let mut slot = lock(&self.shared.default_timer);
        if let Some(shared) = slot.as_ref() {
            return Ok(Timer::from_parts(Arc::clone(shared), self.clone()));
        }
        let timer = Timer::named(self, "default")?;
        *slot = Some(Arc::clone(timer.shared()));
        Ok(timer)
    }

    /// The queue due tasks are posted to.
    pub fn queue(&self) -> &MainQueue {
        &self.shared.queue
    }

    /// The clock deadlines are measured on.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.shared.clock
    }
}

impl LifecycleListener for Scheduler {
    fn pause(&self) {
        Scheduler::pause(self);
    }

    fn resume(&self) {
        Scheduler::resume(self);
    }

    fn dispose(&self) {
        Scheduler::dispose(self);
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Scheduler")
            .field("generation", &self.shared.generation)
            .field("active_timers", &state.active.len())
            .field("paused_at_millis", &state.paused_at_millis)
            .field("disposed", &state.disposed)
            .finish_non_exhaustive()
    }
}
