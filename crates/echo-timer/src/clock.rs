// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Time sources.
//!
//! Deadlines are kept in whole milliseconds on the monotonic timeline
//! ([`Clock::now_millis`]). The wall clock is only for display and logging.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::sync::millis;

/// Nanoseconds per millisecond.
pub const NANOS_PER_MILLI: u64 = 1_000_000;

/// Process-wide time source.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Milliseconds since the Unix epoch.
    fn wall_millis(&self) -> u64;

    /// Monotonic nanoseconds. Only differences are meaningful; values are
    /// never comparable across process restarts.
    fn now_nanos(&self) -> u64;

    /// Monotonic milliseconds, the time base for task deadlines.
    fn now_millis(&self) -> u64 {
        self.now_nanos() / NANOS_PER_MILLI
    }
}

fn process_epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Platform clock: `SystemTime` for wall time, `Instant` for monotonic time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn wall_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, millis)
    }

    fn now_nanos(&self) -> u64 {
        u64::try_from(process_epoch().elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Logical clock that only moves when told to.
///
/// Clones share the same reading, so a host (or a test) can keep one handle
/// and give another to a [`crate::Scheduler`].
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// A clock reading zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock reading `start`.
    pub fn starting_at(start: Duration) -> Self {
        let clock = Self::new();
        clock.set(start);
        clock
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        let mut current = self.nanos.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(by);
            match self
                .nanos
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Moves the clock forward by `ms` milliseconds.
    pub fn advance_millis(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    /// Sets the reading. Setting it backwards is allowed but deadlines that
    /// already passed stay passed.
    pub fn set(&self, at: Duration) {
        let at = u64::try_from(at.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.store(at, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn wall_millis(&self) -> u64 {
        self.now_millis()
    }

    fn now_nanos(&self) -> u64 {
        self.nanos.load(Ordering::Acquire)
    }
}

/// Stack of start marks for ad-hoc elapsed-time measurement.
#[derive(Debug)]
pub struct Stopwatch<C = SystemClock> {
    clock: C,
    marks: Vec<u64>,
}

impl Default for Stopwatch<SystemClock> {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}

impl<C: Clock> Stopwatch<C> {
    /// A stopwatch reading `clock`.
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            marks: Vec::new(),
        }
    }

    /// Pushes a start mark.
    pub fn mark(&mut self) {
        self.marks.push(self.clock.now_nanos());
    }

    /// Pops the most recent mark and returns the time since it, or `None`
    /// when [`Stopwatch::mark`] was not called beforehand.
    pub fn elapsed(&mut self) -> Option<Duration> {
        let start = self.marks.pop()?;
        Some(Duration::from_nanos(
            self.clock.now_nanos().saturating_sub(start),
        ))
    }

    /// Number of outstanding marks.
    pub fn depth(&self) -> usize {
        self.marks.len()
    }
}
