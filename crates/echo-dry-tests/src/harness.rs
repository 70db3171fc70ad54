// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deterministic scheduler harness.
//!
//! Owns a [`ManualClock`], a [`MainQueue`] timed on it, a manual
//! [`Scheduler`] and one running [`Timer`]. Tests move time explicitly and
//! every step runs one scheduler scan followed by one queue drain, the same
//! order a host loop would use.

use std::sync::Arc;
use std::time::Duration;

use echo_timer::{
    Clock, DrainReport, Generation, MainQueue, ManualClock, Repeat, Scheduler, SchedulerConfig, Task,
    Timer, TimerError,
};

use crate::fire_log::FireLog;

/// Manual-clock scheduler with a firing log.
#[derive(Debug)]
pub struct ManualHarness {
    /// The clock every component reads.
    pub clock: ManualClock,
    /// Queue due tasks are posted to.
    pub queue: MainQueue,
    /// Manually ticked scheduler.
    pub scheduler: Scheduler,
    /// A running timer on `scheduler`.
    pub timer: Timer,
    /// Log written by [`ManualHarness::recording_task`] tasks.
    pub log: FireLog,
}

impl ManualHarness {
    /// A harness with the default configuration, at time zero.
    pub fn new() -> Result<Self, TimerError> {
        Self::with_config(SchedulerConfig::default())
    }

    /// A harness whose scheduler uses `config`.
    pub fn with_config(config: SchedulerConfig) -> Result<Self, TimerError> {
        let clock = ManualClock::new();
        let queue = MainQueue::with_clock(Arc::new(clock.clone()));
        let scheduler = Scheduler::builder(Generation::next(), queue.clone())
            .clock(Arc::new(clock.clone()))
            .config(config)
            .manual();
        let timer = Timer::named(&scheduler, "harness")?;
        Ok(Self {
            clock,
            queue,
            scheduler,
            timer,
            log: FireLog::new(),
        })
    }

    /// Current clock reading in milliseconds.
    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    /// A task that records `label` into [`ManualHarness::log`] when it runs.
    pub fn recording_task(&self, label: &str) -> Task {
        Task::named(
            label.to_owned(),
            self.log.recorder(label, Arc::new(self.clock.clone())),
        )
    }

    /// Schedules a recording task on the harness timer.
    pub fn schedule(
        &self,
        label: &str,
        delay_ms: u64,
        interval_ms: u64,
        repeat: Repeat,
    ) -> Result<Task, TimerError> {
        self.timer.schedule(
            &self.recording_task(label),
            Duration::from_millis(delay_ms),
            Duration::from_millis(interval_ms),
            repeat,
        )
    }

    /// Scans and drains without moving the clock.
    pub fn settle(&self) -> Result<DrainReport, TimerError> {
        self.scheduler.tick()?;
        Ok(self.queue.run_pending())
    }

    /// Advances the clock by `ms`, then scans and drains once.
    pub fn step(&self, ms: u64) -> Result<DrainReport, TimerError> {
        self.clock.advance_millis(ms);
        self.settle()
    }

    /// Steps one millisecond at a time until the clock reads `at_ms`, so
    /// every firing is observed at its exact deadline. Returns the number of
    /// callbacks executed.
    pub fn advance_to(&self, at_ms: u64) -> Result<usize, TimerError> {
        let mut executed = 0;
        while self.now() < at_ms {
            executed += self.step(1)?.executed;
        }
        Ok(executed)
    }
}
