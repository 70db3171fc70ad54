// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-frame logical time, measured in ticks.
//!
//! One tick is a sixtieth of a second at the nominal frame rate. The host
//! calls [`FrameTime::update_global`] with the real frame duration and then
//! [`FrameTime::update`] once per simulated frame; tick-delayed runs fire from
//! `update` on the host thread. Unlike timer tasks, these runs follow logical
//! time, so they stop while the simulation is not updated and are dropped by
//! [`FrameTime::clear`].

use std::fmt;
use std::time::Duration;

use crate::error::TimerError;
use crate::task::Task;
use crate::timer::Timer;

/// Ticks per second.
pub const TICKS_PER_SECOND: f32 = 60.0;
/// Ticks per minute.
pub const TICKS_PER_MINUTE: f32 = TICKS_PER_SECOND * 60.0;
/// Ticks per hour.
pub const TICKS_PER_HOUR: f32 = TICKS_PER_MINUTE * 60.0;

struct DelayRun {
    remaining: f32,
    callback: Box<dyn FnOnce()>,
}

/// Logical frame clock with tick-delayed runs. Host-thread only.
pub struct FrameTime {
    delta: f32,
    max_delta: f32,
    time_raw: f64,
    global_raw: f64,
    runs: Vec<DelayRun>,
}

impl FrameTime {
    /// Default cap on a single frame's delta, in ticks.
    pub const DEFAULT_MAX_DELTA: f32 = 3.0;

    /// Time zero, delta one tick.
    pub fn new() -> Self {
        Self {
            delta: 1.0,
            max_delta: Self::DEFAULT_MAX_DELTA,
            time_raw: 0.0,
            global_raw: 0.0,
            runs: Vec::new(),
        }
    }

    /// Replaces the per-frame delta cap. Non-positive or non-finite caps are
    /// ignored.
    pub fn with_max_delta(mut self, max_delta: f32) -> Self {
        if max_delta.is_finite() && max_delta > 0.0 {
            self.max_delta = max_delta;
        }
        self
    }

    /// Ticks covered by the current frame.
    pub fn delta(&self) -> f32 {
        self.delta
    }

    /// Simulation time in ticks; advanced by [`FrameTime::update`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn time(&self) -> f32 {
        self.time_raw as f32
    }

    /// Real time in ticks since creation; advanced by
    /// [`FrameTime::update_global`] whether or not the simulation runs.
    #[allow(clippy::cast_possible_truncation)]
    pub fn global_time(&self) -> f32 {
        self.global_raw as f32
    }

    /// Records a real frame of `frame_seconds` and derives the next delta,
    /// capped at the maximum delta.
    pub fn update_global(&mut self, frame_seconds: f32) {
        let ticks = if frame_seconds.is_finite() && frame_seconds > 0.0 {
            frame_seconds * TICKS_PER_SECOND
        } else {
            0.0
        };
        self.global_raw += f64::from(ticks);
        self.delta = ticks.min(self.max_delta);
        self.sanitize();
    }

    /// Advances simulation time by one delta and fires every delayed run
    /// that came due, in the order they were added. Returns how many fired.
    pub fn update(&mut self) -> usize {
        self.time_raw += f64::from(self.delta);
        self.sanitize();

        let mut due = Vec::new();
        for mut run in std::mem::take(&mut self.runs) {
            run.remaining -= self.delta;
            if run.remaining <= 0.0 {
                due.push(run.callback);
            } else {
                self.runs.push(run);
            }
        }
        let fired = due.len();
        for callback in due {
            callback();
        }
        fired
    }

    /// Runs `callback` from the update that brings `delay_ticks` of
    /// simulation time to zero. Dropped by [`FrameTime::clear`].
    pub fn run<F>(&mut self, delay_ticks: f32, callback: F)
    where
        F: FnOnce() + 'static,
    {
        self.runs.push(DelayRun {
            remaining: delay_ticks,
            callback: Box::new(callback),
        });
    }

    /// Schedules `callback` on `timer` after `delay_ticks` of real time.
    /// Unlike [`FrameTime::run`], this survives [`FrameTime::clear`] and
    /// fires through the main queue.
    pub fn run_task<F>(timer: &Timer, delay_ticks: f32, callback: F) -> Result<Task, TimerError>
    where
        F: FnMut() + Send + 'static,
    {
        timer.run_after(ticks_to_duration(delay_ticks), callback)
    }

    /// Delayed runs still waiting.
    pub fn pending(&self) -> usize {
        self.runs.len()
    }

    /// Drops every delayed run without firing it.
    pub fn clear(&mut self) {
        self.runs.clear();
    }

    fn sanitize(&mut self) {
        if !self.time_raw.is_finite() {
            self.time_raw = 0.0;
        }
        if !self.global_raw.is_finite() {
            self.global_raw = 0.0;
        }
    }
}

/// Converts ticks to real time; negative and non-finite values become zero.
pub fn ticks_to_duration(ticks: f32) -> Duration {
    Duration::try_from_secs_f32(ticks / TICKS_PER_SECOND).unwrap_or(Duration::ZERO)
}

impl Default for FrameTime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FrameTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameTime")
            .field("delta", &self.delta)
            .field("time", &self.time())
            .field("global_time", &self.global_time())
            .field("pending", &self.runs.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::float_cmp)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn delta_follows_frame_time_and_is_capped() {
        let mut frame = FrameTime::new();
        assert_eq!(frame.delta(), 1.0);
        frame.update_global(0.5 / TICKS_PER_SECOND);
        assert!((frame.delta() - 0.5).abs() < 1e-6);
        frame.update_global(1.0);
        assert_eq!(frame.delta(), FrameTime::DEFAULT_MAX_DELTA);
        assert!((frame.global_time() - 60.5).abs() < 1e-4);

        let mut capped = FrameTime::new().with_max_delta(1.5);
        capped.update_global(1.0);
        assert_eq!(capped.delta(), 1.5);
    }

    #[test]
    fn bad_frame_times_do_not_poison_the_clock() {
        let mut frame = FrameTime::new();
        frame.update_global(f32::NAN);
        assert_eq!(frame.delta(), 0.0);
        frame.update_global(-1.0);
        assert_eq!(frame.global_time(), 0.0);
        frame.update();
        assert_eq!(frame.time(), 0.0);
    }

    #[test]
    fn delayed_runs_fire_in_order_once_due() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut frame = FrameTime::new();
        for (delay, tag) in [(2.0, "b"), (1.0, "a"), (2.0, "c")] {
            let log = Rc::clone(&log);
            frame.run(delay, move || log.borrow_mut().push(tag));
        }

        assert_eq!(frame.update(), 1);
        assert_eq!(*log.borrow(), vec!["a"]);
        assert_eq!(frame.update(), 2);
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
        assert_eq!(frame.pending(), 0);
        assert_eq!(frame.time(), 2.0);
    }

    #[test]
    fn clear_drops_pending_runs() {
        let fired = Rc::new(RefCell::new(false));
        let mut frame = FrameTime::new();
        let flag = Rc::clone(&fired);
        frame.run(1.0, move || *flag.borrow_mut() = true);
        frame.clear();
        frame.update();
        assert!(!*fired.borrow());
    }

    #[test]
    fn tick_conversion() {
        assert_eq!(ticks_to_duration(TICKS_PER_SECOND), Duration::from_secs(1));
        assert_eq!(ticks_to_duration(-5.0), Duration::ZERO);
        assert_eq!(ticks_to_duration(f32::NAN), Duration::ZERO);
        assert_eq!(TICKS_PER_HOUR, 216_000.0);
    }
}
