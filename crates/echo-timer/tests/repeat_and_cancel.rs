// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Repeat counts, cancellation and rescheduling from inside callbacks.

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use echo_dry_tests::ManualHarness;
use echo_timer::{Repeat, Task, TaskState, TimerError};

#[test]
fn times_n_fires_n_plus_one_times_spaced_by_interval() {
    let h = ManualHarness::new().unwrap();
    let task = h.schedule("r", 10, 25, Repeat::Times(3)).unwrap();
    h.advance_to(1_000).unwrap();

    let times = h.log.times_of("r");
    assert_eq!(times, vec![10, 35, 60, 85]);
    assert!(times.windows(2).all(|w| w[1] - w[0] >= 25));
    assert_eq!(task.state(), TaskState::Cancelled);
}

#[test]
fn forever_repeats_until_cancelled() {
    let h = ManualHarness::new().unwrap();
    let task = h.schedule("f", 0, 100, Repeat::Forever).unwrap();
    h.advance_to(1_000).unwrap();
    assert_eq!(h.log.count("f"), 10);

    task.cancel();
    task.cancel();
    h.advance_to(2_000).unwrap();
    assert_eq!(h.log.count("f"), 10);
    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(task.execute_at_millis(), 0);
}

#[test]
fn cancel_from_inside_the_callback() {
    let h = ManualHarness::new().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let slot: Arc<OnceLock<Task>> = Arc::new(OnceLock::new());

    let task = {
        let hits = Arc::clone(&hits);
        let slot = Arc::clone(&slot);
        Task::named("self-cancel", move || {
            if hits.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                if let Some(me) = slot.get() {
                    me.cancel();
                }
            }
        })
    };
    slot.set(task.clone()).unwrap();
    h.timer
        .schedule_repeating(&task, Duration::from_millis(5), Duration::from_millis(5))
        .unwrap();

    h.advance_to(100).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(task.state(), TaskState::Cancelled);
    assert!(h.timer.is_empty());
}

#[test]
fn one_shot_may_reschedule_itself() {
    let h = ManualHarness::new().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let slot: Arc<OnceLock<Task>> = Arc::new(OnceLock::new());

    let task = {
        let hits = Arc::clone(&hits);
        let slot = Arc::clone(&slot);
        let timer = h.timer.clone();
        Task::new(move || {
            if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                if let Some(me) = slot.get() {
                    timer.schedule_once(me, Duration::from_millis(10)).unwrap();
                }
            }
        })
    };
    slot.set(task.clone()).unwrap();
    h.timer.schedule_once(&task, Duration::from_millis(10)).unwrap();

    h.advance_to(200).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert!(!task.is_scheduled());
}

#[test]
fn cancelled_task_already_posted_still_runs_once() {
    let h = ManualHarness::new().unwrap();
    let task = h.schedule("posted", 0, 10, Repeat::Forever).unwrap();
    h.scheduler.tick().unwrap();
    task.cancel();
    h.queue.run_pending();
    assert_eq!(h.log.count("posted"), 1);
    h.advance_to(100).unwrap();
    assert_eq!(h.log.count("posted"), 1);
}

#[test]
fn a_task_belongs_to_one_timer_at_a_time() {
    let h = ManualHarness::new().unwrap();
    let other = echo_timer::Timer::named(&h.scheduler, "other").unwrap();
    let task = h.schedule("x", 50, 0, Repeat::Once).unwrap();

    assert!(matches!(
        task.schedule(&other, Duration::ZERO, Duration::ZERO, Repeat::Once),
        Err(TimerError::AlreadyScheduled { .. })
    ));
    task.cancel();
    task.schedule(&other, Duration::ZERO, Duration::ZERO, Repeat::Once)
        .unwrap();
    assert_eq!(task.timer_id(), Some(other.id()));
    h.settle().unwrap();
    assert_eq!(h.log.count("x"), 1);
}

#[test]
fn clear_releases_tasks_for_reuse() {
    let h = ManualHarness::new().unwrap();
    let task = h.schedule("c", 10, 0, Repeat::Once).unwrap();
    h.timer.clear();
    assert_eq!(task.state(), TaskState::Unscheduled);
    h.advance_to(50).unwrap();
    assert!(h.log.is_empty());

    h.timer.post(&task).unwrap();
    h.settle().unwrap();
    assert_eq!(h.log.count("c"), 1);
}

#[test]
fn panicking_callback_does_not_stop_the_batch() {
    let h = ManualHarness::new().unwrap();
    h.timer
        .run_after(Duration::from_millis(5), || panic!("boom"))
        .unwrap();
    h.schedule("after", 5, 0, Repeat::Once).unwrap();
    h.clock.advance_millis(5);
    let report = h.settle().unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.executed, 1);
    assert_eq!(h.log.count("after"), 1);
}
