// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! End-to-end firing trace on a manual clock.

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use echo_dry_tests::ManualHarness;
use echo_timer::{Repeat, TaskState};

#[test]
fn one_shot_and_repeating_tasks_interleave_by_deadline() {
    let h = ManualHarness::new().unwrap();
    let a = h.schedule("a", 100, 0, Repeat::Once).unwrap();
    let b = h.schedule("b", 200, 50, Repeat::Times(2)).unwrap();
    assert_eq!(h.timer.len(), 2);

    h.advance_to(150).unwrap();
    assert_eq!(h.log.times_of("a"), vec![100]);
    assert_eq!(a.state(), TaskState::Cancelled);
    assert!(!a.is_scheduled());
    assert!(b.is_scheduled());

    h.advance_to(400).unwrap();
    assert_eq!(h.log.times_of("b"), vec![200, 250, 300]);
    assert_eq!(h.log.labels(), vec!["a", "b", "b", "b"]);
    assert!(!b.is_scheduled());
    assert!(h.timer.is_empty());
}

#[test]
fn ten_millisecond_frames_reproduce_the_trace() {
    let h = ManualHarness::new().unwrap();
    h.schedule("a", 100, 0, Repeat::Once).unwrap();
    let b = h.schedule("b", 200, 50, Repeat::Times(2)).unwrap();

    while h.now() < 350 {
        h.step(10).unwrap();
    }
    assert_eq!(h.log.times_of("a"), vec![100]);
    assert_eq!(h.log.times_of("b"), vec![200, 250, 300]);
    assert!(!b.is_scheduled());
    assert!(h.timer.is_empty());
}

#[test]
fn one_late_scan_fires_in_deadline_order() {
    let h = ManualHarness::new().unwrap();
    h.schedule("late", 50, 0, Repeat::Once).unwrap();
    h.schedule("early", 10, 0, Repeat::Once).unwrap();
    h.schedule("middle", 30, 0, Repeat::Once).unwrap();

    h.step(100).unwrap();
    assert_eq!(h.log.labels(), vec!["early", "middle", "late"]);
}

#[test]
fn waits_track_the_earliest_deadline() {
    let h = ManualHarness::new().unwrap();
    h.schedule("late", 900, 0, Repeat::Once).unwrap();
    h.schedule("soon", 40, 0, Repeat::Once).unwrap();
    assert_eq!(h.scheduler.tick().unwrap().as_millis(), 40);
    h.advance_to(40).unwrap();
    assert_eq!(h.scheduler.tick().unwrap().as_millis(), 860);
}

#[test]
fn a_task_posts_no_earlier_than_the_drain_after_its_scan() {
    let h = ManualHarness::new().unwrap();
    h.schedule("t", 10, 0, Repeat::Once).unwrap();
    h.clock.advance_millis(10);
    h.scheduler.tick().unwrap();
    assert!(h.log.is_empty());
    assert_eq!(h.queue.len(), 1);
    let report = h.queue.run_pending();
    assert_eq!(report.executed, 1);
    assert_eq!(h.log.count("t"), 1);
}
