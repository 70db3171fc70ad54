// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]
use proptest::prelude::*;
use proptest::test_runner::{Config as PropConfig, RngAlgorithm, TestRng, TestRunner};

use echo_dry_tests::ManualHarness;
use echo_timer::{Repeat, TaskState};

// No task is lost and none fires twice. Every one-shot fires exactly once at
// its deadline, and firings come out ordered by deadline with ties broken by
// scheduling order.
//
// The seed is pinned so failures reproduce across machines. Override with
// PROPTEST_SEED to explore other cases locally.

#[test]
fn proptest_seed_pinned_one_shots_fire_once_in_deadline_order() {
    const SEED_BYTES: [u8; 32] = [
        0x7e, 0x11, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0, 0, 0,
    ];

    let rng = TestRng::from_seed(RngAlgorithm::ChaCha, &SEED_BYTES);
    let mut runner = TestRunner::new_with_rng(
        PropConfig {
            cases: 64,
            ..PropConfig::default()
        },
        rng,
    );

    // Delays in ms, plus an optional cancel per task.
    let plan = prop::collection::vec((0_u64..300, any::<bool>()), 1..24);

    runner
        .run(&plan, |plan| {
            let h = ManualHarness::new().unwrap();
            let mut expected = Vec::new();
            let mut tasks = Vec::new();
            for (index, &(delay, cancel)) in plan.iter().enumerate() {
                let label = format!("t{index}");
                let task = h.schedule(&label, delay, 0, Repeat::Once).unwrap();
                if cancel {
                    task.cancel();
                } else {
                    // Deadlines at zero are seen by the first scan, one step in.
                    expected.push((delay.max(1), index, label));
                }
                tasks.push((task, cancel));
            }
            expected.sort();

            h.advance_to(301).unwrap();

            let firings = h.log.firings();
            prop_assert_eq!(firings.len(), expected.len());
            for (firing, (delay, _, label)) in firings.iter().zip(&expected) {
                prop_assert_eq!(&firing.label, label);
                prop_assert_eq!(firing.at_millis, *delay);
            }
            for (task, cancelled) in &tasks {
                prop_assert!(!task.is_scheduled());
                prop_assert_eq!(task.state(), TaskState::Cancelled, "cancelled={}", cancelled);
            }
            prop_assert!(h.timer.is_empty());
            Ok(())
        })
        .unwrap();
}

#[test]
fn proptest_seed_pinned_repeats_fire_count_plus_one() {
    const SEED_BYTES: [u8; 32] = [
        0x7e, 0x12, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0, 0, 0,
    ];

    let rng = TestRng::from_seed(RngAlgorithm::ChaCha, &SEED_BYTES);
    let mut runner = TestRunner::new_with_rng(
        PropConfig {
            cases: 48,
            ..PropConfig::default()
        },
        rng,
    );

    let params = (1_u64..40, 1_u64..30, 0_u32..6);

    runner
        .run(&params, |(delay, interval, repeat)| {
            let h = ManualHarness::new().unwrap();
            h.schedule("r", delay, interval, Repeat::Times(repeat))
                .unwrap();
            h.advance_to(delay + interval * u64::from(repeat) + 5).unwrap();

            let times = h.log.times_of("r");
            prop_assert_eq!(times.len(), repeat as usize + 1);
            prop_assert_eq!(times[0], delay);
            for pair in times.windows(2) {
                prop_assert_eq!(pair[1] - pair[0], interval);
            }
            Ok(())
        })
        .unwrap();
}
