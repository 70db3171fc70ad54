// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Process-wide scheduler, keyed by generation.
//!
//! Hosts that do not want to thread a [`Scheduler`] through their code use
//! this module instead. The first call builds and spawns a scheduler for the
//! given generation. Later calls return it while the generation matches and
//! it is alive; a different generation (the host context was rebuilt) or a
//! dead scheduler (a fatal scan failure) disposes the old one and spawns a
//! replacement, so a stale waiter thread never outlives its context.

use std::sync::Mutex;

use tracing::info;

use crate::config::SchedulerConfig;
use crate::error::TimerError;
use crate::main_queue::MainQueue;
use crate::scheduler::{Generation, Scheduler};
use crate::sync::lock;
use crate::timer::Timer;

static SHARED: Mutex<Option<Scheduler>> = Mutex::new(None);

/// The shared scheduler for `generation`, with the default configuration.
pub fn scheduler(generation: Generation, queue: &MainQueue) -> Result<Scheduler, TimerError> {
    scheduler_with(generation, queue, SchedulerConfig::default())
}

/// The shared scheduler for `generation`. `config` and `queue` only apply
/// when a new scheduler has to be spawned.
pub fn scheduler_with(
    generation: Generation,
    queue: &MainQueue,
    config: SchedulerConfig,
) -> Result<Scheduler, TimerError> {
    let (stale, fresh) = {
        let mut slot = lock(&SHARED);
        if let Some(current) = slot.as_ref() {
            if current.generation() == generation && current.is_alive() {
                return Ok(current.clone());
            }
        }
        let stale = slot.take();
        if let Some(old) = &stale {
            old.dispose();
        }
        let fresh = Scheduler::builder(generation, queue.clone())
            .config(config)
            .spawn()?;
        *slot = Some(fresh.clone());
        (stale, fresh)
    };
    if let Some(old) = stale {
        old.join();
        info!(
            old = %old.generation(),
            new = %generation,
            "replaced shared scheduler"
        );
    }
    Ok(fresh)
}

/// The default timer of the shared scheduler for `generation`.
pub fn instance(generation: Generation, queue: &MainQueue) -> Result<Timer, TimerError> {
    scheduler(generation, queue)?.default_timer()
}

/// The shared scheduler, if one has been built and not shut down.
pub fn current() -> Option<Scheduler> {
    lock(&SHARED).clone()
}

/// Disposes the shared scheduler and waits for its thread. Idempotent.
pub fn shutdown() {
    let Some(scheduler) = lock(&SHARED).take() else {
        return;
    };
    scheduler.dispose();
    scheduler.join();
}
