// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Hand-off queue from any thread to the host's main loop.
//!
//! Posting appends to `incoming` under a short lock. [`MainQueue::run_pending`]
//! swaps `incoming` with the `draining` buffer, releases the incoming lock and
//! then runs the batch, so callbacks may post freely: anything they post lands
//! in the (now empty) incoming buffer and runs on the next drain, never the
//! current one.

use std::borrow::Cow;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use tracing::{error, warn};

use crate::clock::{Clock, SystemClock};
use crate::sync::{lock, panic_message};

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Runnable {
    label: Cow<'static, str>,
    callback: Callback,
}

struct MainQueueInner {
    incoming: Mutex<Vec<Runnable>>,
    draining: Mutex<Vec<Runnable>>,
    clock: Arc<dyn Clock>,
}

/// Thread-safe FIFO of callbacks executed on the host thread.
///
/// Clones share the same queue. Every posted callback runs exactly once, in
/// post order, during the first [`MainQueue::run_pending`] that starts after
/// the post. The queue is unbounded: a host that never drains accumulates
/// callbacks indefinitely.
#[derive(Clone)]
pub struct MainQueue {
    inner: Arc<MainQueueInner>,
}

/// Outcome of one [`MainQueue::run_pending`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Callbacks that returned normally.
    pub executed: usize,
    /// Callbacks that panicked (logged and skipped).
    pub failed: usize,
    /// Time spent running the batch, measured on the queue's clock.
    pub elapsed: Duration,
}

impl DrainReport {
    /// Total callbacks taken from the queue.
    pub fn total(&self) -> usize {
        self.executed + self.failed
    }
}

impl MainQueue {
    /// An empty queue timed with [`SystemClock`].
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// An empty queue whose drain timing reads `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(MainQueueInner {
                incoming: Mutex::new(Vec::new()),
                draining: Mutex::new(Vec::new()),
                clock,
            }),
        }
    }

    /// Appends `callback`. Callable from any thread.
    pub fn post<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_labeled("callback", callback);
    }

    /// Appends `callback` with a label used when reporting a panic.
    pub fn post_labeled<L, F>(&self, label: L, callback: F)
    where
        L: Into<Cow<'static, str>>,
        F: FnOnce() + Send + 'static,
    {
        lock(&self.inner.incoming).push(Runnable {
            label: label.into(),
            callback: Box::new(callback),
        });
    }

    /// Callbacks waiting for the next drain.
    pub fn len(&self) -> usize {
        lock(&self.inner.incoming).len()
    }

    /// True when nothing waits for the next drain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every callback posted before this call. Call once per main-loop
    /// iteration.
    ///
    /// A panicking callback is logged with its label and does not stop the
    /// rest of the batch. Calling this from inside a callback is ignored.
    pub fn run_pending(&self) -> DrainReport {
        let mut draining = match self.inner.draining.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                warn!("run_pending re-entered while a drain is in progress; ignored");
                return DrainReport::default();
            }
        };
        {
            let mut incoming = lock(&self.inner.incoming);
            std::mem::swap(&mut *incoming, &mut *draining);
        }

        let started = self.inner.clock.now_nanos();
        let mut report = DrainReport::default();
        for Runnable { label, callback } in draining.drain(..) {
            match panic::catch_unwind(AssertUnwindSafe(callback)) {
                Ok(()) => report.executed += 1,
                Err(payload) => {
                    report.failed += 1;
                    error!(
                        label = %label,
                        panic = %panic_message(payload.as_ref()),
                        "main-queue callback panicked"
                    );
                }
            }
        }
        report.elapsed =
            Duration::from_nanos(self.inner.clock.now_nanos().saturating_sub(started));
        report
    }
}

impl Default for MainQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MainQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainQueue")
            .field("pending", &self.len())
            .finish_non_exhaustive()
    }
}
