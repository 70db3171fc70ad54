// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Firing recorder for task callbacks.

use std::sync::{Arc, Mutex, MutexGuard};

use echo_timer::Clock;

/// One recorded firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firing {
    /// Label the recorder was created with.
    pub label: String,
    /// Clock reading when the callback ran, in milliseconds.
    pub at_millis: u64,
    /// Name of the thread the callback ran on.
    pub thread: Option<String>,
}

/// Shared log of task firings. Clones append to the same log.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use echo_dry_tests::FireLog;
/// use echo_timer::ManualClock;
///
/// let clock = ManualClock::new();
/// let log = FireLog::new();
/// let mut record = log.recorder("a", Arc::new(clock.clone()));
/// clock.advance_millis(5);
/// record();
/// assert_eq!(log.times_of("a"), vec![5]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FireLog {
    inner: Arc<Mutex<Vec<Firing>>>,
}

impl FireLog {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Firing>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A callback that appends a firing labelled `label`, timed on `clock`.
    pub fn recorder(
        &self,
        label: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> impl FnMut() + Send + 'static {
        let log = self.clone();
        let label = label.into();
        move || {
            let firing = Firing {
                label: label.clone(),
                at_millis: clock.now_millis(),
                thread: std::thread::current().name().map(str::to_owned),
            };
            log.entries().push(firing);
        }
    }

    /// Every firing, in the order they happened.
    pub fn firings(&self) -> Vec<Firing> {
        self.entries().clone()
    }

    /// Labels in firing order.
    pub fn labels(&self) -> Vec<String> {
        self.entries().iter().map(|f| f.label.clone()).collect()
    }

    /// Firing times of `label`, in order.
    pub fn times_of(&self, label: &str) -> Vec<u64> {
        self.entries()
            .iter()
            .filter(|f| f.label == label)
            .map(|f| f.at_millis)
            .collect()
    }

    /// Number of firings of `label`.
    pub fn count(&self, label: &str) -> usize {
        self.entries().iter().filter(|f| f.label == label).count()
    }

    /// Total firings.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// True when nothing fired.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Forgets every firing.
    pub fn clear(&self) {
        self.entries().clear();
    }
}
