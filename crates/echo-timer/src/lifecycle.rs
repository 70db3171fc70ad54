// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Host lifecycle fan-out.
//!
//! The host owns the process lifecycle and reports pause, resume and destroy
//! events to a [`Lifecycle`]; registered listeners (typically a
//! [`crate::Scheduler`]) are held weakly and told in registration order.
//! Every event is forgiving: redundant pauses and resumes, and everything
//! after destroy, are ignored.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info};

use crate::sync::lock;

/// Receives host lifecycle transitions.
pub trait LifecycleListener: Send + Sync {
    /// The host moved to the background.
    fn pause(&self);
    /// The host returned to the foreground.
    fn resume(&self);
    /// The owning context is being torn down.
    fn dispose(&self);
}

/// Handle returned by [`Lifecycle::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Inner {
    next_id: u64,
    listeners: BTreeMap<ListenerId, Weak<dyn LifecycleListener>>,
    paused: bool,
    destroyed: bool,
}

/// Fan-out of host lifecycle events to weakly held listeners.
#[derive(Default)]
pub struct Lifecycle {
    inner: Mutex<Inner>,
}

impl Lifecycle {
    /// An empty, running lifecycle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener`. It is held weakly: dropping the last strong
    /// reference unregisters it. A listener registered after destroy is
    /// disposed immediately.
    pub fn register<L>(&self, listener: &Arc<L>) -> ListenerId
    where
        L: LifecycleListener + 'static,
    {
        let weak = Arc::downgrade(listener);
        let weak: Weak<dyn LifecycleListener> = weak;
        let (id, destroyed) = {
            let mut inner = lock(&self.inner);
            let id = ListenerId(inner.next_id);
            inner.next_id += 1;
            if !inner.destroyed {
                inner.listeners.insert(id, weak);
            }
            (id, inner.destroyed)
        };
        if destroyed {
            listener.dispose();
        }
        id
    }

    /// Removes a listener. Unknown ids are ignored.
    pub fn unregister(&self, id: ListenerId) {
        lock(&self.inner).listeners.remove(&id);
    }

    /// Number of registered listeners that are still alive.
    pub fn len(&self) -> usize {
        lock(&self.inner)
            .listeners
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// True when no live listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True between an effective pause and the next resume.
    pub fn is_paused(&self) -> bool {
        lock(&self.inner).paused
    }

    /// True once [`Lifecycle::on_destroy`] ran.
    pub fn is_destroyed(&self) -> bool {
        lock(&self.inner).destroyed
    }

    /// Reports that the host moved to the background.
    pub fn on_pause(&self) {
        let listeners = {
            let mut inner = lock(&self.inner);
            if inner.destroyed || inner.paused {
                debug!("redundant pause ignored");
                return;
            }
            inner.paused = true;
            inner.live()
        };
        info!(listeners = listeners.len(), "lifecycle paused");
        for listener in listeners {
            listener.pause();
        }
    }

    /// Reports that the host returned to the foreground.
    pub fn on_resume(&self) {
        let listeners = {
            let mut inner = lock(&self.inner);
            if inner.destroyed || !inner.paused {
                debug!("redundant resume ignored");
                return;
            }
            inner.paused = false;
            inner.live()
        };
        info!(listeners = listeners.len(), "lifecycle resumed");
        for listener in listeners {
            listener.resume();
        }
    }

    /// Reports that the owning context is being torn down. Disposes every
    /// listener once; later calls are ignored.
    pub fn on_destroy(&self) {
        let listeners = {
            let mut inner = lock(&self.inner);
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            let live = inner.live();
            inner.listeners.clear();
            live
        };
        info!(listeners = listeners.len(), "lifecycle destroyed");
        for listener in listeners {
            listener.dispose();
        }
    }
}

impl Inner {
    /// Upgrades live listeners, pruning dead ones.
    fn live(&mut self) -> Vec<Arc<dyn LifecycleListener>> {
        let mut live = Vec::with_capacity(self.listeners.len());
        self.listeners.retain(|_, weak| match weak.upgrade() {
            Some(listener) => {
                live.push(listener);
                true
            }
            None => false,
        });
        live
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("Lifecycle")
            .field("listeners", &inner.listeners.len())
            .field("paused", &inner.paused)
            .field("destroyed", &inner.destroyed)
            .finish()
    }
}
