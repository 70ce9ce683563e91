// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Per-distribution debounce timer.

A [ReusableTimer] is armed once per distribution and reused across its whole lifetime: each
incoming event resets it rather than spawning a fresh task, so a burst of events collapses into
exactly one fire. The generation counter is what makes `reset` cheap and correct — a reset
stale sleep simply observes a newer generation and no-ops instead of firing.
*/

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

struct Inner {
    generation: AtomicU64,
    armed: AtomicBool,
    notify: Notify,
}

/// A cancellable, resettable one-shot delay. `arm` starts it; `reset` restarts the delay from
/// now; the callback passed to `arm`/`reset` runs at most once per arm/reset chain, after
/// `delay` has elapsed with no further `reset` calls.
#[derive(Clone)]
pub struct ReusableTimer {
    inner: Arc<Inner>,
}

impl ReusableTimer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                generation: AtomicU64::new(0),
                armed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Whether the timer currently has an unexpired arm/reset outstanding.
    pub fn is_armed(&self) -> bool {
        self.inner.armed.load(Ordering::SeqCst)
    }

    /// Arm the timer: after `delay`, spawn `callback` unless reset or cancelled first.
    pub fn arm<F, Fut>(&self, delay: Duration, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.reset(delay, callback);
    }

    /// Reset an armed timer's delay back to `delay`. If the timer is not currently armed, this
    /// behaves like `arm`.
    pub fn reset<F, Fut>(&self, delay: Duration, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.armed.store(true, Ordering::SeqCst);
        self.spawn_wait(generation, delay, callback);
    }

    /// Cancel any outstanding arm; the next `arm` starts fresh.
    pub fn cancel(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.armed.store(false, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    fn spawn_wait<F, Fut>(&self, generation: u64, delay: Duration, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if inner.generation.load(Ordering::SeqCst) == generation {
                        inner.armed.store(false, Ordering::SeqCst);
                        callback().await;
                    }
                }
                _ = inner.notify.notified() => {}
            }
        });
    }
}

impl Default for ReusableTimer {
    fn default() -> Self {
        Self::new()
    }
}
