// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Error returned by [`CancellationToken::check`] once the token has tripped.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Operation was cancelled")]
pub struct CancelledError;

type Callback = Box<dyn Fn() + Send + Sync>;

struct Inner {
    cancelled: AtomicBool,
    callbacks: Mutex<Vec<Callback>>,
}

/// Thread-safe one-shot cancellation flag with parent→child propagation.
///
/// Cloning the token clones the handle, not the flag: all clones observe the
/// same cancellation.  Callbacks fire at least once, in registration order;
/// a callback registered after the token has tripped fires immediately on
/// registration.  Cancelling a child never propagates to its parent — the
/// relation is "parent notifies child", not ownership.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Latch the flag and run all registered callbacks.  Idempotent: the
    /// callback list is drained on the first call, so racing cancels fire
    /// each callback at least once without re-running the full list forever.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        // Snapshot under the lock, invoke outside it, so a callback that
        // registers further callbacks (or cancels a child) cannot deadlock.
        let snapshot: Vec<Callback> = {
            let mut callbacks = lock_recover(&self.inner.callbacks);
            std::mem::take(&mut *callbacks)
        };
        for cb in &snapshot {
            cb();
        }
    }

    pub fn check(&self) -> Result<(), CancelledError> {
        if self.cancelled() {
            Err(CancelledError)
        } else {
            Ok(())
        }
    }

    /// Register a cancellation callback.  Fires immediately when the token is
    /// already tripped.
    pub fn on_cancel(&self, cb: impl Fn() + Send + Sync + 'static) {
        {
            let mut callbacks = lock_recover(&self.inner.callbacks);
            callbacks.push(Box::new(cb));
        }
        if self.cancelled() {
            // The racing `cancel` may already have drained the list; re-run
            // the snapshot so the late registration still fires.
            let snapshot: Vec<Callback> = {
                let mut callbacks = lock_recover(&self.inner.callbacks);
                std::mem::take(&mut *callbacks)
            };
            for cb in &snapshot {
                cb();
            }
        }
    }

    /// Derive a token that trips when this one does.  Cancelling the child
    /// does NOT propagate upward.
    pub fn child(&self) -> CancellationToken {
        let child = CancellationToken::new();
        let notify = child.clone();
        self.on_cancel(move || notify.cancel());
        child
    }
}

fn lock_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
