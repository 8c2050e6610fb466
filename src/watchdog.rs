//! Loading flag that clears itself after a fixed delay.

use crossbeam_channel::{after, bounded, select, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::trace;

struct WatchdogInner {
    loading: AtomicBool,
    /// Bumped on every arm or clear; a timer only fires for its own generation.
    generation: AtomicU64,
    /// Dropping this sender cancels the pending timer.
    cancel: Mutex<Option<Sender<()>>>,
}

/// Loading indicator with a fallback timeout.
///
/// [`start_loading`](Self::start_loading) raises the flag and arms a timer
/// that lowers it after the delay. Arming again cancels the previous timer.
/// [`clear`](Self::clear) lowers it immediately, e.g. when the first article
/// arrives.
#[derive(Clone)]
pub struct LoadingWatchdog {
    inner: Arc<WatchdogInner>,
    delay: Duration,
}

impl LoadingWatchdog {
    /// Create a watchdog. The flag starts raised, with no timer armed.
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: Arc::new(WatchdogInner {
                loading: AtomicBool::new(true),
                generation: AtomicU64::new(0),
                cancel: Mutex::new(None),
            }),
            delay,
        }
    }

    /// Raise the flag and (re)arm the timer.
    pub fn start_loading(&self) {
        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        let generation = {
            let mut cancel = self.inner.cancel.lock();
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.inner.loading.store(true, Ordering::SeqCst);
            // Replacing the sender disconnects the previous timer.
            *cancel = Some(cancel_tx);
            generation
        };

        let inner = Arc::clone(&self.inner);
        let timeout = after(self.delay);
        thread::spawn(move || {
            select! {
                recv(cancel_rx) -> _ => trace!(generation, "Loading timer cancelled"),
                recv(timeout) -> _ => {
                    let _cancel = inner.cancel.lock();
                    if inner.generation.load(Ordering::SeqCst) == generation {
                        inner.loading.store(false, Ordering::SeqCst);
                        trace!(generation, "Loading timed out");
                    }
                }
            }
        });
    }

    /// Lower the flag now and cancel any pending timer.
    pub fn clear(&self) {
        let mut cancel = self.inner.cancel.lock();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.loading.store(false, Ordering::SeqCst);
        *cancel = None;
    }

    pub fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::SeqCst)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}
