// Graceful shutdown coordination. Grounded on the teacher's
// `GracefulShutdown` (add/done/await_shutdown naming, the same log field
// style) but rebuilt on std::thread/Condvar instead of a Tokio runtime,
// since nothing else in this crate runs async.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
#[error("graceful shutdown timeout exceeded")]
pub struct TimeoutError;

struct Inner {
    cancelled: AtomicBool,
    outstanding: AtomicUsize,
    lock: Mutex<()>,
    condvar: Condvar,
}

/// Coordinates a clean shutdown across however many long-lived workers
/// (executor, reactor, coroutine engine) the process is running.
#[derive(Clone)]
pub struct GracefulShutdown {
    inner: Arc<Inner>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                outstanding: AtomicUsize::new(0),
                lock: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// True once `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Registers `n` more outstanding workers (mirrors `WaitGroup::add`).
    pub fn add(&self, n: usize) {
        self.inner.outstanding.fetch_add(n, Ordering::SeqCst);
    }

    /// Marks one outstanding worker as finished.
    pub fn done(&self) {
        let remaining = self.inner.outstanding.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            let _guard = self.inner.lock.lock().unwrap();
            self.inner.condvar.notify_all();
        }
    }

    /// Signals cancellation to anything watching `is_cancelled`.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock().unwrap();
        self.inner.condvar.notify_all();
    }

    /// Cancels, then blocks until every outstanding worker calls `done`
    /// or `timeout` elapses.
    pub fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.cancel();

        let mut guard = self.inner.lock.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;
        while self.inner.outstanding.load(Ordering::SeqCst) > 0 {
            let now = std::time::Instant::now();
            if now >= deadline {
                warn!(
                    component = "shutdown",
                    event = "shutdown_timeout",
                    timeout_secs = timeout.as_secs(),
                    "not all workers exited within the timeout"
                );
                return Err(TimeoutError.into());
            }
            let (g, result) = self
                .inner
                .condvar
                .wait_timeout(guard, deadline - now)
                .unwrap();
            guard = g;
            if result.timed_out() && self.inner.outstanding.load(Ordering::SeqCst) > 0 {
                continue;
            }
        }
        info!(component = "shutdown", event = "shutdown_success", "service shut down cleanly");
        Ok(())
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}
