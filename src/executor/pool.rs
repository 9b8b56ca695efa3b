// Bounded, elastic thread-pool executor.
//
// Grounded directly on the original Executor's state machine: a single
// lock guards the queue, the worker roster and the pool state; workers
// idle-timeout and self-retire down to `low_watermark`; `execute` grows
// the pool past `low_watermark` only when a task arrives to find the
// queue already non-empty, exactly mirroring the original's
// `cur_queue_size++ > 0 && threads.size() < high_watermark` check.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use super::queue::Queue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Run,
    Stopping,
    Stopped,
}

/// Outcome of `execute`. A three-valued result so callers can tell a full
/// queue apart from a pool that has already started shutting down, unlike
/// the source's single boolean return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    Accepted,
    QueueFull,
    Stopped,
}

impl Acceptance {
    pub fn is_accepted(self) -> bool {
        matches!(self, Acceptance::Accepted)
    }
}

/// Dependency-injected sink for a worker's `TaskFailure` report. Kept as a
/// trait object rather than a fixed logging call so a caller embedding the
/// pool can route task panics into their own reporting instead of stdout.
pub type ErrorLog = Arc<dyn Fn(&str) + Send + Sync>;

fn default_error_log() -> ErrorLog {
    Arc::new(|msg: &str| {
        tracing::error!(component = "executor", event = "task_failed", error = %msg);
    })
}

/// Executor configuration.
#[derive(Clone)]
pub struct Config {
    pub name: String,
    pub low_watermark: usize,
    pub high_watermark: usize,
    pub max_queue_size: usize,
    pub idle_time: Duration,
    pub error_log: ErrorLog,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("name", &self.name)
            .field("low_watermark", &self.low_watermark)
            .field("high_watermark", &self.high_watermark)
            .field("max_queue_size", &self.max_queue_size)
            .field("idle_time", &self.idle_time)
            .field("error_log", &"<callback>")
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            low_watermark: 1,
            high_watermark: num_cpus::get().max(1),
            max_queue_size: 1024,
            idle_time: Duration::from_millis(500),
            error_log: default_error_log(),
        }
    }
}

struct Inner {
    state: State,
    queue: Queue,
    workers: usize,
}

struct Shared {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    no_threads: Condvar,
}

/// A bounded, watermark-scaled pool of worker threads.
pub struct ThreadPool {
    shared: Arc<Shared>,
    cfg: Config,
    next_worker_id: AtomicUsize,
}

impl ThreadPool {
    pub fn new(cfg: Config) -> Self {
        assert!(cfg.low_watermark >= 1, "low_watermark must be at least 1");
        assert!(
            cfg.low_watermark <= cfg.high_watermark,
            "low_watermark must not exceed high_watermark"
        );
        assert!(cfg.max_queue_size >= 1, "max_queue_size must be at least 1");

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: State::Run,
                queue: Queue::new(cfg.max_queue_size),
                workers: 0,
            }),
            not_empty: Condvar::new(),
            no_threads: Condvar::new(),
        });

        let pool = Self {
            shared,
            cfg,
            next_worker_id: AtomicUsize::new(0),
        };

        for _ in 0..pool.cfg.low_watermark {
            pool.spawn_worker();
        }
        pool
    }

    fn spawn_worker(&self) {
        let shared = Arc::clone(&self.shared);
        let cfg = self.cfg.clone();
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut inner = self.shared.inner.lock();
            inner.workers += 1;
        }
        thread::Builder::new()
            .name(format!("{}-{}", cfg.name, id))
            .spawn(move || worker_loop(shared, cfg, id))
            .expect("failed to spawn executor worker thread");
    }

    /// Submits a task. Grows the worker population if the queue already
    /// held at least one task before this one was enqueued and the pool
    /// has not yet reached `high_watermark`.
    pub fn execute<F>(&self, task: F) -> Acceptance
    where
        F: FnOnce() + Send + 'static,
    {
        let should_spawn;
        {
            let mut inner = self.shared.inner.lock();
            if inner.state != State::Run {
                return Acceptance::Stopped;
            }
            let queue_had_items = !inner.queue.is_empty();
            if !inner.queue.try_push(Box::new(task)) {
                return Acceptance::QueueFull;
            }
            should_spawn = queue_had_items && inner.workers < self.cfg.high_watermark;
        }
        if should_spawn {
            self.spawn_worker();
        }
        self.shared.not_empty.notify_one();
        Acceptance::Accepted
    }

    pub fn worker_count(&self) -> usize {
        self.shared.inner.lock().workers
    }

    pub fn queue_len(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    pub fn state(&self) -> State {
        self.shared.inner.lock().state
    }

    /// Stops accepting new tasks and clears whatever is still queued (the
    /// source's `Stop()` discards pending work rather than draining it).
    /// When `await` is set, blocks until every worker has exited.
    pub fn stop(&self, await_workers: bool) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.state != State::Run {
                return;
            }
            inner.state = State::Stopping;
            inner.queue.clear();
        }
        self.shared.not_empty.notify_all();

        if await_workers {
            let mut inner = self.shared.inner.lock();
            while inner.workers > 0 {
                self.shared.no_threads.wait(&mut inner);
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if self.state() != State::Stopped {
            self.stop(true);
        }
    }
}

fn worker_loop(shared: Arc<Shared>, cfg: Config, id: usize) {
    info!(component = "executor", event = "worker_started", pool = %cfg.name, worker = id);
    loop {
        let mut inner = shared.inner.lock();
        let task = loop {
            if inner.state != State::Run {
                break None;
            }
            if let Some(task) = inner.queue.try_pop() {
                break Some(task);
            }
            let timed_out = shared.not_empty.wait_for(&mut inner, cfg.idle_time).timed_out();
            if timed_out
                && (inner.state != State::Run
                    || (inner.queue.is_empty() && inner.workers > cfg.low_watermark))
            {
                break None;
            }
        };

        match task {
            Some(task) => {
                drop(inner);
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                    let msg = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "task panicked".to_string());
                    (cfg.error_log)(&format!("pool {} worker {id}: {msg}", cfg.name));
                }
            }
            None => {
                inner.workers -= 1;
                let retiring_last = inner.workers == 0 && inner.state != State::Run;
                if retiring_last {
                    inner.state = State::Stopped;
                }
                drop(inner);
                if retiring_last {
                    shared.no_threads.notify_all();
                }
                warn!(component = "executor", event = "worker_retired", pool = %cfg.name, worker = id);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::time::Duration;

    fn cfg(low: usize, high: usize, queue: usize) -> Config {
        Config {
            name: "test".into(),
            low_watermark: low,
            high_watermark: high,
            max_queue_size: queue,
            idle_time: Duration::from_millis(50),
            ..Config::default()
        }
    }

    #[test]
    fn error_log_callback_observes_a_panicking_task() {
        let reports: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let reports_for_log = Arc::clone(&reports);
        let pool = ThreadPool::new(Config {
            error_log: Arc::new(move |msg: &str| reports_for_log.lock().push(msg.to_string())),
            ..cfg(1, 1, 4)
        });
        let barrier = Arc::new(Barrier::new(2));
        let b1 = Arc::clone(&barrier);
        pool.execute(move || {
            b1.wait();
            panic!("boom");
        });
        barrier.wait();
        std::thread::sleep(Duration::from_millis(100));
        pool.stop(true);
        let reports = reports.lock();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].contains("boom"));
    }

    #[test]
    fn backpressure_rejects_past_capacity_e4() {
        let pool = ThreadPool::new(cfg(1, 1, 2));
        let barrier = Arc::new(Barrier::new(2));
        let b1 = Arc::clone(&barrier);
        assert_eq!(pool.execute(move || { b1.wait(); }).is_accepted(), true);
        assert_eq!(pool.execute(|| { std::thread::sleep(Duration::from_millis(200)); }), Acceptance::Accepted);
        assert_eq!(pool.execute(|| {}), Acceptance::QueueFull);
        barrier.wait();
        pool.stop(true);
    }

    #[test]
    fn grows_and_shrinks_between_watermarks_e5() {
        let pool = ThreadPool::new(cfg(1, 4, 100));
        for _ in 0..10 {
            pool.execute(|| std::thread::sleep(Duration::from_millis(80)));
        }
        std::thread::sleep(Duration::from_millis(150));
        assert!(pool.worker_count() > 1);
        assert!(pool.worker_count() <= 4);

        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(pool.worker_count(), 1);
        pool.stop(true);
    }

    #[test]
    fn stop_clears_pending_queue() {
        let pool = ThreadPool::new(cfg(1, 1, 10));
        let ran = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(2));
        let b1 = Arc::clone(&barrier);
        pool.execute(move || {
            b1.wait();
        });
        for _ in 0..5 {
            let ran = Arc::clone(&ran);
            pool.execute(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.stop(false);
        barrier.wait();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(pool.execute(|| {}), Acceptance::Stopped);
    }

    #[test]
    fn stopped_transition_waits_for_last_worker() {
        let pool = ThreadPool::new(cfg(2, 2, 10));
        pool.stop(true);
        assert_eq!(pool.state(), State::Stopped);
        assert_eq!(pool.worker_count(), 0);
    }
}
