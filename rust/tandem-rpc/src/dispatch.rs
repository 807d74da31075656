//! Dispatch queue and worker pool.
//!
//! The one piece of code allowed inside a notification handler is the
//! producer path of this queue. Everything of arbitrary duration (RPC
//! handler bodies that block, sleep, or take further locks) runs on the
//! fixed pool of workers draining it, so a slow handler costs throughput,
//! never notification latency.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Worker pool and queue sizing.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Queue capacity. Overflow is fatal: capacity is a design-time
    /// decision, and a silently dropped entry would hang its caller.
    pub capacity: usize,
    /// Jobs running longer than this are logged (not aborted).
    pub slow_call: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            capacity: 64,
            slow_call: Duration::from_millis(500),
        }
    }
}

impl DispatchConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.workers == 0 || self.workers > 64 {
            return Err("workers must be 1-64");
        }
        if self.capacity == 0 || self.capacity > 4096 {
            return Err("capacity must be 1-4096");
        }
        Ok(())
    }
}

/// Marks a queued entry as skippable.
///
/// A worker reaching an entry whose token is cancelled skips it instead of
/// running the job. A job already claimed and executing is past the point
/// of cancellation.
#[derive(Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Mark the entry cancelled.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True if [`CancelToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// One unit of deferred work.
pub struct DispatchEntry {
    /// Transport handle of the call this entry serves (diagnostics).
    pub xid: u32,
    /// Optional skip marker.
    pub cancel: Option<CancelToken>,
    /// The deferred body.
    pub job: Box<dyn FnOnce() + Send>,
}

impl DispatchEntry {
    pub fn new(xid: u32, job: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            xid,
            cancel: None,
            job,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// The queue is closed: the pool has been told to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

impl fmt::Display for QueueClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dispatch queue closed")
    }
}

impl std::error::Error for QueueClosed {}

struct QueueState {
    entries: VecDeque<DispatchEntry>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    nonempty: Condvar,
    capacity: usize,
    slow_call: Duration,
    serviced: Box<[AtomicU64]>,
    skipped: AtomicU64,
}

/// Producer handle, cheap to clone into notification callbacks.
#[derive(Clone)]
pub struct DispatchHandle {
    shared: Arc<Shared>,
}

impl DispatchHandle {
    /// Append an entry and wake one parked worker.
    ///
    /// Callable from any context, including notification handlers: the
    /// critical section is a bounded push. Panics if the queue is full:
    /// by design, a loud capacity failure beats a reply that silently
    /// never happens.
    pub fn queue(&self, entry: DispatchEntry) -> Result<(), QueueClosed> {
        {
            let mut state = self
                .shared
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if state.shutdown {
                return Err(QueueClosed);
            }
            assert!(
                state.entries.len() < self.shared.capacity,
                "dispatch queue overflow (capacity {}): entry for xid {} has nowhere to go",
                self.shared.capacity,
                entry.xid
            );
            state.entries.push_back(entry);
        }
        self.shared.nonempty.notify_one();
        Ok(())
    }

    /// Number of entries currently waiting.
    pub fn backlog(&self) -> usize {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}

/// The worker pool. Owns the queue; stopping the pool stops the queue.
pub struct DispatchPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl DispatchPool {
    /// Create the queue and spawn the workers.
    ///
    /// Fails fatally (no partial bring-up): if any worker cannot be
    /// spawned, the ones already running are stopped before the error is
    /// returned.
    pub fn new(config: DispatchConfig) -> io::Result<Self> {
        config
            .validate()
            .map_err(|msg| io::Error::new(io::ErrorKind::InvalidInput, msg))?;

        let serviced: Vec<AtomicU64> = (0..config.workers).map(|_| AtomicU64::new(0)).collect();
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                entries: VecDeque::with_capacity(config.capacity),
                shutdown: false,
            }),
            nonempty: Condvar::new(),
            capacity: config.capacity,
            slow_call: config.slow_call,
            serviced: serviced.into_boxed_slice(),
            skipped: AtomicU64::new(0),
        });

        let mut pool = Self {
            shared: shared.clone(),
            workers: Vec::with_capacity(config.workers),
        };
        for index in 0..config.workers {
            let shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("tandem-worker-{index}"))
                .spawn(move || worker_main(shared, index));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(err) => {
                    pool.shutdown();
                    return Err(err);
                }
            }
        }
        Ok(pool)
    }

    /// Producer handle for notification callbacks.
    pub fn handle(&self) -> DispatchHandle {
        DispatchHandle {
            shared: self.shared.clone(),
        }
    }

    /// Jobs serviced per worker, in worker order.
    pub fn serviced_counts(&self) -> Vec<u64> {
        self.shared
            .serviced
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    /// Entries skipped because their cancel token fired.
    pub fn skipped_count(&self) -> u64 {
        self.shared.skipped.load(Ordering::Relaxed)
    }

    /// Stop accepting entries, drain what is already queued, and join the
    /// workers. Idempotent; also run by `Drop`.
    pub fn shutdown(&mut self) {
        {
            let mut state = self
                .shared
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            state.shutdown = true;
        }
        self.shared.nonempty.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("dispatch worker panicked");
            }
        }
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_main(shared: Arc<Shared>, index: usize) {
    loop {
        let entry = {
            let mut state = shared.state.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                if let Some(entry) = state.entries.pop_front() {
                    break entry;
                }
                if state.shutdown {
                    return;
                }
                state = shared
                    .nonempty
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        if entry
            .cancel
            .as_ref()
            .is_some_and(CancelToken::is_cancelled)
        {
            tracing::trace!(xid = entry.xid, worker = index, "skipping cancelled entry");
            shared.skipped.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let started = Instant::now();
        (entry.job)();
        let elapsed = started.elapsed();
        if elapsed > shared.slow_call {
            tracing::warn!(
                xid = entry.xid,
                worker = index,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow dispatch job"
            );
        }
        shared.serviced[index].fetch_add(1, Ordering::Relaxed);
    }
}
