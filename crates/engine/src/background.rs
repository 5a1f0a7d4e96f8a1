//! Dedicated worker thread for long-running fits.
//!
//! Jobs run one at a time, in submission order, on a named thread so that a
//! multi-minute clustering fit never occupies a query thread. Each job hands
//! back a [`Ticket`] that can be polled or awaited.

use neardup_core::{Error, Result};
use parking_lot::{Condvar, Mutex as ParkingMutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::error;

// ============================================================================
// Tickets
// ============================================================================

enum Slot<T> {
    Pending,
    Ready(Result<T>),
    Taken,
}

struct TicketInner<T> {
    slot: ParkingMutex<Slot<T>>,
    ready: Condvar,
}

/// Handle to the result of a submitted job.
pub struct Ticket<T> {
    inner: Arc<TicketInner<T>>,
}

impl<T> Ticket<T> {
    /// True once the job has finished (successfully or not).
    pub fn is_finished(&self) -> bool {
        !matches!(*self.inner.slot.lock(), Slot::Pending)
    }

    /// Take the result if the job has finished. `None` while pending and
    /// after the result has been taken.
    pub fn try_take(&self) -> Option<Result<T>> {
        let mut slot = self.inner.slot.lock();
        take_ready(&mut *slot)
    }

    /// Block until the job finishes and return its result.
    pub fn wait(self) -> Result<T> {
        let mut slot = self.inner.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.inner.ready.wait(&mut slot);
        }
        take_ready(&mut *slot).unwrap_or_else(|| Err(Error::Worker("result already taken".into())))
    }

    /// Block up to `timeout`. `None` if the job is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.slot.lock();
        while matches!(*slot, Slot::Pending) {
            if self.inner.ready.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        take_ready(&mut *slot)
    }
}

fn take_ready<T>(slot: &mut Slot<T>) -> Option<Result<T>> {
    match std::mem::replace(slot, Slot::Taken) {
        Slot::Ready(result) => Some(result),
        other => {
            *slot = other;
            None
        }
    }
}

/// Completes a ticket. A sender dropped without completing (the job
/// panicked) completes it with an error so waiters never hang.
struct TicketSender<T> {
    inner: Arc<TicketInner<T>>,
    completed: bool,
}

impl<T> TicketSender<T> {
    fn complete(mut self, result: Result<T>) {
        self.fill(result);
        self.completed = true;
    }

    fn fill(&self, result: Result<T>) {
        *self.inner.slot.lock() = Slot::Ready(result);
        self.inner.ready.notify_all();
    }
}

impl<T> Drop for TicketSender<T> {
    fn drop(&mut self) {
        if !self.completed {
            self.fill(Err(Error::Worker("job panicked before completing".into())));
        }
    }
}

fn ticket<T>() -> (TicketSender<T>, Ticket<T>) {
    let inner = Arc::new(TicketInner {
        slot: ParkingMutex::new(Slot::Pending),
        ready: Condvar::new(),
    });
    (
        TicketSender {
            inner: Arc::clone(&inner),
            completed: false,
        },
        Ticket { inner },
    )
}

// ============================================================================
// Worker
// ============================================================================

/// Worker metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    /// Jobs waiting in the queue.
    pub queue_depth: usize,
    /// Jobs currently running (0 or 1).
    pub active_jobs: usize,
    /// Jobs finished since the worker started.
    pub jobs_completed: u64,
}

type Job = Box<dyn FnOnce() + Send>;

struct WorkerInner {
    queue: ParkingMutex<VecDeque<Job>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    queue_depth: AtomicUsize,
    active_jobs: AtomicUsize,
    jobs_completed: AtomicU64,
}

/// Single dedicated thread running submitted jobs in FIFO order.
pub struct FitWorker {
    inner: Arc<WorkerInner>,
    handle: ParkingMutex<Option<JoinHandle<()>>>,
}

impl FitWorker {
    /// Start the worker thread.
    pub fn new(name: &str) -> Result<Self> {
        let inner = Arc::new(WorkerInner {
            queue: ParkingMutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
            active_jobs: AtomicUsize::new(0),
            jobs_completed: AtomicU64::new(0),
        });

        let inner_clone = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(&inner_clone))
            .map_err(|e| Error::Worker(format!("failed to spawn worker thread: {}", e)))?;

        Ok(FitWorker {
            inner,
            handle: ParkingMutex::new(Some(handle)),
        })
    }

    /// Queue `job` and return a ticket for its result.
    ///
    /// # Errors
    ///
    /// [`Error::Worker`] after shutdown.
    pub fn submit<T, F>(&self, job: F) -> Result<Ticket<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        if self.inner.shutdown.load(AtomicOrdering::Acquire) {
            return Err(Error::Worker("worker has been shut down".into()));
        }

        let (sender, ticket) = ticket();
        let work: Job = Box::new(move || sender.complete(job()));
        {
            let mut queue = self.inner.queue.lock();
            queue.push_back(work);
            self.inner.queue_depth.fetch_add(1, AtomicOrdering::Release);
        }
        self.inner.work_ready.notify_one();
        Ok(ticket)
    }

    /// Block until all queued and running jobs have completed.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while self.inner.queue_depth.load(AtomicOrdering::Acquire) > 0
            || self.inner.active_jobs.load(AtomicOrdering::Acquire) > 0
        {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Finish queued jobs, then stop and join the thread. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, AtomicOrdering::Release);

        // Lock before notifying: a worker between its shutdown check and
        // wait() holds the lock.
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }

        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Snapshot of worker metrics.
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            queue_depth: self.inner.queue_depth.load(AtomicOrdering::Relaxed),
            active_jobs: self.inner.active_jobs.load(AtomicOrdering::Relaxed),
            jobs_completed: self.inner.jobs_completed.load(AtomicOrdering::Relaxed),
        }
    }
}

impl Drop for FitWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decrements `active_jobs` and wakes drain waiters, even if a job panics.
struct ActiveJobGuard<'a> {
    inner: &'a WorkerInner,
}

impl<'a> Drop for ActiveJobGuard<'a> {
    fn drop(&mut self) {
        let prev_active = self.inner.active_jobs.fetch_sub(1, AtomicOrdering::Release);
        self.inner.jobs_completed.fetch_add(1, AtomicOrdering::Relaxed);

        if prev_active == 1 && self.inner.queue_depth.load(AtomicOrdering::Acquire) == 0 {
            let _queue = self.inner.queue.lock();
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop(inner: &WorkerInner) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    inner.queue_depth.fetch_sub(1, AtomicOrdering::Release);
                    inner.active_jobs.fetch_add(1, AtomicOrdering::Release);
                    break job;
                }
                if inner.shutdown.load(AtomicOrdering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveJobGuard { inner };

        // A panicking job must not kill the worker thread.
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
            error!(
                target: "neardup::service",
                "fit job panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}
