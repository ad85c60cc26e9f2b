//! Bounded worker pool
//!
//! A fixed set of OS threads consuming a bounded job queue. Submission never
//! blocks: when the queue is full the job is handed back as rejected, and the
//! caller decides what to do with it.
//!
//! A job that panics does not take its worker down; the panic is caught,
//! counted and logged.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Unit of work run by the pool
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Why a job was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Queue is full
    Saturated,
    /// Pool is shutting down
    ShutDown,
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::Saturated => write!(f, "worker pool saturated"),
            SubmitError::ShutDown => write!(f, "worker pool shut down"),
        }
    }
}

impl std::error::Error for SubmitError {}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    completed: AtomicU64,
    panicked: AtomicU64,
}

/// Fixed-size thread pool over a bounded queue
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    capacity: usize,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Spawn `workers` threads (at least one) sharing a queue of `capacity`
    /// jobs (at least one)
    pub fn new(workers: usize, capacity: usize) -> std::io::Result<Self> {
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        let (sender, receiver) = bounded::<Job>(capacity);
        let counters = Arc::new(Counters::default());

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let receiver = receiver.clone();
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("tessel-worker-{}", idx))
                .spawn(move || worker_loop(receiver, counters))?;
            handles.push(handle);
        }
        debug!(workers, capacity, "worker pool started");

        Ok(Self {
            sender: Some(sender),
            workers: handles,
            capacity,
            counters,
        })
    }

    /// Queue a job without blocking
    pub fn submit(&self, job: Job) -> Result<(), SubmitError> {
        let sender = self.sender.as_ref().ok_or(SubmitError::ShutDown)?;
        sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::Saturated,
            TrySendError::Disconnected(_) => SubmitError::ShutDown,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs waiting in the queue
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map(Sender::len).unwrap_or(0)
    }

    /// Jobs currently running
    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> u64 {
        self.counters.completed.load(Ordering::Acquire)
    }

    pub fn panicked(&self) -> u64 {
        self.counters.panicked.load(Ordering::Acquire)
    }

    /// Stop accepting jobs, run what is queued, join the workers
    ///
    /// Idempotent.
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread exited abnormally");
            }
        }
        debug!(completed = self.completed(), "worker pool stopped");
    }
}

fn worker_loop(receiver: Receiver<Job>, counters: Arc<Counters>) {
    // Ends once every sender is gone and the queue is drained
    for job in receiver.iter() {
        counters.active.fetch_add(1, Ordering::AcqRel);
        let outcome = catch_unwind(AssertUnwindSafe(job));
        counters.active.fetch_sub(1, Ordering::AcqRel);
        counters.completed.fetch_add(1, Ordering::AcqRel);
        if outcome.is_err() {
            counters.panicked.fetch_add(1, Ordering::AcqRel);
            warn!("job panicked");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.worker_count())
            .field("capacity", &self.capacity)
            .field("queued", &self.queued())
            .field("active", &self.active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    #[test]
    fn test_runs_jobs() {
        let mut pool = WorkerPool::new(2, 16).unwrap();
        let (tx, rx) = unbounded();
        for i in 0..10 {
            let tx = tx.clone();
            pool.submit(Box::new(move || {
                tx.send(i).unwrap();
            }))
            .unwrap();
        }
        pool.shutdown();
        let mut got: Vec<i32> = rx.try_iter().collect();
        got.sort();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
        assert_eq!(pool.completed(), 10);
    }

    #[test]
    fn test_full_queue_rejects() {
        let pool = WorkerPool::new(1, 1).unwrap();
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let (started_tx, started_rx) = bounded::<()>(1);

        // Occupy the single worker until the gate opens
        pool.submit(Box::new(move || {
            started_tx.send(()).unwrap();
            gate_rx.recv().unwrap();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Fill the single queue slot
        pool.submit(Box::new(|| {})).unwrap();
        assert_eq!(pool.submit(Box::new(|| {})), Err(SubmitError::Saturated));

        gate_tx.send(()).unwrap();
    }

    #[test]
    fn test_panicking_job_is_contained() {
        let mut pool = WorkerPool::new(1, 4).unwrap();
        pool.submit(Box::new(|| panic!("boom"))).unwrap();
        let (tx, rx) = bounded(1);
        pool.submit(Box::new(move || tx.send(7).unwrap())).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        pool.shutdown();
        assert_eq!(pool.panicked(), 1);
        assert_eq!(pool.completed(), 2);
    }

    #[test]
    fn test_submit_after_shutdown() {
        let mut pool = WorkerPool::new(1, 1).unwrap();
        pool.shutdown();
        pool.shutdown();
        assert_eq!(pool.submit(Box::new(|| {})), Err(SubmitError::ShutDown));
    }
}
