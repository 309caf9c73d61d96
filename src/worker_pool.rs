//! WorkerPool: fixed set of OS threads serving a shared FIFO queue.
//!
//! Jobs are pushed under a mutex and one idle worker is woken through a
//! condition variable. Workers pop under the lock and run the job after
//! releasing it.
//!
//! While the pool is alive its workers never exit: a panicking job is caught
//! and logged, and the worker moves on to the next job. Dropping the pool is
//! the one exception to the never-shrinking model. It closes the queue, lets
//! the workers drain whatever is still queued, and then joins them, so every
//! thread ends.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use thiserror::Error;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool needs at least one thread")]
    NoWorkers,
    #[error("failed to spawn worker {index}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },
}

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<Queue>,
    not_empty: Condvar,
}

impl Shared {
    // Jobs run outside the lock, so a poisoned mutex still guards a
    // consistent queue.
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a job is available; `None` once the pool is closed and
    /// the queue is drained.
    fn next_job(&self) -> Option<Job> {
        let mut queue = self.lock();
        loop {
            if let Some(job) = queue.jobs.pop_front() {
                return Some(job);
            }
            if queue.closed {
                return None;
            }
            queue = self
                .not_empty
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

fn run_worker(index: usize, shared: &Shared) {
    while let Some(job) = shared.next_job() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(worker = index, "worker pool job panicked");
        }
    }
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `size` worker threads.
    pub fn new(size: usize) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::NoWorkers);
        }
        let shared = Arc::new(Shared::default());
        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(size),
        };
        for index in 0..size {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("kvcore-worker-{index}"))
                .spawn(move || run_worker(index, &shared))
                .map_err(|source| PoolError::Spawn { index, source })?;
            pool.workers.push(handle);
        }
        debug!(workers = size, "worker pool started");
        Ok(pool)
    }

    /// Queue `f` to run on some worker.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.lock().jobs.push_back(Box::new(f));
        self.shared.not_empty.notify_one();
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.lock().jobs.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.lock().closed = true;
        self.shared.not_empty.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size())
            .field("queued", &self.queued())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    /// Invariant: Every queued job runs exactly once.
    #[test]
    fn runs_every_job() {
        let pool = WorkerPool::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            });
        }
        for _ in 0..100 {
            rx.recv_timeout(Duration::from_secs(10)).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    /// Invariant: A pool of size zero is rejected.
    #[test]
    fn zero_workers_is_an_error() {
        assert!(matches!(WorkerPool::new(0), Err(PoolError::NoWorkers)));
    }

    #[test]
    fn reports_size() {
        let pool = WorkerPool::new(3).unwrap();
        assert_eq!(pool.size(), 3);
    }

    /// Invariant: With a single worker, jobs start in submission order.
    #[test]
    fn single_worker_is_fifo() {
        let pool = WorkerPool::new(1).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..50 {
            let tx = tx.clone();
            pool.execute(move || tx.send(i).unwrap());
        }
        drop(tx);
        drop(pool);
        let order: Vec<i32> = rx.iter().collect();
        assert_eq!(order, (0..50).collect::<Vec<_>>());
    }

    /// Invariant: A panicking job does not take its worker down.
    #[test]
    fn survives_panicking_job() {
        let pool = WorkerPool::new(1).unwrap();
        pool.execute(|| panic!("boom"));
        let (tx, rx) = mpsc::channel();
        pool.execute(move || tx.send(7).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(10)), Ok(7));
    }

    /// Invariant: Dropping the pool runs queued jobs before joining.
    #[test]
    fn drop_drains_queue() {
        let pool = WorkerPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..200 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                thread::yield_now();
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 200);
    }
}
