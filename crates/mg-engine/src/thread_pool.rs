//! Fixed-size worker pool with a FIFO job queue.
//!
//! Jobs run to completion once a worker picks them up; there is no
//! cancellation. A panicking job is caught and logged and still counts as
//! finished, so [`ThreadPool::await_all_jobs`] never hangs on it.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, TryRecvError};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A job panicked before producing its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("job panicked before producing a result")]
pub struct JobPanicked;

// ---------------------------------------------------------------------------
// JobHandle
// ---------------------------------------------------------------------------

/// The eventual result of a job added with [`ThreadPool::add_job`].
#[must_use = "dropping a JobHandle discards the job's result"]
pub struct JobHandle<R> {
    receiver: Receiver<R>,
}

impl<R> JobHandle<R> {
    /// Block until the job has finished and return its result.
    pub fn wait(self) -> Result<R, JobPanicked> {
        self.receiver.recv().map_err(|_| JobPanicked)
    }

    /// Return the result if the job has already finished.
    pub fn try_wait(&self) -> Option<Result<R, JobPanicked>> {
        match self.receiver.try_recv() {
            Ok(value) => Some(Ok(value)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(JobPanicked)),
        }
    }
}

// ---------------------------------------------------------------------------
// ThreadPool
// ---------------------------------------------------------------------------

struct JobQueue {
    jobs: VecDeque<Job>,
    /// Queued plus running jobs.
    num_jobs: usize,
    exiting: bool,
}

struct Shared {
    queue: Mutex<JobQueue>,
    job_available: Condvar,
    all_done: Condvar,
}

pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Start a pool with `thread_count` worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `thread_count` is zero.
    pub fn new(thread_count: usize) -> io::Result<Self> {
        assert!(thread_count > 0, "ThreadPool needs at least one worker thread");

        let mut pool = Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(JobQueue {
                    jobs: VecDeque::new(),
                    num_jobs: 0,
                    exiting: false,
                }),
                job_available: Condvar::new(),
                all_done: Condvar::new(),
            }),
            workers: Vec::with_capacity(thread_count),
        };

        for i in 0..thread_count {
            let shared = Arc::clone(&pool.shared);
            let worker = thread::Builder::new()
                .name(format!("mg-worker-{i}"))
                .spawn(move || worker_loop(&shared))?;
            pool.workers.push(worker);
        }

        tracing::debug!(threads = thread_count, "started thread pool");
        Ok(pool)
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Number of jobs queued or running.
    pub fn num_jobs(&self) -> usize {
        self.shared.queue.lock().num_jobs
    }

    /// Queue `job` and return a handle to its result.
    pub fn add_job<F, R>(&self, job: F) -> JobHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        self.push(Box::new(move || {
            // The handle may have been dropped; the result is then unwanted.
            let _ = sender.send(job());
        }));
        JobHandle { receiver }
    }

    /// Queue `job` without keeping a handle to it.
    pub fn add_job_fire_and_forget<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Box::new(job));
    }

    /// Apply `f` to every item, `chunk_size` items per job, and return the
    /// results in input order.
    ///
    /// Must not be called from inside a job of the same pool.
    pub fn parallel_for<T, R, F>(
        &self,
        items: Vec<T>,
        chunk_size: usize,
        f: F,
    ) -> Result<Vec<R>, JobPanicked>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        assert!(chunk_size > 0, "parallel_for chunk size must be positive");

        let f = Arc::new(f);
        let total = items.len();
        let mut items = items.into_iter();
        let mut handles = Vec::with_capacity(total.div_ceil(chunk_size));
        loop {
            let chunk: Vec<T> = items.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            let f = Arc::clone(&f);
            handles.push(self.add_job(move || chunk.into_iter().map(|item| f(item)).collect::<Vec<R>>()));
        }

        let mut results = Vec::with_capacity(total);
        for handle in handles {
            results.extend(handle.wait()?);
        }
        Ok(results)
    }

    /// Block until every queued and running job has finished.
    ///
    /// Must not be called from inside a job of the same pool.
    pub fn await_all_jobs(&self) {
        let mut queue = self.shared.queue.lock();
        while queue.num_jobs > 0 {
            self.shared.all_done.wait(&mut queue);
        }
    }

    fn push(&self, job: Job) {
        let mut queue = self.shared.queue.lock();
        queue.jobs.push_back(job);
        queue.num_jobs += 1;
        self.shared.job_available.notify_one();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            while queue.jobs.is_empty() && !queue.exiting {
                shared.job_available.wait(&mut queue);
            }
            match queue.jobs.pop_front() {
                Some(job) => job,
                None => return,
            }
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(
                worker = thread::current().name().unwrap_or("unnamed"),
                panic = %message,
                "job panicked"
            );
        }

        let mut queue = shared.queue.lock();
        queue.num_jobs -= 1;
        if queue.num_jobs == 0 {
            shared.all_done.notify_all();
        }
    }
}

impl Drop for ThreadPool {
    /// Finishes every queued job, then joins the workers.
    fn drop(&mut self) {
        self.await_all_jobs();
        self.shared.queue.lock().exiting = true;
        self.shared.job_available.notify_all();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("worker thread terminated abnormally");
            }
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("size", &self.size())
            .field("num_jobs", &self.num_jobs())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
