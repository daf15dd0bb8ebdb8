//! A fixed-size worker pool running one indexed job at a time.
//!
//! A job is a function of an index. [`ThreadPool::run_range`] hands the
//! indices `first..end` to the workers, each worker taking the next index
//! until the range is drained. The caller usually runs index 0 itself and
//! then waits with [`ThreadPool::wait_all`]. A job that panics is counted
//! and reported by [`ThreadPool::take_panicked`].

use crate::lock;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Work shared by the pool.
pub type Job = Arc<dyn Fn(usize) + Send + Sync>;

struct Queue {
    job: Option<Job>,
    next: usize,
    end: usize,
    busy: usize,
    panicked: usize,
    shutdown: bool,
}

impl Queue {
    fn is_idle(&self) -> bool {
        self.busy == 0 && self.next >= self.end
    }
}

struct Shared {
    queue: Mutex<Queue>,
    new_jobs: Condvar,
    jobs_done: Condvar,
}

/// Worker threads sharing one job queue.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Start `threads` workers.
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                job: None,
                next: 0,
                end: 0,
                busy: 0,
                panicked: 0,
                shutdown: false,
            }),
            new_jobs: Condvar::new(),
            jobs_done: Condvar::new(),
        });
        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(threads),
        };
        for index in 0..threads {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("flzma2-worker-{index}"))
                .spawn(move || worker(&shared))?;
            pool.workers.push(handle);
        }
        debug!(threads, "thread pool started");
        Ok(pool)
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Queue `job` for the indices `first..end`. Any previous range must have
    /// completed.
    pub fn run_range(&self, job: Job, first: usize, end: usize) {
        if first >= end {
            return;
        }
        let mut queue = lock(&self.shared.queue);
        queue.job = Some(job);
        queue.next = first;
        queue.end = end;
        self.shared.new_jobs.notify_all();
    }

    /// Queue `job` for the single index `n`.
    pub fn run(&self, job: Job, n: usize) {
        self.run_range(job, n, n + 1);
    }

    /// Wait for the current range to finish. With a timeout, waits at most
    /// once for that long. Returns whether work is still running.
    pub fn wait_all(&self, timeout: Option<Duration>) -> bool {
        let mut queue = lock(&self.shared.queue);
        match timeout {
            Some(limit) => {
                if !queue.is_idle() && !queue.shutdown {
                    queue = self
                        .shared
                        .jobs_done
                        .wait_timeout(queue, limit)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
            None => {
                while !queue.is_idle() && !queue.shutdown {
                    queue = self
                        .shared
                        .jobs_done
                        .wait(queue)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        !queue.is_idle() && !queue.shutdown
    }

    /// Number of jobs that panicked since the last call, resetting it.
    pub fn take_panicked(&self) -> usize {
        std::mem::take(&mut lock(&self.shared.queue).panicked)
    }

    /// Whether no work is queued or running.
    pub fn is_idle(&self) -> bool {
        lock(&self.shared.queue).is_idle()
    }
}

fn worker(shared: &Shared) {
    let mut queue = lock(&shared.queue);
    loop {
        while queue.next >= queue.end && !queue.shutdown {
            queue = shared
                .new_jobs
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if queue.shutdown {
            return;
        }
        let n = queue.next;
        queue.next += 1;
        queue.busy += 1;
        let job = queue.job.clone();
        drop(queue);

        let panicked = job.is_some_and(|job| {
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| job(n))).is_err()
        });
        if panicked {
            warn!(index = n, "pool job panicked");
        }

        queue = lock(&shared.queue);
        queue.busy -= 1;
        queue.panicked += panicked as usize;
        if queue.is_idle() {
            // Nothing may outlive the range through the pool.
            queue.job = None;
        }
        shared.jobs_done.notify_all();
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut queue = lock(&self.shared.queue);
            queue.shutdown = true;
            queue.job = None;
            self.shared.new_jobs.notify_all();
            self.shared.jobs_done.notify_all();
        }
        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.workers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_runs_every_index_once() {
        let pool = ThreadPool::new(3).unwrap();
        assert_eq!(pool.threads(), 3);
        let hits: Arc<Vec<AtomicUsize>> = Arc::new((0..64).map(|_| AtomicUsize::new(0)).collect());
        let job_hits = Arc::clone(&hits);
        pool.run_range(
            Arc::new(move |n| {
                job_hits[n].fetch_add(1, Ordering::Relaxed);
            }),
            1,
            64,
        );
        assert!(!pool.wait_all(None));
        assert_eq!(hits[0].load(Ordering::Relaxed), 0);
        assert!(hits[1..].iter().all(|h| h.load(Ordering::Relaxed) == 1));
        assert!(pool.is_idle());
    }

    #[test]
    fn test_job_released_after_range() {
        let pool = ThreadPool::new(2).unwrap();
        let payload = Arc::new(vec![0u8; 16]);
        let held = Arc::clone(&payload);
        pool.run_range(Arc::new(move |_| assert_eq!(held.len(), 16)), 0, 4);
        pool.wait_all(None);
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn test_wait_with_timeout() {
        let pool = ThreadPool::new(1).unwrap();
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let job_gate = Arc::clone(&gate);
        pool.run(
            Arc::new(move |_| {
                let (open, cv) = &*job_gate;
                let mut open = open.lock().unwrap();
                while !*open {
                    open = cv.wait(open).unwrap();
                }
            }),
            0,
        );
        assert!(pool.wait_all(Some(Duration::from_millis(10))));
        {
            let (open, cv) = &*gate;
            *open.lock().unwrap() = true;
            cv.notify_all();
        }
        assert!(!pool.wait_all(None));
    }

    #[test]
    fn test_panicking_job_is_reported() {
        let pool = ThreadPool::new(2).unwrap();
        pool.run_range(Arc::new(|n| assert_ne!(n, 1)), 0, 3);
        assert!(!pool.wait_all(None));
        assert_eq!(pool.take_panicked(), 1);
        assert_eq!(pool.take_panicked(), 0);

        // The workers survive and keep taking jobs.
        let hits = Arc::new(AtomicUsize::new(0));
        let job_hits = Arc::clone(&hits);
        pool.run_range(
            Arc::new(move |_| {
                job_hits.fetch_add(1, Ordering::Relaxed);
            }),
            0,
            4,
        );
        pool.wait_all(None);
        assert_eq!(hits.load(Ordering::Relaxed), 4);
        assert_eq!(pool.take_panicked(), 0);
    }

    #[test]
    fn test_empty_pool() {
        let pool = ThreadPool::new(0).unwrap();
        pool.run_range(Arc::new(|_| {}), 0, 0);
        assert!(!pool.wait_all(None));
    }
}
