//! Bounded worker pool for check execution and aggregation work.
//!
//! Report generation is not latency-sensitive but must not lose work: when
//! the queue is full the submitting thread runs the job itself instead of
//! dropping it (caller-runs degradation).

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size thread pool over a bounded queue.
pub struct WorkerPool {
    tx: Option<SyncSender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Create a pool with `workers` threads and a queue of `queue_depth`
    /// pending jobs.
    #[must_use]
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::sync_channel::<Job>(queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers)
            .map(|i| {
                let rx = Arc::clone(&rx);
                thread::Builder::new()
                    .name(format!("probe-worker-{i}"))
                    .spawn(move || Self::run_worker(&rx))
                    .expect("Failed to spawn worker thread")
            })
            .collect();

        Self {
            tx: Some(tx),
            handles,
        }
    }

    fn run_worker(rx: &Mutex<Receiver<Job>>) {
        loop {
            let job = {
                let Ok(guard) = rx.lock() else { break };
                guard.recv()
            };
            match job {
                Ok(job) => job(),
                Err(_) => break, // sender dropped, pool is shutting down
            }
        }
    }

    /// Run a job on the pool, or on the calling thread when the queue is
    /// saturated. Work is never dropped.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        let job: Job = Box::new(job);
        let Some(tx) = &self.tx else {
            job();
            return;
        };

        match tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => {
                tracing::debug!("Worker pool saturated; running job on caller");
                job();
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets workers drain the queue and exit.
        self.tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_all_jobs_execute() {
        let pool = WorkerPool::new(4, 8);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        drop(pool); // joins workers
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_saturated_pool_runs_on_caller() {
        // One slow worker and a single queue slot force caller-runs.
        let pool = WorkerPool::new(1, 1);
        let counter = Arc::new(AtomicUsize::new(0));

        {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                thread::sleep(Duration::from_millis(100));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        let caller_thread = thread::current().id();
        let mut ran_on_caller = false;
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            let caller = Arc::new(Mutex::new(None));
            let caller_probe = Arc::clone(&caller);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                *caller_probe.lock().expect("lock") = Some(thread::current().id());
            });
            if *caller.lock().expect("lock") == Some(caller_thread) {
                ran_on_caller = true;
            }
        }

        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 11);
        assert!(ran_on_caller, "expected at least one caller-runs execution");
    }
}
