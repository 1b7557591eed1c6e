use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed pool of session workers fed from one FIFO channel.
///
/// Shutdown closes the channel; each worker drains whatever is still queued
/// and exits when the channel disconnects, then the threads are joined.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads);
        for _ in 0..threads {
            let receiver = receiver.clone();
            workers.push(thread::spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            }));
        }
        WorkerPool {
            sender: Some(sender),
            workers,
        }
    }

    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Box::new(job));
        }
    }

    /// Closes the queue and joins every worker once it has drained.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn queued_jobs_drain_before_join() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(3);
        for _ in 0..50 {
            let counter = counter.clone();
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut pool = WorkerPool::new(1);
        pool.shutdown();
        pool.shutdown();
        pool.execute(|| panic!("must not run after shutdown"));
    }
}
