//! Worker pool serving accepted channels.
//!
//! Every worker pulls jobs from one shared queue. A job is a whole session,
//! so the pool size bounds how many channels are served at once; further
//! connections wait in the queue until a worker frees up.
use std::{
    sync::{Arc, Mutex, mpsc},
    thread,
};

use log::{debug, error};

/// A unit of work handed to a worker, typically one channel session.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

type Queue = Arc<Mutex<mpsc::Receiver<Job>>>;

/// Fixed set of worker threads, each serving one connection at a time.
///
/// Dropping the pool closes the queue and joins every worker, so it waits
/// for the sessions in progress to end.
#[derive(Debug)]
pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: Option<mpsc::Sender<Job>>,
}

impl ThreadPool {
    /// Spawns `size` workers.
    ///
    /// # Panics
    /// If `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "a worker pool needs at least one worker");

        let (sender, receiver) = mpsc::channel();
        let queue: Queue = Arc::new(Mutex::new(receiver));
        let workers = (0..size)
            .map(|id| Worker::spawn(id, Arc::clone(&queue)))
            .collect();

        Self {
            workers,
            sender: Some(sender),
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queues `f` for the next idle worker. Jobs submitted after every
    /// worker is gone are dropped with an error log.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = self.sender.as_ref() else {
            return;
        };
        if sender.send(Box::new(f)).is_err() {
            error!("worker pool is gone, dropping job");
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        drop(self.sender.take());

        for worker in self.workers.drain(..) {
            debug!("joining worker {}", worker.id);
            if worker.thread.join().is_err() {
                error!("worker {} panicked", worker.id);
            }
        }
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    /// Runs jobs from `queue` until the sending side is dropped.
    fn spawn(id: usize, queue: Queue) -> Self {
        let thread = thread::spawn(move || {
            loop {
                // The guard is released before the job runs.
                let next = match queue.lock() {
                    Ok(receiver) => receiver.recv(),
                    Err(_) => break,
                };
                let Ok(job) = next else {
                    break;
                };

                debug!("worker {id} picked up a session");
                job();
            }
            debug!("worker {id} stopped");
        });

        Self { id, thread }
    }
}
