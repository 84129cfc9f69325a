//! Background execution: the worker-pool seam and a threaded default.
//!
//! The engine never creates threads for request execution itself; it hands
//! units of work to a [`WorkerPool`] keyed by an identity string (the
//! request URL), with a side-channel to raise a pending item's priority.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// A unit of work scheduled on the pool.
pub type Task = Box<dyn FnOnce() + Send>;

/// Executes submitted tasks on background threads.
pub trait WorkerPool: Send + Sync {
    /// Queues `task` under `key` for execution on some worker thread.
    fn execute(&self, key: String, task: Task);

    /// Moves the first pending task matching `key` to the front of the
    /// queue. No effect if the task is already running or unknown.
    fn raise_priority(&self, key: &str);
}

struct Queue {
    tasks: VecDeque<(String, Task)>,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    cv: Condvar,
}

/// Fixed-size thread pool draining a keyed FIFO queue.
///
/// Each worker runs one task at a time to completion; tasks still pending at
/// shutdown are dropped unexecuted.
pub struct ThreadedWorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadedWorkerPool {
    pub fn new(worker_count: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                tasks: VecDeque::new(),
                shutdown: false,
            }),
            cv: Condvar::new(),
        });
        let mut workers = Vec::with_capacity(worker_count.max(1));
        for _ in 0..worker_count.max(1) {
            let shared = Arc::clone(&shared);
            workers.push(thread::spawn(move || loop {
                let task = {
                    let mut queue = shared.queue.lock().unwrap();
                    loop {
                        if let Some((_, task)) = queue.tasks.pop_front() {
                            break task;
                        }
                        if queue.shutdown {
                            return;
                        }
                        queue = shared.cv.wait(queue).unwrap();
                    }
                };
                task();
            }));
        }
        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Stops accepting work, wakes all workers and joins them. Pending
    /// tasks are dropped. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.shutdown = true;
            queue.tasks.clear();
        }
        self.shared.cv.notify_all();
        let current = thread::current().id();
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            // Shutdown may run on a worker thread (last pool reference
            // dropped by a task); a thread cannot join itself.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
    }
}

impl WorkerPool for ThreadedWorkerPool {
    fn execute(&self, key: String, task: Task) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            if queue.shutdown {
                tracing::warn!(%key, "task submitted after worker pool shutdown, dropping");
                return;
            }
            queue.tasks.push_back((key, task));
        }
        self.shared.cv.notify_one();
    }

    fn raise_priority(&self, key: &str) {
        let mut queue = self.shared.queue.lock().unwrap();
        if let Some(pos) = queue.tasks.iter().position(|(k, _)| k == key) {
            if pos > 0 {
                let entry = queue.tasks.remove(pos).unwrap();
                queue.tasks.push_front(entry);
            }
        }
    }
}

impl Drop for ThreadedWorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
