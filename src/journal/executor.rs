//! Ordered callback executor
//!
//! Write callbacks must fire in append order for any given context key
//! (ORD-1). Each worker thread drains its own FIFO queue, and a task's key
//! always hashes to the same worker, so tasks sharing a key are serialized
//! in submission order while different keys spread across workers.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Sender};

use crate::observability::Logger;

type Task = Box<dyn FnOnce() + Send>;

enum WorkerMsg {
    Run(Task),
    Stop,
}

/// Fixed pool of single-consumer worker threads with key-sticky routing.
pub struct OrderedExecutor {
    senders: Vec<Sender<WorkerMsg>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
    shut_down: AtomicBool,
}

impl OrderedExecutor {
    /// Spawn `num_threads` workers (at least one) named `<name>-<index>`.
    pub fn new(name: &str, num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let mut senders = Vec::with_capacity(num_threads);
        let mut handles = Vec::with_capacity(num_threads);

        for index in 0..num_threads {
            let (tx, rx) = channel::unbounded::<WorkerMsg>();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || {
                    while let Ok(msg) = rx.recv() {
                        match msg {
                            WorkerMsg::Run(task) => task(),
                            WorkerMsg::Stop => break,
                        }
                    }
                })
                .expect("failed to spawn executor worker");
            senders.push(tx);
            handles.push(handle);
        }

        Self {
            senders,
            handles: Mutex::new(handles),
            next: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Submit a task serialized with every other task sharing `key`.
    pub fn submit_ordered<F>(&self, key: u64, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.senders.len();
        let _ = self.senders[index].send(WorkerMsg::Run(Box::new(task)));
    }

    /// Submit a task with no ordering requirement; spread round-robin.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        let _ = self.senders[index].send(WorkerMsg::Run(Box::new(task)));
    }

    /// Stop accepting tasks, let workers drain, and abandon whatever is
    /// still queued once the grace period runs out.
    pub fn shutdown(&self, grace: Duration) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for sender in &self.senders {
            let _ = sender.send(WorkerMsg::Stop);
        }

        let deadline = Instant::now() + grace;
        let mut handles = self.handles.lock().expect("executor handles poisoned");
        for handle in handles.drain(..) {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                Logger::warn(
                    "CALLBACK_EXECUTOR_ABANDONED",
                    &[("thread", handle.thread().name().unwrap_or("?"))],
                );
            }
        }
    }
}
