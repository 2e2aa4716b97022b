//! Single-consumer worker thread draining a FIFO queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use snafu::ResultExt;

use crate::error::{Result, ThreadSpawnSnafu};

type Work = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Queue {
    /// `None` asks the worker to exit after draining what precedes it.
    items: Mutex<VecDeque<Option<Work>>>,
    available: Condvar,
}

impl Queue {
    fn push(&self, item: Option<Work>) {
        self.items.lock().push_back(item);
        self.available.notify_one();
    }

    fn pop(&self) -> Option<Work> {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            self.available.wait(&mut items);
        }
    }
}

/// Runs submitted closures one at a time, in submission order.
pub struct WorkerThread {
    name: String,
    queue: Arc<Queue>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerThread")
            .field("name", &self.name)
            .field("pending", &self.queue.items.lock().len())
            .finish()
    }
}

impl WorkerThread {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let queue = Arc::new(Queue::default());
        let worker_queue = Arc::clone(&queue);
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Some(work) = worker_queue.pop() {
                    work();
                }
            })
            .context(ThreadSpawnSnafu { name: name.clone() })?;
        Ok(Self { name, queue, handle: Some(handle) })
    }

    pub fn schedule(&self, work: impl FnOnce() + Send + 'static) {
        self.queue.push(Some(Box::new(work)));
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.queue.push(None);
        if let Some(handle) = self.handle.take() {
            // Dropping from inside the worker would join itself.
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            let _ = handle.join();
        }
    }
}
