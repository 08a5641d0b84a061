//! Fixed-size worker pool for subscription callbacks.
//!
//! Callbacks never run on the receive path. The session enqueues them here
//! and a pool of OS threads drains a single shared FIFO queue.
//!
//! - `enqueue` never blocks
//! - `shutdown` stops accepting tasks, lets workers drain what is queued,
//!   then joins them
//! - dropping the pool stops accepting tasks but does not wait for the
//!   workers
//! - a panicking task is logged and its worker keeps running

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use crate::error::{ClientError, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool with one shared unbounded queue.
pub struct Executor {
    tx: RwLock<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl Executor {
    /// Spawn `size` workers (at least one).
    pub fn new(size: usize) -> Result<Self> {
        let size = size.max(1);
        let (tx, rx) = channel::unbounded::<Task>();
        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("ds-pool-{index}"))
                .spawn(move || worker_loop(index, rx))?;
            workers.push(handle);
        }
        debug!(size, "executor started");
        Ok(Self {
            tx: RwLock::new(Some(tx)),
            workers: Mutex::new(workers),
            size,
        })
    }

    /// Queue a task. Fails with `Shutdown` once shutdown has begun.
    pub fn enqueue<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        match self.tx.read().as_ref() {
            Some(tx) => tx
                .send(Box::new(task))
                .map_err(|_| ClientError::Shutdown),
            None => Err(ClientError::Shutdown),
        }
    }

    /// Tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.tx.read().as_ref().map_or(0, Sender::len)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_shutdown(&self) -> bool {
        self.tx.read().is_none()
    }

    /// Stop accepting tasks, drain the queue and join the workers.
    ///
    /// Blocks the calling thread. Safe to call more than once and from a
    /// task running on the pool (that worker is not joined).
    pub fn shutdown(&self) {
        drop(self.tx.write().take());
        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("executor worker exited abnormally");
            }
        }
    }
}

impl Drop for Executor {
    /// Closes the queue without joining. Workers finish what is queued and
    /// exit on their own, so dropping never blocks the dropping thread.
    fn drop(&mut self) {
        drop(self.tx.write().take());
        self.workers.lock().clear();
    }
}

fn worker_loop(index: usize, rx: Receiver<Task>) {
    // recv fails once the sender is gone and the queue is empty
    while let Ok(task) = rx.recv() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            error!(
                worker = index,
                panic = panic_message(payload.as_ref()),
                "subscription callback panicked"
            );
        }
    }
    debug!(worker = index, "executor worker exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}
