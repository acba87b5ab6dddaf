//! Bounded pool of worker slots.
//!
//! [`WorkPool`] runs submitted tasks on a fixed number of long-lived worker tasks that share a
//! single bounded queue. At most [`slots`](WorkPool::slots) tasks run at the same time, and
//! [`submit`](WorkPool::submit) only waits while the queue is full, which applies backpressure to
//! the producer without tying submission to task completion.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Default number of tasks that can wait in the queue before [`WorkPool::submit`] waits.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

type Task = BoxFuture<'static, ()>;
type Queue = Arc<Mutex<mpsc::Receiver<Task>>>;

/// A fixed-size pool of execution slots.
///
/// Tasks take no input and return nothing; results have to be communicated out-of-band, for
/// instance through a channel captured by the task. Tasks may complete in any order.
#[derive(Debug)]
pub struct WorkPool {
    queue: mpsc::Sender<Task>,
    workers: Vec<JoinHandle<()>>,
    busy: Arc<AtomicUsize>,
}

impl WorkPool {
    /// Spawns `slots` workers serving a queue of `queue_depth` pending tasks.
    ///
    /// This must be called from within a tokio runtime.
    pub fn new(slots: usize, queue_depth: usize) -> Result<Self> {
        if slots == 0 {
            return Err(Error::Configuration("slot count must be positive".into()));
        }
        if queue_depth == 0 {
            return Err(Error::Configuration("queue depth must be positive".into()));
        }

        let (sender, receiver) = mpsc::channel(queue_depth);
        let queue = Arc::new(Mutex::new(receiver));
        let busy = Arc::new(AtomicUsize::new(0));

        let workers = (0..slots)
            .map(|slot| tokio::spawn(serve(slot, Arc::clone(&queue), Arc::clone(&busy))))
            .collect();

        tracing::debug!(slots, queue_depth, "work pool started");

        Ok(Self {
            queue: sender,
            workers,
            busy,
        })
    }

    /// Enqueues a task for execution.
    ///
    /// Resolves once the task is queued, waiting only while the queue is full. If the pool has no
    /// live workers, the task is dropped and [`Error::PoolClosed`] is returned.
    pub async fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.queue
            .send(task.boxed())
            .await
            .map_err(|_| Error::PoolClosed)
    }

    /// Returns the number of execution slots.
    pub fn slots(&self) -> usize {
        self.workers.len()
    }

    /// Returns the number of slots currently running a task.
    pub fn busy_slots(&self) -> usize {
        self.busy.load(Ordering::Acquire)
    }

    /// Returns the number of tasks waiting for a free slot.
    pub fn queued(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }

    /// Stops accepting tasks, runs every task that is already queued and releases all slots.
    pub async fn shutdown(self) {
        let Self { queue, workers, .. } = self;
        drop(queue);

        for worker in workers {
            if let Err(err) = worker.await {
                tracing::error!(error = &err as &dyn std::error::Error, "worker slot failed");
            }
        }

        tracing::debug!("work pool stopped");
    }
}

async fn serve(slot: usize, queue: Queue, busy: Arc<AtomicUsize>) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(task) = next else {
            break;
        };

        let _occupied = Occupied::enter(&busy);
        if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
            tracing::error!(slot, panic = panic_message(&*panic), "task panicked");
        }
    }
}

/// Marks a slot as busy for as long as it is alive.
struct Occupied<'a>(&'a AtomicUsize);

impl<'a> Occupied<'a> {
    fn enter(busy: &'a AtomicUsize) -> Self {
        busy.fetch_add(1, Ordering::AcqRel);
        Self(busy)
    }
}

impl Drop for Occupied<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
