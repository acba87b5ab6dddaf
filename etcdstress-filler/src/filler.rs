//! Populates a [`Store`] with synthetic records through a [`WorkPool`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::pool::{DEFAULT_QUEUE_DEPTH, WorkPool};
use crate::record::{DEFAULT_PREFIX, Record, RecordId, normalize_prefix};
use crate::store::Store;
use crate::tolerance::{Outcome, Tally};

/// Interval of submissions between queueing progress logs.
const PROGRESS_INTERVAL: usize = 1000;

/// The default number of concurrent writers.
pub const DEFAULT_WORKERS: usize = 2;

type MintFn = fn() -> Result<RecordId>;

/// A builder for creating a [`Filler`].
#[derive(Debug)]
pub struct FillerBuilder {
    workers: usize,
    queue_depth: usize,
    prefix: String,
    mint: MintFn,
}

impl FillerBuilder {
    /// Constructs a new builder with default settings.
    pub fn new() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            prefix: DEFAULT_PREFIX.to_owned(),
            mint: RecordId::mint,
        }
    }

    /// The number of writes that may run concurrently.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// The number of writes that may be queued before submission waits.
    pub fn queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    /// The key prefix all records are written under.
    pub fn prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.prefix = normalize_prefix(prefix.as_ref());
        self
    }

    #[cfg(test)]
    fn mint(mut self, mint: MintFn) -> Self {
        self.mint = mint;
        self
    }

    /// Creates the filler and starts its work pool.
    ///
    /// This must be called from within a tokio runtime.
    pub fn build<S: Store>(self, store: S) -> Result<Filler<S>> {
        if self.prefix.is_empty() {
            return Err(Error::Configuration("key prefix must not be empty".into()));
        }

        Ok(Filler {
            store: Arc::new(store),
            pool: WorkPool::new(self.workers, self.queue_depth)?,
            prefix: self.prefix.into(),
            mint: self.mint,
            progress: Arc::default(),
        })
    }
}

impl Default for FillerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes batches of synthetic records and judges whether the batch succeeded.
#[derive(Debug)]
pub struct Filler<S> {
    store: Arc<S>,
    pool: WorkPool,
    prefix: Arc<str>,
    mint: MintFn,
    progress: Arc<Progress>,
}

impl<S: Store> Filler<S> {
    /// Returns the normalized key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the number of concurrent writers.
    pub fn workers(&self) -> usize {
        self.pool.slots()
    }

    /// Returns live counters of the batch currently being generated.
    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    /// Writes `count` fresh records and returns how many of them were stored.
    ///
    /// Every record is written exactly once, without retries. Individual failures are tolerated
    /// up to [`ERROR_TOLERANCE`](crate::ERROR_TOLERANCE); beyond that, the whole batch is rejected
    /// with [`Error::ToleranceExceeded`]. This resolves only after every write has finished.
    ///
    /// Batches run one at a time, since each batch resets the shared [`Progress`].
    pub async fn generate(&mut self, count: usize) -> Result<usize> {
        self.progress.reset(count);
        if count == 0 {
            return Ok(0);
        }

        let (sender, mut receiver) = mpsc::channel(count);

        tracing::info!(count, "queueing started");
        for index in 0..count {
            let reporter = OutcomeReporter::new(sender.clone());
            let store = Arc::clone(&self.store);
            let prefix = Arc::clone(&self.prefix);
            let mint = self.mint;

            let task = async move {
                let outcome = write_record(&*store, &prefix, mint).await;
                reporter.report(outcome);
            };

            // A rejected task is dropped together with its reporter, which counts it as failed.
            if let Err(err) = self.pool.submit(task).await {
                tracing::error!(error = &err as &dyn std::error::Error, "failed to queue write");
            }
            self.progress.queued.fetch_add(1, Ordering::Relaxed);

            if index % PROGRESS_INTERVAL == 0 {
                tracing::info!(queued = index, count, "queueing progress");
            }
        }
        tracing::info!(count, "queueing complete");

        // Every reporter holds a sender, so the stream ends once the last task has reported.
        drop(sender);

        let mut tally = Tally::default();
        while let Some(outcome) = receiver.recv().await {
            if let Err(ref err) = outcome {
                tracing::warn!(error = err as &dyn std::error::Error, "failed seeding record");
                self.progress.failed.fetch_add(1, Ordering::Relaxed);
            }
            self.progress.completed.fetch_add(1, Ordering::Relaxed);
            tally.record(&outcome);
        }
        debug_assert_eq!(tally.total, count);

        tracing::info!(
            total = tally.total,
            errors = tally.errors,
            error_rate = tally.error_rate(),
            "all writes finished"
        );

        tally.verdict().inspect_err(|err| {
            tracing::error!(error = err as &dyn std::error::Error, "batch rejected");
        })
    }

    /// Waits for outstanding writes and releases the pool's slots.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}

async fn write_record<S: Store>(store: &S, prefix: &str, mint: MintFn) -> Outcome {
    let record = Record::new(prefix, mint()?);
    store
        .write(&record.key, record.payload)
        .await
        .map_err(|source| Error::Write {
            key: record.key,
            source,
        })
}

/// Reports the outcome of exactly one task.
///
/// If the reporter is dropped before [`report`](Self::report) is called, for instance because
/// the task panicked or was never run, it reports [`Error::Abandoned`] instead.
struct OutcomeReporter {
    sender: Option<mpsc::Sender<Outcome>>,
}

impl OutcomeReporter {
    fn new(sender: mpsc::Sender<Outcome>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    fn report(mut self, outcome: Outcome) {
        if let Some(sender) = self.sender.take() {
            send(&sender, outcome);
        }
    }
}

impl Drop for OutcomeReporter {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            send(&sender, Err(Error::Abandoned));
        }
    }
}

fn send(sender: &mpsc::Sender<Outcome>, outcome: Outcome) {
    // The channel holds one slot per task, so this can only fail if the receiver is gone.
    if sender.try_send(outcome).is_err() {
        tracing::debug!("outcome discarded, batch is no longer collected");
    }
}

/// Live counters of a batch in progress.
///
/// These are updated without blocking the batch and may be read at any time.
#[derive(Debug, Default)]
pub struct Progress {
    requested: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl Progress {
    fn reset(&self, requested: usize) {
        self.requested.store(requested, Ordering::Relaxed);
        self.queued.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
    }

    /// Number of records requested for the current batch.
    pub fn requested(&self) -> usize {
        self.requested.load(Ordering::Relaxed)
    }

    /// Number of writes handed to the pool so far.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Number of writes that have reported an outcome.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Number of writes that failed.
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}
