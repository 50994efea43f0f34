use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch handler failed: {0:#}")]
    Handler(anyhow::Error),
    #[error("invalid scheduler parameter: {0}")]
    InvalidParameter(&'static str),
}

/// What to do when a batch handler fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop dispatching new batches and surface the first error. A lost
    /// batch means lost output with no retry elsewhere, so this is the
    /// default.
    #[default]
    FailFast,
    /// Log the failure and keep going; remaining batches still run.
    BestEffort,
}

/// What happens to in-flight batches once dispatch has been halted, whether
/// by a failure under [`FailurePolicy::FailFast`] or by a stop signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Wait for in-flight batches to finish.
    #[default]
    Graceful,
    /// Drop in-flight batches where they stand.
    Abort,
}

/// Cooperative cancellation handle. Stops the scheduler from dispatching
/// further batches; a batch already in flight runs to completion (or is
/// dropped, per [`ShutdownMode`]) as one unit.
#[derive(Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Partitions an item sequence into contiguous batches and runs an async
/// handler over them with bounded concurrency.
///
/// The scheduler knows nothing about what the handler does; each batch is
/// handed over as one atomic unit and batches may complete out of order.
pub struct BatchScheduler {
    batch_size: usize,
    max_workers: usize,
    failure_policy: FailurePolicy,
    shutdown_mode: ShutdownMode,
    stop: StopSignal,
    completed: AtomicU64,
}

impl BatchScheduler {
    pub fn new(batch_size: usize, max_workers: usize) -> Result<Self, BatchError> {
        if batch_size == 0 {
            return Err(BatchError::InvalidParameter("batch_size must be positive"));
        }
        if max_workers == 0 {
            return Err(BatchError::InvalidParameter("max_workers must be positive"));
        }
        Ok(BatchScheduler {
            batch_size,
            max_workers,
            failure_policy: FailurePolicy::default(),
            shutdown_mode: ShutdownMode::default(),
            stop: StopSignal::default(),
            completed: AtomicU64::new(0),
        })
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn shutdown_mode(mut self, mode: ShutdownMode) -> Self {
        self.shutdown_mode = mode;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Monotonically increasing count of items whose batch has completed.
    pub fn completed_items(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Runs `handler` over `items` in contiguous batches of at most
    /// `batch_size`, keeping at most `max_workers` batches in flight.
    ///
    /// Returns the first handler error under [`FailurePolicy::FailFast`],
    /// after in-flight batches have drained (or been dropped, per
    /// [`ShutdownMode`]).
    pub async fn execute<T, F, Fut>(&self, items: Vec<T>, handler: F) -> Result<(), BatchError>
    where
        F: Fn(Vec<T>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let total = items.len() as u64;
        let mut batches = into_batches(items, self.batch_size).into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut first_error: Option<anyhow::Error> = None;
        let mut halted = false;
        let handler = &handler;

        loop {
            if self.stop.is_stopped() {
                halted = true;
            }
            while !halted && in_flight.len() < self.max_workers {
                match batches.next() {
                    Some(batch) => {
                        let batch_len = batch.len() as u64;
                        in_flight.push(async move { (batch_len, handler(batch).await) });
                    }
                    None => break,
                }
            }

            match in_flight.next().await {
                Some((batch_len, Ok(()))) => {
                    let done = self.completed.fetch_add(batch_len, Ordering::Relaxed) + batch_len;
                    info!("Processed {}/{} items", done, total);
                }
                Some((batch_len, Err(e))) => match self.failure_policy {
                    FailurePolicy::FailFast => {
                        halted = true;
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                    FailurePolicy::BestEffort => {
                        warn!("Batch of {} items failed, continuing: {:#}", batch_len, e);
                    }
                },
                None => break,
            }

            if halted && self.shutdown_mode == ShutdownMode::Abort {
                // Dropping the set cancels whatever is still in flight.
                break;
            }
        }

        match first_error {
            Some(e) => Err(BatchError::Handler(e)),
            None => Ok(()),
        }
    }
}

fn into_batches<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size.max(1)));
    let mut batch = Vec::with_capacity(batch_size);
    for item in items {
        batch.push(item);
        if batch.len() == batch_size {
            batches.push(std::mem::replace(&mut batch, Vec::with_capacity(batch_size)));
        }
    }
    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}
