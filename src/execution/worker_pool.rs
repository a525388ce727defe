//! # Worker Pool
//!
//! Bounded pool of OS worker threads draining a shared [`TaskQueue`].
//!
//! ## Lifecycle
//!
//! 1. The worker count is `min(cpus, max_workers, total_items)`.
//! 2. One context per worker is created on the owner thread (e.g. a database
//!    connection). It is moved into that worker and never shared.
//! 3. Each worker pops tasks without blocking until the queue is empty, then
//!    hands its context to the cleanup hook and reports success.
//! 4. A failing (or panicking) task stops only its own worker. The others keep
//!    draining, so every task is attempted exactly once while any worker lives.
//! 5. The owner polls the outcome channel until every worker has reported and
//!    surfaces the first failure in worker order. Later failures are logged
//!    and counted in the error, not carried.
//!
//! There are no retries and no task timeouts: a stuck task blocks its worker.

use crossbeam::channel::{self, RecvTimeoutError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::interrupt::install_interrupt_handler;
use super::progress::{estimate_total, ProgressCounter, ProgressThrottle};
use super::queue::TaskQueue;
use crate::config::ExecutionConfig;
use crate::constants::{POOL_POLL_INTERVAL, PROGRESS_INTERVAL};
use crate::database::ConnectionFactory;
use crate::error::{PipelineError, Result};
use crate::logging::log_pool_progress;

/// Called with a worker's context once that worker has drained the queue.
pub type CleanupHook<C> = Arc<dyn Fn(C) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Used in thread names and progress lines.
    pub name: String,
    pub max_workers: usize,
    pub progress_interval: Duration,
    pub poll_interval: Duration,
}

impl WorkerPoolConfig {
    pub fn new(name: impl Into<String>, max_workers: usize) -> Self {
        Self {
            name: name.into(),
            max_workers,
            progress_interval: PROGRESS_INTERVAL,
            poll_interval: POOL_POLL_INTERVAL,
        }
    }

    /// Worker limit and timings from the execution section.
    pub fn from_execution(name: impl Into<String>, execution: &ExecutionConfig) -> Self {
        Self {
            name: name.into(),
            max_workers: execution.max_workers,
            progress_interval: execution.progress_interval(),
            poll_interval: execution.poll_interval(),
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSummary {
    pub workers: usize,
    pub processed: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// `min(cpus, max_workers, total_items)`; total is only a bound when known.
    pub fn effective_workers(&self, total_items: Option<usize>) -> usize {
        let cpus = thread::available_parallelism().map_or(1, |n| n.get());
        let workers = cpus.min(self.config.max_workers);
        match total_items {
            Some(total) => workers.min(total),
            None => workers,
        }
    }

    /// Drain a queue of context-free tasks.
    pub fn run(&self, queue: TaskQueue<()>, total_items: Option<usize>) -> Result<PoolSummary> {
        self.run_with_context(queue, total_items, |_| Ok(()), None)
    }

    /// Drain a queue with one exclusive database connection per worker. Each
    /// connection is closed through the factory when its worker finishes.
    pub fn run_with_connections<F>(
        &self,
        queue: TaskQueue<F::Connection>,
        total_items: Option<usize>,
        factory: Arc<F>,
    ) -> Result<PoolSummary>
    where
        F: ConnectionFactory + 'static,
    {
        let closer = Arc::clone(&factory);
        let cleanup: CleanupHook<F::Connection> = Arc::new(move |connection: F::Connection| -> anyhow::Result<()> {
            closer.close(connection)?;
            Ok(())
        });
        self.run_with_context(
            queue,
            total_items,
            |_| Ok(factory.connect()?),
            Some(cleanup),
        )
    }

    pub fn run_with_context<C, F>(
        &self,
        queue: TaskQueue<C>,
        total_items: Option<usize>,
        mut create_context: F,
        cleanup: Option<CleanupHook<C>>,
    ) -> Result<PoolSummary>
    where
        C: Send + 'static,
        F: FnMut(usize) -> anyhow::Result<C>,
    {
        let started = Instant::now();
        let pool_name = self.config.name.clone();

        let mut worker_count = self.effective_workers(total_items);
        if worker_count == 0 && !queue.is_empty() {
            warn!(
                pool = %pool_name,
                queued = queue.len(),
                "POOL: computed zero workers for a non-empty queue, using one"
            );
            worker_count = 1;
        }
        if worker_count == 0 {
            debug!(pool = %pool_name, "POOL: nothing to do");
            return Ok(PoolSummary {
                workers: 0,
                processed: 0,
                elapsed: started.elapsed(),
            });
        }

        install_interrupt_handler();

        let progress_total = total_items.or(Some(queue.len()));
        info!(
            pool = %pool_name,
            workers = worker_count,
            total = progress_total,
            "🏊 POOL: Starting workers"
        );

        let mut contexts = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            match create_context(index) {
                Ok(context) => contexts.push(context),
                Err(e) => {
                    error!(pool = %pool_name, worker = index, error = %e, "❌ POOL: Context creation failed");
                    if let Some(cleanup) = &cleanup {
                        for context in contexts {
                            if let Err(close_error) = cleanup(context) {
                                warn!(pool = %pool_name, error = %close_error, "POOL: cleanup failed");
                            }
                        }
                    }
                    return Err(PipelineError::WorkerContext {
                        worker: index,
                        source: e.into(),
                    });
                }
            }
        }

        let queue = Arc::new(queue);
        let counter = Arc::new(ProgressCounter::new());
        let (outcome_tx, outcome_rx) = channel::unbounded::<WorkerOutcome>();
        let mut handles = Vec::with_capacity(worker_count);
        let mut failures: Vec<(usize, anyhow::Error)> = Vec::new();

        for (index, context) in contexts.into_iter().enumerate() {
            let worker = Worker {
                index,
                pool_name: pool_name.clone(),
                queue: Arc::clone(&queue),
                counter: Arc::clone(&counter),
                total: progress_total,
                progress_interval: self.config.progress_interval,
                context,
                cleanup: cleanup.clone(),
            };
            let tx = outcome_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("{pool_name}-worker-{index}"))
                .spawn(move || {
                    let outcome = worker.run();
                    let _ = tx.send(outcome);
                });
            match spawned {
                Ok(handle) => handles.push((index, handle)),
                Err(e) => failures.push((index, anyhow::Error::new(e).context("spawn worker thread"))),
            }
        }
        drop(outcome_tx);

        let mut outcomes = Vec::with_capacity(handles.len());
        while outcomes.len() < handles.len() {
            match outcome_rx.recv_timeout(self.config.poll_interval) {
                Ok(outcome) => outcomes.push(outcome),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        for (index, handle) in handles {
            if let Err(payload) = handle.join() {
                warn!(pool = %pool_name, worker = index, "POOL: worker thread ended abnormally");
                // A worker that dies outside its task loop never reports an outcome.
                if !outcomes.iter().any(|outcome| outcome.index == index) {
                    failures.push((
                        index,
                        anyhow::anyhow!("worker thread panicked: {}", panic_message(&*payload)),
                    ));
                }
            }
        }

        for outcome in outcomes {
            if let Err(e) = outcome.result {
                failures.push((outcome.index, e));
            }
        }
        failures.sort_by_key(|(index, _)| *index);

        let summary = PoolSummary {
            workers: worker_count,
            processed: counter.value(),
            elapsed: started.elapsed(),
        };

        let mut failures = failures.into_iter();
        if let Some((worker, first)) = failures.next() {
            let suppressed: Vec<_> = failures.collect();
            for (other, e) in &suppressed {
                warn!(pool = %pool_name, worker = *other, error = ?e, "POOL: additional worker failure not carried in the error");
            }
            error!(
                pool = %pool_name,
                worker = worker,
                processed = summary.processed,
                error = ?first,
                "❌ POOL: Task failure"
            );
            return Err(PipelineError::task_failure(worker, suppressed.len(), first));
        }

        info!(
            pool = %pool_name,
            workers = summary.workers,
            processed = summary.processed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "✅ POOL: All workers drained the queue"
        );
        Ok(summary)
    }
}

struct WorkerOutcome {
    index: usize,
    result: anyhow::Result<()>,
}

struct Worker<C> {
    index: usize,
    pool_name: String,
    queue: Arc<TaskQueue<C>>,
    counter: Arc<ProgressCounter>,
    total: Option<usize>,
    progress_interval: Duration,
    context: C,
    cleanup: Option<CleanupHook<C>>,
}

impl<C> Worker<C> {
    fn run(self) -> WorkerOutcome {
        let Worker {
            index,
            pool_name,
            queue,
            counter,
            total,
            progress_interval,
            mut context,
            cleanup,
        } = self;

        let started = Instant::now();
        let mut throttle = ProgressThrottle::new(progress_interval);
        let mut locally_processed = 0u64;

        while let Some(task) = queue.pop() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| task(&mut context)))
                .unwrap_or_else(|payload| Err(anyhow::anyhow!("task panicked: {}", panic_message(&*payload))));

            if let Err(e) = result {
                warn!(pool = %pool_name, worker = index, error = ?e, "POOL: task failed, worker stopping");
                return WorkerOutcome {
                    index,
                    result: Err(e),
                };
            }

            locally_processed += 1;
            let processed = counter.increment();

            let elapsed = started.elapsed();
            if throttle.ready(elapsed) {
                log_pool_progress(
                    &pool_name,
                    index,
                    processed,
                    total,
                    locally_processed,
                    elapsed,
                    estimate_total(elapsed, processed, total),
                );
            }
        }

        if let Some(cleanup) = cleanup {
            if let Err(e) = cleanup(context) {
                warn!(pool = %pool_name, worker = index, error = ?e, "POOL: worker cleanup failed");
            }
        }

        debug!(pool = %pool_name, worker = index, locally_processed, "POOL: worker drained queue");
        WorkerOutcome { index, result: Ok(()) }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
