use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::progress::Progress;
use super::range::{partition, TaskRange, Workload};
use crate::core::errors::{LumenError, Result};

/// Per-range callback: `(start, end, executor_id)`
pub type ProcessFn = dyn Fn(u64, u64, usize) -> Result<()> + Send + Sync;

/// Runs a list of ranges to completion, adding processed units to `progress`.
#[async_trait]
pub trait RangeExecutor: Send + Sync {
    async fn execute(&self, ranges: Vec<TaskRange>, progress: Arc<Progress>) -> Result<()>;
}

/// Fixed pool of blocking threads pulling ranges through a shared cursor.
/// Each range is processed with the index of the thread that took it.
pub struct LocalExecutor {
    threads: usize,
    process: Arc<ProcessFn>,
}

impl LocalExecutor {
    pub fn new<F>(threads: usize, process: F) -> Self
    where
        F: Fn(u64, u64, usize) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            threads: threads.max(1),
            process: Arc::new(process),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

#[async_trait]
impl RangeExecutor for LocalExecutor {
    async fn execute(&self, ranges: Vec<TaskRange>, progress: Arc<Progress>) -> Result<()> {
        let ranges = Arc::new(ranges);
        let cursor = Arc::new(AtomicUsize::new(0));
        let abort = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..self.threads.min(ranges.len()))
            .map(|thread| {
                let ranges = ranges.clone();
                let cursor = cursor.clone();
                let abort = abort.clone();
                let progress = progress.clone();
                let process = self.process.clone();
                tokio::task::spawn_blocking(move || -> Result<()> {
                    while !abort.load(Ordering::SeqCst) {
                        let index = cursor.fetch_add(1, Ordering::SeqCst);
                        let Some(range) = ranges.get(index) else {
                            break;
                        };
                        if let Err(e) = process(range.start, range.end, thread) {
                            abort.store(true, Ordering::SeqCst);
                            return Err(e);
                        }
                        progress.add(range.len());
                    }
                    Ok(())
                })
            })
            .collect();

        let mut first_error = None;
        for joined in futures::future::join_all(handles).await {
            let outcome = joined
                .map_err(|e| LumenError::channel("local-executor", format!("worker thread failed: {}", e)))
                .and_then(|r| r);
            if let Err(e) = outcome {
                error!(error = %e, "Range processing failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Partitions a workload and runs it on an executor
pub struct Scheduler {
    workload: Workload,
    parallelism: usize,
    progress: Arc<Progress>,
}

impl Scheduler {
    pub fn new(workload: Workload, parallelism: usize) -> Self {
        Self {
            workload,
            parallelism: parallelism.max(1),
            progress: Arc::new(Progress::new()),
        }
    }

    /// Replace the progress counter, e.g. to attach a reporter
    pub fn with_progress(mut self, progress: Arc<Progress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn workload(&self) -> Workload {
        self.workload
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn total(&self) -> u64 {
        self.workload.total()
    }

    /// Shared progress counter, readable while a run is going on
    pub fn progress(&self) -> Arc<Progress> {
        self.progress.clone()
    }

    pub fn ranges(&self) -> Vec<TaskRange> {
        partition(self.workload, self.parallelism)
    }

    /// Run every range on a local pool of `parallelism` threads.
    /// Returns the number of processed units.
    pub async fn run<F>(&self, process: F) -> Result<u64>
    where
        F: Fn(u64, u64, usize) -> Result<()> + Send + Sync + 'static,
    {
        let executor = LocalExecutor::new(self.parallelism, process);
        self.run_with(&executor).await
    }

    /// Run every range through `executor`
    pub async fn run_with(&self, executor: &dyn RangeExecutor) -> Result<u64> {
        let ranges = self.ranges();
        let total = self.total();
        info!(
            total = total,
            ranges = ranges.len(),
            parallelism = self.parallelism,
            "Starting scheduled run"
        );
        self.progress.start(total);
        executor.execute(ranges, self.progress.clone()).await?;
        self.progress.finish();

        let processed = self.progress.completed();
        debug!(processed = processed, "Scheduled run finished");
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorKind;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_local_run_covers_all_units() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let scheduler = Scheduler::new(Workload::PixelSamples { pixels: 8, samples: 6 }, 3);

        let processed = scheduler
            .run(move |start, end, executor| {
                assert!(executor < 3);
                sink.lock().unwrap().push((start, end));
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(processed, 48);
        assert_eq!(scheduler.progress().completed(), 48);
        let seen: BTreeSet<_> = seen.lock().unwrap().iter().cloned().collect();
        let expected: BTreeSet<_> = scheduler.ranges().iter().map(|r| (r.start, r.end)).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_process_error_stops_run() {
        let scheduler = Scheduler::new(Workload::Flat { total: 100 }, 2);
        let err = scheduler
            .run(|start, _, _| {
                if start == 0 {
                    Err(LumenError::protocol("boom"))
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_empty_workload() {
        let scheduler = Scheduler::new(Workload::Flat { total: 0 }, 4);
        assert_eq!(scheduler.run(|_, _, _| Ok(())).await.unwrap(), 0);
    }
}
