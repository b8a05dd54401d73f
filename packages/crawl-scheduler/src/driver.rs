//! Scheduler driver: sweeps a family's id space chunk by chunk and, within each
//! chunk, partition by partition.
//!
//! Chunks are cut from the ids present in the job table, `chunk_size` URLs'
//! worth of ids at a time. For every (chunk, partition) slice with outstanding
//! work the driver acquires the partition's network context, runs a worker pool
//! over the slice and releases the context again, whatever the pool's outcome.
//! A context that cannot be established fails the whole slice: every
//! outstanding job gets the same diagnostic for every sample and is marked
//! crawled without a fetch. A pool that stops on a queue error leaves its
//! uncommitted groups to the next run and the sweep moves on.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::network::ContextManager;
use crate::types::{ErrorRecord, Family, JobSlice};
use crate::worker::{CrawlDeps, WorkerConfig, WorkerPool, WorkerReport};

/// Configuration for a family run.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// URLs per chunk
    pub chunk_size: i64,
    pub num_workers: usize,
    pub worker: WorkerConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5_000,
            num_workers: 1,
            worker: WorkerConfig::default(),
        }
    }
}

/// What a family run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub slices_run: u64,
    pub slices_skipped: u64,
    pub slices_failed: u64,
    /// Slices whose pool stopped on a queue error
    pub slices_errored: u64,
    /// Jobs marked crawled because their context could not be established
    pub jobs_failed: u64,
    pub workers: WorkerReport,
}

pub struct SchedulerDriver {
    config: DriverConfig,
    deps: CrawlDeps,
    contexts: Arc<ContextManager>,
}

impl SchedulerDriver {
    pub fn new(config: DriverConfig, deps: CrawlDeps, contexts: Arc<ContextManager>) -> Self {
        Self {
            config,
            deps,
            contexts,
        }
    }

    /// Measure every outstanding job of `family`.
    pub async fn run_family(&self, family: Family) -> Result<RunReport> {
        let mut report = RunReport::default();

        let Some(span) = self.deps.queue.id_span(family).await? else {
            warn!(family = %family, "no jobs seeded");
            return Ok(report);
        };
        let variants = self.deps.queue.variants_per_url(family).await?;
        let partitions = self.deps.queue.partitions(family).await?;
        let chunks = span.split(self.config.chunk_size.saturating_mul(variants.max(1)));
        info!(
            family = %family,
            ids = %span,
            variants,
            partitions = partitions.len(),
            chunks = chunks.len(),
            "starting family run"
        );

        for range in chunks {
            for partition in &partitions {
                let slice = JobSlice::new(family, range, partition.clone());
                self.run_slice(&slice, &mut report).await?;
            }
        }

        info!(
            family = %family,
            slices_run = report.slices_run,
            slices_skipped = report.slices_skipped,
            slices_failed = report.slices_failed,
            slices_errored = report.slices_errored,
            groups = report.workers.groups,
            failed_samples = report.workers.failed_samples,
            "family run finished"
        );
        Ok(report)
    }

    async fn run_slice(&self, slice: &JobSlice, report: &mut RunReport) -> Result<()> {
        let outstanding = self.deps.queue.count_outstanding(slice).await?;
        if outstanding == 0 {
            debug!(slice = %slice.range, partition = %slice.partition, "nothing outstanding");
            report.slices_skipped += 1;
            return Ok(());
        }

        let acquired = match slice.partition.network_context() {
            Ok(context) => self.contexts.acquire(&context).await,
            Err(e) => Err(e),
        };
        let lease = match acquired {
            Ok(lease) => lease,
            Err(e) => {
                let record = ErrorRecord::uniform(self.config.worker.num_samples, e.to_string());
                let failed = self.deps.queue.fail_slice(slice, &record).await?;
                warn!(
                    slice = %slice.range,
                    partition = %slice.partition,
                    jobs = failed,
                    error = %e,
                    "context unavailable, slice marked failed"
                );
                report.slices_failed += 1;
                report.jobs_failed += failed;
                return Ok(());
            }
        };

        info!(
            slice = %slice.range,
            partition = %slice.partition,
            outstanding,
            "running slice"
        );
        let pool = WorkerPool::new(
            self.config.worker.clone(),
            self.config.num_workers,
            self.deps.clone(),
        );
        let result = pool.run(slice, lease.active()).await;
        self.contexts.release(lease).await;

        match result {
            Ok(workers) => {
                report.workers.merge(workers);
                report.slices_run += 1;
            }
            Err(e) => {
                error!(
                    slice = %slice.range,
                    partition = %slice.partition,
                    error = %e,
                    "worker pool stopped, unfinished groups left for the next run"
                );
                report.slices_errored += 1;
            }
        }
        Ok(())
    }
}
