//! Crawl workers and the per-slice worker pool.
//!
//! A `CrawlWorker` repeatedly:
//! - claims one group (every outstanding job of one URL in the slice's partition)
//! - runs `num_samples` rounds over the group, visiting its jobs in a fresh
//!   random order each round
//! - paces attempts so two consecutive starts are at least
//!   `min_request_interval` apart
//! - writes an observation per successful attempt and collects a diagnostic
//!   per failed one
//! - commits the group, marking every job crawled
//!
//! It stops when the slice has no claimable group left.
//!
//! # Architecture
//!
//! ```text
//! WorkerPool (one per slice)
//!     │
//!     ├─► CrawlWorker "worker-0" ─┐
//!     ├─► CrawlWorker "worker-1" ─┼─► JobQueue.claim_next_group
//!     └─► ...                     │     CrawlExecutor.fetch
//!                                 │     Classifier.classify
//!                                 └─►   ObservationSink.record
//! ```

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog;
use crate::classify::{host_of, origin_of, SiteResolver};
use crate::error::{Result, SchedulerError};
use crate::traits::{ClaimedGroup, Classifier, CrawlExecutor, JobQueue, ObservationSink};
use crate::types::{ActiveContext, Dimension, FetchOutcome, FetchRequest, Job, JobSlice, Observation};

/// Configuration for a crawl worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Attempts per job
    pub num_samples: u32,
    /// Floor between the starts of two consecutive attempts
    pub min_request_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            num_samples: 5,
            min_request_interval: Duration::from_secs(2),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(&self, worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..self.clone()
        }
    }
}

/// Shared collaborators of every worker in a run.
#[derive(Clone)]
pub struct CrawlDeps {
    pub queue: Arc<dyn JobQueue>,
    pub sink: Arc<dyn ObservationSink>,
    pub executor: Arc<dyn CrawlExecutor>,
    pub classifier: Arc<dyn Classifier>,
    pub sites: Arc<SiteResolver>,
}

/// Totals reported by a worker or a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub groups: u64,
    pub jobs: u64,
    pub observations: u64,
    pub failed_samples: u64,
}

impl WorkerReport {
    pub(crate) fn merge(&mut self, other: WorkerReport) {
        self.groups += other.groups;
        self.jobs += other.jobs;
        self.observations += other.observations;
        self.failed_samples += other.failed_samples;
    }
}

/// Build the request for one job, or `None` if its variant has no catalogue entry.
pub fn request_for(job: &Job, context: &ActiveContext) -> Option<FetchRequest> {
    let (user_agent, headers) = match &job.dimension {
        Dimension::Browser { browser, os } => (catalog::user_agent(browser, os)?, Default::default()),
        Dimension::Client { config } => (catalog::default_user_agent(), config.clone()),
        Dimension::Onion { .. } | Dimension::Vpn { .. } => {
            (catalog::default_user_agent(), Default::default())
        }
    };
    Some(FetchRequest {
        url: job.url.clone(),
        route: context.route.clone(),
        user_agent: user_agent.to_string(),
        headers,
    })
}

pub struct CrawlWorker {
    config: WorkerConfig,
    deps: CrawlDeps,
}

impl CrawlWorker {
    pub fn new(config: WorkerConfig, deps: CrawlDeps) -> Self {
        Self { config, deps }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Claim and measure groups until the slice is exhausted.
    pub async fn run(&self, slice: &JobSlice, context: &ActiveContext) -> Result<WorkerReport> {
        let mut report = WorkerReport::default();

        while let Some(group) = self.deps.queue.claim_next_group(slice).await? {
            debug!(
                worker_id = %self.config.worker_id,
                url = %group.url,
                jobs = group.jobs.len(),
                "claimed group"
            );
            let group_report = self.measure_group(group, slice, context).await?;
            report.merge(group_report);
        }

        info!(
            worker_id = %self.config.worker_id,
            slice = %slice.range,
            groups = report.groups,
            failed_samples = report.failed_samples,
            "no claimable group left"
        );
        Ok(report)
    }

    async fn measure_group(
        &self,
        mut group: ClaimedGroup,
        slice: &JobSlice,
        context: &ActiveContext,
    ) -> Result<WorkerReport> {
        let mut report = WorkerReport {
            groups: 1,
            jobs: group.jobs.len() as u64,
            ..Default::default()
        };
        let jobs = group.jobs.clone();
        let mut order: Vec<usize> = (0..jobs.len()).collect();

        for sample in 0..self.config.num_samples {
            order.shuffle(&mut rand::thread_rng());

            for &index in &order {
                let job = &jobs[index];
                let result = self.attempt(job, sample, slice, context).await;
                match &result {
                    Ok(()) => report.observations += 1,
                    Err(diagnostic) => {
                        report.failed_samples += 1;
                        debug!(job_id = job.id, sample, diagnostic = %diagnostic, "sample failed");
                    }
                }
                group.record_result(job.id, sample, result);
            }
        }

        let url = group.url.clone();
        if let Err(e) = group.commit().await {
            error!(worker_id = %self.config.worker_id, url = %url, error = %e, "group commit failed");
            return Err(e);
        }
        Ok(report)
    }

    /// One paced attempt of one sample. `Err` carries the sample's diagnostic.
    async fn attempt(
        &self,
        job: &Job,
        sample: u32,
        slice: &JobSlice,
        context: &ActiveContext,
    ) -> std::result::Result<(), String> {
        let Some(request) = request_for(job, context) else {
            return Err(format!("no user agent for variant {:?}", job.dimension));
        };

        let started = Instant::now();
        let outcome = self.deps.executor.fetch(&request).await;
        let result = match outcome {
            FetchOutcome::Success(success) => {
                let headers = success.response_headers;
                let end_origin = origin_of(&success.end_url);
                let classification =
                    self.deps
                        .classifier
                        .classify(&success.end_url, &headers, end_origin.as_deref());

                let observation = Observation::builder()
                    .job_id(job.id)
                    .sample_index(sample)
                    .domain(host_of(&job.url))
                    .start_url(job.url.clone())
                    .end_site(self.deps.sites.site_of_url(&success.end_url))
                    .end_url(success.end_url)
                    .peer(success.peer)
                    .tls_version(success.tls_version)
                    .content_hash(success.artifact.hash)
                    .headers(serde_json::Value::Object(headers))
                    .results(Some(classification.results))
                    .cookies(Some(classification.cookies))
                    .end_origin(end_origin)
                    .egress_ip(context.egress_ip.clone())
                    .build();

                self.deps
                    .sink
                    .record(slice.family, &observation)
                    .await
                    .map_err(|e| {
                        warn!(job_id = job.id, sample, error = %e, "observation write failed");
                        format!("observation write failed: {e}")
                    })
            }
            FetchOutcome::Failure { diagnostic } => Err(diagnostic),
        };

        tokio::time::sleep_until(started + self.config.min_request_interval).await;
        result
    }
}

/// Runs a fixed number of workers over one slice.
pub struct WorkerPool {
    config: WorkerConfig,
    num_workers: usize,
    deps: CrawlDeps,
}

impl WorkerPool {
    pub fn new(config: WorkerConfig, num_workers: usize, deps: CrawlDeps) -> Self {
        Self {
            config,
            num_workers: num_workers.max(1),
            deps,
        }
    }

    /// Run every worker to exhaustion. The first worker error is returned after
    /// all workers have stopped.
    pub async fn run(&self, slice: &JobSlice, context: &ActiveContext) -> Result<WorkerReport> {
        let mut tasks = JoinSet::new();
        for n in 0..self.num_workers {
            let worker = CrawlWorker::new(
                self.config.with_worker_id(format!("worker-{n}")),
                self.deps.clone(),
            );
            let slice = slice.clone();
            let context = context.clone();
            tasks.spawn(async move { worker.run(&slice, &context).await });
        }

        let mut report = WorkerReport::default();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| SchedulerError::Worker(e.to_string()))
                .and_then(|r| r);
            match outcome {
                Ok(worker_report) => report.merge(worker_report),
                Err(e) => {
                    error!(error = %e, "worker stopped with error");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}
