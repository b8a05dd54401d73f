//! Job queue and observation sink traits.
//!
//! A [`ClaimedGroup`] is the only way to mark jobs crawled. It holds a
//! backend-specific [`GroupLease`] that keeps the group's rows locked until
//! [`ClaimedGroup::commit`] runs. Dropping the group without committing
//! releases the locks and leaves every job reclaimable.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{
    Dimension, ErrorRecord, Family, IdRange, Job, JobSlice, Observation, PartitionKey,
};

/// Final state written for one job when its group commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCompletion {
    pub job_id: i32,
    pub error: Option<ErrorRecord>,
}

/// Backend hook that persists completions and releases the group's locks.
#[async_trait]
pub trait GroupLease: Send {
    async fn complete(self: Box<Self>, completions: Vec<JobCompletion>) -> Result<()>;
}

/// Every not-yet-crawled job of one URL within one partition, locked for us.
pub struct ClaimedGroup {
    pub url: String,
    pub jobs: Vec<Job>,
    errors: HashMap<i32, ErrorRecord>,
    lease: Box<dyn GroupLease>,
}

impl ClaimedGroup {
    pub fn new(url: impl Into<String>, jobs: Vec<Job>, lease: Box<dyn GroupLease>) -> Self {
        Self {
            url: url.into(),
            jobs,
            errors: HashMap::new(),
            lease,
        }
    }

    /// Record the outcome of one sample of one job.
    pub fn record_result(&mut self, job_id: i32, sample: u32, result: Result<(), String>) {
        if let Err(diagnostic) = result {
            self.errors
                .entry(job_id)
                .or_default()
                .insert(sample, diagnostic);
        }
    }

    pub fn errors_for(&self, job_id: i32) -> Option<&ErrorRecord> {
        self.errors.get(&job_id)
    }

    /// Mark every job of the group crawled, attach error records, release locks.
    pub async fn commit(mut self) -> Result<()> {
        let completions = self
            .jobs
            .iter()
            .map(|job| JobCompletion {
                job_id: job.id,
                error: self.errors.remove(&job.id).filter(|r| !r.is_empty()),
            })
            .collect();
        self.lease.complete(completions).await
    }
}

impl std::fmt::Debug for ClaimedGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimedGroup")
            .field("url", &self.url)
            .field("jobs", &self.jobs.len())
            .field("errors", &self.errors.len())
            .finish()
    }
}

/// One row of the seed dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub start_url: String,
    pub start_site: Option<String>,
}

/// Progress of one partition of a family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSummary {
    pub partition: PartitionKey,
    pub total: i64,
    pub outstanding: i64,
    pub errored: i64,
}

/// Durable store of measurement jobs.
///
/// Implementations must never hand the same job to two live claims, and must
/// never block a claimant on rows another claimant holds.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Claim one not-yet-crawled group inside the slice, or `None` when nothing
    /// eligible is left unlocked.
    async fn claim_next_group(&self, slice: &JobSlice) -> Result<Option<ClaimedGroup>>;

    /// Number of not-yet-crawled jobs inside the slice.
    async fn count_outstanding(&self, slice: &JobSlice) -> Result<i64>;

    /// Mark every not-yet-crawled job in the slice crawled with `record`.
    ///
    /// Used when the slice's network context could not be established.
    async fn fail_slice(&self, slice: &JobSlice, record: &ErrorRecord) -> Result<u64>;

    /// Distinct partitions present in the family's job table.
    async fn partitions(&self, family: Family) -> Result<Vec<PartitionKey>>;

    /// Number of distinct dimension tuples, i.e. jobs per URL.
    async fn variants_per_url(&self, family: Family) -> Result<i64>;

    /// `(MIN(id) - 1, MAX(id)]` over every job of the family, or `None` when
    /// nothing is seeded.
    async fn id_span(&self, family: Family) -> Result<Option<IdRange>>;

    /// Insert one job per (url, dimension), url-major, ignoring existing pairs.
    async fn seed(&self, family: Family, urls: &[String], dimensions: &[Dimension]) -> Result<u64>;

    /// Insert dataset rows, ignoring URLs already present.
    async fn record_dataset(&self, entries: &[DatasetEntry]) -> Result<u64>;

    /// Per-partition totals for operator status output.
    async fn summarize(&self, family: Family) -> Result<Vec<PartitionSummary>>;
}

/// Append-only store of observations.
#[async_trait]
pub trait ObservationSink: Send + Sync {
    async fn record(&self, family: Family, observation: &Observation) -> Result<()>;
}
