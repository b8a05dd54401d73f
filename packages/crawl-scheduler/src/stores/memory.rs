//! In-memory job queue and observation sink.
//!
//! Mirrors the Postgres locking rules closely enough to exercise workers and
//! the driver without a database: a claimed group's rows are locked until the
//! lease commits or is dropped, claims skip locked rows, and only the smallest
//! uncrawled id of a group may anchor a claim.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Result, SchedulerError};
use crate::traits::{
    ClaimedGroup, DatasetEntry, GroupLease, JobCompletion, JobQueue, ObservationSink,
    PartitionSummary,
};
use crate::types::{
    Dimension, ErrorRecord, Family, IdRange, Job, JobSlice, Observation, PartitionKey,
};

#[derive(Default)]
struct QueueState {
    jobs: HashMap<Family, Vec<Job>>,
    locked: HashSet<(Family, i32)>,
    dataset: BTreeMap<String, Option<String>>,
}

impl QueueState {
    fn family_jobs(&self, family: Family) -> &[Job] {
        self.jobs.get(&family).map(Vec::as_slice).unwrap_or(&[])
    }

    fn is_anchor(&self, family: Family, job: &Job, partition: &PartitionKey) -> bool {
        self.family_jobs(family)
            .iter()
            .filter(|j| !j.crawled && j.url == job.url && j.dimension.partition_key() == *partition)
            .map(|j| j.id)
            .min()
            == Some(job.id)
    }
}

fn lock_poisoned() -> SchedulerError {
    SchedulerError::Worker("memory queue lock poisoned".to_string())
}

/// In-memory [`JobQueue`].
#[derive(Clone, Default)]
pub struct MemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every job of a family, in id order.
    pub fn jobs(&self, family: Family) -> Vec<Job> {
        self.state
            .lock()
            .map(|s| s.family_jobs(family).to_vec())
            .unwrap_or_default()
    }

    pub fn job(&self, family: Family, id: i32) -> Option<Job> {
        self.jobs(family).into_iter().find(|j| j.id == id)
    }

    /// Number of rows currently held by live claims.
    pub fn locked_rows(&self) -> usize {
        self.state.lock().map(|s| s.locked.len()).unwrap_or(0)
    }

    pub fn dataset(&self) -> BTreeMap<String, Option<String>> {
        self.state
            .lock()
            .map(|s| s.dataset.clone())
            .unwrap_or_default()
    }
}

struct MemoryLease {
    state: Arc<Mutex<QueueState>>,
    family: Family,
    ids: Vec<i32>,
    completed: bool,
}

#[async_trait]
impl GroupLease for MemoryLease {
    async fn complete(mut self: Box<Self>, completions: Vec<JobCompletion>) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let family = self.family;
        if let Some(jobs) = state.jobs.get_mut(&family) {
            for completion in &completions {
                if let Some(job) = jobs.iter_mut().find(|j| j.id == completion.job_id) {
                    if job.crawled {
                        return Err(SchedulerError::Worker(format!(
                            "job {} completed twice",
                            job.id
                        )));
                    }
                    job.crawled = true;
                    job.error = completion.error.clone();
                }
            }
        }
        for id in &self.ids {
            state.locked.remove(&(family, *id));
        }
        drop(state);
        self.completed = true;
        Ok(())
    }
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        // Uncommitted claim: release the rows untouched, like a rollback.
        if let Ok(mut state) = self.state.lock() {
            for id in &self.ids {
                state.locked.remove(&(self.family, *id));
            }
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn claim_next_group(&self, slice: &JobSlice) -> Result<Option<ClaimedGroup>> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let family = slice.family;

        let anchor = state
            .family_jobs(family)
            .iter()
            .filter(|j| !j.crawled && slice.contains(j))
            .filter(|j| !state.locked.contains(&(family, j.id)))
            .find(|j| state.is_anchor(family, j, &slice.partition))
            .cloned();
        let Some(anchor) = anchor else {
            return Ok(None);
        };

        let group: Vec<Job> = state
            .family_jobs(family)
            .iter()
            .filter(|j| {
                !j.crawled
                    && j.url == anchor.url
                    && j.dimension.partition_key() == slice.partition
            })
            .cloned()
            .collect();
        let ids: Vec<i32> = group.iter().map(|j| j.id).collect();
        for id in &ids {
            state.locked.insert((family, *id));
        }
        drop(state);

        debug!(url = %anchor.url, jobs = ids.len(), "claimed group");
        let lease = MemoryLease {
            state: self.state.clone(),
            family,
            ids,
            completed: false,
        };
        Ok(Some(ClaimedGroup::new(anchor.url, group, Box::new(lease))))
    }

    async fn count_outstanding(&self, slice: &JobSlice) -> Result<i64> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        Ok(state
            .family_jobs(slice.family)
            .iter()
            .filter(|j| !j.crawled && slice.contains(j))
            .count() as i64)
    }

    async fn fail_slice(&self, slice: &JobSlice, record: &ErrorRecord) -> Result<u64> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut marked = 0;
        if let Some(jobs) = state.jobs.get_mut(&slice.family) {
            for job in jobs.iter_mut().filter(|j| !j.crawled && slice.contains(j)) {
                job.crawled = true;
                job.error = Some(record.clone());
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn partitions(&self, family: Family) -> Result<Vec<PartitionKey>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut partitions: Vec<PartitionKey> = Vec::new();
        for job in state.family_jobs(family) {
            let key = job.dimension.partition_key();
            if !partitions.contains(&key) {
                partitions.push(key);
            }
        }
        Ok(partitions)
    }

    async fn variants_per_url(&self, family: Family) -> Result<i64> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut seen: Vec<&Dimension> = Vec::new();
        for job in state.family_jobs(family) {
            if !seen.contains(&&job.dimension) {
                seen.push(&job.dimension);
            }
        }
        Ok(seen.len() as i64)
    }

    async fn id_span(&self, family: Family) -> Result<Option<IdRange>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let ids = state.family_jobs(family).iter().map(|j| i64::from(j.id));
        Ok(ids
            .clone()
            .min()
            .zip(ids.max())
            .map(|(low, high)| IdRange::new(low - 1, high)))
    }

    async fn seed(&self, family: Family, urls: &[String], dimensions: &[Dimension]) -> Result<u64> {
        if let Some(other) = dimensions.iter().find(|d| d.family() != family) {
            return Err(SchedulerError::FamilyMismatch {
                expected: family,
                found: other.family(),
            });
        }

        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let jobs = state.jobs.entry(family).or_default();
        let mut next_id = jobs.iter().map(|j| j.id).max().unwrap_or(0);
        let mut inserted = 0;
        for url in urls {
            for dimension in dimensions {
                if jobs.iter().any(|j| j.url == *url && j.dimension == *dimension) {
                    continue;
                }
                next_id += 1;
                jobs.push(Job {
                    id: next_id,
                    url: url.clone(),
                    dimension: dimension.clone(),
                    crawled: false,
                    error: None,
                });
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn record_dataset(&self, entries: &[DatasetEntry]) -> Result<u64> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut inserted = 0;
        for entry in entries {
            if !state.dataset.contains_key(&entry.start_url) {
                state
                    .dataset
                    .insert(entry.start_url.clone(), entry.start_site.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn summarize(&self, family: Family) -> Result<Vec<PartitionSummary>> {
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        let mut summaries: Vec<PartitionSummary> = Vec::new();
        for job in state.family_jobs(family) {
            let key = job.dimension.partition_key();
            let index = match summaries.iter().position(|s| s.partition == key) {
                Some(i) => i,
                None => {
                    summaries.push(PartitionSummary {
                        partition: key,
                        total: 0,
                        outstanding: 0,
                        errored: 0,
                    });
                    summaries.len() - 1
                }
            };
            let summary = &mut summaries[index];
            summary.total += 1;
            if !job.crawled {
                summary.outstanding += 1;
            }
            if job.error.is_some() {
                summary.errored += 1;
            }
        }
        Ok(summaries)
    }
}

/// In-memory [`ObservationSink`] that records every write.
#[derive(Clone, Default)]
pub struct MemoryObservationSink {
    observations: Arc<RwLock<Vec<(Family, Observation)>>>,
    fail_writes: Arc<RwLock<bool>>,
}

impl MemoryObservationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_writes.write() {
            *flag = fail;
        }
    }

    pub fn observations(&self) -> Vec<(Family, Observation)> {
        self.observations
            .read()
            .map(|o| o.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.observations.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObservationSink for MemoryObservationSink {
    async fn record(&self, family: Family, observation: &Observation) -> Result<()> {
        if self.fail_writes.read().map(|f| *f).unwrap_or(false) {
            return Err(SchedulerError::Io(std::io::Error::other(
                "observation store unavailable",
            )));
        }
        self.observations
            .write()
            .map_err(|_| lock_poisoned())?
            .push((family, observation.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IdRange;

    fn browser(b: &str) -> Dimension {
        Dimension::Browser {
            browser: b.to_string(),
            os: "windows".to_string(),
        }
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://site{i}.test/")).collect()
    }

    fn whole(family: Family) -> JobSlice {
        JobSlice::new(family, IdRange::new(0, i64::MAX), PartitionKey::Direct)
    }

    #[tokio::test]
    async fn test_seed_is_url_major_and_idempotent() {
        let queue = MemoryJobQueue::new();
        let dims = vec![browser("chrome"), browser("firefox")];

        assert_eq!(queue.seed(Family::Browser, &urls(3), &dims).await.unwrap(), 6);
        assert_eq!(queue.seed(Family::Browser, &urls(3), &dims).await.unwrap(), 0);

        let jobs = queue.jobs(Family::Browser);
        assert_eq!(jobs[0].url, jobs[1].url);
        assert_ne!(jobs[1].url, jobs[2].url);
        assert_eq!(queue.variants_per_url(Family::Browser).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_claim_locks_whole_group() {
        let queue = MemoryJobQueue::new();
        let dims = vec![browser("chrome"), browser("firefox"), browser("opera")];
        queue.seed(Family::Browser, &urls(2), &dims).await.unwrap();

        let first = queue.claim_next_group(&whole(Family::Browser)).await.unwrap().unwrap();
        assert_eq!(first.jobs.len(), 3);
        assert_eq!(queue.locked_rows(), 3);

        let second = queue.claim_next_group(&whole(Family::Browser)).await.unwrap().unwrap();
        assert_ne!(first.url, second.url);

        assert!(queue
            .claim_next_group(&whole(Family::Browser))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_dropped_claim_is_reclaimable() {
        let queue = MemoryJobQueue::new();
        queue
            .seed(Family::Browser, &urls(1), &[browser("chrome")])
            .await
            .unwrap();

        let claim = queue.claim_next_group(&whole(Family::Browser)).await.unwrap();
        drop(claim);
        assert_eq!(queue.locked_rows(), 0);

        let again = queue.claim_next_group(&whole(Family::Browser)).await.unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn test_commit_marks_crawled_with_errors() {
        let queue = MemoryJobQueue::new();
        queue
            .seed(Family::Browser, &urls(1), &[browser("chrome"), browser("edge")])
            .await
            .unwrap();

        let mut group = queue.claim_next_group(&whole(Family::Browser)).await.unwrap().unwrap();
        let failing = group.jobs[1].id;
        group.record_result(failing, 2, Err("connect error".to_string()));
        group.commit().await.unwrap();

        let jobs = queue.jobs(Family::Browser);
        assert!(jobs.iter().all(|j| j.crawled));
        assert!(jobs[0].error.is_none());
        assert_eq!(jobs[1].error.as_ref().unwrap().get(2), Some("connect error"));
        assert_eq!(queue.count_outstanding(&whole(Family::Browser)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fail_slice_only_touches_partition() {
        let queue = MemoryJobQueue::new();
        let de = Dimension::Onion {
            country_code: Some("DE".into()),
            country: Some("Germany".into()),
        };
        let own = Dimension::Onion {
            country_code: None,
            country: None,
        };
        queue.seed(Family::Onion, &urls(2), &[de, own]).await.unwrap();

        let partition = PartitionKey::anonymity(Some("DE".into()), Some("Germany".into()));
        let slice = JobSlice::new(Family::Onion, IdRange::new(0, 4), partition);
        let marked = queue
            .fail_slice(&slice, &ErrorRecord::uniform(5, "no circuit"))
            .await
            .unwrap();
        assert_eq!(marked, 2);

        let direct = JobSlice::new(Family::Onion, IdRange::new(0, 4), PartitionKey::Direct);
        assert_eq!(queue.count_outstanding(&direct).await.unwrap(), 2);
        assert_eq!(queue.partitions(Family::Onion).await.unwrap().len(), 2);
    }
}
