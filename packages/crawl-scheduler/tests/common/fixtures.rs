//! Builders for in-memory scheduler setups.

use std::sync::Arc;
use std::time::Duration;

use crawl_scheduler::classify::{SecurityHeaderSnapshot, SiteResolver};
use crawl_scheduler::testing::{MemoryJobQueue, MemoryObservationSink, ScriptedExecutor};
use crawl_scheduler::{CrawlDeps, WorkerConfig};

/// `n` distinct start URLs.
pub fn urls(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("https://site{i}.example/")).collect()
}

/// Worker settings without pacing, for tests that do not measure time.
pub fn fast_worker(num_samples: u32) -> WorkerConfig {
    WorkerConfig {
        worker_id: "worker-test".to_string(),
        num_samples,
        min_request_interval: Duration::ZERO,
    }
}

/// An in-memory setup whose collaborators stay inspectable.
pub struct MemorySetup {
    pub queue: Arc<MemoryJobQueue>,
    pub sink: Arc<MemoryObservationSink>,
    pub executor: Arc<ScriptedExecutor>,
}

impl MemorySetup {
    pub fn new(executor: ScriptedExecutor) -> Self {
        Self {
            queue: Arc::new(MemoryJobQueue::new()),
            sink: Arc::new(MemoryObservationSink::new()),
            executor: Arc::new(executor),
        }
    }

    pub fn deps(&self) -> CrawlDeps {
        CrawlDeps {
            queue: self.queue.clone(),
            sink: self.sink.clone(),
            executor: self.executor.clone(),
            classifier: Arc::new(SecurityHeaderSnapshot),
            sites: Arc::new(SiteResolver::default()),
        }
    }
}
