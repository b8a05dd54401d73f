use async_trait::async_trait;

use crate::error::ContentError;
use crate::types::{ContentArtifact, FetchOutcome, FetchRequest};

/// Performs one isolated fetch attempt.
///
/// Never fails at the type level: every transport, timeout or storage problem
/// is folded into [`FetchOutcome::Failure`].
#[async_trait]
pub trait CrawlExecutor: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> FetchOutcome;
}

/// Content-addressed storage for response bodies.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `bytes` unless an artifact with the same hash exists. The hash is
    /// returned either way.
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentArtifact, ContentError>;

    async fn contains(&self, hash: &str) -> bool;
}
