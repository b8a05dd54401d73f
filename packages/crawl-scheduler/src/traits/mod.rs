//! Trait seams between the scheduler and its collaborators.
//!
//! Workers and the driver only see these traits, so the in-memory and
//! scripted implementations in [`crate::testing`] can stand in for Postgres,
//! the network and the vendor tools.

pub mod classify;
pub mod fetch;
pub mod network;
pub mod queue;

pub use classify::{Classification, Classifier};
pub use fetch::{ContentStore, CrawlExecutor};
pub use network::{ContextDriver, EgressProbe};
pub use queue::{
    ClaimedGroup, DatasetEntry, GroupLease, JobCompletion, JobQueue, ObservationSink,
    PartitionSummary,
};
