//! Domain types shared by the queue, the network layer and the workers.

pub mod context;
pub mod fetch;
pub mod job;
pub mod observation;

pub use context::{ActiveContext, ContextState, NetworkContext, ProbeStatus, Route};
pub use fetch::{ContentArtifact, FetchOutcome, FetchRequest, FetchSuccess};
pub use job::{Dimension, ErrorRecord, Family, IdRange, Job, JobSlice, PartitionKey};
pub use observation::Observation;
