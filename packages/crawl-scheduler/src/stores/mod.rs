//! Storage backends: the Postgres job queue and observation sink, an
//! in-memory equivalent for tests, and the on-disk content store.

pub mod content;
pub mod memory;
pub mod postgres;

pub use content::{content_hash, FsContentStore};
pub use memory::{MemoryJobQueue, MemoryObservationSink};
pub use postgres::{PostgresJobQueue, PostgresObservationSink};
