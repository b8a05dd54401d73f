//! Typed errors for the crawl scheduler.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can tell a
//! lost database connection apart from a network context that never came up.
//! Per-sample fetch failures are not errors at this level: the executor
//! reports them as [`FetchOutcome::Failure`](crate::types::FetchOutcome).

use std::time::Duration;

use thiserror::Error;

use crate::types::{Family, PartitionKey};

/// Errors raised by the scheduler, its job queue and its stores.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Database query or connection failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Filesystem operation failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request outside a fetch attempt failed (seeding, alerts)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Network context could not be acquired or released
    #[error("network context error: {0}")]
    Context(#[from] ContextError),

    /// Content store failed
    #[error("content store error: {0}")]
    Content(#[from] ContentError),

    /// A partition key does not belong to the family it was used with
    #[error("partition {partition:?} does not belong to the {family} family")]
    PartitionMismatch {
        family: Family,
        partition: PartitionKey,
    },

    /// A dimension was seeded into another family's table
    #[error("{found} dimension cannot be seeded into the {expected} family")]
    FamilyMismatch { expected: Family, found: Family },

    /// A line of the seed dataset could not be parsed
    #[error("invalid dataset line {line}: {reason}")]
    InvalidDataset { line: usize, reason: String },

    /// A worker task panicked or was cancelled
    #[error("worker error: {0}")]
    Worker(String),
}

/// Errors from acquiring, verifying or releasing a network context.
#[derive(Debug, Error)]
pub enum ContextError {
    /// An external tool exited unsuccessfully or could not be spawned
    #[error("{tool} failed: {reason}")]
    Tool { tool: String, reason: String },

    /// An external tool did not finish in time
    #[error("{tool} did not finish within {after:?}")]
    ToolTimeout { tool: String, after: Duration },

    /// Verification polling ran out of attempts
    #[error("{context} not verified after {attempts} attempts")]
    VerifyExhausted { context: String, attempts: u32 },

    /// No egress IP lookup service answered
    #[error("egress IP unavailable after {attempts} attempts")]
    EgressUnavailable { attempts: u32 },

    /// The anonymity route still exits from our own address
    #[error("egress IP {ip} is unchanged from the direct route")]
    EgressUnchanged { ip: String },

    /// The context cannot be driven with the current configuration
    #[error("context configuration error: {0}")]
    Config(String),

    /// Reading or writing a context config file failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the content-addressed artifact store.
#[derive(Debug, Error)]
pub enum ContentError {
    /// Filesystem operation failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking write task panicked or was cancelled
    #[error("background write failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Persisting the temporary file into place failed
    #[error("persist failed: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Result type alias for scheduler operations.
pub type Result<T, E = SchedulerError> = std::result::Result<T, E>;
