// Crawl Scheduler
//
// Schedules repeated HTTP measurements of a ranked domain list across browser
// identities, request-header configurations, anonymity exits and VPN
// endpoints. Jobs live in Postgres and are claimed a URL group at a time;
// network contexts are process-wide and held by one slice at a time.

pub mod catalog;
pub mod classify;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod network;
pub mod seed;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;
pub mod worker;

pub use config::Config;
pub use driver::{DriverConfig, RunReport, SchedulerDriver};
pub use error::{ContentError, ContextError, Result, SchedulerError};
pub use worker::{CrawlDeps, CrawlWorker, WorkerConfig, WorkerPool, WorkerReport};
