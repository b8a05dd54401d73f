use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use dotenvy::dotenv;

use crate::driver::DriverConfig;
use crate::executor::ExecutorConfig;
use crate::network::RetryPolicy;
use crate::worker::WorkerConfig;

/// Scheduler configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub num_processes: usize,
    pub url_lower: i64,
    pub num_domains: i64,
    pub chunk_size: i64,
    pub num_samples: u32,
    pub min_request_interval: Duration,
    pub request_timeout: Duration,
    pub soft_timeout: Duration,
    pub hard_timeout: Duration,
    pub max_body_bytes: u64,
    pub data_directory: PathBuf,
    pub domains_file: PathBuf,
    pub vpn_dir: PathBuf,
    pub vpn_verify_attempts: u32,
    pub torrc_path: PathBuf,
    pub tor_socks_proxy: String,
    pub tor_verify_attempts: u32,
    pub context_poll_interval: Duration,
    pub alert_webhook_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            database_url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
            num_processes: parse_or(&lookup, "NUM_PROCESSES", 1)?,
            url_lower: parse_or(&lookup, "URL_LOWER", 0)?,
            num_domains: parse_or(&lookup, "NUM_DOMAINS", 10_000)?,
            chunk_size: parse_or(&lookup, "CHUNK_SIZE", 5_000)?,
            num_samples: parse_or(&lookup, "NUM_SAMPLES", 5)?,
            min_request_interval: Duration::from_millis(parse_or(
                &lookup,
                "MIN_REQUEST_INTERVAL_MS",
                2_000,
            )?),
            request_timeout: Duration::from_secs(parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 20)?),
            soft_timeout: Duration::from_secs(parse_or(&lookup, "SOFT_TIMEOUT_SECS", 30)?),
            hard_timeout: Duration::from_secs(parse_or(&lookup, "HARD_TIMEOUT_SECS", 40)?),
            max_body_bytes: parse_or(&lookup, "MAX_BODY_BYTES", 64 * 1024 * 1024)?,
            data_directory: lookup("DATA_DIRECTORY")
                .unwrap_or_else(|| "/data".to_string())
                .into(),
            domains_file: lookup("DOMAINS_FILE")
                .unwrap_or_else(|| "domains.csv".to_string())
                .into(),
            vpn_dir: lookup("VPN_DIR").unwrap_or_else(|| "./VPN".to_string()).into(),
            vpn_verify_attempts: parse_or(&lookup, "VPN_VERIFY_ATTEMPTS", 32)?,
            torrc_path: lookup("TORRC_PATH")
                .unwrap_or_else(|| "./torrc".to_string())
                .into(),
            tor_socks_proxy: lookup("TOR_SOCKS_PROXY")
                .unwrap_or_else(|| "socks5h://127.0.0.1:9050".to_string()),
            tor_verify_attempts: parse_or(&lookup, "TOR_VERIFY_ATTEMPTS", 5)?,
            context_poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "CONTEXT_POLL_INTERVAL_MS",
                1_000,
            )?),
            alert_webhook_url: lookup("ALERT_WEBHOOK_URL").filter(|s| !s.is_empty()),
        };

        ensure!(config.num_processes > 0, "NUM_PROCESSES must be at least 1");
        ensure!(config.chunk_size > 0, "CHUNK_SIZE must be at least 1");
        ensure!(
            config.num_domains >= config.url_lower,
            "NUM_DOMAINS must not be below URL_LOWER"
        );
        ensure!(
            config.hard_timeout > config.soft_timeout,
            "HARD_TIMEOUT_SECS must exceed SOFT_TIMEOUT_SECS"
        );

        Ok(config)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            request_timeout: self.request_timeout,
            soft_timeout: self.soft_timeout,
            hard_timeout: self.hard_timeout,
            max_body_bytes: self.max_body_bytes,
            ..Default::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            vpn_verify_attempts: self.vpn_verify_attempts,
            anonymity_verify_attempts: self.tor_verify_attempts,
            poll_interval: self.context_poll_interval,
            ..Default::default()
        }
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            chunk_size: self.chunk_size,
            num_workers: self.num_processes,
            worker: WorkerConfig {
                num_samples: self.num_samples,
                min_request_interval: self.min_request_interval,
                ..Default::default()
            },
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/crawl")]))
            .unwrap();

        assert_eq!(config.num_processes, 1);
        assert_eq!(config.num_domains, 10_000);
        assert_eq!(config.chunk_size, 5_000);
        assert_eq!(config.num_samples, 5);
        assert_eq!(config.min_request_interval, Duration::from_secs(2));
        assert_eq!(config.soft_timeout, Duration::from_secs(30));
        assert_eq!(config.hard_timeout, Duration::from_secs(40));
        assert_eq!(config.vpn_verify_attempts, 32);
        assert_eq!(config.tor_verify_attempts, 5);
        assert_eq!(config.data_directory, PathBuf::from("/data"));
        assert!(config.alert_webhook_url.is_none());
    }

    #[test]
    fn test_missing_database_url_is_fatal() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_unparsable_number_is_fatal() {
        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/crawl"),
            ("NUM_SAMPLES", "five"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("NUM_SAMPLES"));
    }

    #[test]
    fn test_hard_timeout_must_exceed_soft() {
        let result = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/crawl"),
            ("SOFT_TIMEOUT_SECS", "40"),
            ("HARD_TIMEOUT_SECS", "30"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_derived_configs() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/crawl"),
            ("NUM_PROCESSES", "4"),
            ("URL_LOWER", "100"),
            ("NUM_DOMAINS", "200"),
            ("CHUNK_SIZE", "50"),
            ("MIN_REQUEST_INTERVAL_MS", "250"),
        ]))
        .unwrap();

        let driver = config.driver_config();
        assert_eq!(driver.num_workers, 4);
        assert_eq!(driver.chunk_size, 50);
        assert_eq!((config.url_lower, config.num_domains), (100, 200));
        assert_eq!(driver.worker.min_request_interval, Duration::from_millis(250));

        let retry = config.retry_policy();
        assert_eq!(retry.vpn_verify_attempts, 32);
        assert_eq!(retry.anonymity_verify_attempts, 5);
    }
}
