//! Seeding: dataset ingestion and the dimension rows of each family.
//!
//! Every family gets one job per (url, dimension) pair. The context families
//! also get an all-NULL dimension that measures from our own network, so their
//! results can be compared against a baseline.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::catalog;
use crate::classify::{host_of, SiteResolver};
use crate::error::{Result, SchedulerError};
use crate::network::VpnServer;
use crate::traits::{DatasetEntry, JobQueue};
use crate::types::{Dimension, Family};

/// Relay directory query listing every relay with the Exit flag.
pub const EXIT_RELAYS_URL: &str = "https://onionoo.torproject.org/details?search=flag:exit";

/// URLs of dataset lines `[lower, upper)`.
///
/// Each line is `rank,url`; blank lines still count towards the index.
pub fn parse_dataset(text: &str, lower: i64, upper: i64) -> Result<Vec<String>> {
    let lower = lower.max(0) as usize;
    let upper = upper.max(0) as usize;

    text.lines()
        .enumerate()
        .skip(lower)
        .take(upper.saturating_sub(lower))
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            let (_, url) = line.split_once(',').ok_or_else(|| SchedulerError::InvalidDataset {
                line: index + 1,
                reason: "expected `rank,url`".to_string(),
            })?;
            let url = url.trim();
            if url.is_empty() {
                return Err(SchedulerError::InvalidDataset {
                    line: index + 1,
                    reason: "empty url".to_string(),
                });
            }
            Ok(url.to_string())
        })
        .collect()
}

pub async fn read_dataset(path: &Path, lower: i64, upper: i64) -> Result<Vec<String>> {
    let text = tokio::fs::read_to_string(path).await?;
    parse_dataset(&text, lower, upper)
}

pub fn browser_dimensions() -> Vec<Dimension> {
    catalog::browser_variants()
        .into_iter()
        .map(|(browser, os)| Dimension::Browser {
            browser: browser.to_string(),
            os: os.to_string(),
        })
        .collect()
}

pub fn client_dimensions() -> Vec<Dimension> {
    catalog::header_configs()
        .into_iter()
        .map(|config| Dimension::Client { config })
        .collect()
}

#[derive(Debug, Deserialize)]
struct RelayDetails {
    #[serde(default)]
    relays: Vec<Relay>,
}

#[derive(Debug, Deserialize)]
struct Relay {
    country: Option<String>,
    country_name: Option<String>,
}

/// One dimension per distinct exit country in a relay directory response,
/// followed by the own-network row.
pub fn onion_dimensions(details: &serde_json::Value) -> Result<Vec<Dimension>> {
    let details = RelayDetails::deserialize(details)?;
    let countries: BTreeSet<(String, Option<String>)> = details
        .relays
        .into_iter()
        .filter_map(|relay| Some((relay.country?, relay.country_name)))
        .collect();

    let mut dimensions: Vec<Dimension> = countries
        .into_iter()
        .map(|(code, name)| Dimension::Onion {
            country_code: Some(code),
            country: name,
        })
        .collect();
    dimensions.push(Dimension::Onion {
        country_code: None,
        country: None,
    });
    Ok(dimensions)
}

/// Look up exit countries from the public relay directory.
pub async fn fetch_onion_dimensions(client: &reqwest::Client, url: &str) -> Result<Vec<Dimension>> {
    let details: serde_json::Value = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    onion_dimensions(&details)
}

/// The first listed profile of every country, followed by the own-network row.
pub fn vpn_dimensions(servers: &[VpnServer]) -> Vec<Dimension> {
    let mut seen = HashSet::new();
    let mut dimensions: Vec<Dimension> = servers
        .iter()
        .filter(|server| seen.insert(server.country_code.clone()))
        .map(|server| Dimension::Vpn {
            vpn_domain: Some(server.profile.clone()),
            country_code: Some(server.country_code.clone()),
            country: Some(server.country.clone()),
        })
        .collect();
    dimensions.push(Dimension::Vpn {
        vpn_domain: None,
        country_code: None,
        country: None,
    });
    dimensions
}

/// Writes dataset rows and job rows through a [`JobQueue`].
pub struct Seeder {
    queue: Arc<dyn JobQueue>,
    sites: Arc<SiteResolver>,
}

impl Seeder {
    pub fn new(queue: Arc<dyn JobQueue>, sites: Arc<SiteResolver>) -> Self {
        Self { queue, sites }
    }

    /// Record the start URLs with their registrable domains.
    pub async fn seed_dataset(&self, urls: &[String]) -> Result<u64> {
        let entries: Vec<DatasetEntry> = urls
            .iter()
            .map(|url| {
                let host = host_of(url).unwrap_or_else(|| url.clone());
                DatasetEntry {
                    start_url: url.clone(),
                    start_site: self.sites.registrable_domain(&host),
                }
            })
            .collect();
        let inserted = self.queue.record_dataset(&entries).await?;
        info!(urls = urls.len(), inserted, "recorded dataset");
        Ok(inserted)
    }

    pub async fn seed_family(
        &self,
        family: Family,
        urls: &[String],
        dimensions: &[Dimension],
    ) -> Result<u64> {
        info!(
            family = %family,
            urls = urls.len(),
            dimensions = dimensions.len(),
            "seeding family"
        );
        self.queue.seed(family, urls, dimensions).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_dataset_slices_by_line_index() {
        let text = "1,https://a.example\n2,https://b.example\n3,https://c.example\n4,https://d.example\n";
        let urls = parse_dataset(text, 1, 3).unwrap();
        assert_eq!(urls, vec!["https://b.example", "https://c.example"]);
    }

    #[test]
    fn test_parse_dataset_keeps_commas_in_url() {
        let urls = parse_dataset("7,https://a.example/?q=1,2\n", 0, 10).unwrap();
        assert_eq!(urls, vec!["https://a.example/?q=1,2"]);
    }

    #[test]
    fn test_parse_dataset_rejects_line_without_rank() {
        let err = parse_dataset("1,https://a.example\nhttps://b.example\n", 0, 2).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidDataset { line: 2, .. }));
    }

    #[test]
    fn test_browser_dimensions_skip_missing_combinations() {
        let dims = browser_dimensions();
        assert_eq!(dims.len(), 20);
        assert!(!dims.contains(&Dimension::Browser {
            browser: "safari".into(),
            os: "linux".into()
        }));
    }

    #[test]
    fn test_onion_dimensions_dedupe_and_append_own_network() {
        let details = json!({
            "relays": [
                {"nickname": "a", "country": "de", "country_name": "Germany"},
                {"nickname": "b", "country": "de", "country_name": "Germany"},
                {"nickname": "c", "country": "nl", "country_name": "Netherlands"},
                {"nickname": "d"}
            ]
        });

        let dims = onion_dimensions(&details).unwrap();
        assert_eq!(dims.len(), 3);
        assert_eq!(
            dims[0],
            Dimension::Onion {
                country_code: Some("de".into()),
                country: Some("Germany".into())
            }
        );
        assert_eq!(
            dims[2],
            Dimension::Onion {
                country_code: None,
                country: None
            }
        );
    }

    #[test]
    fn test_vpn_dimensions_one_profile_per_country() {
        let servers = vec![
            VpnServer {
                profile: "de.berlin".into(),
                country_code: "DE".into(),
                country: "Germany".into(),
            },
            VpnServer {
                profile: "de.frankfurt".into(),
                country_code: "DE".into(),
                country: "Germany".into(),
            },
            VpnServer {
                profile: "fr.paris".into(),
                country_code: "FR".into(),
                country: "France".into(),
            },
        ];

        let dims = vpn_dimensions(&servers);
        assert_eq!(dims.len(), 3);
        assert_eq!(
            dims[0],
            Dimension::Vpn {
                vpn_domain: Some("de.berlin".into()),
                country_code: Some("DE".into()),
                country: Some("Germany".into())
            }
        );
        assert_eq!(dims[2].partition_key(), crate::types::PartitionKey::Direct);
    }
}
