//! Job-side types: families, dimensions, partitions and id slices.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ContextError, SchedulerError};
use crate::types::context::NetworkContext;

/// One of the four fixed measurement families.
///
/// Each family owns a job table (`<family>_tests`) and an append-only
/// observation table named after the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Browser,
    Client,
    Onion,
    Vpn,
}

impl Family {
    pub const ALL: [Family; 4] = [Family::Browser, Family::Client, Family::Onion, Family::Vpn];

    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Browser => "browser",
            Family::Client => "client",
            Family::Onion => "onion",
            Family::Vpn => "vpn",
        }
    }

    pub fn jobs_table(&self) -> &'static str {
        match self {
            Family::Browser => "browser_tests",
            Family::Client => "client_tests",
            Family::Onion => "onion_tests",
            Family::Vpn => "vpn_tests",
        }
    }

    pub fn observations_table(&self) -> &'static str {
        self.as_str()
    }

    /// Columns that, together with `url`, identify a job.
    pub fn dimension_columns(&self) -> &'static [&'static str] {
        match self {
            Family::Browser => &["browser", "os"],
            Family::Client => &["config"],
            Family::Onion => &["country_code", "country"],
            Family::Vpn => &["vpn_dom", "country_code", "country"],
        }
    }

    /// Columns that select the network context a job must run under.
    ///
    /// Presentation families always run on the direct route, so they have none.
    pub fn partition_columns(&self) -> &'static [&'static str] {
        match self {
            Family::Browser | Family::Client => &[],
            Family::Onion => &["country_code", "country"],
            Family::Vpn => &["vpn_dom", "country_code", "country"],
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Family {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "browser" => Ok(Family::Browser),
            "client" => Ok(Family::Client),
            "onion" => Ok(Family::Onion),
            "vpn" => Ok(Family::Vpn),
            other => Err(format!("unknown family: {other}")),
        }
    }
}

/// The context-dimension values of a single job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum Dimension {
    Browser {
        browser: String,
        os: String,
    },
    Client {
        config: BTreeMap<String, String>,
    },
    Onion {
        country_code: Option<String>,
        country: Option<String>,
    },
    Vpn {
        vpn_domain: Option<String>,
        country_code: Option<String>,
        country: Option<String>,
    },
}

impl Dimension {
    pub fn family(&self) -> Family {
        match self {
            Dimension::Browser { .. } => Family::Browser,
            Dimension::Client { .. } => Family::Client,
            Dimension::Onion { .. } => Family::Onion,
            Dimension::Vpn { .. } => Family::Vpn,
        }
    }

    /// The partition this job belongs to.
    pub fn partition_key(&self) -> PartitionKey {
        match self {
            Dimension::Browser { .. } | Dimension::Client { .. } => PartitionKey::Direct,
            Dimension::Onion {
                country_code,
                country,
            } => PartitionKey::anonymity(country_code.clone(), country.clone()),
            Dimension::Vpn {
                vpn_domain,
                country_code,
                country,
            } => PartitionKey::vpn(vpn_domain.clone(), country_code.clone(), country.clone()),
        }
    }
}

/// Diagnostics for the samples of a job that failed, keyed by sample index.
///
/// Stored as a JSON object in the job's `error` column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorRecord(BTreeMap<u32, String>);

impl ErrorRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// The same diagnostic for every sample index in `0..samples`.
    pub fn uniform(samples: u32, diagnostic: impl Into<String>) -> Self {
        let diagnostic = diagnostic.into();
        Self((0..samples).map(|i| (i, diagnostic.clone())).collect())
    }

    pub fn insert(&mut self, sample: u32, diagnostic: impl Into<String>) {
        self.0.insert(sample, diagnostic.into());
    }

    pub fn get(&self, sample: u32) -> Option<&str> {
        self.0.get(&sample).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.clone())))
                .collect(),
        )
    }
}

/// A unit of measurement work: one URL under one context dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i32,
    pub url: String,
    pub dimension: Dimension,
    pub crawled: bool,
    pub error: Option<ErrorRecord>,
}

/// Selects the rows of a family that run under one network context.
///
/// `Direct` on the onion and VPN families matches the rows whose context
/// columns are all NULL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PartitionKey {
    Direct,
    Anonymity {
        country_code: Option<String>,
        country: Option<String>,
    },
    Vpn {
        vpn_domain: Option<String>,
        country_code: Option<String>,
        country: Option<String>,
    },
}

impl PartitionKey {
    pub fn anonymity(country_code: Option<String>, country: Option<String>) -> Self {
        if country_code.is_none() && country.is_none() {
            PartitionKey::Direct
        } else {
            PartitionKey::Anonymity {
                country_code,
                country,
            }
        }
    }

    pub fn vpn(
        vpn_domain: Option<String>,
        country_code: Option<String>,
        country: Option<String>,
    ) -> Self {
        if vpn_domain.is_none() && country_code.is_none() && country.is_none() {
            PartitionKey::Direct
        } else {
            PartitionKey::Vpn {
                vpn_domain,
                country_code,
                country,
            }
        }
    }

    /// Values to compare against [`Family::partition_columns`], in order.
    pub fn column_values(&self, family: Family) -> Result<Vec<Option<String>>, SchedulerError> {
        let values = match (family, self) {
            (Family::Browser | Family::Client, PartitionKey::Direct) => vec![],
            (Family::Onion, PartitionKey::Direct) => vec![None, None],
            (
                Family::Onion,
                PartitionKey::Anonymity {
                    country_code,
                    country,
                },
            ) => vec![country_code.clone(), country.clone()],
            (Family::Vpn, PartitionKey::Direct) => vec![None, None, None],
            (
                Family::Vpn,
                PartitionKey::Vpn {
                    vpn_domain,
                    country_code,
                    country,
                },
            ) => vec![vpn_domain.clone(), country_code.clone(), country.clone()],
            _ => {
                return Err(SchedulerError::PartitionMismatch {
                    family,
                    partition: self.clone(),
                })
            }
        };
        Ok(values)
    }

    /// The network context jobs of this partition must be measured under.
    pub fn network_context(&self) -> Result<NetworkContext, ContextError> {
        match self {
            PartitionKey::Direct => Ok(NetworkContext::Direct),
            PartitionKey::Anonymity {
                country_code: Some(code),
                ..
            } => Ok(NetworkContext::Anonymity {
                country_code: code.clone(),
            }),
            PartitionKey::Anonymity { .. } => Err(ContextError::Config(
                "anonymity partition without a country code".into(),
            )),
            PartitionKey::Vpn {
                vpn_domain: Some(profile),
                country_code,
                ..
            } => Ok(NetworkContext::Vpn {
                profile: profile.clone(),
                country_code: country_code.clone(),
            }),
            PartitionKey::Vpn { .. } => Err(ContextError::Config(
                "VPN partition without a profile".into(),
            )),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Direct => f.write_str("direct"),
            PartitionKey::Anonymity { country_code, .. } => {
                write!(f, "anonymity:{}", country_code.as_deref().unwrap_or("-"))
            }
            PartitionKey::Vpn { vpn_domain, .. } => {
                write!(f, "vpn:{}", vpn_domain.as_deref().unwrap_or("-"))
            }
        }
    }
}

/// Half-open job id interval `(low, high]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub low: i64,
    pub high: i64,
}

impl IdRange {
    pub fn new(low: i64, high: i64) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, id: i64) -> bool {
        id > self.low && id <= self.high
    }

    pub fn is_empty(&self) -> bool {
        self.high <= self.low
    }

    /// Consecutive ranges of at most `step` ids covering this one.
    ///
    /// Chunks are cut from the ids actually present in a table, never from
    /// dataset positions: re-seeding burns serial values and later seeds
    /// append ids above earlier ones.
    pub fn split(&self, step: i64) -> Vec<IdRange> {
        if step <= 0 || self.is_empty() {
            return Vec::new();
        }
        let mut ranges = Vec::new();
        let mut low = self.low;
        while low < self.high {
            let high = low.saturating_add(step).min(self.high);
            ranges.push(IdRange::new(low, high));
            low = high;
        }
        ranges
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}]", self.low, self.high)
    }
}

/// The rows of one family inside an id range and one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSlice {
    pub family: Family,
    pub range: IdRange,
    pub partition: PartitionKey,
}

impl JobSlice {
    pub fn new(family: Family, range: IdRange, partition: PartitionKey) -> Self {
        Self {
            family,
            range,
            partition,
        }
    }

    /// Whether a job falls inside this slice.
    pub fn contains(&self, job: &Job) -> bool {
        job.dimension.family() == self.family
            && self.range.contains(job.id as i64)
            && job.dimension.partition_key() == self.partition
    }
}
