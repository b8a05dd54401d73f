use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// One successful (job, sample) measurement, appended to the family's table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Observation {
    pub job_id: i32,
    pub sample_index: u32,
    #[builder(default)]
    pub domain: Option<String>,
    pub start_url: String,
    pub end_url: String,
    #[builder(default)]
    pub peer: Option<String>,
    #[builder(default)]
    pub tls_version: Option<String>,
    pub content_hash: String,
    pub headers: serde_json::Value,
    #[builder(default)]
    pub results: Option<serde_json::Value>,
    #[builder(default)]
    pub cookies: Option<serde_json::Value>,
    #[builder(default)]
    pub end_origin: Option<String>,
    #[builder(default)]
    pub end_site: Option<String>,
    #[builder(default)]
    pub egress_ip: Option<String>,
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
}
