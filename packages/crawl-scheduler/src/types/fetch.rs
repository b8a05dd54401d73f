use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::context::Route;

/// A stored response body, addressed by the MD5 hex digest of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentArtifact {
    pub hash: String,
    pub byte_length: u64,
}

/// One HTTP attempt to make.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    pub route: Route,
    pub user_agent: String,
    /// Extra request headers (presentation variant)
    pub headers: BTreeMap<String, String>,
}

/// Transport metadata and stored body of a completed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchSuccess {
    pub end_url: String,
    pub peer: Option<String>,
    pub tls_version: Option<String>,
    pub status: u16,
    pub artifact: ContentArtifact,
    /// Lowercased header names, duplicate values joined with `", "`, plus
    /// a numeric `status_code` entry
    pub response_headers: serde_json::Map<String, serde_json::Value>,
}

/// Result of one attempt. Failures carry a diagnostic instead of an error type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FetchOutcome {
    Success(FetchSuccess),
    Failure { diagnostic: String },
}

impl FetchOutcome {
    pub fn failure(diagnostic: impl Into<String>) -> Self {
        FetchOutcome::Failure {
            diagnostic: diagnostic.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }
}
