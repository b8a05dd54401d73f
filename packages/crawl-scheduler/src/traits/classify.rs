use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structured grading of a response's headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub results: Value,
    pub cookies: Value,
}

/// Grades captured response headers. Must be total and deterministic.
pub trait Classifier: Send + Sync {
    fn classify(
        &self,
        end_url: &str,
        headers: &Map<String, Value>,
        origin: Option<&str>,
    ) -> Classification;
}
