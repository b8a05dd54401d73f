//! HTTP crawl executor with a two-tier deadline.
//!
//! Every attempt runs in its own tokio task with its own client and no
//! connection reuse, so nothing an attempt leaves behind can leak into the
//! next one. At the soft deadline the attempt is asked to stop and reports how
//! far it got. At the hard deadline the task is aborted outright.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy};
use serde_json::{Map, Value};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::traits::{ContentStore, CrawlExecutor};
use crate::types::{FetchOutcome, FetchRequest, FetchSuccess, Route};

/// Configuration for fetch attempts.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Client-level timeout covering connect, headers and body
    pub request_timeout: Duration,
    /// Cooperative stop; the attempt returns a partial diagnostic
    pub soft_timeout: Duration,
    /// Forced termination
    pub hard_timeout: Duration,
    pub max_body_bytes: u64,
    pub max_redirects: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(20),
            soft_timeout: Duration::from_secs(30),
            hard_timeout: Duration::from_secs(40),
            max_body_bytes: 64 * 1024 * 1024,
            max_redirects: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Connecting,
    ReadingBody,
    Storing,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Connecting => "connecting",
            Stage::ReadingBody => "reading body",
            Stage::Storing => "storing content",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Progress {
    stage: Stage,
    bytes_read: u64,
}

type SharedProgress = Arc<Mutex<Progress>>;

fn update(progress: &SharedProgress, f: impl FnOnce(&mut Progress)) {
    if let Ok(mut p) = progress.lock() {
        f(&mut p);
    }
}

fn snapshot(progress: &SharedProgress) -> Progress {
    progress.lock().map(|p| *p).unwrap_or(Progress {
        stage: Stage::Connecting,
        bytes_read: 0,
    })
}

/// Fetches over HTTP(S), IPv4 only, and stores bodies in a [`ContentStore`].
pub struct HttpCrawlExecutor {
    config: ExecutorConfig,
    store: Arc<dyn ContentStore>,
}

impl HttpCrawlExecutor {
    pub fn new(config: ExecutorConfig, store: Arc<dyn ContentStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn outcome_from_join(
        &self,
        joined: Result<FetchOutcome, JoinError>,
        url: &str,
    ) -> FetchOutcome {
        match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                warn!(url = %url, "fetch attempt panicked");
                FetchOutcome::failure("fetch attempt panicked")
            }
            Err(_) => FetchOutcome::failure("fetch attempt was cancelled"),
        }
    }
}

#[async_trait]
impl CrawlExecutor for HttpCrawlExecutor {
    async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        let cancel = CancellationToken::new();
        let progress: SharedProgress = Arc::new(Mutex::new(Progress {
            stage: Stage::Connecting,
            bytes_read: 0,
        }));

        let mut handle = tokio::spawn(attempt(
            request.clone(),
            self.config.clone(),
            self.store.clone(),
            cancel.clone(),
            progress.clone(),
        ));

        tokio::select! {
            joined = &mut handle => return self.outcome_from_join(joined, &request.url),
            _ = tokio::time::sleep(self.config.soft_timeout) => {}
        }

        debug!(url = %request.url, "soft deadline reached, stopping attempt");
        cancel.cancel();

        let grace = self
            .config
            .hard_timeout
            .saturating_sub(self.config.soft_timeout);
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(joined) => self.outcome_from_join(joined, &request.url),
            Err(_) => {
                handle.abort();
                let p = snapshot(&progress);
                warn!(url = %request.url, stage = p.stage.as_str(), "hard deadline reached, attempt aborted");
                FetchOutcome::failure(format!(
                    "hard timeout after {}s: attempt aborted while {} ({} bytes read)",
                    self.config.hard_timeout.as_secs(),
                    p.stage.as_str(),
                    p.bytes_read
                ))
            }
        }
    }
}

fn soft_timeout_outcome(config: &ExecutorConfig, progress: &SharedProgress) -> FetchOutcome {
    let p = snapshot(progress);
    FetchOutcome::failure(format!(
        "soft timeout after {}s while {} ({} bytes read)",
        config.soft_timeout.as_secs(),
        p.stage.as_str(),
        p.bytes_read
    ))
}

fn build_client(config: &ExecutorConfig, route: &Route) -> reqwest::Result<Client> {
    let builder = Client::builder()
        .local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
        .timeout(config.request_timeout)
        .redirect(Policy::limited(config.max_redirects))
        .pool_max_idle_per_host(0);

    let builder = match route {
        Route::Direct => builder.no_proxy(),
        Route::Proxy(url) => builder.proxy(Proxy::all(url.as_str())?),
    };
    builder.build()
}

async fn attempt(
    request: FetchRequest,
    config: ExecutorConfig,
    store: Arc<dyn ContentStore>,
    cancel: CancellationToken,
    progress: SharedProgress,
) -> FetchOutcome {
    let client = match build_client(&config, &request.route) {
        Ok(client) => client,
        Err(e) => return FetchOutcome::failure(format!("client setup failed: {e}")),
    };

    let mut builder = client
        .get(&request.url)
        .header(USER_AGENT, request.user_agent.as_str());
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let mut response = tokio::select! {
        _ = cancel.cancelled() => return soft_timeout_outcome(&config, &progress),
        sent = builder.send() => match sent {
            Ok(response) => response,
            Err(e) => return FetchOutcome::failure(describe_error(&e)),
        },
    };

    let end_url = response.url().to_string();
    let peer = response.remote_addr().map(|addr| addr.to_string());
    let status = response.status().as_u16();
    let response_headers = capture_headers(response.headers(), status);

    update(&progress, |p| p.stage = Stage::ReadingBody);
    let mut body: Vec<u8> = Vec::new();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return soft_timeout_outcome(&config, &progress),
            chunk = response.chunk() => chunk,
        };
        match chunk {
            Ok(Some(bytes)) => {
                if body.len() as u64 + bytes.len() as u64 > config.max_body_bytes {
                    return FetchOutcome::failure(format!(
                        "response body exceeds {} bytes",
                        config.max_body_bytes
                    ));
                }
                body.extend_from_slice(&bytes);
                let read = body.len() as u64;
                update(&progress, |p| p.bytes_read = read);
            }
            Ok(None) => break,
            Err(e) => return FetchOutcome::failure(describe_error(&e)),
        }
    }

    update(&progress, |p| p.stage = Stage::Storing);
    let artifact = tokio::select! {
        _ = cancel.cancelled() => return soft_timeout_outcome(&config, &progress),
        stored = store.put(body) => match stored {
            Ok(artifact) => artifact,
            Err(e) => return FetchOutcome::failure(format!("could not store content: {e}")),
        },
    };

    FetchOutcome::Success(FetchSuccess {
        end_url,
        peer,
        // rustls does not surface the negotiated version through reqwest
        tls_version: None,
        status,
        artifact,
        response_headers,
    })
}

/// Lowercased names, repeated headers joined with `", "`, plus `status_code`.
pub fn capture_headers(headers: &HeaderMap, status: u16) -> Map<String, Value> {
    let mut captured = Map::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        captured.insert(name.as_str().to_ascii_lowercase(), Value::String(joined));
    }
    captured.insert("status_code".to_string(), Value::from(status));
    captured
}

fn describe_error(e: &reqwest::Error) -> String {
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect error"
    } else if e.is_redirect() {
        "redirect error"
    } else if e.is_body() || e.is_decode() {
        "body error"
    } else {
        "request error"
    };

    let mut message = format!("{kind}: {e}");
    let mut source = std::error::Error::source(e);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderName, HeaderValue};

    use super::*;

    #[test]
    fn test_capture_headers_joins_duplicates() {
        let mut headers = HeaderMap::new();
        headers.append(
            HeaderName::from_static("set-cookie"),
            HeaderValue::from_static("a=1; Secure"),
        );
        headers.append(
            HeaderName::from_static("set-cookie"),
            HeaderValue::from_static("b=2; HttpOnly"),
        );
        headers.insert(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        );

        let captured = capture_headers(&headers, 200);
        assert_eq!(captured["set-cookie"], "a=1; Secure, b=2; HttpOnly");
        assert_eq!(captured["x-frame-options"], "DENY");
        assert_eq!(captured["status_code"], 200);
    }

    #[test]
    fn test_default_deadlines_are_ordered() {
        let config = ExecutorConfig::default();
        assert!(config.request_timeout < config.soft_timeout);
        assert!(config.soft_timeout < config.hard_timeout);
    }
}
