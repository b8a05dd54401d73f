// Scripted collaborators for tests.
//
// The in-memory queue and sink live in `stores::memory`; they are re-exported
// here so tests only need one import path.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use crate::error::ContextError;
use crate::stores::content_hash;
use crate::traits::{ContextDriver, CrawlExecutor, EgressProbe};
use crate::types::{
    ContentArtifact, FetchOutcome, FetchRequest, FetchSuccess, NetworkContext, ProbeStatus, Route,
};

pub use crate::stores::memory::{MemoryJobQueue, MemoryObservationSink};

// =============================================================================
// Scripted Executor
// =============================================================================

/// A fetch the executor was asked to perform.
#[derive(Debug, Clone)]
pub struct FetchCall {
    pub request: FetchRequest,
    pub at: Instant,
}

/// Answers every fetch with a canned success unless a failure was scripted
/// for the URL.
#[derive(Default)]
pub struct ScriptedExecutor {
    failures: Mutex<HashMap<String, String>>,
    delay: Duration,
    calls: Mutex<Vec<FetchCall>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every fetch of `url` with `diagnostic`.
    pub fn with_failure(self, url: &str, diagnostic: &str) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), diagnostic.to_string());
        self
    }

    /// Take `delay` per fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn success_for(request: &FetchRequest) -> FetchSuccess {
        let body = format!("<html>{}</html>", request.url);
        let mut headers = Map::new();
        headers.insert("content-type".into(), json!("text/html"));
        headers.insert("x-frame-options".into(), json!("DENY"));
        headers.insert("status_code".into(), json!(200));

        FetchSuccess {
            end_url: request.url.clone(),
            peer: Some("192.0.2.10:443".to_string()),
            tls_version: None,
            status: 200,
            artifact: ContentArtifact {
                hash: content_hash(body.as_bytes()),
                byte_length: body.len() as u64,
            },
            response_headers: headers,
        }
    }
}

#[async_trait]
impl CrawlExecutor for ScriptedExecutor {
    async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        self.calls.lock().unwrap().push(FetchCall {
            request: request.clone(),
            at: Instant::now(),
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failure = self.failures.lock().unwrap().get(&request.url).cloned();
        match failure {
            Some(diagnostic) => FetchOutcome::failure(diagnostic),
            None => FetchOutcome::Success(Self::success_for(request)),
        }
    }
}

// =============================================================================
// Scripted Context Driver
// =============================================================================

/// Counts live connections across drivers that share it.
#[derive(Debug, Default)]
pub struct ConnectionGauge {
    live: AtomicUsize,
    peak: AtomicUsize,
}

impl ConnectionGauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(&self) {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Most connections ever live at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Reports scripted probe results while connected and `Disconnected` otherwise.
pub struct ScriptedContextDriver {
    script: Mutex<VecDeque<ProbeStatus>>,
    fallback: ProbeStatus,
    route: Route,
    connected: AtomicBool,
    gauge: Arc<ConnectionGauge>,
    connects: Mutex<Vec<NetworkContext>>,
    disconnects: AtomicUsize,
    probes: AtomicUsize,
}

impl ScriptedContextDriver {
    /// Every probe while connected returns `status`.
    pub fn always(status: ProbeStatus) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: status,
            route: Route::Direct,
            connected: AtomicBool::new(false),
            gauge: ConnectionGauge::new(),
            connects: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        }
    }

    /// Probes return `script` in order, then `fallback`.
    pub fn scripted(script: Vec<ProbeStatus>, fallback: ProbeStatus) -> Self {
        let driver = Self::always(fallback);
        *driver.script.lock().unwrap() = script.into();
        driver
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.route = route;
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<ConnectionGauge>) -> Self {
        self.gauge = gauge;
        self
    }

    pub fn connects(&self) -> Vec<NetworkContext> {
        self.connects.lock().unwrap().clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Probes answered while connected.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextDriver for ScriptedContextDriver {
    async fn connect(&self, context: &NetworkContext) -> Result<(), ContextError> {
        self.connects.lock().unwrap().push(context.clone());
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.gauge.enter();
        }
        Ok(())
    }

    async fn status(&self) -> Result<ProbeStatus, ContextError> {
        if !self.is_connected() {
            return Ok(ProbeStatus::Disconnected);
        }
        self.probes.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or(self.fallback))
    }

    async fn disconnect(&self) -> Result<(), ContextError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.connected.swap(false, Ordering::SeqCst) {
            self.gauge.exit();
        }
        Ok(())
    }

    fn route(&self) -> Route {
        self.route.clone()
    }
}

// =============================================================================
// Static Egress Probe
// =============================================================================

/// Returns fixed addresses: one for the direct route, one for any proxy.
pub struct StaticEgressProbe {
    direct: Option<String>,
    proxied: Option<String>,
    lookups: AtomicUsize,
}

impl StaticEgressProbe {
    pub fn new(direct: &str) -> Self {
        Self {
            direct: Some(direct.to_string()),
            proxied: None,
            lookups: AtomicUsize::new(0),
        }
    }

    /// No service answers on any route.
    pub fn unavailable() -> Self {
        Self {
            direct: None,
            proxied: None,
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn with_proxied(mut self, ip: &str) -> Self {
        self.proxied = Some(ip.to_string());
        self
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EgressProbe for StaticEgressProbe {
    async fn egress_ip(&self, route: &Route) -> Result<String, ContextError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let ip = match route {
            Route::Direct => &self.direct,
            Route::Proxy(_) => &self.proxied,
        };
        ip.clone()
            .ok_or(ContextError::EgressUnavailable { attempts: 1 })
    }
}

/// Header map as the executor captures it, for classifier tests.
pub fn captured_headers(pairs: &[(&str, &str)]) -> Map<String, Value> {
    let mut headers: Map<String, Value> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    headers.insert("status_code".into(), json!(200));
    headers
}
