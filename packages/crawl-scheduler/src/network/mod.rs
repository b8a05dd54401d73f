//! Network context management.
//!
//! The [`ContextManager`] owns the single process-wide vantage point. Acquiring
//! a context walks it through `Connecting -> Verifying -> Ready`, reconnecting
//! whenever the probe reports a failure, and gives up after a bounded number
//! of polls. Releasing always tears the context down and waits (bounded) for
//! the driver to confirm it is gone.
//!
//! # Architecture
//!
//! ```text
//! ContextManager
//!     │
//!     ├─► Semaphore(1)           (one context at a time)
//!     ├─► ContextDriver (VPN)    connect / status / disconnect
//!     ├─► ContextDriver (Tor)    connect / status / disconnect
//!     └─► EgressProbe            own IP vs. exit IP
//! ```

pub mod egress;
pub mod tool;
pub mod tor;
pub mod vpn;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::error::ContextError;
use crate::traits::{ContextDriver, EgressProbe};
use crate::types::{ActiveContext, ContextState, NetworkContext, ProbeStatus, Route};

pub use egress::{EgressService, HttpEgressProbe};
pub use tor::TorDriver;
pub use vpn::{HmaVpnDriver, VpnServer};

/// Retry bounds for establishing and tearing down contexts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub vpn_verify_attempts: u32,
    pub anonymity_verify_attempts: u32,
    /// Spacing between status polls
    pub poll_interval: Duration,
    /// Pause between disconnecting and reconnecting a failed context
    pub reconnect_delay: Duration,
    pub teardown_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            vpn_verify_attempts: 32,
            anonymity_verify_attempts: 5,
            poll_interval: Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(3),
            teardown_attempts: 30,
        }
    }
}

impl RetryPolicy {
    /// Zero delays, for tests.
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            reconnect_delay: Duration::ZERO,
            ..Default::default()
        }
    }
}

/// Exclusive hold on the process-wide network context.
///
/// Hand it back through [`ContextManager::release`]. A lease dropped without
/// release (its holder was cancelled) tears the context down on a spawned task
/// and only frees the slot once that teardown has finished.
pub struct ContextLease {
    active: ActiveContext,
    driver: Option<Arc<dyn ContextDriver>>,
    permit: Option<OwnedSemaphorePermit>,
    state: Arc<Mutex<ContextState>>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for ContextLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextLease")
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl ContextLease {
    pub fn active(&self) -> &ActiveContext {
        &self.active
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        warn!(context = %self.active.context, "context lease dropped without release");

        let Some(driver) = self.driver.take() else {
            set_state(&self.state, ContextState::Disconnected);
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(context = %self.active.context, "no runtime to tear the context down on");
            set_state(&self.state, ContextState::Failed);
            return;
        };

        let state = self.state.clone();
        let policy = self.policy.clone();
        let context = self.active.context.clone();
        set_state(&state, ContextState::Disconnecting);
        runtime.spawn(async move {
            teardown(driver.as_ref(), &policy).await;
            set_state(&state, ContextState::Disconnected);
            info!(context = %context, "network context released after drop");
            drop(permit);
        });
    }
}

fn set_state(state: &Mutex<ContextState>, next: ContextState) {
    if let Ok(mut state) = state.lock() {
        let current = *state;
        if !current.can_transition_to(next) && current != next {
            warn!(from = %current, to = %next, "unexpected context state transition");
        }
        debug!(from = %current, to = %next, "context state");
        *state = next;
    }
}

/// Disconnect and poll (bounded) until the driver confirms it is down.
async fn teardown(driver: &dyn ContextDriver, policy: &RetryPolicy) {
    if let Err(e) = driver.disconnect().await {
        warn!(error = %e, "disconnect failed");
    }
    for _ in 0..policy.teardown_attempts {
        match driver.status().await {
            Ok(ProbeStatus::Disconnected) => return,
            Ok(status) => debug!(status = ?status, "waiting for teardown"),
            Err(e) => debug!(error = %e, "teardown status probe failed"),
        }
        tokio::time::sleep(policy.poll_interval).await;
    }
    warn!(
        attempts = policy.teardown_attempts,
        "teardown not confirmed, proceeding"
    );
}

pub struct ContextManager {
    vpn: Option<Arc<dyn ContextDriver>>,
    anonymity: Option<Arc<dyn ContextDriver>>,
    egress: Arc<dyn EgressProbe>,
    policy: RetryPolicy,
    slot: Arc<Semaphore>,
    state: Arc<Mutex<ContextState>>,
    own_ip: tokio::sync::Mutex<Option<String>>,
    alert_webhook: Option<String>,
    http: reqwest::Client,
}

impl ContextManager {
    pub fn new(egress: Arc<dyn EgressProbe>, policy: RetryPolicy) -> Self {
        Self {
            vpn: None,
            anonymity: None,
            egress,
            policy,
            slot: Arc::new(Semaphore::new(1)),
            state: Arc::new(Mutex::new(ContextState::Disconnected)),
            own_ip: tokio::sync::Mutex::new(None),
            alert_webhook: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_vpn_driver(mut self, driver: Arc<dyn ContextDriver>) -> Self {
        self.vpn = Some(driver);
        self
    }

    pub fn with_anonymity_driver(mut self, driver: Arc<dyn ContextDriver>) -> Self {
        self.anonymity = Some(driver);
        self
    }

    pub fn with_alert_webhook(mut self, url: Option<String>) -> Self {
        self.alert_webhook = url;
        self
    }

    pub fn state(&self) -> ContextState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(ContextState::Failed)
    }

    fn transition(&self, next: ContextState) {
        set_state(&self.state, next);
    }

    fn lease(
        &self,
        active: ActiveContext,
        driver: Option<Arc<dyn ContextDriver>>,
        permit: OwnedSemaphorePermit,
    ) -> ContextLease {
        ContextLease {
            active,
            driver,
            permit: Some(permit),
            state: self.state.clone(),
            policy: self.policy.clone(),
        }
    }

    /// The direct route's public IP, looked up once and cached.
    ///
    /// Only called while holding the context slot, so no tunnel is up.
    async fn own_ip(&self) -> Option<String> {
        let mut cached = self.own_ip.lock().await;
        if cached.is_none() {
            match self.egress.egress_ip(&Route::Direct).await {
                Ok(ip) => *cached = Some(ip),
                Err(e) => warn!(error = %e, "could not determine own IP"),
            }
        }
        cached.clone()
    }

    fn driver_for(
        &self,
        context: &NetworkContext,
    ) -> Result<(Arc<dyn ContextDriver>, u32), ContextError> {
        let (driver, attempts) = match context {
            NetworkContext::Direct => {
                return Err(ContextError::Config("direct context has no driver".into()))
            }
            NetworkContext::Vpn { .. } => (&self.vpn, self.policy.vpn_verify_attempts),
            NetworkContext::Anonymity { .. } => {
                (&self.anonymity, self.policy.anonymity_verify_attempts)
            }
        };
        driver
            .clone()
            .map(|d| (d, attempts))
            .ok_or_else(|| ContextError::Config(format!("no driver configured for {context}")))
    }

    /// Acquire `context` exclusively, waiting for any other holder to release.
    ///
    /// On failure the context has already been torn down and the slot freed.
    pub async fn acquire(&self, context: &NetworkContext) -> Result<ContextLease, ContextError> {
        let permit = self
            .slot
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ContextError::Config("context manager closed".into()))?;

        if *context == NetworkContext::Direct {
            let egress_ip = self.own_ip().await;
            self.transition(ContextState::Ready);
            info!(context = %context, egress_ip = ?egress_ip, "network context ready");
            let active = ActiveContext {
                context: context.clone(),
                route: Route::Direct,
                egress_ip,
            };
            return Ok(self.lease(active, None, permit));
        }

        let (driver, attempts) = self.driver_for(context)?;
        match self.establish(&driver, context, attempts).await {
            Ok(egress_ip) => {
                self.transition(ContextState::Ready);
                info!(context = %context, egress_ip = ?egress_ip, "network context ready");
                let active = ActiveContext {
                    context: context.clone(),
                    route: driver.route(),
                    egress_ip,
                };
                Ok(self.lease(active, Some(driver), permit))
            }
            Err(e) => {
                self.transition(ContextState::Failed);
                error!(context = %context, error = %e, "network context failed");
                self.alert(context).await;
                self.transition(ContextState::Disconnecting);
                teardown(driver.as_ref(), &self.policy).await;
                self.transition(ContextState::Disconnected);
                drop(permit);
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        driver: &Arc<dyn ContextDriver>,
        context: &NetworkContext,
        attempts: u32,
    ) -> Result<Option<String>, ContextError> {
        let needs_distinct_exit = matches!(context, NetworkContext::Anonymity { .. });
        let own_ip = if needs_distinct_exit {
            self.own_ip().await
        } else {
            None
        };

        self.transition(ContextState::Connecting);
        if let Err(e) = driver.connect(context).await {
            warn!(context = %context, error = %e, "connect failed, will retry while verifying");
        }
        self.transition(ContextState::Verifying);

        for attempt in 1..=attempts {
            let status = driver.status().await.unwrap_or_else(|e| {
                warn!(context = %context, error = %e, "status probe failed");
                ProbeStatus::Failed
            });
            debug!(context = %context, attempt, status = ?status, "verifying context");

            match status {
                ProbeStatus::Connected if needs_distinct_exit => {
                    match self.egress.egress_ip(&driver.route()).await {
                        Ok(exit_ip) if own_ip.as_deref() != Some(exit_ip.as_str()) => {
                            return Ok(Some(exit_ip));
                        }
                        Ok(exit_ip) => {
                            warn!(context = %context, ip = %exit_ip, "exit IP matches own IP");
                            self.reconnect(driver, context).await;
                        }
                        Err(e) => {
                            warn!(context = %context, error = %e, "exit IP lookup failed");
                            self.reconnect(driver, context).await;
                        }
                    }
                }
                ProbeStatus::Connected => {
                    return Ok(self.egress.egress_ip(&driver.route()).await.ok());
                }
                ProbeStatus::Connecting => {}
                ProbeStatus::Failed | ProbeStatus::Disconnected => {
                    self.reconnect(driver, context).await;
                }
            }

            tokio::time::sleep(self.policy.poll_interval).await;
        }

        Err(ContextError::VerifyExhausted {
            context: context.to_string(),
            attempts,
        })
    }

    /// Disconnect-then-reconnect sub-attempt after a failed probe.
    async fn reconnect(&self, driver: &Arc<dyn ContextDriver>, context: &NetworkContext) {
        self.transition(ContextState::Connecting);
        if let Err(e) = driver.disconnect().await {
            debug!(error = %e, "disconnect before reconnect failed");
        }
        tokio::time::sleep(self.policy.reconnect_delay).await;
        if let Err(e) = driver.connect(context).await {
            warn!(context = %context, error = %e, "reconnect failed");
        }
        self.transition(ContextState::Verifying);
    }

    /// Tear the context down and free the slot.
    pub async fn release(&self, mut lease: ContextLease) {
        self.transition(ContextState::Disconnecting);
        if let Some(driver) = lease.driver.take() {
            teardown(driver.as_ref(), &self.policy).await;
        }
        self.transition(ContextState::Disconnected);
        info!(context = %lease.active.context, "network context released");
        lease.permit.take();
    }

    async fn alert(&self, context: &NetworkContext) {
        let Some(url) = &self.alert_webhook else {
            return;
        };
        let payload = json!({
            "text": format!("Failed to connect to {context}"),
            "username": "Crawl Context Failure",
        });
        if let Err(e) = self.http.post(url).json(&payload).send().await {
            warn!(error = %e, "failure alert not delivered");
        }
    }
}
