use std::fmt;

use serde::{Deserialize, Serialize};

/// An external vantage point requests are sent from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NetworkContext {
    /// The machine's own network connection
    Direct,
    /// A commercial VPN endpoint, selected by vendor profile name
    Vpn {
        profile: String,
        country_code: Option<String>,
    },
    /// An anonymity-network circuit pinned to exits in one country
    Anonymity { country_code: String },
}

impl fmt::Display for NetworkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkContext::Direct => f.write_str("direct"),
            NetworkContext::Vpn { profile, .. } => write!(f, "vpn:{profile}"),
            NetworkContext::Anonymity { country_code } => write!(f, "anonymity:{country_code}"),
        }
    }
}

/// Lifecycle of the process-wide network context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    Disconnected,
    Connecting,
    Verifying,
    Ready,
    Disconnecting,
    Failed,
}

impl ContextState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ContextState) -> bool {
        use ContextState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Disconnected, Ready)
                | (Connecting, Verifying)
                | (Connecting, Failed)
                | (Verifying, Ready)
                | (Verifying, Connecting)
                | (Verifying, Failed)
                | (Ready, Disconnecting)
                | (Failed, Disconnecting)
                | (Disconnecting, Disconnected)
        )
    }
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContextState::Disconnected => "disconnected",
            ContextState::Connecting => "connecting",
            ContextState::Verifying => "verifying",
            ContextState::Ready => "ready",
            ContextState::Disconnecting => "disconnecting",
            ContextState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What a context driver's status probe reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Connected,
    Connecting,
    Failed,
    Disconnected,
}

/// How a fetch reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Route {
    /// Straight out of the host's (possibly VPN-tunnelled) interface
    Direct,
    /// Through a proxy URL, e.g. the anonymity daemon's SOCKS port
    Proxy(String),
}

/// The route and identity handed to workers while a context is held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveContext {
    pub context: NetworkContext,
    pub route: Route,
    pub egress_ip: Option<String>,
}
