use async_trait::async_trait;

use crate::error::ContextError;
use crate::types::{NetworkContext, ProbeStatus, Route};

/// Adapter around an external tool that establishes a vantage point.
#[async_trait]
pub trait ContextDriver: Send + Sync {
    /// Start connecting. Returning does not mean the context is usable.
    async fn connect(&self, context: &NetworkContext) -> Result<(), ContextError>;

    /// Probe the current connection state.
    async fn status(&self) -> Result<ProbeStatus, ContextError>;

    async fn disconnect(&self) -> Result<(), ContextError>;

    /// How fetches reach the network while this driver is connected.
    fn route(&self) -> Route;
}

/// Looks up the public IP address traffic leaves from.
#[async_trait]
pub trait EgressProbe: Send + Sync {
    async fn egress_ip(&self, route: &Route) -> Result<String, ContextError>;
}
