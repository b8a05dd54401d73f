//! Driver for a local Tor daemon pinned to exits in one country.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info};

use super::tool::run_tool;
use crate::error::ContextError;
use crate::traits::ContextDriver;
use crate::types::{NetworkContext, ProbeStatus, Route};

pub const DEFAULT_CHECK_URL: &str = "https://check.torproject.org/";
pub const CONFIRMATION_PHRASE: &str = "Congratulations.";
const DAEMON: &str = "tor";

lazy_static! {
    static ref EXIT_NODES_LINE: Regex = Regex::new(r"(?m)^ExitNodes.*$").unwrap();
}

/// Replace (or append) the exit constraint so only `country_code` exits are used.
pub fn rewrite_exit_nodes(torrc: &str, country_code: &str) -> String {
    let line = format!("ExitNodes {{{}}} StrictNodes 1", country_code.to_ascii_lowercase());
    if EXIT_NODES_LINE.is_match(torrc) {
        EXIT_NODES_LINE.replace_all(torrc, line.as_str()).into_owned()
    } else {
        let mut out = torrc.to_string();
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&line);
        out.push('\n');
        out
    }
}

pub struct TorDriver {
    torrc: PathBuf,
    socks_proxy: String,
    check_url: String,
    probe_timeout: Duration,
    command_timeout: Duration,
}

impl TorDriver {
    pub fn new(torrc: impl Into<PathBuf>, socks_proxy: impl Into<String>) -> Self {
        Self {
            torrc: torrc.into(),
            socks_proxy: socks_proxy.into(),
            check_url: DEFAULT_CHECK_URL.to_string(),
            probe_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_check_url(mut self, url: impl Into<String>) -> Self {
        self.check_url = url.into();
        self
    }

    async fn daemon_running(&self) -> Result<bool, ContextError> {
        let output = run_tool("pgrep", &["-x", DAEMON], None, self.command_timeout).await?;
        Ok(output.success)
    }

    async fn probe(&self) -> ProbeStatus {
        let Ok(proxy) = reqwest::Proxy::all(self.socks_proxy.as_str()) else {
            return ProbeStatus::Failed;
        };
        let client = match reqwest::Client::builder()
            .local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
            .timeout(self.probe_timeout)
            .proxy(proxy)
            .build()
        {
            Ok(client) => client,
            Err(_) => return ProbeStatus::Failed,
        };

        let body = match client.get(&self.check_url).send().await {
            Ok(response) => response.text().await.unwrap_or_default(),
            Err(e) => {
                // circuits are often still being built right after start
                debug!(error = %e, "anonymity check request failed");
                return ProbeStatus::Connecting;
            }
        };

        if body.contains(CONFIRMATION_PHRASE) {
            ProbeStatus::Connected
        } else if body.contains("Sorry") {
            ProbeStatus::Failed
        } else {
            ProbeStatus::Connecting
        }
    }
}

#[async_trait]
impl ContextDriver for TorDriver {
    async fn connect(&self, context: &NetworkContext) -> Result<(), ContextError> {
        let NetworkContext::Anonymity { country_code } = context else {
            return Err(ContextError::Config(format!(
                "anonymity driver cannot connect to {context}"
            )));
        };

        let current = tokio::fs::read_to_string(&self.torrc).await.unwrap_or_default();
        tokio::fs::write(&self.torrc, rewrite_exit_nodes(&current, country_code)).await?;

        let torrc = self.torrc.to_string_lossy().into_owned();
        info!(country_code = %country_code, torrc = %torrc, "starting anonymity daemon");
        let output = run_tool(
            DAEMON,
            &["-f", &torrc, "--runasdaemon", "1"],
            None,
            self.command_timeout,
        )
        .await?;
        if !output.success {
            return Err(ContextError::Tool {
                tool: DAEMON.to_string(),
                reason: output.text.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn status(&self) -> Result<ProbeStatus, ContextError> {
        if !self.daemon_running().await? {
            return Ok(ProbeStatus::Disconnected);
        }
        Ok(self.probe().await)
    }

    async fn disconnect(&self) -> Result<(), ContextError> {
        // pkill exits 1 when nothing matched, which is fine here
        run_tool("pkill", &["-x", DAEMON], None, self.command_timeout).await?;
        Ok(())
    }

    fn route(&self) -> Route {
        Route::Proxy(self.socks_proxy.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_replaces_existing_exit_line() {
        let torrc = "SocksPort 9050\nExitNodes {us} StrictNodes 1\nLog notice stdout\n";
        let rewritten = rewrite_exit_nodes(torrc, "DE");
        assert_eq!(
            rewritten,
            "SocksPort 9050\nExitNodes {de} StrictNodes 1\nLog notice stdout\n"
        );
    }

    #[test]
    fn test_rewrite_appends_when_missing() {
        assert_eq!(
            rewrite_exit_nodes("SocksPort 9050", "fr"),
            "SocksPort 9050\nExitNodes {fr} StrictNodes 1\n"
        );
        assert_eq!(rewrite_exit_nodes("", "nl"), "ExitNodes {nl} StrictNodes 1\n");
    }

    #[test]
    fn test_route_goes_through_socks_proxy() {
        let driver = TorDriver::new("./torrc", "socks5h://127.0.0.1:9050");
        assert_eq!(
            driver.route(),
            Route::Proxy("socks5h://127.0.0.1:9050".to_string())
        );
    }
}
