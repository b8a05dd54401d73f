//! Driver for the vendor VPN command-line client.
//!
//! The client is a shell script in `VPN_DIR` that daemonizes OpenVPN:
//! `-d -c <credentials> <profile>` connects, `-s` prints status, `-x`
//! disconnects and `-l` lists the available servers.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::tool::run_tool;
use crate::error::ContextError;
use crate::traits::ContextDriver;
use crate::types::{NetworkContext, ProbeStatus, Route};

const SCRIPT: &str = "hma-vpn.sh";
const LIST_MARKER: &str = "servers matched";

/// One entry of the vendor's server list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnServer {
    pub profile: String,
    pub country_code: String,
    pub country: String,
}

pub struct HmaVpnDriver {
    dir: PathBuf,
    credentials_file: String,
    command_timeout: Duration,
}

impl HmaVpnDriver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            credentials_file: "hmauser.pass".to_string(),
            command_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_credentials_file(mut self, file: impl Into<String>) -> Self {
        self.credentials_file = file.into();
        self
    }

    async fn script(&self, args: &[&str]) -> Result<String, ContextError> {
        let mut full = vec![SCRIPT];
        full.extend_from_slice(args);
        // A failing status call still prints the state we need.
        let output = run_tool("/bin/bash", &full, Some(&self.dir), self.command_timeout).await?;
        Ok(output.text)
    }

    /// Servers offered by the vendor, in listing order.
    pub async fn list_servers(&self) -> Result<Vec<VpnServer>, ContextError> {
        let output = self.script(&["-l"]).await?;
        Ok(parse_server_list(&output))
    }
}

#[async_trait]
impl ContextDriver for HmaVpnDriver {
    async fn connect(&self, context: &NetworkContext) -> Result<(), ContextError> {
        let NetworkContext::Vpn { profile, .. } = context else {
            return Err(ContextError::Config(format!(
                "VPN driver cannot connect to {context}"
            )));
        };
        info!(profile = %profile, "starting VPN client");
        self.script(&["-d", "-c", &self.credentials_file, profile])
            .await
            .map(|_| ())
    }

    async fn status(&self) -> Result<ProbeStatus, ContextError> {
        let output = self.script(&["-s"]).await?;
        let status = classify_status(&output);
        debug!(status = ?status, "VPN status");
        Ok(status)
    }

    async fn disconnect(&self) -> Result<(), ContextError> {
        self.script(&["-x"]).await.map(|_| ())
    }

    fn route(&self) -> Route {
        // The tunnel replaces the default route.
        Route::Direct
    }
}

/// Map the client's free-form status text onto a probe status.
///
/// The match is case-sensitive: `Disconnected` must not read as `Connected`.
pub fn classify_status(text: &str) -> ProbeStatus {
    if text.contains("Connected") {
        ProbeStatus::Connected
    } else if text.contains("Failed") {
        ProbeStatus::Failed
    } else if text.trim().is_empty() || text.contains("Disconnected") {
        ProbeStatus::Disconnected
    } else {
        ProbeStatus::Connecting
    }
}

lazy_static! {
    // `profile ... (CC) Country`
    static ref SERVER_LINE: Regex = Regex::new(r"([^(^ ]*).*\(([^)]*)\)\s*([^\n]*)").unwrap();
}

/// Parse the `-l` output: everything after the "servers matched" banner,
/// one `profile ... (CC) Country` entry per line.
pub fn parse_server_list(output: &str) -> Vec<VpnServer> {
    let Some((_, servers)) = output.split_once(LIST_MARKER) else {
        return Vec::new();
    };
    SERVER_LINE
        .captures_iter(servers)
        .filter_map(|caps| {
            let profile = caps.get(1)?.as_str().trim();
            if profile.is_empty() {
                return None;
            }
            Some(VpnServer {
                profile: profile.to_string(),
                country_code: caps.get(2)?.as_str().trim().to_string(),
                country: caps.get(3)?.as_str().trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(
            classify_status("Status: Connected to Germany.Frankfurt.TCP"),
            ProbeStatus::Connected
        );
        assert_eq!(classify_status("Status: Disconnected"), ProbeStatus::Disconnected);
        assert_eq!(classify_status(""), ProbeStatus::Disconnected);
        assert_eq!(classify_status("Connection Failed"), ProbeStatus::Failed);
        assert_eq!(classify_status("Status: Connecting..."), ProbeStatus::Connecting);
    }

    #[test]
    fn test_parse_server_list() {
        let output = "Fetching list...\n3 servers matched\n\
                      de.frankfurt.hma.rocks   (DE) Germany\n\
                      fr.paris.hma.rocks   (FR) France\n\
                      us.newyork.hma.rocks   (US) United States\n";
        let servers = parse_server_list(output);
        assert_eq!(servers.len(), 3);
        assert_eq!(
            servers[0],
            VpnServer {
                profile: "de.frankfurt.hma.rocks".into(),
                country_code: "DE".into(),
                country: "Germany".into(),
            }
        );
        assert_eq!(servers[2].country, "United States");
    }

    #[test]
    fn test_parse_server_list_without_banner() {
        assert!(parse_server_list("error: not logged in").is_empty());
    }
}
