//! Public egress IP lookup with a fallback service and bounded retries.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Proxy};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ContextError;
use crate::traits::EgressProbe;
use crate::types::Route;

/// A lookup endpoint and the JSON field holding the address.
#[derive(Debug, Clone)]
pub struct EgressService {
    pub url: String,
    pub field: String,
}

impl EgressService {
    pub fn new(url: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            field: field.into(),
        }
    }
}

pub struct HttpEgressProbe {
    primary: EgressService,
    fallback: EgressService,
    attempts: u32,
    timeout: Duration,
}

impl Default for HttpEgressProbe {
    fn default() -> Self {
        Self {
            primary: EgressService::new("http://ip-api.com/json/", "query"),
            fallback: EgressService::new("https://api.myip.com", "ip"),
            attempts: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

impl HttpEgressProbe {
    pub fn new(primary: EgressService, fallback: EgressService) -> Self {
        Self {
            primary,
            fallback,
            ..Default::default()
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn client(&self, route: &Route) -> Result<Client, reqwest::Error> {
        let builder = Client::builder()
            .local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
            .timeout(self.timeout);
        let builder = match route {
            Route::Direct => builder.no_proxy(),
            Route::Proxy(url) => builder.proxy(Proxy::all(url.as_str())?),
        };
        builder.build()
    }

    async fn lookup(client: &Client, service: &EgressService) -> Option<String> {
        let body: Value = client.get(&service.url).send().await.ok()?.json().await.ok()?;
        body.get(&service.field)?.as_str().map(str::to_string)
    }
}

#[async_trait]
impl EgressProbe for HttpEgressProbe {
    async fn egress_ip(&self, route: &Route) -> Result<String, ContextError> {
        let client = self.client(route).map_err(|e| ContextError::Tool {
            tool: "egress probe".to_string(),
            reason: e.to_string(),
        })?;

        for attempt in 1..=self.attempts {
            if let Some(ip) = Self::lookup(&client, &self.primary).await {
                return Ok(ip);
            }
            if let Some(ip) = Self::lookup(&client, &self.fallback).await {
                return Ok(ip);
            }
            debug!(attempt, "egress lookup failed on both services");
        }

        warn!(attempts = self.attempts, "egress IP unavailable");
        Err(ContextError::EgressUnavailable {
            attempts: self.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(server: &mockito::Server) -> HttpEgressProbe {
        HttpEgressProbe::new(
            EgressService::new(format!("{}/primary", server.url()), "query"),
            EgressService::new(format!("{}/fallback", server.url()), "ip"),
        )
        .with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_primary_service_answers() {
        let mut server = mockito::Server::new_async().await;
        let _primary = server
            .mock("GET", "/primary")
            .with_status(200)
            .with_body(r#"{"status":"success","query":"198.51.100.7"}"#)
            .create_async()
            .await;

        let ip = probe(&server).egress_ip(&Route::Direct).await.unwrap();
        assert_eq!(ip, "198.51.100.7");
    }

    #[tokio::test]
    async fn test_falls_back_when_primary_fails() {
        let mut server = mockito::Server::new_async().await;
        let _primary = server
            .mock("GET", "/primary")
            .with_status(503)
            .create_async()
            .await;
        let _fallback = server
            .mock("GET", "/fallback")
            .with_status(200)
            .with_body(r#"{"ip":"203.0.113.9","country":"Germany"}"#)
            .create_async()
            .await;

        let ip = probe(&server).egress_ip(&Route::Direct).await.unwrap();
        assert_eq!(ip, "203.0.113.9");
    }

    #[tokio::test]
    async fn test_gives_up_after_bounded_attempts() {
        let mut server = mockito::Server::new_async().await;
        let primary = server
            .mock("GET", "/primary")
            .with_status(200)
            .with_body(r#"{"status":"fail"}"#)
            .expect(2)
            .create_async()
            .await;
        let _fallback = server
            .mock("GET", "/fallback")
            .with_status(500)
            .create_async()
            .await;

        let err = probe(&server)
            .with_attempts(2)
            .egress_ip(&Route::Direct)
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::EgressUnavailable { attempts: 2 }));
        primary.assert_async().await;
    }
}
