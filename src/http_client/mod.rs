//! HTTP clients that tunnel every connection through the anonymity session.

mod trust;
mod user_agent;

pub use trust::{PinnedRoots, TrustMode};
pub use user_agent::{resolve_user_agent, TOR_BROWSER_USER_AGENT, USER_AGENT};

use std::time::{Duration, Instant};

use reqwest::{Client, Proxy, StatusCode};
use tracing::debug;

use crate::error::{BootstrapError, Result};
use crate::fetch::error::error_chain;
use crate::fetch::FetchError;
use crate::privacy::DialCapability;

/// A successful response with its body fully read.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
    pub elapsed: Duration,
}

/// Builder for [`RoutedHttpClient`].
#[derive(Debug, Clone)]
pub struct RoutedHttpClientBuilder {
    dial: DialCapability,
    timeout: Duration,
    trust: TrustMode,
    user_agent: Option<String>,
}

impl RoutedHttpClientBuilder {
    /// Trust anchors for TLS.
    pub fn trust(mut self, trust: TrustMode) -> Self {
        self.trust = trust;
        self
    }

    /// User agent config value (see [`resolve_user_agent`]).
    pub fn user_agent(mut self, user_agent: Option<&str>) -> Self {
        self.user_agent = user_agent.map(str::to_string);
        self
    }

    /// Build the client. No network I/O happens here.
    pub fn build(self) -> Result<RoutedHttpClient> {
        let proxy_url = self.dial.proxy_url();
        let proxy = Proxy::all(proxy_url.as_str())
            .map_err(|e| BootstrapError::ClientBuild(format!("proxy {}: {}", proxy_url, e)))?;

        let mut builder = Client::builder()
            .use_rustls_tls()
            .proxy(proxy)
            .user_agent(resolve_user_agent(self.user_agent.as_deref()))
            .timeout(self.timeout)
            .connect_timeout(self.dial.connect_timeout())
            .gzip(true)
            .brotli(true);

        if let TrustMode::Pinned(roots) = &self.trust {
            builder = builder.tls_built_in_root_certs(false);
            for cert in roots.certificates() {
                builder = builder.add_root_certificate(cert.clone());
            }
        }

        let client = builder
            .build()
            .map_err(|e| BootstrapError::ClientBuild(error_chain(&e)))?;

        debug!(
            "Built {} client via {}",
            if self.trust.is_pinned() { "pinned" } else { "system-trust" },
            proxy_url
        );

        Ok(RoutedHttpClient {
            client,
            dial: self.dial,
            timeout: self.timeout,
            trust: self.trust,
        })
    }
}

/// HTTP client bound to one dial capability, trust mode and timeout.
#[derive(Debug, Clone)]
pub struct RoutedHttpClient {
    client: Client,
    dial: DialCapability,
    timeout: Duration,
    trust: TrustMode,
}

impl RoutedHttpClient {
    pub fn builder(dial: DialCapability, timeout: Duration) -> RoutedHttpClientBuilder {
        RoutedHttpClientBuilder {
            dial,
            timeout,
            trust: TrustMode::SystemDefault,
            user_agent: None,
        }
    }

    pub fn dial(&self) -> &DialCapability {
        &self.dial
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn trust(&self) -> &TrustMode {
        &self.trust
    }

    /// GET `url`. Succeeds only on a 2xx status with the body fully read.
    pub async fn get(&self, url: &str) -> std::result::Result<HttpResponse, FetchError> {
        if !self.dial.is_live() {
            return Err(FetchError::SessionClosed);
        }

        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_send(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Body {
                    status: status.as_u16(),
                    reason: error_chain(&e),
                }
            }
        })?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
            elapsed: start.elapsed(),
        })
    }
}
