//! Ordered fetch sequence with per-step failure isolation.

pub(crate) mod error;

pub use error::{FetchError, FetchErrorKind};

use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::http_client::RoutedHttpClient;

/// Which routed client a target is fetched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientSelector {
    /// Client trusting only the pinned provider CA.
    Pinned,
    /// Client with the default web PKI roots.
    System,
}

impl std::fmt::Display for ClientSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientSelector::Pinned => write!(f, "pinned"),
            ClientSelector::System => write!(f, "system"),
        }
    }
}

/// A configured URL to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchTarget {
    pub trust: ClientSelector,
    pub url: String,
    /// File name used when saving the body; defaults to the last path segment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_as: Option<String>,
}

impl FetchTarget {
    pub fn new(trust: ClientSelector, url: impl Into<String>) -> Self {
        Self {
            trust,
            url: url.into(),
            save_as: None,
        }
    }

    /// Name to save the body under.
    pub fn file_name(&self) -> String {
        if let Some(name) = &self.save_as {
            return name.clone();
        }
        url::Url::parse(&self.url)
            .ok()
            .and_then(|url| {
                url.path_segments()
                    .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "index".to_string())
    }
}

/// The reference target list.
pub fn default_targets() -> Vec<FetchTarget> {
    vec![
        FetchTarget::new(
            ClientSelector::Pinned,
            "https://api.black.riseup.net/3/config/eip-service.json",
        ),
        FetchTarget::new(ClientSelector::Pinned, "https://api.black.riseup.net/3/cert"),
        FetchTarget::new(
            ClientSelector::System,
            "https://snowflake-broker.torproject.net/debug",
        ),
        FetchTarget::new(ClientSelector::System, "https://wtfismyip.com/json"),
    ]
}

/// The clients a run built, keyed by selector.
#[derive(Debug, Clone)]
pub struct ClientSet {
    pub pinned: Option<RoutedHttpClient>,
    pub system: RoutedHttpClient,
}

impl ClientSet {
    pub fn get(&self, selector: ClientSelector) -> Option<&RoutedHttpClient> {
        match selector {
            ClientSelector::Pinned => self.pinned.as_ref(),
            ClientSelector::System => Some(&self.system),
        }
    }

    /// Pair each target with its client. Targets whose client is missing are
    /// returned separately.
    pub fn steps(&self, targets: &[FetchTarget]) -> (Vec<FetchStep>, Vec<FetchTarget>) {
        let mut steps = Vec::with_capacity(targets.len());
        let mut unresolved = Vec::new();
        for target in targets {
            match self.get(target.trust) {
                Some(client) => steps.push(FetchStep::new(client.clone(), &target.url)),
                None => unresolved.push(target.clone()),
            }
        }
        (steps, unresolved)
    }
}

/// One (client, URL) pair.
#[derive(Debug, Clone)]
pub struct FetchStep {
    pub client: RoutedHttpClient,
    pub url: String,
}

impl FetchStep {
    pub fn new(client: RoutedHttpClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

/// Outcome of one step.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: String,
    pub status: Option<u16>,
    pub elapsed: Duration,
    pub outcome: Result<Vec<u8>, FetchError>,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.outcome.as_ref().ok().map(Vec::as_slice)
    }

    pub fn error(&self) -> Option<&FetchError> {
        self.outcome.as_ref().err()
    }
}

/// Runs fetch steps in order.
#[derive(Debug, Clone)]
pub struct FetchSequencer {
    concurrency: usize,
}

impl Default for FetchSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchSequencer {
    /// Strictly sequential sequencer.
    pub fn new() -> Self {
        Self { concurrency: 1 }
    }

    /// Allow up to `n` steps in flight. Results stay in input order.
    pub fn with_concurrency(n: usize) -> Self {
        Self {
            concurrency: n.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetch every step, returning exactly one result per step in input order.
    pub async fn fetch_all(&self, steps: Vec<FetchStep>) -> Vec<FetchResult> {
        stream::iter(steps)
            .map(|step| async move { Self::fetch_one(step).await })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn fetch_one(step: FetchStep) -> FetchResult {
        let start = Instant::now();
        let result = step.client.get(&step.url).await;
        let elapsed = start.elapsed();

        match result {
            Ok(response) => {
                info!(
                    "GET {} -> {} ({} bytes, {:?})",
                    step.url,
                    response.status.as_u16(),
                    response.body.len(),
                    elapsed
                );
                FetchResult {
                    url: step.url,
                    status: Some(response.status.as_u16()),
                    elapsed,
                    outcome: Ok(response.body),
                }
            }
            Err(e) => {
                warn!("GET {} failed after {:?}: {}", step.url, elapsed, e);
                FetchResult {
                    url: step.url,
                    status: e.status(),
                    elapsed,
                    outcome: Err(e),
                }
            }
        }
    }
}
