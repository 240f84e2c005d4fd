//! End-to-end run: torrc, session, dialer, clients, fetches.
//!
//! Setup failures are fatal and returned as [`BootstrapError`]. Whatever
//! happens, the session is closed and the torrc removed before returning.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{BootstrapError, Result};
use crate::fetch::{ClientSet, FetchResult, FetchSequencer};
use crate::http_client::{PinnedRoots, RoutedHttpClient, TrustMode};
use crate::privacy::{
    AnonymityBackend, AnonymitySession, BootstrapStatus, CTorBackend, DialCapability,
    TransportConfig, TransportConfigBuilder,
};

/// Where a run currently is, for progress display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    WritingConfig,
    Starting,
    Bootstrapping { percent: u8, summary: String },
    Fetching { total: usize },
    Closing,
}

type PhaseCallback = Arc<dyn Fn(Phase) + Send + Sync>;

/// Ties the components together for one run.
#[derive(Clone)]
pub struct Bootstrapper {
    config: Config,
    on_phase: Option<PhaseCallback>,
}

impl Bootstrapper {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            on_phase: None,
        }
    }

    /// Report phase changes to `callback`.
    pub fn on_phase(mut self, callback: impl Fn(Phase) + Send + Sync + 'static) -> Self {
        self.on_phase = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn report(&self, phase: Phase) {
        if let Some(ref callback) = self.on_phase {
            callback(phase);
        }
    }

    /// Run with the system tor.
    pub async fn run(&self) -> Result<Vec<FetchResult>> {
        let backend = CTorBackend::new(&self.config.tor)?;
        self.run_with(Box::new(backend)).await
    }

    /// Run with the given backend.
    pub async fn run_with(&self, backend: Box<dyn AnonymityBackend>) -> Result<Vec<FetchResult>> {
        self.config.validate()?;

        let pinned = match self.config.load_ca_bytes()? {
            Some(bytes) => Some(PinnedRoots::from_pem(&bytes)?),
            None => None,
        };

        self.report(Phase::WritingConfig);
        let builder = TransportConfigBuilder::new(self.config.transport.clone());
        let torrc = builder.build()?;
        builder.prepare_data_dir()?;

        let session = AnonymitySession::new(backend);
        let outcome = self.drive(&session, &torrc, pinned).await;

        self.report(Phase::Closing);
        if let Err(e) = session.close().await {
            warn!("Failed to close session: {}", e);
        }
        if let Err(e) = torrc.remove() {
            warn!("Failed to remove transport configuration: {}", e);
        }

        outcome
    }

    async fn drive(
        &self,
        session: &AnonymitySession,
        torrc: &TransportConfig,
        pinned: Option<PinnedRoots>,
    ) -> Result<Vec<FetchResult>> {
        self.report(Phase::Starting);
        session.start(torrc.path()).await?;

        let dial = self.await_dialer(session).await?;
        let clients = self.build_clients(&dial, pinned)?;

        let (steps, unresolved) = clients.steps(&self.config.targets);
        if let Some(target) = unresolved.first() {
            return Err(BootstrapError::Config(format!(
                "no {} client available for {}",
                target.trust, target.url
            )));
        }

        self.report(Phase::Fetching { total: steps.len() });
        info!("Fetching {} targets", steps.len());
        let results = FetchSequencer::with_concurrency(self.config.concurrency)
            .fetch_all(steps)
            .await;

        let failed = results.iter().filter(|r| !r.is_success()).count();
        if failed > 0 {
            warn!("{} of {} fetches failed", failed, results.len());
        }
        Ok(results)
    }

    /// Wait for the dialer, forwarding bootstrap progress to the callback.
    async fn await_dialer(&self, session: &AnonymitySession) -> Result<DialCapability> {
        let forwarder = match (self.on_phase.clone(), session.watch_bootstrap()) {
            (Some(callback), Some(mut rx)) => Some(tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    let status = (*rx.borrow_and_update()).clone();
                    if let BootstrapStatus::Progress { percent, summary } = status {
                        callback(Phase::Bootstrapping { percent, summary });
                    }
                }
            })),
            _ => None,
        };

        let dial = session.dialer(self.config.tor.startup_timeout()).await;
        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        dial
    }

    fn build_clients(&self, dial: &DialCapability, pinned: Option<PinnedRoots>) -> Result<ClientSet> {
        let timeout = self.config.request_timeout();
        let user_agent = self.config.user_agent.as_deref();

        let system = RoutedHttpClient::builder(dial.clone(), timeout)
            .user_agent(user_agent)
            .build()?;

        let pinned = match pinned {
            Some(roots) => {
                debug!("Pinning {} provider certificate(s)", roots.len());
                Some(
                    RoutedHttpClient::builder(dial.clone(), timeout)
                        .trust(TrustMode::Pinned(roots))
                        .user_agent(user_agent)
                        .build()?,
                )
            }
            None => None,
        };

        Ok(ClientSet { pinned, system })
    }
}

impl std::fmt::Debug for Bootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrapper")
            .field("config", &self.config)
            .finish()
    }
}
