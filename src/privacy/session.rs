//! Lifecycle of the anonymity-network client.
//!
//! [`AnonymitySession`] drives a pluggable [`AnonymityBackend`] through
//! `Unstarted → Starting → Ready → Closed` (or `Failed` when launch or
//! bootstrap fails) and hands out [`DialCapability`] values once the backend
//! reports a usable circuit. Waiting for bootstrap never holds the backend lock, so `close`
//! is always free to proceed.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::DialCapability;
use crate::error::{BootstrapError, Result};

/// Externally visible state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Starting,
    Ready,
    Closed,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unstarted => write!(f, "unstarted"),
            SessionState::Starting => write!(f, "starting"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Closed => write!(f, "closed"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// Bootstrap progress reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapStatus {
    /// Launched, nothing reported yet.
    Starting,
    /// Partial bootstrap.
    Progress { percent: u8, summary: String },
    /// Circuits are usable through the SOCKS listener at `socks_addr`.
    Ready { socks_addr: SocketAddr },
    /// Bootstrap cannot complete.
    Failed(String),
}

impl BootstrapStatus {
    /// Whether no further progress is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BootstrapStatus::Ready { .. } | BootstrapStatus::Failed(_))
    }
}

/// A process (or stand-in) that can build circuits and expose a SOCKS listener.
#[async_trait]
pub trait AnonymityBackend: Send {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Launch with the given torrc and return a feed of bootstrap progress.
    ///
    /// Dropping the sender side signals that the backend exited.
    async fn launch(&mut self, torrc: &Path) -> Result<watch::Receiver<BootstrapStatus>>;

    /// Stop everything `launch` started. Must be idempotent.
    async fn terminate(&mut self) -> Result<()>;
}

/// Owns a backend and its state machine.
pub struct AnonymitySession {
    backend: Mutex<Box<dyn AnonymityBackend>>,
    state: watch::Sender<SessionState>,
    bootstrap: StdMutex<Option<watch::Receiver<BootstrapStatus>>>,
}

impl AnonymitySession {
    pub fn new(backend: Box<dyn AnonymityBackend>) -> Self {
        let (state, _) = watch::channel(SessionState::Unstarted);
        Self {
            backend: Mutex::new(backend),
            state,
            bootstrap: StdMutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Latest bootstrap progress, once started.
    pub fn bootstrap_status(&self) -> Option<BootstrapStatus> {
        let rx = self.bootstrap_receiver()?;
        let status = rx.borrow().clone();
        Some(status)
    }

    /// Follow bootstrap progress, once started.
    pub fn watch_bootstrap(&self) -> Option<watch::Receiver<BootstrapStatus>> {
        self.bootstrap_receiver()
    }

    fn bootstrap_receiver(&self) -> Option<watch::Receiver<BootstrapStatus>> {
        match self.bootstrap.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_bootstrap_receiver(&self, rx: Option<watch::Receiver<BootstrapStatus>>) {
        match self.bootstrap.lock() {
            Ok(mut guard) => *guard = rx,
            Err(poisoned) => *poisoned.into_inner() = rx,
        }
    }

    /// Atomically move from `from` to `to`; returns false if not in `from`.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Launch the backend with the torrc at `torrc`.
    pub async fn start(&self, torrc: &Path) -> Result<()> {
        if !self.transition(SessionState::Unstarted, SessionState::Starting) {
            return Err(BootstrapError::InvalidState {
                operation: "start",
                state: self.state(),
            });
        }

        let mut backend = self.backend.lock().await;
        info!("Starting {} with {}", backend.name(), torrc.display());

        match backend.launch(torrc).await {
            Ok(rx) => {
                self.set_bootstrap_receiver(Some(rx));
                if self.transition(SessionState::Starting, SessionState::Ready) {
                    debug!("{} launched", backend.name());
                    Ok(())
                } else {
                    // close() ran while we were launching; it terminates once we release the lock
                    self.set_bootstrap_receiver(None);
                    Err(BootstrapError::Startup(format!(
                        "session {} during startup",
                        self.state()
                    )))
                }
            }
            Err(e) => {
                self.transition(SessionState::Starting, SessionState::Failed);
                if let Err(cleanup) = backend.terminate().await {
                    warn!("Cleanup after failed start: {}", cleanup);
                }
                if matches!(e, BootstrapError::Startup(_)) {
                    Err(e)
                } else {
                    Err(BootstrapError::Startup(e.to_string()))
                }
            }
        }
    }

    /// Wait up to `deadline` for a usable circuit and return a dial capability.
    pub async fn dialer(&self, deadline: Duration) -> Result<DialCapability> {
        let state = self.state();
        if state != SessionState::Ready {
            return Err(BootstrapError::InvalidState {
                operation: "dialer",
                state,
            });
        }

        let mut rx = self
            .bootstrap_receiver()
            .ok_or(BootstrapError::InvalidState {
                operation: "dialer",
                state: self.state(),
            })?;

        // Stop waiting as soon as the session leaves Ready (close, or another
        // dialer observed a failure).
        let mut state_rx = self.subscribe();
        let waited = tokio::time::timeout(deadline, async {
            tokio::select! {
                status = rx.wait_for(|s| s.is_terminal()) => {
                    Some(status.map(|status| (*status).clone()))
                }
                _ = state_rx.wait_for(|s| *s != SessionState::Ready) => None,
            }
        })
        .await;

        let state = self.state();
        if state == SessionState::Closed {
            return Err(BootstrapError::InvalidState {
                operation: "dialer",
                state,
            });
        }

        let status = match waited {
            Err(_) => return Err(BootstrapError::DialTimeout(deadline)),
            Ok(None) => {
                return Err(BootstrapError::InvalidState {
                    operation: "dialer",
                    state,
                })
            }
            Ok(Some(Err(_))) => {
                return Err(self.bootstrap_failed(
                    "anonymity client exited before bootstrap completed".to_string(),
                ))
            }
            Ok(Some(Ok(status))) => status,
        };

        match status {
            BootstrapStatus::Ready { socks_addr } => {
                let state = self.state();
                if state != SessionState::Ready {
                    return Err(BootstrapError::InvalidState {
                        operation: "dialer",
                        state,
                    });
                }
                info!("Dialer ready via SOCKS listener {}", socks_addr);
                Ok(DialCapability::new(socks_addr, deadline, self.subscribe()))
            }
            BootstrapStatus::Failed(reason) => Err(self.bootstrap_failed(reason)),
            other => Err(BootstrapError::DialSetup(format!(
                "unexpected bootstrap status {:?}",
                other
            ))),
        }
    }

    /// Record that bootstrap cannot complete; later dialers fail fast.
    fn bootstrap_failed(&self, reason: String) -> BootstrapError {
        if self.transition(SessionState::Ready, SessionState::Failed) {
            warn!("Bootstrap failed: {}", reason);
        }
        BootstrapError::DialSetup(reason)
    }

    /// Terminate the backend. Safe to call repeatedly and from any state.
    pub async fn close(&self) -> Result<()> {
        let previous = self.state.send_replace(SessionState::Closed);
        if previous == SessionState::Closed {
            return Ok(());
        }

        self.set_bootstrap_receiver(None);
        let mut backend = self.backend.lock().await;
        info!("Closing {} (was {})", backend.name(), previous);
        backend.terminate().await
    }
}

impl fmt::Debug for AnonymitySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnonymitySession")
            .field("state", &self.state())
            .finish()
    }
}
