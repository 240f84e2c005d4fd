//! Dial capability handed out by a ready session.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;

use super::{socks5, SessionState};
use crate::error::{BootstrapError, Result};

/// Opens connections through the session's SOCKS listener.
///
/// Cloning is cheap. A capability tracks its session's state and stops
/// working as soon as the session leaves `Ready`.
#[derive(Debug, Clone)]
pub struct DialCapability {
    socks_addr: SocketAddr,
    connect_timeout: Duration,
    session: watch::Receiver<SessionState>,
}

impl DialCapability {
    pub(crate) fn new(
        socks_addr: SocketAddr,
        connect_timeout: Duration,
        session: watch::Receiver<SessionState>,
    ) -> Self {
        Self {
            socks_addr,
            connect_timeout,
            session,
        }
    }

    /// Local SOCKS5 listener of the anonymity client.
    pub fn socks_addr(&self) -> SocketAddr {
        self.socks_addr
    }

    /// Proxy URL with remote name resolution (`socks5h`).
    pub fn proxy_url(&self) -> String {
        format!("socks5h://{}", self.socks_addr)
    }

    /// Deadline for establishing a single connection.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Whether the owning session is still ready.
    pub fn is_live(&self) -> bool {
        *self.session.borrow() == SessionState::Ready
    }

    /// Session state as seen by this capability.
    pub fn session_state(&self) -> SessionState {
        *self.session.borrow()
    }

    /// Open a TCP stream to `host:port` through the anonymity network.
    pub async fn dial(&self, host: &str, port: u16) -> Result<TcpStream> {
        let state = self.session_state();
        if state != SessionState::Ready {
            return Err(BootstrapError::InvalidState {
                operation: "dial",
                state,
            });
        }

        let target = format!("{}:{}", host, port);
        debug!("Dialing {} via {}", target, self.socks_addr);

        match tokio::time::timeout(
            self.connect_timeout,
            socks5::connect(self.socks_addr, host, port),
        )
        .await
        {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(BootstrapError::Dial {
                target,
                reason: e.to_string(),
            }),
            Err(_) => Err(BootstrapError::Dial {
                target,
                reason: format!("timed out after {:?}", self.connect_timeout),
            }),
        }
    }
}
