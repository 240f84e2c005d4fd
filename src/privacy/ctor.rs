//! C-Tor process backend.
//!
//! Spawns the system `tor` with a generated torrc and follows its notice log
//! on stdout to learn the SOCKS listener address and bootstrap progress.
//!
//! # How it works
//!
//! 1. tor is started with `-f <torrc>` and `--SocksPort auto` (or a fixed port)
//! 2. `--__OwningControllerProcess` ties tor's lifetime to ours
//! 3. A monitor task parses "Opened Socks listener" and "Bootstrapped N%" lines
//! 4. Progress is published on a watch channel; `Ready` once 100% is reached
//!    and the listener address is known

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{AnonymityBackend, BootstrapStatus, TorConfig};
use crate::error::{BootstrapError, Result};

/// One interesting line of tor's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorEvent {
    /// SOCKS listener bound.
    SocksListener(SocketAddr),
    /// Bootstrap progress.
    Bootstrapped {
        percent: u8,
        tag: Option<String>,
        summary: String,
    },
    /// `[warn]` line.
    Warning(String),
    /// `[err]` line; tor is about to exit.
    Error(String),
}

/// Message text following the `[severity]` marker.
fn message_after(line: &str, marker: &str) -> Option<String> {
    line.find(marker)
        .map(|idx| line[idx + marker.len()..].trim().to_string())
}

/// Parse a single log line. Returns `None` for lines we don't care about.
pub fn parse_tor_line(line: &str) -> Option<TorEvent> {
    if let Some(message) = message_after(line, "[err]") {
        return Some(TorEvent::Error(message));
    }

    if let Some(idx) = line.find("Opened Socks listener") {
        let rest = &line[idx..];
        let addr = rest.rsplit(" on ").next()?.trim();
        return addr.parse().ok().map(TorEvent::SocksListener);
    }

    if let Some(idx) = line.find("Bootstrapped ") {
        let rest = &line[idx + "Bootstrapped ".len()..];
        let (percent, rest) = rest.split_once('%')?;
        let percent: u8 = percent.trim().parse().ok()?;

        // "Bootstrapped 25% (loading_status): Loading networkstatus consensus"
        // Older releases omit the tag: "Bootstrapped 100%: Done"
        let rest = rest.trim_start();
        let (tag, summary) = match rest.strip_prefix('(') {
            Some(tagged) => {
                let (tag, after) = tagged.split_once(')')?;
                (Some(tag.to_string()), after)
            }
            None => (None, rest),
        };
        let summary = summary.trim_start_matches(':').trim().to_string();
        return Some(TorEvent::Bootstrapped {
            percent: percent.min(100),
            tag,
            summary,
        });
    }

    message_after(line, "[warn]").map(TorEvent::Warning)
}

/// Tor client driven as a child process.
pub struct CTorBackend {
    tor_binary: PathBuf,
    socks_port_arg: String,
    fixed_socks_addr: Option<SocketAddr>,
    process: Option<Child>,
    monitor: Option<JoinHandle<()>>,
}

impl CTorBackend {
    /// Find the tor binary in PATH or at a specific location.
    pub fn find_tor_binary(config: &TorConfig) -> Option<PathBuf> {
        // Check explicit path first
        if let Some(ref path) = config.tor_binary {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("Configured tor binary {} does not exist", path.display());
        }

        // Search PATH
        let candidates = if cfg!(windows) {
            vec!["tor.exe", "Tor\\tor.exe"]
        } else {
            vec!["tor", "/usr/bin/tor", "/usr/local/bin/tor"]
        };

        candidates
            .into_iter()
            .find_map(|candidate| which::which(candidate).ok())
    }

    /// Check if C-Tor is available on this system.
    pub fn is_available(config: &TorConfig) -> bool {
        Self::find_tor_binary(config).is_some()
    }

    pub fn new(config: &TorConfig) -> Result<Self> {
        let tor_binary = Self::find_tor_binary(config).ok_or_else(|| {
            BootstrapError::Startup(
                "Tor binary not found. Install tor or set SNOWSTRAP_TOR_BINARY.".to_string(),
            )
        })?;

        Ok(Self {
            tor_binary,
            socks_port_arg: config.socks_port_arg(),
            fixed_socks_addr: config
                .socks_port
                .map(|port| SocketAddr::from(([127, 0, 0, 1], port))),
            process: None,
            monitor: None,
        })
    }
}

/// Follow tor's stdout and publish bootstrap progress until it exits.
async fn monitor_log<R>(
    stdout: R,
    fixed_socks_addr: Option<SocketAddr>,
    status: watch::Sender<BootstrapStatus>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();
    let mut socks_addr = fixed_socks_addr;
    let mut last_error: Option<String> = None;

    while let Ok(Some(line)) = lines.next_line().await {
        match parse_tor_line(&line) {
            Some(TorEvent::SocksListener(addr)) => {
                debug!("Tor SOCKS listener on {}", addr);
                socks_addr = Some(addr);
            }
            Some(TorEvent::Bootstrapped {
                percent, summary, ..
            }) => {
                info!("Tor bootstrapped {}%: {}", percent, summary);
                let next = match (percent, socks_addr) {
                    (100, Some(socks_addr)) => BootstrapStatus::Ready { socks_addr },
                    (100, None) => BootstrapStatus::Failed(
                        "bootstrap finished but no SOCKS listener was reported".to_string(),
                    ),
                    _ => BootstrapStatus::Progress { percent, summary },
                };
                status.send_replace(next);
            }
            Some(TorEvent::Warning(message)) => warn!("Tor: {}", message),
            Some(TorEvent::Error(message)) => {
                error!("Tor: {}", message);
                last_error = Some(message);
            }
            None => debug!("Tor: {}", line),
        }
    }

    // stdout closed: tor has exited (or is exiting)
    status.send_if_modified(|current| {
        if current.is_terminal() {
            return false;
        }
        let reason = last_error
            .take()
            .unwrap_or_else(|| "tor exited before bootstrap completed".to_string());
        *current = BootstrapStatus::Failed(reason);
        true
    });
}

#[async_trait]
impl AnonymityBackend for CTorBackend {
    fn name(&self) -> &str {
        "tor"
    }

    async fn launch(&mut self, torrc: &Path) -> Result<watch::Receiver<BootstrapStatus>> {
        if self.process.is_some() {
            return Err(BootstrapError::Startup("tor is already running".to_string()));
        }

        debug!(
            "Spawning {} -f {} --SocksPort {}",
            self.tor_binary.display(),
            torrc.display(),
            self.socks_port_arg
        );

        let mut child = Command::new(&self.tor_binary)
            .arg("-f")
            .arg(torrc)
            .arg("--SocksPort")
            .arg(&self.socks_port_arg)
            .arg("--Log")
            .arg("notice stdout")
            .arg("--__OwningControllerProcess")
            .arg(std::process::id().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BootstrapError::Startup(format!(
                    "failed to spawn {}: {}",
                    self.tor_binary.display(),
                    e
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BootstrapError::Startup("tor stdout not captured".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("Tor stderr: {}", line);
                }
            });
        }

        let (tx, rx) = watch::channel(BootstrapStatus::Starting);
        self.monitor = Some(tokio::spawn(monitor_log(
            stdout,
            self.fixed_socks_addr,
            tx,
        )));
        self.process = Some(child);

        info!("Tor started");
        Ok(rx)
    }

    async fn terminate(&mut self) -> Result<()> {
        if let Some(mut process) = self.process.take() {
            info!("Shutting down Tor process...");
            if let Err(e) = process.start_kill() {
                // Already exited
                debug!("Tor kill: {}", e);
            }
            match process.wait().await {
                Ok(status) => debug!("Tor exited with {}", status),
                Err(e) => warn!("Failed to reap tor: {}", e),
            }
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        Ok(())
    }
}

impl Drop for CTorBackend {
    fn drop(&mut self) {
        if let Some(ref mut process) = self.process {
            let _ = process.start_kill();
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(
        "Oct 19 12:00:01.000 [notice] Opened Socks listener connection (ready) on 127.0.0.1:41237",
        TorEvent::SocksListener("127.0.0.1:41237".parse().unwrap())
    )]
    #[case(
        "Oct 19 12:00:01.000 [notice] Opened Socks listener on 127.0.0.1:9050",
        TorEvent::SocksListener("127.0.0.1:9050".parse().unwrap())
    )]
    #[case(
        "Oct 19 12:00:05.000 [notice] Bootstrapped 25% (loading_status): Loading networkstatus consensus",
        TorEvent::Bootstrapped {
            percent: 25,
            tag: Some("loading_status".into()),
            summary: "Loading networkstatus consensus".into(),
        }
    )]
    #[case(
        "Oct 19 12:01:00.000 [notice] Bootstrapped 100%: Done",
        TorEvent::Bootstrapped { percent: 100, tag: None, summary: "Done".into() }
    )]
    #[case(
        "Oct 19 12:00:02.000 [err] Reading config failed--see warnings above.",
        TorEvent::Error("Reading config failed--see warnings above.".into())
    )]
    #[case(
        "Oct 19 12:00:02.000 [warn] Managed proxy \"./snowflake-client\" having spawn-time issues?",
        TorEvent::Warning("Managed proxy \"./snowflake-client\" having spawn-time issues?".into())
    )]
    fn test_parse_tor_line(#[case] line: &str, #[case] expected: TorEvent) {
        assert_eq!(parse_tor_line(line), Some(expected));
    }

    #[test]
    fn test_parse_ignores_other_notices() {
        assert_eq!(
            parse_tor_line("Oct 19 12:00:00.000 [notice] Tor 0.4.8.12 running on Linux."),
            None
        );
    }

    #[tokio::test]
    async fn test_monitor_reports_ready() {
        let log = b"[notice] Opened Socks listener connection (ready) on 127.0.0.1:41237\n\
[notice] Bootstrapped 50% (loading_descriptors): Loading relay descriptors\n\
[notice] Bootstrapped 100% (done): Done\n";
        let (tx, rx) = watch::channel(BootstrapStatus::Starting);
        monitor_log(&log[..], None, tx).await;
        assert_eq!(
            *rx.borrow(),
            BootstrapStatus::Ready {
                socks_addr: "127.0.0.1:41237".parse().unwrap()
            }
        );
    }

    #[tokio::test]
    async fn test_monitor_reports_exit_before_ready() {
        let log = b"[notice] Bootstrapped 5% (conn): Connecting to a relay\n\
[err] Could not bind to 127.0.0.1:9050: Address already in use\n";
        let (tx, rx) = watch::channel(BootstrapStatus::Starting);
        monitor_log(&log[..], None, tx).await;
        assert_eq!(
            *rx.borrow(),
            BootstrapStatus::Failed(
                "Could not bind to 127.0.0.1:9050: Address already in use".into()
            )
        );
    }

    #[tokio::test]
    async fn test_monitor_uses_fixed_port() {
        let log = b"[notice] Bootstrapped 100% (done): Done\n";
        let fixed: SocketAddr = "127.0.0.1:9150".parse().unwrap();
        let (tx, rx) = watch::channel(BootstrapStatus::Starting);
        monitor_log(&log[..], Some(fixed), tx).await;
        assert_eq!(*rx.borrow(), BootstrapStatus::Ready { socks_addr: fixed });
    }

    #[test]
    fn test_missing_binary_is_startup_error() {
        let config = TorConfig {
            tor_binary: Some(PathBuf::from("/nonexistent/tor")),
            ..Default::default()
        };
        if CTorBackend::is_available(&config) {
            // tor installed on PATH; fallback succeeds
            return;
        }
        assert!(matches!(
            CTorBackend::new(&config),
            Err(BootstrapError::Startup(_))
        ));
    }
}
