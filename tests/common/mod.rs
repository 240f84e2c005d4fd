//! Shared helpers for integration tests.
//!
//! - [`FakeBackend`] stands in for tor
//! - [`SocksRelay`] is a real SOCKS5 server that records CONNECT targets
//! - [`TlsServer`] serves a fixed body over HTTPS with the fixture certificates

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;

use snowstrap::privacy::{AnonymityBackend, BootstrapStatus};
use snowstrap::{BootstrapError, Result};

pub const CA_PEM: &[u8] = include_bytes!("../fixtures/ca.pem");
pub const OTHER_CA_PEM: &[u8] = include_bytes!("../fixtures/other_ca.pem");
pub const SERVER_PEM: &[u8] = include_bytes!("../fixtures/server.pem");
pub const SERVER_KEY: &[u8] = include_bytes!("../fixtures/server.key");

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// What a [`FakeBackend`] does once launched.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Report progress, then ready at this address.
    Ready(SocketAddr),
    /// Stay at "starting" forever.
    NeverReady,
    /// Report a bootstrap failure.
    BootstrapFails(String),
    /// Exit right after launch without reporting anything.
    ExitsImmediately,
    /// `launch` itself fails.
    LaunchFails,
}

/// Observations shared between a test and the backend it handed away.
#[derive(Debug, Default)]
pub struct Probe {
    pub launches: AtomicUsize,
    pub terminations: AtomicUsize,
    pub torrc_path: Mutex<Option<PathBuf>>,
    pub torrc_contents: Mutex<Option<String>>,
}

impl Probe {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    pub fn torrc_path(&self) -> Option<PathBuf> {
        self.torrc_path.lock().unwrap().clone()
    }

    pub fn torrc_contents(&self) -> Option<String> {
        self.torrc_contents.lock().unwrap().clone()
    }
}

pub struct FakeBackend {
    behavior: Behavior,
    probe: Arc<Probe>,
    status: Option<watch::Sender<BootstrapStatus>>,
}

impl FakeBackend {
    pub fn new(behavior: Behavior) -> (Box<dyn AnonymityBackend>, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        let backend = Self {
            behavior,
            probe: probe.clone(),
            status: None,
        };
        (Box::new(backend), probe)
    }
}

#[async_trait]
impl AnonymityBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn launch(&mut self, torrc: &Path) -> Result<watch::Receiver<BootstrapStatus>> {
        self.probe.launches.fetch_add(1, Ordering::SeqCst);
        *self.probe.torrc_path.lock().unwrap() = Some(torrc.to_path_buf());
        *self.probe.torrc_contents.lock().unwrap() = std::fs::read_to_string(torrc).ok();

        let (tx, rx) = watch::channel(BootstrapStatus::Starting);
        match &self.behavior {
            Behavior::LaunchFails => {
                return Err(BootstrapError::Startup("fake launch failure".into()))
            }
            Behavior::Ready(addr) => {
                let tx = tx.clone();
                let addr = *addr;
                tokio::spawn(async move {
                    tx.send_replace(BootstrapStatus::Progress {
                        percent: 50,
                        summary: "Loading relay descriptors".into(),
                    });
                    tokio::task::yield_now().await;
                    tx.send_replace(BootstrapStatus::Ready { socks_addr: addr });
                });
            }
            Behavior::NeverReady => {}
            Behavior::BootstrapFails(reason) => {
                tx.send_replace(BootstrapStatus::Failed(reason.clone()));
            }
            Behavior::ExitsImmediately => {
                drop(tx);
                return Ok(rx);
            }
        }
        self.status = Some(tx);
        Ok(rx)
    }

    async fn terminate(&mut self) -> Result<()> {
        self.probe.terminations.fetch_add(1, Ordering::SeqCst);
        self.status = None;
        Ok(())
    }
}

/// In-process SOCKS5 server (no auth, CONNECT only) that records targets.
pub struct SocksRelay {
    pub addr: SocketAddr,
    targets: Arc<Mutex<Vec<String>>>,
}

impl SocksRelay {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let targets = Arc::new(Mutex::new(Vec::new()));

        let recorded = targets.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let _ = relay(stream, recorded).await;
                });
            }
        });

        Self { addr, targets }
    }

    /// CONNECT targets seen so far, as `host:port`.
    pub fn targets(&self) -> Vec<String> {
        self.targets.lock().unwrap().clone()
    }
}

async fn relay(mut client: TcpStream, recorded: Arc<Mutex<Vec<String>>>) -> std::io::Result<()> {
    let mut head = [0u8; 2];
    client.read_exact(&mut head).await?;
    let mut methods = vec![0u8; head[1] as usize];
    client.read_exact(&mut methods).await?;
    client.write_all(&[0x05, 0x00]).await?;

    let mut request = [0u8; 4];
    client.read_exact(&mut request).await?;
    let host = match request[3] {
        0x01 => {
            let mut ip = [0u8; 4];
            client.read_exact(&mut ip).await?;
            std::net::Ipv4Addr::from(ip).to_string()
        }
        0x04 => {
            let mut ip = [0u8; 16];
            client.read_exact(&mut ip).await?;
            std::net::Ipv6Addr::from(ip).to_string()
        }
        _ => {
            let mut len = [0u8; 1];
            client.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            client.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
    };
    let mut port = [0u8; 2];
    client.read_exact(&mut port).await?;
    let port = u16::from_be_bytes(port);

    recorded.lock().unwrap().push(format!("{}:{}", host, port));

    let mut upstream = match TcpStream::connect((host.as_str(), port)).await {
        Ok(stream) => stream,
        Err(e) => {
            client
                .write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await?;
            return Err(e);
        }
    };
    client
        .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await?;
    tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    Ok(())
}

/// HTTPS server presenting the fixture certificate for `localhost`.
pub struct TlsServer {
    pub addr: SocketAddr,
}

impl TlsServer {
    pub async fn start(body: &'static str) -> Self {
        let certs = rustls_pemfile::certs(&mut &SERVER_PEM[..])
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        let key = rustls_pemfile::private_key(&mut &SERVER_KEY[..])
            .unwrap()
            .unwrap();

        let config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let Ok(mut tls) = acceptor.accept(stream).await else {
                        return;
                    };
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match tls.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = tls.write_all(response.as_bytes()).await;
                    let _ = tls.shutdown().await;
                });
            }
        });

        Self { addr }
    }

    /// URL on this server using the certificate's DNS name.
    pub fn url(&self, path: &str) -> String {
        format!("https://localhost:{}{}", self.addr.port(), path)
    }
}
