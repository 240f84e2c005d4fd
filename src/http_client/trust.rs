//! TLS trust configuration for routed clients.

use std::fmt;

use reqwest::Certificate;
use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;

use crate::error::{BootstrapError, Result};

/// A parsed and validated set of pinned trust anchors.
#[derive(Clone)]
pub struct PinnedRoots {
    certificates: Vec<Certificate>,
}

impl PinnedRoots {
    /// Parse a PEM bundle. Every certificate must be usable as a trust anchor.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let ders: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &pem[..])
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| BootstrapError::CertParse(e.to_string()))?;

        if ders.is_empty() {
            return Err(BootstrapError::CertParse(
                "no PEM certificates found".to_string(),
            ));
        }

        let mut store = RootCertStore::empty();
        let mut certificates = Vec::with_capacity(ders.len());
        for (index, der) in ders.into_iter().enumerate() {
            let cert = Certificate::from_der(der.as_ref()).map_err(|e| {
                BootstrapError::CertParse(format!("certificate {}: {}", index + 1, e))
            })?;
            store.add(der).map_err(|e| {
                BootstrapError::CertParse(format!("certificate {}: {}", index + 1, e))
            })?;
            certificates.push(cert);
        }

        Ok(Self { certificates })
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

impl fmt::Debug for PinnedRoots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedRoots")
            .field("certificates", &self.certificates.len())
            .finish()
    }
}

/// Which trust anchors a client accepts.
#[derive(Debug, Clone, Default)]
pub enum TrustMode {
    /// Bundled web PKI roots.
    #[default]
    SystemDefault,
    /// Only chains to these anchors; built-in roots are disabled.
    Pinned(PinnedRoots),
}

impl TrustMode {
    pub fn is_pinned(&self) -> bool {
        matches!(self, TrustMode::Pinned(_))
    }
}
