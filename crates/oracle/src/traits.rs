//! Collaborator traits consumed by the coordinator.

use crate::error::OracleResult;
use async_trait::async_trait;
use std::fmt;

/// A name with the number of observed certificates carrying it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankedEntry {
    pub name: String,
    pub cardinality: u64,
}

impl RankedEntry {
    pub fn new(name: impl Into<String>, cardinality: u64) -> Self {
        Self {
            name: name.into(),
            cardinality,
        }
    }
}

/// A subject certificate and the certificate of its issuer, both DER.
#[derive(Clone, PartialEq, Eq)]
pub struct CertPair {
    pub subject: Vec<u8>,
    pub issuer: Vec<u8>,
}

impl fmt::Debug for CertPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertPair")
            .field("subject_len", &self.subject.len())
            .field("issuer_len", &self.issuer.len())
            .finish()
    }
}

/// Outcome of asking the oracle for an example certificate pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CertPairLookup {
    Found(CertPair),
    /// No certificate uses this responder.
    NoCertificate,
    /// A certificate exists but names no issuer URL.
    NoIssuerUrl,
    /// Every issuer URL failed to produce a certificate.
    IssuerDownloadFailed,
}

impl CertPairLookup {
    pub fn into_pair(self) -> Option<CertPair> {
        match self {
            Self::Found(pair) => Some(pair),
            _ => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Found(_) => "found",
            Self::NoCertificate => "no_certificate",
            Self::NoIssuerUrl => "no_issuer_url",
            Self::IssuerDownloadFailed => "issuer_download_failed",
        }
    }
}

/// Certificate-search oracle ranking authorities and OCSP URLs.
#[async_trait]
pub trait CertificateOracle: Send + Sync {
    /// The `n` authorities with the most valid certificates, descending.
    async fn top_authorities(&self, n: u32) -> OracleResult<Vec<RankedEntry>>;

    /// OCSP URLs used by an authority's certificates, descending by count.
    async fn ocsp_urls(&self, authority: &str) -> OracleResult<Vec<RankedEntry>>;

    /// An example (subject, issuer) pair for an authority and OCSP URL.
    async fn example_cert_pair(&self, authority: &str, url: &str)
    -> OracleResult<CertPairLookup>;
}

/// Outcome of one OCSP request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OcspCheck {
    /// The responder answered; `good` is whether the answer was valid.
    Success { good: bool },
    NoIssuerUrl,
    CertDownloadFailed,
}

impl OcspCheck {
    pub fn is_good(&self) -> bool {
        matches!(self, Self::Success { good: true })
    }
}

/// Raw network primitives, implemented outside the coordinator.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    /// Whether `host` answers a reachability probe.
    async fn reachable(&self, host: &str) -> bool;

    /// Send an OCSP request for `subject` (issued by `issuer`) to `url`.
    async fn ocsp_check(&self, subject: &[u8], issuer: &[u8], url: &str) -> OcspCheck;
}
