//! Test fixtures: certificates, a scripted oracle and agent helpers.

use async_trait::async_trait;
use ocspwatch_core::{Measurement, RegistrationClaims, SubmissionClaims};
use ocspwatch_metadata::MetadataStore;
use ocspwatch_metadata::models::ChainRow;
use ocspwatch_metadata::repos::{AuthorityRepo, ChainRepo, ResponderRepo};
use ocspwatch_oracle::{
    CertPair, CertPairLookup, CertificateOracle, OracleError, OracleResult, RankedEntry,
};
use ocspwatch_signer::{AgentKeyPair, KeyAlgorithm, sign_compact};
use rcgen::{CertificateParams, KeyPair, date_time_ymd};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;

/// Self-signed DER certificate with the given validity window.
pub fn cert_with_validity(not_before: OffsetDateTime, not_after: OffsetDateTime) -> Vec<u8> {
    let mut params = CertificateParams::new(vec!["ocsp.example.test".to_string()]).unwrap();
    params.not_before = not_before;
    params.not_after = not_after;
    let key = KeyPair::generate().unwrap();
    params.self_signed(&key).unwrap().der().to_vec()
}

/// A certificate that expired long ago.
#[allow(dead_code)]
pub fn expired_cert() -> Vec<u8> {
    cert_with_validity(date_time_ymd(2015, 1, 1), date_time_ymd(2016, 1, 1))
}

/// A certificate valid for decades.
#[allow(dead_code)]
pub fn valid_cert() -> Vec<u8> {
    cert_with_validity(date_time_ymd(2020, 1, 1), date_time_ymd(2090, 1, 1))
}

/// Store an authority, one of its responders and a chain for that responder.
#[allow(dead_code)]
pub async fn seed_chain(
    metadata: &dyn MetadataStore,
    authority: (&str, i64),
    responder: (&str, i64),
    subject: &[u8],
    issuer: &[u8],
) -> ChainRow {
    let now = OffsetDateTime::now_utc();
    let authority = metadata
        .upsert_authority(authority.0, authority.1, now)
        .await
        .unwrap();
    let responder = metadata
        .upsert_responder(authority.authority_id, responder.0, responder.1, now)
        .await
        .unwrap();
    let chain = ChainRow::new(
        responder.responder_id,
        subject.to_vec(),
        issuer.to_vec(),
        now,
    );
    metadata.insert_chain(&chain).await.unwrap();
    chain
}

/// In-memory oracle answering from scripted tables.
#[derive(Default)]
pub struct MockOracle {
    authorities: Mutex<Vec<RankedEntry>>,
    urls: Mutex<HashMap<String, Vec<RankedEntry>>>,
    pairs: Mutex<HashMap<String, CertPairLookup>>,
    unavailable: AtomicBool,
    delay: Mutex<Option<Duration>>,
    pub top_calls: AtomicUsize,
    pub url_calls: AtomicUsize,
    pub pair_calls: AtomicUsize,
}

#[allow(dead_code)]
impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_authorities(&self, entries: &[(&str, u64)]) {
        *self.authorities.lock().unwrap() = entries
            .iter()
            .map(|(name, count)| RankedEntry::new(*name, *count))
            .collect();
    }

    pub fn set_urls(&self, authority: &str, entries: &[(&str, u64)]) {
        self.urls.lock().unwrap().insert(
            authority.to_string(),
            entries
                .iter()
                .map(|(url, count)| RankedEntry::new(*url, *count))
                .collect(),
        );
    }

    /// Answer `example_cert_pair` for `url` with this pair.
    pub fn set_pair(&self, url: &str, subject: &[u8], issuer: &[u8]) {
        self.set_lookup(
            url,
            CertPairLookup::Found(CertPair {
                subject: subject.to_vec(),
                issuer: issuer.to_vec(),
            }),
        );
    }

    pub fn set_lookup(&self, url: &str, lookup: CertPairLookup) {
        self.pairs.lock().unwrap().insert(url.to_string(), lookup);
    }

    /// Make every call fail as if the upstream timed out.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    async fn gate(&self) -> OracleResult<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(OracleError::Timeout(Duration::from_secs(30)));
        }
        Ok(())
    }
}

#[async_trait]
impl CertificateOracle for MockOracle {
    async fn top_authorities(&self, n: u32) -> OracleResult<Vec<RankedEntry>> {
        self.top_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        let mut entries = self.authorities.lock().unwrap().clone();
        entries.truncate(n as usize);
        Ok(entries)
    }

    async fn ocsp_urls(&self, authority: &str) -> OracleResult<Vec<RankedEntry>> {
        self.url_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        Ok(self
            .urls
            .lock()
            .unwrap()
            .get(authority)
            .cloned()
            .unwrap_or_default())
    }

    async fn example_cert_pair(&self, _authority: &str, url: &str) -> OracleResult<CertPairLookup> {
        self.pair_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        Ok(self
            .pairs
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(CertPairLookup::NoCertificate))
    }
}

/// A probe agent's signing key with envelope helpers.
pub struct TestAgent {
    pub key: AgentKeyPair,
}

#[allow(dead_code)]
impl TestAgent {
    pub fn new(algorithm: KeyAlgorithm) -> Self {
        Self {
            key: AgentKeyPair::generate(algorithm),
        }
    }

    pub fn ed25519() -> Self {
        Self::new(KeyAlgorithm::Ed25519)
    }

    pub fn public_pem(&self) -> String {
        self.key.public_key().to_pem().unwrap()
    }

    pub fn key_id(&self) -> uuid::Uuid {
        self.key.public_key().key_id().unwrap()
    }

    /// Self-signed registration envelope for an invite token.
    pub fn registration(&self, invite_token: &str) -> String {
        let claims = RegistrationClaims {
            public_key: self.public_pem(),
            invite_token: invite_token.to_string(),
        };
        sign_compact(&self.key, None, &claims).unwrap()
    }

    /// Submission envelope signed with this agent's key.
    pub fn submission(&self, measurements: Vec<Measurement>) -> String {
        let claims = SubmissionClaims::new(measurements);
        sign_compact(&self.key, Some(&self.key_id().to_string()), &claims).unwrap()
    }
}
