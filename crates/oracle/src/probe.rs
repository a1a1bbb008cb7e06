//! Turns manifest entries into measurements using a [`NetworkProbe`].

use crate::traits::{NetworkProbe, OcspCheck};
use futures::future::join_all;
use ocspwatch_core::{ManifestEntry, Measurement};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Runs the reachability and OCSP checks for each manifest entry.
///
/// Each probe call is bounded by `timeout`; a timed-out call counts as a
/// failed check.
pub struct ProbeRunner {
    probe: Arc<dyn NetworkProbe>,
    timeout: Duration,
}

impl ProbeRunner {
    pub fn new(probe: Arc<dyn NetworkProbe>, timeout: Duration) -> Self {
        Self { probe, timeout }
    }

    /// Measure every entry concurrently. Entries that cannot be decoded are dropped.
    pub async fn run(&self, entries: &[ManifestEntry]) -> Vec<Measurement> {
        join_all(entries.iter().map(|entry| self.measure(entry)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    pub async fn measure(&self, entry: &ManifestEntry) -> Option<Measurement> {
        let (subject, issuer) = match (entry.subject_der(), entry.issuer_der()) {
            (Ok(subject), Ok(issuer)) => (subject, issuer),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(
                    content_id = %entry.content_id,
                    error = %e,
                    "Skipping manifest entry with undecodable certificates"
                );
                return None;
            }
        };

        let ping = match host_of(&entry.responder_url) {
            Some(host) => tokio::time::timeout(self.timeout, self.probe.reachable(&host))
                .await
                .unwrap_or(false),
            None => false,
        };

        let check = tokio::time::timeout(
            self.timeout,
            self.probe
                .ocsp_check(&subject, &issuer, &entry.responder_url),
        )
        .await
        .unwrap_or(OcspCheck::Success { good: false });

        tracing::debug!(
            content_id = %entry.content_id,
            responder_url = %entry.responder_url,
            ping,
            check = ?check,
            "Probed responder"
        );

        Some(Measurement::new(
            entry.content_id,
            OffsetDateTime::now_utc(),
            ping,
            check.is_good(),
        ))
    }
}

/// Host component of a responder URL.
fn host_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
}
