//! Wire formats exchanged with probe agents.

use crate::hash::ContentId;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One line of the work manifest.
///
/// Fields are declared in lexicographic order so the serialized JSON has
/// sorted keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub content_id: ContentId,
    /// Issuer certificate, DER in standard base64.
    pub issuer_certificate: String,
    pub responder_url: String,
    /// Subject certificate, DER in standard base64.
    pub subject_certificate: String,
}

impl ManifestEntry {
    pub fn new(content_id: ContentId, responder_url: &str, subject: &[u8], issuer: &[u8]) -> Self {
        Self {
            content_id,
            issuer_certificate: STANDARD.encode(issuer),
            responder_url: responder_url.to_string(),
            subject_certificate: STANDARD.encode(subject),
        }
    }

    pub fn subject_der(&self) -> crate::Result<Vec<u8>> {
        STANDARD
            .decode(&self.subject_certificate)
            .map_err(|e| crate::Error::Serialization(format!("subject certificate: {e}")))
    }

    pub fn issuer_der(&self) -> crate::Result<Vec<u8>> {
        STANDARD
            .decode(&self.issuer_certificate)
            .map_err(|e| crate::Error::Serialization(format!("issuer certificate: {e}")))
    }
}

/// Render manifest entries as newline-delimited JSON.
pub fn encode_manifest(entries: &[ManifestEntry]) -> crate::Result<String> {
    let mut out = String::new();
    for entry in entries {
        let line =
            serde_json::to_string(entry).map_err(|e| crate::Error::Serialization(e.to_string()))?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

/// Parse newline-delimited JSON manifest entries, ignoring blank lines.
pub fn parse_manifest(body: &str) -> crate::Result<Vec<ManifestEntry>> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| crate::Error::Serialization(e.to_string()))
        })
        .collect()
}

/// Claims of the self-signed registration envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationClaims {
    /// Agent public key as SPKI PEM.
    pub public_key: String,
    /// Invite token in its base64url transport form.
    pub invite_token: String,
}

/// A single probe measurement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    /// Hex content id of the probed chain. Kept as text so one bad entry
    /// does not invalidate the whole batch.
    pub content_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    pub ping: bool,
    pub ocsp: bool,
}

impl Measurement {
    pub fn new(content_id: ContentId, time: OffsetDateTime, ping: bool, ocsp: bool) -> Self {
        Self {
            content_id: content_id.to_hex(),
            // Second precision on the wire.
            time: time.replace_nanosecond(0).unwrap_or(time),
            ping,
            ocsp,
        }
    }

    pub fn parsed_content_id(&self) -> crate::Result<ContentId> {
        ContentId::from_hex(&self.content_id)
    }
}

/// Claims of a signed result submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionClaims {
    /// Unix seconds at which the agent signed the batch.
    pub issued_at: i64,
    pub measurements: Vec<Measurement>,
}

impl SubmissionClaims {
    pub fn new(measurements: Vec<Measurement>) -> Self {
        Self {
            issued_at: OffsetDateTime::now_utc().unix_timestamp(),
            measurements,
        }
    }
}

/// Per-batch ingestion outcome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub accepted: usize,
    pub skipped: usize,
}
