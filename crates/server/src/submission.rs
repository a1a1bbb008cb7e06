//! Verification and ingestion of signed result submissions.

use crate::metrics;
use futures::future::join_all;
use ocspwatch_core::{Measurement, SubmissionClaims, SubmissionReceipt};
use ocspwatch_metadata::models::{LocationRow, ResultRow};
use ocspwatch_metadata::{MetadataError, MetadataStore};
use ocspwatch_signer::{AgentPublicKey, SignerError, UnverifiedEnvelope};
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

/// Submission failures. Per-entry problems never appear here; they are
/// counted as skipped in the receipt.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("malformed submission: {0}")]
    Malformed(String),

    #[error("no location is registered under key id {0}")]
    UnknownKey(Uuid),

    #[error("submission signature is invalid")]
    BadSignature,

    #[error(transparent)]
    Store(#[from] MetadataError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A verified submission ready for ingestion.
#[derive(Debug)]
pub struct VerifiedSubmission {
    pub location: LocationRow,
    pub claims: SubmissionClaims,
}

/// Resolve the envelope's key id to a registered location and check the
/// signature with that location's key.
pub async fn verify_submission(
    metadata: &dyn MetadataStore,
    compact: &str,
) -> Result<VerifiedSubmission, SubmissionError> {
    let envelope =
        UnverifiedEnvelope::parse(compact).map_err(|e| SubmissionError::Malformed(e.to_string()))?;
    let kid = envelope
        .header()
        .kid
        .as_deref()
        .ok_or_else(|| SubmissionError::Malformed("missing kid header".to_string()))?;
    let key_id = Uuid::parse_str(kid)
        .map_err(|e| SubmissionError::Malformed(format!("invalid kid: {e}")))?;

    let location = metadata
        .get_location_by_key_id(key_id)
        .await?
        .ok_or(SubmissionError::UnknownKey(key_id))?;
    let pem = location.public_key.as_deref().ok_or_else(|| {
        SubmissionError::Internal(format!(
            "location {} has a key id but no public key",
            location.location_id
        ))
    })?;
    let public_key = AgentPublicKey::from_pem(pem)
        .map_err(|e| SubmissionError::Internal(format!("stored public key: {e}")))?;

    let claims: SubmissionClaims = envelope.verify(&public_key).map_err(|e| match e {
        SignerError::MalformedEnvelope(msg) => SubmissionError::Malformed(msg),
        _ => SubmissionError::BadSignature,
    })?;

    Ok(VerifiedSubmission { location, claims })
}

/// Store one result per measurement whose chain is known.
///
/// Entries are processed concurrently and each insert stands alone; a bad
/// or failed entry only increments `skipped`.
pub async fn ingest(
    metadata: &dyn MetadataStore,
    location_id: Uuid,
    measurements: &[Measurement],
    now: OffsetDateTime,
) -> SubmissionReceipt {
    let outcomes = join_all(
        measurements
            .iter()
            .map(|m| ingest_one(metadata, location_id, m, now)),
    )
    .await;

    let accepted = outcomes.iter().filter(|stored| **stored).count();
    let receipt = SubmissionReceipt {
        accepted,
        skipped: outcomes.len() - accepted,
    };
    metrics::RESULTS_INGESTED.inc_by(receipt.accepted as u64);
    metrics::RESULTS_SKIPPED.inc_by(receipt.skipped as u64);
    receipt
}

async fn ingest_one(
    metadata: &dyn MetadataStore,
    location_id: Uuid,
    measurement: &Measurement,
    now: OffsetDateTime,
) -> bool {
    let content_id = match measurement.parsed_content_id() {
        Ok(id) => id,
        Err(e) => {
            tracing::debug!(
                location_id = %location_id,
                error = %e,
                "Skipping measurement with malformed content id"
            );
            return false;
        }
    };

    let chain = match metadata.get_chain_by_content_id(&content_id.to_hex()).await {
        Ok(Some(chain)) => chain,
        Ok(None) => {
            tracing::debug!(
                location_id = %location_id,
                content_id = %content_id,
                "Skipping measurement for unknown chain"
            );
            return false;
        }
        Err(e) => {
            tracing::warn!(content_id = %content_id, error = %e, "Chain lookup failed");
            return false;
        }
    };

    let result = ResultRow {
        result_id: Uuid::new_v4(),
        chain_id: chain.chain_id,
        location_id,
        retrieved_at: measurement.time.to_offset(UtcOffset::UTC),
        ping: measurement.ping,
        ocsp: measurement.ocsp,
        created_at: now,
    };
    match metadata.insert_result(&result).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                location_id = %location_id,
                content_id = %content_id,
                error = %e,
                "Failed to store result"
            );
            false
        }
    }
}

/// Verify and ingest a submission envelope.
pub async fn submit(
    metadata: &dyn MetadataStore,
    compact: &str,
    now: OffsetDateTime,
) -> Result<SubmissionReceipt, SubmissionError> {
    let verified = match verify_submission(metadata, compact).await {
        Ok(verified) => verified,
        Err(e) => {
            metrics::SUBMISSIONS_REJECTED.inc();
            return Err(e);
        }
    };

    let receipt = ingest(
        metadata,
        verified.location.location_id,
        &verified.claims.measurements,
        now,
    )
    .await;
    tracing::info!(
        location_id = %verified.location.location_id,
        accepted = receipt.accepted,
        skipped = receipt.skipped,
        "Submission ingested"
    );
    Ok(receipt)
}
