//! Database models mapping to the entity schema.

use ocspwatch_core::ContentId;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Authorities and responders
// =============================================================================

/// A certificate authority ranked by observed certificate volume.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct AuthorityRow {
    pub authority_id: Uuid,
    pub name: String,
    pub cardinality: i64,
    pub last_updated: OffsetDateTime,
}

/// An OCSP endpoint of an authority. Unique on `(authority_id, url)`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ResponderRow {
    pub responder_id: Uuid,
    pub authority_id: Uuid,
    pub url: String,
    pub cardinality: i64,
    pub last_updated: OffsetDateTime,
}

// =============================================================================
// Chains
// =============================================================================

/// A cached (subject, issuer) certificate pair. Never mutated once inserted.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ChainRow {
    pub chain_id: Uuid,
    pub responder_id: Uuid,
    /// Subject certificate DER.
    pub subject_certificate: Vec<u8>,
    /// Issuer certificate DER.
    pub issuer_certificate: Vec<u8>,
    /// Lowercase hex SHA-256 of subject || issuer.
    pub content_id: String,
    pub retrieved_at: OffsetDateTime,
}

impl ChainRow {
    /// Build a new chain row for a certificate pair.
    pub fn new(
        responder_id: Uuid,
        subject_certificate: Vec<u8>,
        issuer_certificate: Vec<u8>,
        retrieved_at: OffsetDateTime,
    ) -> Self {
        let content_id = ContentId::compute(&subject_certificate, &issuer_certificate);
        Self {
            chain_id: Uuid::new_v4(),
            responder_id,
            subject_certificate,
            issuer_certificate,
            content_id: content_id.to_hex(),
            retrieved_at,
        }
    }
}

// =============================================================================
// Locations (probe agents)
// =============================================================================

/// A probe agent, either invited (no key yet) or registered.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct LocationRow {
    pub location_id: Uuid,
    pub name: String,
    /// Invite selector, stored in clear for lookup.
    pub selector: Vec<u8>,
    /// Argon2id PHC string of the invite validator.
    pub validator_hash: String,
    /// Canonical SPKI PEM, set once at registration.
    pub public_key: Option<String>,
    pub key_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub registered_at: Option<OffsetDateTime>,
}

impl LocationRow {
    pub fn is_registered(&self) -> bool {
        self.public_key.is_some()
    }
}

// =============================================================================
// Results
// =============================================================================

/// One measurement reported by a location against a chain. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ResultRow {
    pub result_id: Uuid,
    pub chain_id: Uuid,
    pub location_id: Uuid,
    /// When the agent took the measurement.
    pub retrieved_at: OffsetDateTime,
    pub ping: bool,
    pub ocsp: bool,
    pub created_at: OffsetDateTime,
}

/// Most recent result per (responder, location), joined with display names.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct LatestResultRow {
    pub authority_id: Uuid,
    pub authority_name: String,
    pub responder_id: Uuid,
    pub responder_url: String,
    pub location_id: Uuid,
    pub location_name: String,
    pub retrieved_at: OffsetDateTime,
    pub ping: bool,
    pub ocsp: bool,
}
