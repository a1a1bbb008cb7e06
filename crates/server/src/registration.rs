//! Invite issuance and one-shot agent registration.
//!
//! Every rejection carries a precise reason for logs and tests. The HTTP
//! layer collapses all of them into one indistinguishable response.

use crate::metrics;
use ocspwatch_core::{InviteToken, RegistrationClaims};
use ocspwatch_metadata::models::LocationRow;
use ocspwatch_metadata::{MetadataError, MetadataStore};
use ocspwatch_signer::{AgentPublicKey, SignerError, UnverifiedEnvelope};
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum length of a location name.
pub const MAX_LOCATION_NAME_LEN: usize = 128;

/// Registration failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("malformed registration: {0}")]
    Malformed(String),

    #[error("no invite matches the selector")]
    UnknownInvite,

    #[error("invite has already been used")]
    AlreadyRegistered,

    #[error("invite validator does not match")]
    ValidatorMismatch,

    #[error("registration envelope signature is invalid")]
    BadSignature,

    #[error("public key is already bound to another location")]
    KeyInUse,

    #[error(transparent)]
    Store(#[from] MetadataError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistrationError {
    /// Short label for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::UnknownInvite => "unknown_invite",
            Self::AlreadyRegistered => "already_registered",
            Self::ValidatorMismatch => "validator_mismatch",
            Self::BadSignature => "bad_signature",
            Self::KeyInUse => "key_in_use",
            Self::Store(_) | Self::Internal(_) => "error",
        }
    }
}

/// A freshly issued invite. The token is only ever available here.
#[derive(Debug)]
pub struct Invite {
    pub location_id: Uuid,
    pub name: String,
    pub token: InviteToken,
}

/// Issue an invite for a new location named `name`.
pub async fn create_invite(
    metadata: &dyn MetadataStore,
    name: &str,
) -> Result<Invite, RegistrationError> {
    let name = name.trim();
    if name.is_empty() || name.len() > MAX_LOCATION_NAME_LEN {
        return Err(RegistrationError::Malformed(format!(
            "location name must be 1 to {MAX_LOCATION_NAME_LEN} bytes"
        )));
    }

    let token = InviteToken::generate();
    let validator_hash = hash_validator(token.clone()).await?;

    let location = LocationRow {
        location_id: Uuid::new_v4(),
        name: name.to_string(),
        selector: token.selector().to_vec(),
        validator_hash,
        public_key: None,
        key_id: None,
        created_at: OffsetDateTime::now_utc(),
        registered_at: None,
    };
    metadata.create_location(&location).await?;

    tracing::info!(
        location_id = %location.location_id,
        name = %location.name,
        "Invite created"
    );
    Ok(Invite {
        location_id: location.location_id,
        name: location.name,
        token,
    })
}

/// Bind `public_key` to the invited location identified by `token`.
///
/// `token` is the raw `selector || validator`; any length other than 32
/// bytes is rejected before the store is consulted. The bind itself is a
/// single guarded update, so concurrent attempts on one invite admit at
/// most one winner.
pub async fn process_registration(
    metadata: &dyn MetadataStore,
    token: &[u8],
    public_key: &AgentPublicKey,
    now: OffsetDateTime,
) -> Result<LocationRow, RegistrationError> {
    let token = InviteToken::from_bytes(token)
        .map_err(|e| RegistrationError::Malformed(e.to_string()))?;

    let location = metadata
        .get_location_by_selector(token.selector())
        .await?
        .ok_or(RegistrationError::UnknownInvite)?;

    if location.is_registered() {
        return Err(RegistrationError::AlreadyRegistered);
    }

    if !verify_validator(token, location.validator_hash.clone()).await? {
        return Err(RegistrationError::ValidatorMismatch);
    }

    let key_id = public_key
        .key_id()
        .map_err(|e| RegistrationError::Malformed(e.to_string()))?;
    let pem = public_key
        .to_pem()
        .map_err(|e| RegistrationError::Malformed(e.to_string()))?;

    let bound = match metadata
        .register_location(location.location_id, &pem, key_id, now)
        .await
    {
        Ok(bound) => bound,
        Err(MetadataError::Constraint(_)) => return Err(RegistrationError::KeyInUse),
        Err(e) => return Err(e.into()),
    };
    if !bound {
        return Err(RegistrationError::AlreadyRegistered);
    }

    let registered = metadata
        .get_location(location.location_id)
        .await?
        .ok_or_else(|| {
            RegistrationError::Internal(format!(
                "location {} vanished after registration",
                location.location_id
            ))
        })?;

    tracing::info!(
        location_id = %registered.location_id,
        key_id = %key_id,
        algorithm = %public_key.algorithm(),
        "Location registered"
    );
    Ok(registered)
}

/// Handle a registration envelope: a compact JWS self-signed by the key it
/// registers, with claims `{public_key, invite_token}`.
pub async fn register_envelope(
    metadata: &dyn MetadataStore,
    compact: &str,
    now: OffsetDateTime,
) -> Result<LocationRow, RegistrationError> {
    let result = register_envelope_inner(metadata, compact, now).await;
    match &result {
        Ok(_) => metrics::record_registration("registered"),
        Err(e) => metrics::record_registration(e.outcome()),
    }
    result
}

async fn register_envelope_inner(
    metadata: &dyn MetadataStore,
    compact: &str,
    now: OffsetDateTime,
) -> Result<LocationRow, RegistrationError> {
    let envelope = UnverifiedEnvelope::parse(compact)
        .map_err(|e| RegistrationError::Malformed(e.to_string()))?;
    let unverified: RegistrationClaims = envelope
        .unverified_claims()
        .map_err(|e| RegistrationError::Malformed(e.to_string()))?;

    let public_key = AgentPublicKey::from_pem(&unverified.public_key)
        .map_err(|e| RegistrationError::Malformed(e.to_string()))?;

    let claims: RegistrationClaims = envelope.verify(&public_key).map_err(|e| match e {
        SignerError::MalformedEnvelope(msg) => RegistrationError::Malformed(msg),
        _ => RegistrationError::BadSignature,
    })?;

    let token = decode_token(&claims.invite_token)?;
    process_registration(metadata, &token, &public_key, now).await
}

/// Decode the base64url transport form without checking the length, so the
/// length rule is enforced in one place.
fn decode_token(encoded: &str) -> Result<Vec<u8>, RegistrationError> {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    URL_SAFE_NO_PAD
        .decode(encoded.trim().trim_end_matches('='))
        .map_err(|e| RegistrationError::Malformed(format!("invite token: {e}")))
}

async fn hash_validator(token: InviteToken) -> Result<String, RegistrationError> {
    tokio::task::spawn_blocking(move || token.hash_validator())
        .await
        .map_err(|e| RegistrationError::Internal(format!("hash task failed: {e}")))?
        .map_err(|e| RegistrationError::Internal(e.to_string()))
}

async fn verify_validator(token: InviteToken, stored: String) -> Result<bool, RegistrationError> {
    tokio::task::spawn_blocking(move || token.verify_validator(&stored))
        .await
        .map_err(|e| RegistrationError::Internal(format!("verify task failed: {e}")))
}
