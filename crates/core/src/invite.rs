//! Invite tokens used to onboard probe agents.
//!
//! A token is `selector || validator`. The selector is stored in clear and
//! indexes the invited location; only an Argon2id hash of the validator is
//! persisted, so a leaked database cannot be replayed into a registration.

use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand_core::{OsRng, RngCore};
use std::fmt;

/// Selector length in bytes.
pub const SELECTOR_LEN: usize = 16;

/// Validator length in bytes.
pub const VALIDATOR_LEN: usize = 16;

/// Full token length in bytes.
pub const TOKEN_LEN: usize = SELECTOR_LEN + VALIDATOR_LEN;

/// A raw invite token.
#[derive(Clone, PartialEq, Eq)]
pub struct InviteToken {
    selector: [u8; SELECTOR_LEN],
    validator: [u8; VALIDATOR_LEN],
}

impl InviteToken {
    /// Generate a fresh token from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut selector = [0u8; SELECTOR_LEN];
        let mut validator = [0u8; VALIDATOR_LEN];
        OsRng.fill_bytes(&mut selector);
        OsRng.fill_bytes(&mut validator);
        Self {
            selector,
            validator,
        }
    }

    pub fn from_parts(selector: [u8; SELECTOR_LEN], validator: [u8; VALIDATOR_LEN]) -> Self {
        Self {
            selector,
            validator,
        }
    }

    /// Split a raw token. Anything other than exactly 32 bytes is rejected.
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() != TOKEN_LEN {
            return Err(crate::Error::InvalidInviteToken(format!(
                "expected {TOKEN_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut selector = [0u8; SELECTOR_LEN];
        let mut validator = [0u8; VALIDATOR_LEN];
        selector.copy_from_slice(&bytes[..SELECTOR_LEN]);
        validator.copy_from_slice(&bytes[SELECTOR_LEN..]);
        Ok(Self {
            selector,
            validator,
        })
    }

    /// Parse the transport form (base64url, padding optional).
    pub fn from_base64(s: &str) -> crate::Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s.trim().trim_end_matches('='))
            .map_err(|e| crate::Error::InvalidInviteToken(format!("invalid base64: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Encode for transport.
    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_bytes())
    }

    pub fn to_bytes(&self) -> [u8; TOKEN_LEN] {
        let mut out = [0u8; TOKEN_LEN];
        out[..SELECTOR_LEN].copy_from_slice(&self.selector);
        out[SELECTOR_LEN..].copy_from_slice(&self.validator);
        out
    }

    pub fn selector(&self) -> &[u8; SELECTOR_LEN] {
        &self.selector
    }

    pub fn validator(&self) -> &[u8; VALIDATOR_LEN] {
        &self.validator
    }

    /// Produce the salted Argon2id PHC string stored for this token's validator.
    pub fn hash_validator(&self) -> crate::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(&self.validator, &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| crate::Error::PasswordHash(e.to_string()))
    }

    /// Check this token's validator against a stored PHC string.
    ///
    /// Malformed stored hashes verify as false.
    pub fn verify_validator(&self, stored_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(&self.validator, &parsed)
            .is_ok()
    }
}

impl fmt::Debug for InviteToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let selector: String = self.selector.iter().map(|b| format!("{b:02x}")).collect();
        write!(f, "InviteToken(selector={selector}, validator=[REDACTED])")
    }
}
