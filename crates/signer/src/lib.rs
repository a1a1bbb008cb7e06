//! Agent key handling for ocspwatch.
//!
//! This crate provides:
//! - Ed25519 and ECDSA P-256 agent keys (the accepted whitelist)
//! - Deterministic key ids derived from SPKI bytes
//! - Compact JWS envelopes for registrations and submissions

pub mod envelope;
pub mod error;
pub mod key;

pub use envelope::{JwsHeader, UnverifiedEnvelope, sign_compact};
pub use error::{SignerError, SignerResult};
pub use key::{AgentKeyPair, AgentPublicKey, KEY_ID_NAMESPACE, KeyAlgorithm, key_id};
