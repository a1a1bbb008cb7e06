//! Core domain types and shared logic for the ocspwatch coordinator.
//!
//! This crate defines the pieces every other crate agrees on:
//! - Freshness policy for authorities, responders and cached chains
//! - Content identifiers for certificate chains
//! - Invite tokens for probe-agent onboarding
//! - Wire formats for manifests, registrations and submissions
//! - Responder status derived from measurements
//! - Configuration types

pub mod config;
pub mod error;
pub mod freshness;
pub mod hash;
pub mod invite;
pub mod protocol;
pub mod status;

pub use error::{Error, Result};
pub use freshness::{ChainDecision, FreshnessPolicy, is_expired, is_stale, responder_is_current};
pub use hash::ContentId;
pub use invite::{InviteToken, SELECTOR_LEN, TOKEN_LEN, VALIDATOR_LEN};
pub use protocol::{
    ManifestEntry, Measurement, RegistrationClaims, SubmissionClaims, SubmissionReceipt,
};
pub use status::ResponderStatus;

/// Default number of top authorities covered by a manifest or refresh.
pub const DEFAULT_TOP_N: u32 = 10;

/// Default staleness threshold in days.
pub const DEFAULT_STALE_AFTER_DAYS: u32 = 7;
