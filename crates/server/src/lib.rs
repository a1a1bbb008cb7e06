//! HTTP coordinator for OCSP responder-health measurement.
//!
//! This crate provides:
//! - The chain cache and the refresh cycle
//! - Invite issuance and agent registration
//! - Manifest construction and signed result ingestion
//! - The responder status view
//! - Admin and agent HTTP endpoints

pub mod auth;
pub mod chain_cache;
pub mod error;
pub mod handlers;
pub mod manifest;
pub mod metrics;
pub mod refresh;
pub mod registration;
pub mod routes;
pub mod state;
pub mod status;
pub mod submission;

pub use auth::TraceId;
pub use chain_cache::{ChainCache, ChainCacheError, ChainFetch};
pub use error::ApiError;
pub use refresh::{RefreshReport, Refresher};
pub use routes::create_router;
pub use state::AppState;
