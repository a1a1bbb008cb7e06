//! External collaborators of the ocspwatch coordinator.
//!
//! This crate provides:
//! - The certificate-oracle and network-probe traits
//! - A rate-limited, timeout-bounded oracle wrapper
//! - The Censys search backend
//! - A probe runner turning manifests into measurements

pub mod backends;
pub mod error;
pub mod probe;
pub mod ratelimit;
pub mod traits;

pub use backends::censys::CensysOracle;
pub use error::{OracleError, OracleResult};
pub use probe::ProbeRunner;
pub use ratelimit::GuardedOracle;
pub use traits::{
    CertPair, CertPairLookup, CertificateOracle, NetworkProbe, OcspCheck, RankedEntry,
};

use ocspwatch_core::config::OracleConfig;
use std::sync::Arc;

/// Build the configured oracle, wrapped in its rate limiter and timeout.
pub fn from_config(config: &OracleConfig) -> OracleResult<Arc<dyn CertificateOracle>> {
    config.validate().map_err(OracleError::Config)?;
    let censys = CensysOracle::from_config(config)?;
    let guarded = GuardedOracle::from_config(Arc::new(censys), config)?;
    Ok(Arc::new(guarded))
}
