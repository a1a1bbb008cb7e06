//! Application state shared across handlers.

use crate::chain_cache::ChainCache;
use crate::refresh::Refresher;
use ocspwatch_core::FreshnessPolicy;
use ocspwatch_core::config::AppConfig;
use ocspwatch_metadata::MetadataStore;
use ocspwatch_oracle::CertificateOracle;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Entity store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Certificate oracle, already rate limited and timeout bounded.
    pub oracle: Arc<dyn CertificateOracle>,
    pub chain_cache: Arc<ChainCache>,
    pub refresher: Arc<Refresher>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// The configuration is expected to be validated by the caller.
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        oracle: Arc<dyn CertificateOracle>,
    ) -> Self {
        let policy = FreshnessPolicy::from_config(&config.freshness);
        let chain_cache = Arc::new(ChainCache::new(metadata.clone(), oracle.clone(), policy));
        let refresher = Arc::new(Refresher::new(
            metadata.clone(),
            oracle.clone(),
            chain_cache.clone(),
        ));

        Self {
            config: Arc::new(config),
            metadata,
            oracle,
            chain_cache,
            refresher,
        }
    }

    /// Interval of the automatic refresh scheduler, if enabled.
    ///
    /// A zero interval falls back to one hour so `tokio::time::sleep`
    /// never spins.
    pub fn refresh_interval(&self) -> Option<Duration> {
        if !self.config.refresh.auto_schedule_enabled {
            return None;
        }
        if self.config.refresh.interval_secs == 0 {
            tracing::warn!("refresh.interval_secs is 0, using default of 3600 seconds");
            return Some(Duration::from_secs(3600));
        }
        Some(self.config.refresh.interval())
    }
}
