//! The refresh cycle: keeps authorities, responders and chains current.

use crate::chain_cache::{ChainCache, ChainCacheError, ChainFetch};
use crate::metrics;
use futures::future::join_all;
use ocspwatch_metadata::models::{AuthorityRow, ResponderRow};
use ocspwatch_metadata::{MetadataError, MetadataStore};
use ocspwatch_oracle::{CertificateOracle, RankedEntry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Refresh failures.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("a refresh cycle is already running")]
    Busy,

    #[error("malformed refresh request: {0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] MetadataError),
}

/// Counts from one refresh cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    /// Authorities upserted from the oracle.
    pub authorities: usize,
    /// Responders upserted from the oracle.
    pub responders: usize,
    pub chains_fetched: usize,
    pub chains_reused: usize,
    /// Responders left without a usable chain.
    pub chains_missing: usize,
}

fn cardinality(entry: &RankedEntry) -> i64 {
    i64::try_from(entry.cardinality).unwrap_or(i64::MAX)
}

pub struct Refresher {
    metadata: Arc<dyn MetadataStore>,
    oracle: Arc<dyn CertificateOracle>,
    chain_cache: Arc<ChainCache>,
    running: Mutex<()>,
}

impl Refresher {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        oracle: Arc<dyn CertificateOracle>,
        chain_cache: Arc<ChainCache>,
    ) -> Self {
        Self {
            metadata,
            oracle,
            chain_cache,
            running: Mutex::new(()),
        }
    }

    /// Run one refresh cycle over the top `n` authorities.
    ///
    /// Fails with [`RefreshError::Busy`] instead of waiting when another
    /// cycle holds the lock. Oracle failures are logged and skipped; the
    /// affected records are retried on the next cycle.
    pub async fn update(&self, n: u32) -> Result<RefreshReport, RefreshError> {
        if n == 0 {
            return Err(RefreshError::Malformed("n must be at least 1".to_string()));
        }
        let Ok(_guard) = self.running.try_lock() else {
            metrics::REFRESH_CYCLES.with_label_values(&["busy"]).inc();
            return Err(RefreshError::Busy);
        };

        let started = Instant::now();
        let result = self.run_cycle(n).await;
        self.chain_cache.prune_locks();
        metrics::REFRESH_DURATION.observe(started.elapsed().as_secs_f64());

        match &result {
            Ok(report) => {
                metrics::REFRESH_CYCLES
                    .with_label_values(&["completed"])
                    .inc();
                tracing::info!(
                    authorities = report.authorities,
                    responders = report.responders,
                    chains_fetched = report.chains_fetched,
                    chains_reused = report.chains_reused,
                    chains_missing = report.chains_missing,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Refresh cycle completed"
                );
            }
            Err(e) => {
                metrics::REFRESH_CYCLES.with_label_values(&["failed"]).inc();
                tracing::error!(error = %e, "Refresh cycle failed");
            }
        }
        result
    }

    async fn run_cycle(&self, n: u32) -> Result<RefreshReport, RefreshError> {
        let mut report = RefreshReport::default();
        let policy = *self.chain_cache.policy();
        let now = OffsetDateTime::now_utc();
        let mut refreshed: HashSet<Uuid> = HashSet::new();

        let stored = self.metadata.top_authorities(n).await?;
        if stored.is_empty() || stored.iter().any(|a| policy.is_stale(a.last_updated, now)) {
            match self.oracle.top_authorities(n).await {
                Ok(ranked) => {
                    for entry in &ranked {
                        let authority = self
                            .metadata
                            .upsert_authority(&entry.name, cardinality(entry), now)
                            .await?;
                        report.authorities += 1;
                        self.refresh_responders(&authority, now, &mut report).await?;
                        refreshed.insert(authority.authority_id);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to rank authorities, keeping stored ranking");
                }
            }
        }

        let authorities = self.metadata.top_authorities(n).await?;
        let mut responders: Vec<ResponderRow> = Vec::new();
        for authority in &authorities {
            let mut current = self
                .metadata
                .list_responders_for_authority(authority.authority_id)
                .await?;
            let needs_refresh = current.is_empty()
                || current.iter().any(|r| policy.is_stale(r.last_updated, now));
            if needs_refresh && !refreshed.contains(&authority.authority_id) {
                self.refresh_responders(authority, now, &mut report).await?;
                current = self
                    .metadata
                    .list_responders_for_authority(authority.authority_id)
                    .await?;
            }
            responders.extend(current);
        }

        let outcomes = join_all(
            responders
                .iter()
                .map(|responder| self.chain_cache.ensure_chain(responder)),
        )
        .await;
        for outcome in outcomes {
            match outcome {
                Ok(ChainFetch::Fetched(_)) => report.chains_fetched += 1,
                Ok(ChainFetch::Reused(_)) => report.chains_reused += 1,
                Err(ChainCacheError::NotFound) => report.chains_missing += 1,
                Err(ChainCacheError::Store(e)) => return Err(e.into()),
            }
        }

        Ok(report)
    }

    /// Pull an authority's OCSP URLs and upsert them as responders.
    async fn refresh_responders(
        &self,
        authority: &AuthorityRow,
        now: OffsetDateTime,
        report: &mut RefreshReport,
    ) -> Result<(), RefreshError> {
        let urls = match self.oracle.ocsp_urls(&authority.name).await {
            Ok(urls) => urls,
            Err(e) => {
                tracing::warn!(
                    authority = %authority.name,
                    error = %e,
                    "Failed to enumerate OCSP URLs, skipping authority"
                );
                return Ok(());
            }
        };

        for entry in &urls {
            let responder = self
                .metadata
                .upsert_responder(authority.authority_id, &entry.name, cardinality(entry), now)
                .await?;
            report.responders += 1;
            tracing::debug!(
                authority = %authority.name,
                responder_id = %responder.responder_id,
                url = %responder.url,
                "Upserted responder"
            );
        }
        Ok(())
    }
}

/// Spawn the automatic refresh loop.
///
/// A tick that finds a cycle already running is skipped.
pub fn spawn_scheduler(refresher: Arc<Refresher>, interval: Duration, n: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            interval_secs = interval.as_secs(),
            top_n = n,
            "Automatic refresh scheduler enabled"
        );
        loop {
            tokio::time::sleep(interval).await;
            match refresher.update(n).await {
                Ok(_) => {}
                Err(RefreshError::Busy) => {
                    tracing::debug!("Refresh cycle already running, skipping scheduled run");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Scheduled refresh cycle failed");
                }
            }
        }
    })
}
