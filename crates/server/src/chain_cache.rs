//! Get-or-refresh of a responder's certificate chain.
//!
//! Calls for the same responder are serialized through a per-responder
//! mutex, so two concurrent refreshes cannot both insert a chain for the
//! same certificate pair. Different responders proceed in parallel.

use crate::metrics;
use dashmap::DashMap;
use ocspwatch_core::{ChainDecision, FreshnessPolicy, is_expired};
use ocspwatch_metadata::models::{ChainRow, ResponderRow};
use ocspwatch_metadata::{MetadataError, MetadataStore};
use ocspwatch_oracle::{CertPairLookup, CertificateOracle};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Chain cache failures.
#[derive(Debug, thiserror::Error)]
pub enum ChainCacheError {
    /// Nothing cached and the oracle had no usable pair.
    #[error("no usable certificate chain")]
    NotFound,

    #[error(transparent)]
    Store(#[from] MetadataError),
}

/// How `ensure_chain` produced its chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainFetch {
    /// Served from the cache unchanged.
    Reused(ChainRow),
    /// Freshly fetched from the oracle and stored.
    Fetched(ChainRow),
}

impl ChainFetch {
    pub fn chain(&self) -> &ChainRow {
        match self {
            Self::Reused(chain) | Self::Fetched(chain) => chain,
        }
    }

    pub fn into_chain(self) -> ChainRow {
        match self {
            Self::Reused(chain) | Self::Fetched(chain) => chain,
        }
    }

    pub fn was_fetched(&self) -> bool {
        matches!(self, Self::Fetched(_))
    }
}

pub struct ChainCache {
    metadata: Arc<dyn MetadataStore>,
    oracle: Arc<dyn CertificateOracle>,
    policy: FreshnessPolicy,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ChainCache {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        oracle: Arc<dyn CertificateOracle>,
        policy: FreshnessPolicy,
    ) -> Self {
        Self {
            metadata,
            oracle,
            policy,
            locks: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    /// Drop per-responder locks that no call holds or waits on.
    pub fn prune_locks(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of per-responder locks currently tracked.
    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    fn responder_lock(&self, responder_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(responder_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Return a usable chain for `responder`, fetching a new one when the
    /// cached chain is missing, stale, or expired while a better one may exist.
    ///
    /// Existing chains are never modified or deleted. Oracle failures and
    /// timeouts surface as [`ChainCacheError::NotFound`].
    pub async fn ensure_chain(
        &self,
        responder: &ResponderRow,
    ) -> Result<ChainFetch, ChainCacheError> {
        let lock = self.responder_lock(responder.responder_id);
        let _guard = lock.lock().await;

        let now = OffsetDateTime::now_utc();
        let most_recent = self
            .metadata
            .most_recent_chain(responder.responder_id)
            .await?;

        let decision = match &most_recent {
            None => ChainDecision::Refetch,
            Some(chain) => {
                // History only matters when the newest chain has expired.
                let history = if is_expired(&chain.subject_certificate, now) {
                    self.metadata
                        .list_chains_for_responder(responder.responder_id)
                        .await?
                } else {
                    Vec::new()
                };
                self.policy.chain_decision(
                    Some((chain.retrieved_at, chain.subject_certificate.as_slice())),
                    history.iter().map(|c| c.subject_certificate.as_slice()),
                    now,
                )
            }
        };

        if decision == ChainDecision::Reuse
            && let Some(chain) = most_recent
        {
            metrics::CHAIN_CACHE_HITS.inc();
            tracing::debug!(
                responder_id = %responder.responder_id,
                content_id = %chain.content_id,
                "Reusing cached chain"
            );
            return Ok(ChainFetch::Reused(chain));
        }

        self.fetch(responder, now).await
    }

    async fn fetch(
        &self,
        responder: &ResponderRow,
        now: OffsetDateTime,
    ) -> Result<ChainFetch, ChainCacheError> {
        let authority = self
            .metadata
            .get_authority(responder.authority_id)
            .await?
            .ok_or_else(|| {
                MetadataError::NotFound(format!("authority {}", responder.authority_id))
            })?;

        let lookup = match self
            .oracle
            .example_cert_pair(&authority.name, &responder.url)
            .await
        {
            Ok(lookup) => lookup,
            Err(e) => {
                tracing::warn!(
                    authority = %authority.name,
                    responder_id = %responder.responder_id,
                    error = %e,
                    "Oracle unavailable, leaving cached chain untouched"
                );
                metrics::record_chain_miss("upstream");
                return Err(ChainCacheError::NotFound);
            }
        };

        let pair = match lookup {
            CertPairLookup::Found(pair) => pair,
            other => {
                tracing::info!(
                    authority = %authority.name,
                    responder_id = %responder.responder_id,
                    reason = other.reason(),
                    "Oracle returned no usable certificate pair"
                );
                metrics::record_chain_miss(other.reason());
                return Err(ChainCacheError::NotFound);
            }
        };

        let chain = ChainRow::new(responder.responder_id, pair.subject, pair.issuer, now);
        self.metadata.insert_chain(&chain).await?;
        metrics::CHAINS_FETCHED.inc();
        tracing::info!(
            authority = %authority.name,
            responder_id = %responder.responder_id,
            content_id = %chain.content_id,
            "Stored new chain"
        );
        Ok(ChainFetch::Fetched(chain))
    }
}
