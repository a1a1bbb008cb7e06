//! Result repository.

use crate::error::MetadataResult;
use crate::models::{LatestResultRow, ResultRow};
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for the append-only measurement log.
#[async_trait]
pub trait ResultRepo: Send + Sync {
    /// Append a result. Each call commits on its own.
    async fn insert_result(&self, result: &ResultRow) -> MetadataResult<()>;

    /// Count results recorded against a chain.
    async fn count_results_for_chain(&self, chain_id: Uuid) -> MetadataResult<u64>;

    /// Count results submitted by a location.
    async fn count_results_for_location(&self, location_id: Uuid) -> MetadataResult<u64>;

    /// Latest result per (responder, location), ordered by authority
    /// cardinality, responder cardinality, url and location name.
    async fn latest_results(&self) -> MetadataResult<Vec<LatestResultRow>>;
}
