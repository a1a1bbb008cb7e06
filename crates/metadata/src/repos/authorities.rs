//! Authority repository.

use crate::error::MetadataResult;
use crate::models::AuthorityRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for authority operations.
#[async_trait]
pub trait AuthorityRepo: Send + Sync {
    /// Insert or update an authority by name.
    ///
    /// The cardinality is replaced; `last_updated` only moves forward.
    async fn upsert_authority(
        &self,
        name: &str,
        cardinality: i64,
        now: OffsetDateTime,
    ) -> MetadataResult<AuthorityRow>;

    /// Get an authority by ID.
    async fn get_authority(&self, authority_id: Uuid) -> MetadataResult<Option<AuthorityRow>>;

    /// Get an authority by name.
    async fn get_authority_by_name(&self, name: &str) -> MetadataResult<Option<AuthorityRow>>;

    /// The `n` authorities with the highest cardinality, ties broken by name.
    async fn top_authorities(&self, n: u32) -> MetadataResult<Vec<AuthorityRow>>;

    /// Count all authorities.
    async fn count_authorities(&self) -> MetadataResult<u64>;
}
