//! Chain repository.

use crate::error::MetadataResult;
use crate::models::ChainRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for cached certificate chains.
///
/// Chains are insert-only; there is no update or delete.
#[async_trait]
pub trait ChainRepo: Send + Sync {
    /// Insert a chain. Fails with `Constraint` if the responder does not exist.
    async fn insert_chain(&self, chain: &ChainRow) -> MetadataResult<()>;

    /// Get a chain by ID.
    async fn get_chain(&self, chain_id: Uuid) -> MetadataResult<Option<ChainRow>>;

    /// The chain with the latest `retrieved_at` for a responder.
    async fn most_recent_chain(&self, responder_id: Uuid) -> MetadataResult<Option<ChainRow>>;

    /// All chains of a responder, newest first.
    async fn list_chains_for_responder(&self, responder_id: Uuid)
    -> MetadataResult<Vec<ChainRow>>;

    /// Resolve a content id. When several rows share it, the newest wins.
    async fn get_chain_by_content_id(&self, content_id: &str) -> MetadataResult<Option<ChainRow>>;

    /// Count chains for a responder.
    async fn count_chains_for_responder(&self, responder_id: Uuid) -> MetadataResult<u64>;
}
