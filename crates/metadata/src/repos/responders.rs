//! Responder repository.

use crate::error::MetadataResult;
use crate::models::ResponderRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for responder operations.
#[async_trait]
pub trait ResponderRepo: Send + Sync {
    /// Insert or update a responder keyed by `(authority_id, url)`.
    ///
    /// Fails with `Constraint` if the authority does not exist.
    async fn upsert_responder(
        &self,
        authority_id: Uuid,
        url: &str,
        cardinality: i64,
        now: OffsetDateTime,
    ) -> MetadataResult<ResponderRow>;

    /// Get a responder by ID.
    async fn get_responder(&self, responder_id: Uuid) -> MetadataResult<Option<ResponderRow>>;

    /// Responders of an authority, highest cardinality first, ties broken by url.
    async fn list_responders_for_authority(
        &self,
        authority_id: Uuid,
    ) -> MetadataResult<Vec<ResponderRow>>;
}
