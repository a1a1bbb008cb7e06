//! Location (probe agent) repository.

use crate::error::MetadataResult;
use crate::models::LocationRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for probe-agent locations.
#[async_trait]
pub trait LocationRepo: Send + Sync {
    /// Create an invited location. Fails with `Constraint` on a duplicate selector.
    async fn create_location(&self, location: &LocationRow) -> MetadataResult<()>;

    /// Get a location by ID.
    async fn get_location(&self, location_id: Uuid) -> MetadataResult<Option<LocationRow>>;

    /// Get a location by invite selector.
    async fn get_location_by_selector(&self, selector: &[u8])
    -> MetadataResult<Option<LocationRow>>;

    /// Get a registered location by key id.
    async fn get_location_by_key_id(&self, key_id: Uuid) -> MetadataResult<Option<LocationRow>>;

    /// List all locations ordered by name.
    async fn list_locations(&self) -> MetadataResult<Vec<LocationRow>>;

    /// Bind a public key to an invited location.
    ///
    /// A single guarded update: returns `false` when the location is already
    /// registered (or does not exist) and leaves it untouched. A key id already
    /// bound elsewhere fails with `Constraint`.
    async fn register_location(
        &self,
        location_id: Uuid,
        public_key: &str,
        key_id: Uuid,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;
}
