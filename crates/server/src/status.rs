//! Responder health overview built from the latest results.

use ocspwatch_core::{ResponderStatus, responder_is_current};
use ocspwatch_metadata::models::LatestResultRow;
use ocspwatch_metadata::{MetadataResult, MetadataStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub authorities: Vec<AuthorityStatus>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityStatus {
    pub authority_id: Uuid,
    pub name: String,
    pub cardinality: i64,
    pub responders: Vec<ResponderHealth>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderHealth {
    pub responder_id: Uuid,
    pub url: String,
    pub cardinality: i64,
    /// Whether any cached chain for this responder is unexpired.
    pub current: bool,
    pub locations: Vec<LocationHealth>,
}

/// The latest measurement of one responder from one location.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationHealth {
    pub location_id: Uuid,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub retrieved_at: OffsetDateTime,
    pub ping: bool,
    pub ocsp: bool,
    pub status: ResponderStatus,
}

impl From<LatestResultRow> for LocationHealth {
    fn from(row: LatestResultRow) -> Self {
        Self {
            location_id: row.location_id,
            name: row.location_name,
            retrieved_at: row.retrieved_at,
            ping: row.ping,
            ocsp: row.ocsp,
            status: ResponderStatus::from_measurement(row.ping, row.ocsp),
        }
    }
}

/// Build the status view over every known authority.
pub async fn build_status(
    metadata: &dyn MetadataStore,
    now: OffsetDateTime,
) -> MetadataResult<StatusReport> {
    let mut latest: HashMap<Uuid, Vec<LocationHealth>> = HashMap::new();
    for row in metadata.latest_results().await? {
        latest.entry(row.responder_id).or_default().push(row.into());
    }

    let total = u32::try_from(metadata.count_authorities().await?).unwrap_or(u32::MAX);
    let mut authorities = Vec::new();
    for authority in metadata.top_authorities(total).await? {
        let mut responders = Vec::new();
        for responder in metadata
            .list_responders_for_authority(authority.authority_id)
            .await?
        {
            let chains = metadata
                .list_chains_for_responder(responder.responder_id)
                .await?;
            let current =
                responder_is_current(chains.iter().map(|c| c.subject_certificate.as_slice()), now);
            responders.push(ResponderHealth {
                responder_id: responder.responder_id,
                url: responder.url,
                cardinality: responder.cardinality,
                current,
                locations: latest.remove(&responder.responder_id).unwrap_or_default(),
            });
        }
        authorities.push(AuthorityStatus {
            authority_id: authority.authority_id,
            name: authority.name,
            cardinality: authority.cardinality,
            responders,
        });
    }

    Ok(StatusReport { authorities })
}
