//! Work manifest construction.
//!
//! Reads cached state only; building a manifest never calls the oracle.

use ocspwatch_core::{ContentId, ManifestEntry};
use ocspwatch_metadata::{MetadataError, MetadataStore};

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("{0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] MetadataError),
}

/// Build the manifest for the top `n` authorities.
///
/// One entry per responder that has a cached chain, ordered by authority
/// cardinality, then responder cardinality, then URL. `n` must be between 1
/// and `max_n`.
pub async fn build_manifest(
    metadata: &dyn MetadataStore,
    n: u32,
    max_n: u32,
) -> Result<Vec<ManifestEntry>, ManifestError> {
    if n == 0 || n > max_n {
        return Err(ManifestError::Malformed(format!(
            "n must be between 1 and {max_n}, got {n}"
        )));
    }

    let mut entries = Vec::new();
    for authority in metadata.top_authorities(n).await? {
        let mut responders = metadata
            .list_responders_for_authority(authority.authority_id)
            .await?;
        responders.sort_by(|a, b| b.cardinality.cmp(&a.cardinality).then(a.url.cmp(&b.url)));

        for responder in responders {
            let Some(chain) = metadata.most_recent_chain(responder.responder_id).await? else {
                tracing::debug!(
                    authority = %authority.name,
                    responder_id = %responder.responder_id,
                    "Responder has no cached chain, leaving it out of the manifest"
                );
                continue;
            };
            let content_id =
                ContentId::compute(&chain.subject_certificate, &chain.issuer_certificate);
            entries.push(ManifestEntry::new(
                content_id,
                &responder.url,
                &chain.subject_certificate,
                &chain.issuer_certificate,
            ));
        }
    }
    Ok(entries)
}
