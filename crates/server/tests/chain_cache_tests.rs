//! Chain cache behavior against a scripted oracle.

mod common;

use common::{MockOracle, TestMetadata, expired_cert, valid_cert};
use ocspwatch_core::{ContentId, FreshnessPolicy};
use ocspwatch_metadata::MetadataStore;
use ocspwatch_metadata::models::{ChainRow, ResponderRow};
use ocspwatch_metadata::repos::{AuthorityRepo, ChainRepo, ResponderRepo};
use ocspwatch_oracle::CertPairLookup;
use ocspwatch_server::{ChainCache, ChainCacheError};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use time::OffsetDateTime;

const URL: &str = "http://ocsp.example/";

struct Fixture {
    metadata: TestMetadata,
    oracle: Arc<MockOracle>,
    cache: Arc<ChainCache>,
    responder: ResponderRow,
}

impl Fixture {
    async fn new() -> Self {
        Self::with_policy(FreshnessPolicy::default()).await
    }

    async fn with_policy(policy: FreshnessPolicy) -> Self {
        let metadata = TestMetadata::new().await.unwrap();
        let store = metadata.store();
        let now = OffsetDateTime::now_utc();
        let authority = store.upsert_authority("ExampleCA", 100, now).await.unwrap();
        let responder = store
            .upsert_responder(authority.authority_id, URL, 50, now)
            .await
            .unwrap();

        let oracle = Arc::new(MockOracle::new());
        let cache = Arc::new(ChainCache::new(store, oracle.clone(), policy));
        Self {
            metadata,
            oracle,
            cache,
            responder,
        }
    }

    fn store(&self) -> Arc<dyn MetadataStore> {
        self.metadata.store()
    }

    async fn chain_count(&self) -> u64 {
        self.store()
            .count_chains_for_responder(self.responder.responder_id)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_stub_pair_is_fetched_then_reused() {
    let fx = Fixture::new().await;
    fx.oracle.set_pair(URL, b"subj", b"iss");

    let first = fx.cache.ensure_chain(&fx.responder).await.unwrap();
    assert!(first.was_fetched());
    assert_eq!(
        first.chain().content_id,
        ContentId::compute(b"subj", b"iss").to_hex()
    );
    assert_eq!(fx.chain_count().await, 1);

    // An unparseable subject counts as expired, but with nothing better on
    // record the cached chain is still served.
    let second = fx.cache.ensure_chain(&fx.responder).await.unwrap();
    assert!(!second.was_fetched());
    assert_eq!(second.chain().chain_id, first.chain().chain_id);
    assert_eq!(second.chain().content_id, first.chain().content_id);
    assert_eq!(fx.chain_count().await, 1);
    assert_eq!(fx.oracle.pair_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_valid_chain_is_reused_without_oracle_call() {
    let fx = Fixture::new().await;
    let subject = valid_cert();
    fx.oracle.set_pair(URL, &subject, b"issuer");

    fx.cache.ensure_chain(&fx.responder).await.unwrap();
    let again = fx.cache.ensure_chain(&fx.responder).await.unwrap();

    assert!(!again.was_fetched());
    assert_eq!(again.chain().subject_certificate, subject);
    assert_eq!(fx.oracle.pair_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stale_chain_is_refetched_and_history_kept() {
    let fx = Fixture::new().await;
    let store = fx.store();
    let old = ChainRow::new(
        fx.responder.responder_id,
        valid_cert(),
        b"old-issuer".to_vec(),
        OffsetDateTime::now_utc() - time::Duration::days(30),
    );
    store.insert_chain(&old).await.unwrap();

    let fresh_subject = valid_cert();
    fx.oracle.set_pair(URL, &fresh_subject, b"new-issuer");

    let fetched = fx.cache.ensure_chain(&fx.responder).await.unwrap();
    assert!(fetched.was_fetched());
    assert_eq!(fetched.chain().subject_certificate, fresh_subject);
    assert_eq!(fx.chain_count().await, 2);

    // The old row is untouched.
    let kept = store.get_chain(old.chain_id).await.unwrap().unwrap();
    assert_eq!(kept.content_id, old.content_id);
}

#[tokio::test]
async fn test_expired_chain_refetched_when_responder_has_current_chain() {
    let fx = Fixture::new().await;
    let store = fx.store();
    let now = OffsetDateTime::now_utc();

    // An older chain is still valid, the newest one has expired.
    let current = ChainRow::new(
        fx.responder.responder_id,
        valid_cert(),
        b"iss-a".to_vec(),
        now - time::Duration::days(2),
    );
    let expired = ChainRow::new(
        fx.responder.responder_id,
        expired_cert(),
        b"iss-b".to_vec(),
        now - time::Duration::days(1),
    );
    store.insert_chain(&current).await.unwrap();
    store.insert_chain(&expired).await.unwrap();

    fx.oracle.set_pair(URL, &valid_cert(), b"iss-c");
    let outcome = fx.cache.ensure_chain(&fx.responder).await.unwrap();
    assert!(outcome.was_fetched());
    assert_eq!(fx.chain_count().await, 3);
}

#[tokio::test]
async fn test_expired_chain_refetched_when_fallback_disabled() {
    let fx = Fixture::with_policy(FreshnessPolicy::new(time::Duration::days(7), false)).await;
    let store = fx.store();
    let expired = ChainRow::new(
        fx.responder.responder_id,
        expired_cert(),
        b"iss".to_vec(),
        OffsetDateTime::now_utc(),
    );
    store.insert_chain(&expired).await.unwrap();

    fx.oracle.set_pair(URL, &valid_cert(), b"iss-2");
    assert!(fx.cache.ensure_chain(&fx.responder).await.unwrap().was_fetched());
}

#[tokio::test]
async fn test_no_usable_pair_is_not_found_and_cache_untouched() {
    let fx = Fixture::new().await;
    let store = fx.store();
    let old = ChainRow::new(
        fx.responder.responder_id,
        valid_cert(),
        b"iss".to_vec(),
        OffsetDateTime::now_utc() - time::Duration::days(30),
    );
    store.insert_chain(&old).await.unwrap();

    for lookup in [
        CertPairLookup::NoCertificate,
        CertPairLookup::NoIssuerUrl,
        CertPairLookup::IssuerDownloadFailed,
    ] {
        fx.oracle.set_lookup(URL, lookup);
        let err = fx.cache.ensure_chain(&fx.responder).await.unwrap_err();
        assert!(matches!(err, ChainCacheError::NotFound));
    }

    assert_eq!(fx.chain_count().await, 1);
    let newest = store
        .most_recent_chain(fx.responder.responder_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(newest.chain_id, old.chain_id);
}

#[tokio::test]
async fn test_oracle_unavailable_is_not_found() {
    let fx = Fixture::new().await;
    fx.oracle.set_pair(URL, b"subj", b"iss");
    fx.oracle.set_unavailable(true);

    let err = fx.cache.ensure_chain(&fx.responder).await.unwrap_err();
    assert!(matches!(err, ChainCacheError::NotFound));
    assert_eq!(fx.chain_count().await, 0);

    // Recovers on the next attempt.
    fx.oracle.set_unavailable(false);
    assert!(fx.cache.ensure_chain(&fx.responder).await.unwrap().was_fetched());
}

#[tokio::test]
async fn test_concurrent_calls_for_one_responder_store_one_chain() {
    let fx = Fixture::new().await;
    fx.oracle.set_pair(URL, &valid_cert(), b"iss");
    fx.oracle.set_delay(Duration::from_millis(50));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = fx.cache.clone();
        let responder = fx.responder.clone();
        handles.push(tokio::spawn(
            async move { cache.ensure_chain(&responder).await },
        ));
    }

    let mut fetched = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().was_fetched() {
            fetched += 1;
        }
    }

    assert_eq!(fetched, 1);
    assert_eq!(fx.chain_count().await, 1);
    assert_eq!(fx.oracle.pair_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_identical_pair_refetch_keeps_content_id() {
    let fx = Fixture::new().await;
    let store = fx.store();
    let subject = valid_cert();
    let old = ChainRow::new(
        fx.responder.responder_id,
        subject.clone(),
        b"iss".to_vec(),
        OffsetDateTime::now_utc() - time::Duration::days(8),
    );
    store.insert_chain(&old).await.unwrap();
    fx.oracle.set_pair(URL, &subject, b"iss");

    let fetched = fx.cache.ensure_chain(&fx.responder).await.unwrap();
    assert!(fetched.was_fetched());
    assert_eq!(fetched.chain().content_id, old.content_id);
    assert_ne!(fetched.chain().chain_id, old.chain_id);

    // The content id resolves to the newest row.
    let resolved = store
        .get_chain_by_content_id(&old.content_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.chain_id, fetched.chain().chain_id);
}

#[tokio::test]
async fn test_idle_responder_locks_are_pruned() {
    let fx = Fixture::new().await;
    fx.oracle.set_pair(URL, &valid_cert(), b"iss");
    fx.oracle.set_delay(Duration::from_millis(200));

    let cache = fx.cache.clone();
    let responder = fx.responder.clone();
    let in_flight = tokio::spawn(async move { cache.ensure_chain(&responder).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // A lock held by a running call survives pruning.
    fx.cache.prune_locks();
    assert_eq!(fx.cache.tracked_locks(), 1);

    assert!(in_flight.await.unwrap().unwrap().was_fetched());
    fx.cache.prune_locks();
    assert_eq!(fx.cache.tracked_locks(), 0);

    // A pruned responder gets a fresh lock and still reuses its chain.
    let again = fx.cache.ensure_chain(&fx.responder).await.unwrap();
    assert!(!again.was_fetched());
    assert_eq!(fx.chain_count().await, 1);
}
