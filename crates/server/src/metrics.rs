//! Prometheus metrics for the ocspwatch coordinator.
//!
//! Exposes counters for the chain cache, refresh cycles, agent registration
//! and result ingestion.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no certificate material or agent identities, only aggregate
//! counts. Restrict the endpoint to scraper addresses at the network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Chain cache metrics
pub static CHAINS_FETCHED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ocspwatch_chains_fetched_total",
        "Total number of certificate chains fetched from the oracle",
    )
    .expect("metric creation failed")
});

pub static CHAIN_CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ocspwatch_chain_cache_hits_total",
        "Total number of chain lookups served from the cache",
    )
    .expect("metric creation failed")
});

pub static CHAIN_CACHE_MISSES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ocspwatch_chain_cache_misses_total",
            "Total number of chain lookups that produced no chain, by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

// Refresh metrics
pub static REFRESH_CYCLES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ocspwatch_refresh_cycles_total",
            "Total number of refresh cycles, by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static REFRESH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "ocspwatch_refresh_duration_seconds",
            "Time taken by a refresh cycle",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
    )
    .expect("metric creation failed")
});

// Agent metrics
pub static REGISTRATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ocspwatch_registrations_total",
            "Total number of agent registration attempts, by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static RESULTS_INGESTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ocspwatch_results_ingested_total",
        "Total number of measurement results stored",
    )
    .expect("metric creation failed")
});

pub static RESULTS_SKIPPED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ocspwatch_results_skipped_total",
        "Total number of submitted measurements that were not stored",
    )
    .expect("metric creation failed")
});

pub static SUBMISSIONS_REJECTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ocspwatch_submissions_rejected_total",
        "Total number of submissions rejected before ingestion",
    )
    .expect("metric creation failed")
});

pub static MANIFEST_REQUESTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ocspwatch_manifest_requests_total",
        "Total number of manifests served",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(CHAINS_FETCHED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHAIN_CACHE_HITS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHAIN_CACHE_MISSES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REFRESH_CYCLES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REFRESH_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REGISTRATIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RESULTS_INGESTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RESULTS_SKIPPED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SUBMISSIONS_REJECTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(MANIFEST_REQUESTS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record a chain lookup that produced no chain.
pub fn record_chain_miss(reason: &str) {
    CHAIN_CACHE_MISSES.with_label_values(&[reason]).inc();
}

/// Record the outcome of a registration attempt.
pub fn record_registration(outcome: &str) {
    REGISTRATIONS.with_label_values(&[outcome]).inc();
}
