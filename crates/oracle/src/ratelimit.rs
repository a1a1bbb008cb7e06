//! Rate limiting and timeouts around an oracle.
//!
//! Every call first waits for a token from a direct `governor` limiter, then
//! runs under `tokio::time::timeout`. A timeout surfaces as
//! [`OracleError::Timeout`], which callers treat as missing data.

use crate::error::{OracleError, OracleResult};
use crate::traits::{CertPairLookup, CertificateOracle, RankedEntry};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use ocspwatch_core::config::OracleConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// An oracle wrapper owning its own rate-limiting state.
pub struct GuardedOracle {
    inner: Arc<dyn CertificateOracle>,
    limiter: DefaultDirectRateLimiter,
    timeout: Duration,
}

impl GuardedOracle {
    pub fn new(
        inner: Arc<dyn CertificateOracle>,
        requests_per_second: f64,
        timeout: Duration,
    ) -> OracleResult<Self> {
        if !(requests_per_second.is_finite() && requests_per_second > 0.0) {
            return Err(OracleError::Config(format!(
                "requests_per_second must be positive, got {requests_per_second}"
            )));
        }
        let period = Duration::from_secs_f64(1.0 / requests_per_second);
        let quota = Quota::with_period(period).ok_or_else(|| {
            OracleError::Config(format!(
                "requests_per_second {requests_per_second} is too high"
            ))
        })?;

        Ok(Self {
            inner,
            limiter: RateLimiter::direct(quota),
            timeout,
        })
    }

    pub fn from_config(
        inner: Arc<dyn CertificateOracle>,
        config: &OracleConfig,
    ) -> OracleResult<Self> {
        Self::new(inner, config.requests_per_second, config.timeout())
    }

    async fn guarded<T, F>(&self, operation: &'static str, call: F) -> OracleResult<T>
    where
        F: Future<Output = OracleResult<T>> + Send,
    {
        self.limiter.until_ready().await;
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Oracle call timed out"
                );
                Err(OracleError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl CertificateOracle for GuardedOracle {
    async fn top_authorities(&self, n: u32) -> OracleResult<Vec<RankedEntry>> {
        self.guarded("top_authorities", self.inner.top_authorities(n))
            .await
    }

    async fn ocsp_urls(&self, authority: &str) -> OracleResult<Vec<RankedEntry>> {
        self.guarded("ocsp_urls", self.inner.ocsp_urls(authority))
            .await
    }

    async fn example_cert_pair(
        &self,
        authority: &str,
        url: &str,
    ) -> OracleResult<CertPairLookup> {
        self.guarded(
            "example_cert_pair",
            self.inner.example_cert_pair(authority, url),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct SlowOracle {
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CertificateOracle for SlowOracle {
        async fn top_authorities(&self, _n: u32) -> OracleResult<Vec<RankedEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(vec![RankedEntry::new("ExampleCA", 1)])
        }

        async fn ocsp_urls(&self, _authority: &str) -> OracleResult<Vec<RankedEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn example_cert_pair(
            &self,
            _authority: &str,
            _url: &str,
        ) -> OracleResult<CertPairLookup> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(CertPairLookup::NoCertificate)
        }
    }

    fn slow(delay: Duration) -> Arc<SlowOracle> {
        Arc::new(SlowOracle {
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_timeout_becomes_timeout_error() {
        let inner = slow(Duration::from_secs(5));
        let guarded =
            GuardedOracle::new(inner.clone(), 1000.0, Duration::from_millis(50)).unwrap();

        let err = guarded
            .example_cert_pair("ExampleCA", "http://ocsp.example/")
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::Timeout(_)));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let guarded =
            GuardedOracle::new(slow(Duration::ZERO), 1000.0, Duration::from_secs(1)).unwrap();
        let top = guarded.top_authorities(1).await.unwrap();
        assert_eq!(top, vec![RankedEntry::new("ExampleCA", 1)]);
    }

    #[tokio::test]
    async fn test_limiter_spaces_calls() {
        // 20 rps: the second call waits roughly 50ms for a token.
        let guarded =
            GuardedOracle::new(slow(Duration::ZERO), 20.0, Duration::from_secs(1)).unwrap();
        let start = Instant::now();
        guarded.ocsp_urls("a").await.unwrap();
        guarded.ocsp_urls("b").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_invalid_rate_rejected() {
        let inner = slow(Duration::ZERO);
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                GuardedOracle::new(inner.clone(), rate, Duration::from_secs(1)),
                Err(OracleError::Config(_))
            ));
        }
    }
}
