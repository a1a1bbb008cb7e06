//! Freshness policy for authorities, responders and cached chains.
//!
//! Everything here is pure: callers pass `now` explicitly so decisions can be
//! tested with constructed timestamps and certificates.

use crate::config::FreshnessConfig;
use time::{Duration, OffsetDateTime};
use x509_parser::prelude::{FromDer, X509Certificate};

/// True iff more than `threshold` has elapsed since `last_updated`.
pub fn is_stale(last_updated: OffsetDateTime, threshold: Duration, now: OffsetDateTime) -> bool {
    now - last_updated > threshold
}

/// Read the validity-end of a DER certificate.
pub fn not_after(subject_der: &[u8]) -> crate::Result<OffsetDateTime> {
    let (_, cert) = X509Certificate::from_der(subject_der)
        .map_err(|e| crate::Error::InvalidCertificate(e.to_string()))?;
    let ts = cert.validity().not_after.timestamp();
    OffsetDateTime::from_unix_timestamp(ts)
        .map_err(|e| crate::Error::InvalidCertificate(e.to_string()))
}

/// True iff the certificate's validity has ended. Unparseable input counts as expired.
pub fn is_expired(subject_der: &[u8], now: OffsetDateTime) -> bool {
    match not_after(subject_der) {
        Ok(end) => end < now,
        Err(_) => true,
    }
}

/// True iff at least one of the given subject certificates is unexpired.
pub fn responder_is_current<'a, I>(subjects: I, now: OffsetDateTime) -> bool
where
    I: IntoIterator<Item = &'a [u8]>,
{
    subjects.into_iter().any(|der| !is_expired(der, now))
}

/// Outcome of evaluating a responder's most recent chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainDecision {
    /// Serve the cached chain as-is.
    Reuse,
    /// Ask the oracle for a fresh pair.
    Refetch,
}

/// Configurable freshness thresholds.
#[derive(Clone, Copy, Debug)]
pub struct FreshnessPolicy {
    stale_after: Duration,
    accept_expired_when_not_current: bool,
}

impl FreshnessPolicy {
    pub fn new(stale_after: Duration, accept_expired_when_not_current: bool) -> Self {
        Self {
            stale_after,
            accept_expired_when_not_current,
        }
    }

    pub fn from_config(config: &FreshnessConfig) -> Self {
        Self::new(config.stale_after(), config.accept_expired_when_not_current)
    }

    /// Threshold after which a record is stale.
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn is_stale(&self, last_updated: OffsetDateTime, now: OffsetDateTime) -> bool {
        is_stale(last_updated, self.stale_after, now)
    }

    /// Decide whether the most recent chain of a responder can be served.
    ///
    /// `most_recent` is `(retrieved_at, subject_der)` of the newest chain.
    /// `all_subjects` yields the subject certificates of every chain the
    /// responder has; it is only consulted when the newest chain is expired.
    pub fn chain_decision<'a, I>(
        &self,
        most_recent: Option<(OffsetDateTime, &[u8])>,
        all_subjects: I,
        now: OffsetDateTime,
    ) -> ChainDecision
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let Some((retrieved_at, subject)) = most_recent else {
            return ChainDecision::Refetch;
        };

        if self.is_stale(retrieved_at, now) {
            return ChainDecision::Refetch;
        }

        if !is_expired(subject, now) {
            return ChainDecision::Reuse;
        }

        // An expired chain is still usable when nothing better exists for this responder.
        if self.accept_expired_when_not_current && !responder_is_current(all_subjects, now) {
            return ChainDecision::Reuse;
        }

        ChainDecision::Refetch
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::from_config(&FreshnessConfig::default())
    }
}
