//! Censys certificate search backend (v1 REST API).

use crate::error::{OracleError, OracleResult};
use crate::traits::{CertPair, CertPairLookup, CertificateOracle, RankedEntry};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ocspwatch_core::config::OracleConfig;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

const VALID_QUERY: &str = "validation.nss.valid: true";
const ISSUER_FIELD: &str = "parsed.issuer.organization";
const OCSP_URLS_FIELD: &str = "parsed.extensions.authority_info_access.ocsp_urls";
const ISSUER_URLS_FIELD: &str = "parsed.extensions.authority_info_access.issuer_urls";
const RAW_FIELD: &str = "raw";

/// Buckets requested when enumerating an authority's OCSP URLs.
const OCSP_URL_BUCKETS: u32 = 50;

#[derive(Debug, Deserialize)]
struct ReportResponse {
    results: Vec<ReportBucket>,
}

#[derive(Debug, Deserialize)]
struct ReportBucket {
    key: String,
    doc_count: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "parsed.extensions.authority_info_access.issuer_urls", default)]
    issuer_urls: Vec<String>,
    raw: String,
}

/// Escape a value for use inside a double-quoted Censys query term.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn sorted_buckets(report: ReportResponse) -> Vec<RankedEntry> {
    let mut entries: Vec<RankedEntry> = report
        .results
        .into_iter()
        .map(|bucket| RankedEntry::new(bucket.key, bucket.doc_count))
        .collect();
    entries.sort_by(|a, b| b.cardinality.cmp(&a.cardinality).then(a.name.cmp(&b.name)));
    entries
}

/// Censys API client.
pub struct CensysOracle {
    http: reqwest::Client,
    base_url: String,
    api_id: String,
    api_secret: String,
}

impl CensysOracle {
    pub fn new(
        base_url: impl Into<String>,
        api_id: impl Into<String>,
        api_secret: impl Into<String>,
        user_agent: &str,
    ) -> OracleResult<Self> {
        let http = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_id: api_id.into(),
            api_secret: api_secret.into(),
        })
    }

    /// Build from configuration, falling back to `CENSYS_API_ID` and
    /// `CENSYS_API_SECRET` for credentials.
    pub fn from_config(config: &OracleConfig) -> OracleResult<Self> {
        let api_id = config
            .api_id
            .clone()
            .or_else(|| std::env::var("CENSYS_API_ID").ok())
            .ok_or_else(|| OracleError::Config("oracle.api_id is not set".to_string()))?;
        let api_secret = config
            .api_secret
            .clone()
            .or_else(|| std::env::var("CENSYS_API_SECRET").ok())
            .ok_or_else(|| OracleError::Config("oracle.api_secret is not set".to_string()))?;
        Self::new(&config.base_url, api_id, api_secret, &config.user_agent)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> OracleResult<T> {
        let url = format!("{}/{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.api_id, Some(&self.api_secret))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| OracleError::InvalidResponse(format!("{path}: {e}")))
    }

    async fn report(&self, query: &str, field: &str, buckets: u32) -> OracleResult<Vec<RankedEntry>> {
        let report: ReportResponse = self
            .post(
                "report/certificates",
                json!({ "query": query, "field": field, "buckets": buckets }),
            )
            .await?;
        Ok(sorted_buckets(report))
    }

    async fn first_hit(&self, query: &str) -> OracleResult<Option<SearchHit>> {
        let search: SearchResponse = self
            .post(
                "search/certificates",
                json!({
                    "query": query,
                    "fields": [ISSUER_URLS_FIELD, "parsed.names", RAW_FIELD],
                    "page": 1,
                }),
            )
            .await?;
        Ok(search.results.into_iter().next())
    }

    /// Download the issuer certificate from the first URL that yields a non-empty body.
    async fn download_issuer(&self, urls: &[String]) -> Option<Vec<u8>> {
        for url in urls {
            match self.http.get(url).send().await {
                Ok(response) if response.status().is_success() => match response.bytes().await {
                    Ok(body) if !body.is_empty() => return Some(body.to_vec()),
                    Ok(_) => tracing::warn!(issuer_url = %url, "Issuer URL returned an empty body"),
                    Err(e) => {
                        tracing::warn!(issuer_url = %url, error = %e, "Failed to read issuer certificate")
                    }
                },
                Ok(response) => tracing::warn!(
                    issuer_url = %url,
                    status = response.status().as_u16(),
                    "Failed to download issuer certificate"
                ),
                Err(e) => {
                    tracing::warn!(issuer_url = %url, error = %e, "Failed to download issuer certificate")
                }
            }
        }
        None
    }
}

#[async_trait]
impl CertificateOracle for CensysOracle {
    async fn top_authorities(&self, n: u32) -> OracleResult<Vec<RankedEntry>> {
        let mut entries = self.report(VALID_QUERY, ISSUER_FIELD, n).await?;
        entries.truncate(n as usize);
        Ok(entries)
    }

    async fn ocsp_urls(&self, authority: &str) -> OracleResult<Vec<RankedEntry>> {
        let query = format!("{VALID_QUERY} AND {ISSUER_FIELD}: {}", quote(authority));
        self.report(&query, OCSP_URLS_FIELD, OCSP_URL_BUCKETS).await
    }

    async fn example_cert_pair(
        &self,
        authority: &str,
        url: &str,
    ) -> OracleResult<CertPairLookup> {
        let base_query = format!(
            "{VALID_QUERY} AND {ISSUER_FIELD}: {} AND {OCSP_URLS_FIELD}.raw: {} AND {ISSUER_URLS_FIELD}: /.+/",
            quote(authority),
            quote(url)
        );

        let hit = match self
            .first_hit(&format!("{base_query} AND tags: \"unexpired\""))
            .await?
        {
            Some(hit) => hit,
            None => {
                tracing::info!(
                    authority,
                    responder_url = url,
                    "No unexpired certificate uses this responder, trying expired ones"
                );
                match self.first_hit(&base_query).await? {
                    Some(hit) => hit,
                    None => return Ok(CertPairLookup::NoCertificate),
                }
            }
        };

        if hit.issuer_urls.is_empty() {
            return Ok(CertPairLookup::NoIssuerUrl);
        }

        let subject = STANDARD
            .decode(hit.raw.trim())
            .map_err(|e| OracleError::InvalidResponse(format!("raw certificate: {e}")))?;

        match self.download_issuer(&hit.issuer_urls).await {
            Some(issuer) => Ok(CertPairLookup::Found(CertPair { subject, issuer })),
            None => Ok(CertPairLookup::IssuerDownloadFailed),
        }
    }
}
