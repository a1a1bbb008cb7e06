use anyhow::{Context, Result};
use ocspwatch_core::SubmissionReceipt;
use reqwest::Url;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Client for the coordinator's HTTP API.
///
/// The admin token is only needed for `/v1/admin/*`; agent endpoints are
/// authenticated by their signed bodies.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token: token.map(str::to_string),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("failed to build API URL")
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send_text(&self, req: reqwest::RequestBuilder) -> Result<String> {
        let response = self.authorized(req).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("API error ({}): {}", status, body);
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let body = self.send_text(req).await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.url("/v1/health")?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn create_invite(&self, name: &str) -> Result<CreateInviteResponse> {
        let url = self.url("/v1/admin/invites")?;
        let req = CreateInviteRequest {
            name: name.to_string(),
        };
        self.send_json(self.http.post(url).json(&req)).await
    }

    pub async fn list_locations(&self) -> Result<Vec<LocationSummary>> {
        let url = self.url("/v1/admin/locations")?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn refresh(&self, n: Option<u32>) -> Result<RefreshReport> {
        let url = self.url("/v1/admin/refresh")?;
        self.send_json(self.http.post(url).json(&RefreshRequest { n }))
            .await
    }

    /// Fetch the raw NDJSON manifest.
    pub async fn manifest(&self, n: Option<u32>) -> Result<String> {
        let mut url = self.url("/v1/manifest.jsonl")?;
        if let Some(n) = n {
            url.query_pairs_mut().append_pair("n", &n.to_string());
        }
        self.send_text(self.http.get(url)).await
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let url = self.url("/v1/status")?;
        self.send_json(self.http.get(url)).await
    }

    /// Post a compact registration envelope.
    pub async fn register(&self, envelope: String) -> Result<RegisterResponse> {
        let url = self.url("/v1/register")?;
        self.send_json(self.http.post(url).body(envelope)).await
    }

    /// Post a compact submission envelope.
    pub async fn submit(&self, envelope: String) -> Result<SubmissionReceipt> {
        let url = self.url("/v1/submit")?;
        self.send_json(self.http.post(url).body(envelope)).await
    }
}

// =============================================================================
// Request/response types (mirrored from server handlers)
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct CreateInviteRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateInviteResponse {
    pub location_id: String,
    pub name: String,
    pub invite_token: String,
}

#[derive(Debug, Deserialize)]
pub struct LocationSummary {
    pub location_id: String,
    pub name: String,
    pub registered: bool,
    pub key_id: Option<String>,
    pub created_at: String,
    pub registered_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshReport {
    pub authorities: usize,
    pub responders: usize,
    pub chains_fetched: usize,
    pub chains_reused: usize,
    pub chains_missing: usize,
}

#[derive(Debug, Deserialize)]
pub struct RegisterResponse {
    pub location_id: String,
    pub name: String,
    pub key_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusReport {
    pub authorities: Vec<AuthorityStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorityStatus {
    pub authority_id: String,
    pub name: String,
    pub cardinality: i64,
    pub responders: Vec<ResponderHealth>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResponderHealth {
    pub responder_id: String,
    pub url: String,
    pub cardinality: i64,
    pub current: bool,
    pub locations: Vec<LocationHealth>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LocationHealth {
    pub location_id: String,
    pub name: String,
    pub retrieved_at: String,
    pub ping: bool,
    pub ocsp: bool,
    pub status: String,
}
