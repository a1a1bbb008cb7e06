//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Number of top authorities in a manifest when the agent does not ask.
    #[serde(default = "default_manifest_n")]
    pub manifest_default_n: u32,
    /// Hard cap on `n` for manifest requests; larger requests are rejected.
    #[serde(default = "default_manifest_n")]
    pub manifest_max_n: u32,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// The endpoint is unauthenticated; restrict it at the network level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_manifest_n() -> u32 {
    crate::DEFAULT_TOP_N
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            manifest_default_n: default_manifest_n(),
            manifest_max_n: default_manifest_n(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.manifest_max_n == 0 {
            return Err("server.manifest_max_n must be at least 1".to_string());
        }
        if self.manifest_default_n == 0 || self.manifest_default_n > self.manifest_max_n {
            return Err(format!(
                "server.manifest_default_n {} must be between 1 and manifest_max_n {}",
                self.manifest_default_n, self.manifest_max_n
            ));
        }
        Ok(())
    }
}

/// Admin access configuration.
///
/// A single shared secret protects operator endpoints. Only its SHA-256 hash
/// is configured.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// SHA-256 hex of the admin secret (64 characters).
    /// Generate with: `echo -n "your-secret" | sha256sum`
    pub token_hash: String,
}

impl AdminConfig {
    /// Create a test configuration with a dummy token hash.
    ///
    /// **For testing only.** The hash is deterministic but not a real secret.
    pub fn for_testing() -> Self {
        Self {
            // SHA256 of "test-admin-token"
            token_hash: "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
                .to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let hash = self.token_hash.strip_prefix("sha256:").unwrap_or(&self.token_hash);
        if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err("admin.token_hash must be 64 hex characters (SHA-256)".to_string());
        }
        Ok(())
    }

    /// The configured hash without an optional `sha256:` prefix, lowercased.
    pub fn normalized_hash(&self) -> String {
        self.token_hash
            .strip_prefix("sha256:")
            .unwrap_or(&self.token_hash)
            .to_ascii_lowercase()
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (testing and single-node deployments).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds. Advisory only: SQLite cannot cancel
        /// running statements, slow ones are only logged.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over individual fields.
        url: Option<String>,
        /// Database host.
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// Prefer OCSPWATCH_METADATA__PASSWORD over storing it in the file.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(60)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/ocspwatch.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) => Ok(()),
                (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => Err(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ),
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

/// Freshness thresholds for cached authorities, responders and chains.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FreshnessConfig {
    /// Records older than this many days are refreshed (default: 7).
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: u32,
    /// Serve an expired chain when the responder has no unexpired chain at
    /// all, instead of refetching (default: true).
    #[serde(default = "default_accept_expired")]
    pub accept_expired_when_not_current: bool,
}

fn default_stale_after_days() -> u32 {
    crate::DEFAULT_STALE_AFTER_DAYS
}

fn default_accept_expired() -> bool {
    true
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            stale_after_days: default_stale_after_days(),
            accept_expired_when_not_current: default_accept_expired(),
        }
    }
}

impl FreshnessConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::days(i64::from(self.stale_after_days))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.stale_after_days == 0 {
            return Err("freshness.stale_after_days must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Certificate-search oracle (Censys) configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OracleConfig {
    /// API base URL.
    #[serde(default = "default_oracle_base_url")]
    pub base_url: String,
    /// API id. Falls back to CENSYS_API_ID if unset.
    pub api_id: Option<String>,
    /// API secret. Falls back to CENSYS_API_SECRET if unset.
    pub api_secret: Option<String>,
    /// Maximum oracle requests per second (default: 0.2).
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    /// Per-call timeout in seconds. A timed-out call yields no data.
    #[serde(default = "default_oracle_timeout_secs")]
    pub timeout_secs: u64,
    /// User-Agent sent to the oracle and AIA issuer URLs.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_oracle_base_url() -> String {
    "https://search.censys.io/api/v1".to_string()
}

fn default_requests_per_second() -> f64 {
    0.2
}

fn default_oracle_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("ocspwatch/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: default_oracle_base_url(),
            api_id: None,
            api_secret: None,
            requests_per_second: default_requests_per_second(),
            timeout_secs: default_oracle_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.requests_per_second.is_finite() && self.requests_per_second > 0.0) {
            return Err(format!(
                "oracle.requests_per_second must be positive, got {}",
                self.requests_per_second
            ));
        }
        if self.timeout_secs == 0 {
            return Err("oracle.timeout_secs must be at least 1".to_string());
        }
        match (self.api_id.as_ref(), self.api_secret.as_ref()) {
            (Some(_), Some(_)) | (None, None) => Ok(()),
            _ => Err(
                "oracle config requires both api_id and api_secret when either is set".to_string(),
            ),
        }
    }
}

/// Refresh-cycle scheduling.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Run refresh cycles automatically (disabled by default).
    #[serde(default)]
    pub auto_schedule_enabled: bool,
    /// Seconds between automatic cycles (default: 1 hour).
    #[serde(default = "default_refresh_interval_secs")]
    pub interval_secs: u64,
    /// Number of top authorities tracked by automatic cycles.
    #[serde(default = "default_manifest_n")]
    pub top_n: u32,
}

fn default_refresh_interval_secs() -> u64 {
    3600
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            auto_schedule_enabled: false,
            interval_secs: default_refresh_interval_secs(),
            top_n: default_manifest_n(),
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.auto_schedule_enabled && self.interval_secs == 0 {
            return Err("refresh.interval_secs cannot be 0 when auto scheduling".to_string());
        }
        if self.top_n == 0 {
            return Err("refresh.top_n must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Admin access (required).
    pub admin: AdminConfig,
    #[serde(default)]
    pub freshness: FreshnessConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses SQLite metadata and a dummy admin token.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            metadata: MetadataConfig::default(),
            admin: AdminConfig::for_testing(),
            freshness: FreshnessConfig::default(),
            oracle: OracleConfig::default(),
            refresh: RefreshConfig::default(),
        }
    }

    /// Validate every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.metadata.validate()?;
        self.admin.validate()?;
        self.freshness.validate()?;
        self.oracle.validate()?;
        self.refresh.validate()
    }
}
