//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult, check_cardinality, map_unique_violation};
use crate::models::*;
use crate::repos::{AuthorityRepo, ChainRepo, LocationRepo, ResponderRepo, ResultRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use ocspwatch_core::config::PgSslMode;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL: SQLSTATE 23503 (foreign_key_violation).
fn foreign_key_violation(err: sqlx::Error, what: impl FnOnce() -> String) -> MetadataError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.code().as_deref() == Some("23503")
    {
        return MetadataError::Constraint(format!("unknown {}", what()));
    }
    MetadataError::Database(err)
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// Lets the password come from its own environment variable.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{timeout_ms}ms"))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // Prepared statements hold one command each.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AuthorityRepo for PostgresStore {
    async fn upsert_authority(
        &self,
        name: &str,
        cardinality: i64,
        now: OffsetDateTime,
    ) -> MetadataResult<AuthorityRow> {
        check_cardinality(cardinality)?;
        let row = sqlx::query_as::<_, AuthorityRow>(
            r#"
            INSERT INTO authorities (authority_id, name, cardinality, last_updated)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT(name) DO UPDATE SET
                cardinality = EXCLUDED.cardinality,
                last_updated = GREATEST(authorities.last_updated, EXCLUDED.last_updated)
            RETURNING authority_id, name, cardinality, last_updated
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(cardinality)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_authority(&self, authority_id: Uuid) -> MetadataResult<Option<AuthorityRow>> {
        let row = sqlx::query_as::<_, AuthorityRow>(
            "SELECT * FROM authorities WHERE authority_id = $1",
        )
        .bind(authority_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_authority_by_name(&self, name: &str) -> MetadataResult<Option<AuthorityRow>> {
        let row = sqlx::query_as::<_, AuthorityRow>("SELECT * FROM authorities WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn top_authorities(&self, n: u32) -> MetadataResult<Vec<AuthorityRow>> {
        let rows = sqlx::query_as::<_, AuthorityRow>(
            "SELECT * FROM authorities ORDER BY cardinality DESC, name LIMIT $1",
        )
        .bind(i64::from(n))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn count_authorities(&self) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM authorities")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl ResponderRepo for PostgresStore {
    async fn upsert_responder(
        &self,
        authority_id: Uuid,
        url: &str,
        cardinality: i64,
        now: OffsetDateTime,
    ) -> MetadataResult<ResponderRow> {
        check_cardinality(cardinality)?;
        let row = sqlx::query_as::<_, ResponderRow>(
            r#"
            INSERT INTO responders (responder_id, authority_id, url, cardinality, last_updated)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT(authority_id, url) DO UPDATE SET
                cardinality = EXCLUDED.cardinality,
                last_updated = GREATEST(responders.last_updated, EXCLUDED.last_updated)
            RETURNING responder_id, authority_id, url, cardinality, last_updated
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(authority_id)
        .bind(url)
        .bind(cardinality)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| foreign_key_violation(e, || format!("authority {authority_id}")))?;
        Ok(row)
    }

    async fn get_responder(&self, responder_id: Uuid) -> MetadataResult<Option<ResponderRow>> {
        let row = sqlx::query_as::<_, ResponderRow>(
            "SELECT * FROM responders WHERE responder_id = $1",
        )
        .bind(responder_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_responders_for_authority(
        &self,
        authority_id: Uuid,
    ) -> MetadataResult<Vec<ResponderRow>> {
        let rows = sqlx::query_as::<_, ResponderRow>(
            "SELECT * FROM responders WHERE authority_id = $1 ORDER BY cardinality DESC, url",
        )
        .bind(authority_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl ChainRepo for PostgresStore {
    async fn insert_chain(&self, chain: &ChainRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chains (
                chain_id, responder_id, subject_certificate, issuer_certificate,
                content_id, retrieved_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(chain.chain_id)
        .bind(chain.responder_id)
        .bind(&chain.subject_certificate)
        .bind(&chain.issuer_certificate)
        .bind(&chain.content_id)
        .bind(chain.retrieved_at)
        .execute(&self.pool)
        .await
        .map_err(|e| foreign_key_violation(e, || format!("responder {}", chain.responder_id)))?;
        Ok(())
    }

    async fn get_chain(&self, chain_id: Uuid) -> MetadataResult<Option<ChainRow>> {
        let row = sqlx::query_as::<_, ChainRow>("SELECT * FROM chains WHERE chain_id = $1")
            .bind(chain_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn most_recent_chain(&self, responder_id: Uuid) -> MetadataResult<Option<ChainRow>> {
        let row = sqlx::query_as::<_, ChainRow>(
            r#"
            SELECT * FROM chains WHERE responder_id = $1
            ORDER BY retrieved_at DESC, chain_id DESC
            LIMIT 1
            "#,
        )
        .bind(responder_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_chains_for_responder(
        &self,
        responder_id: Uuid,
    ) -> MetadataResult<Vec<ChainRow>> {
        let rows = sqlx::query_as::<_, ChainRow>(
            "SELECT * FROM chains WHERE responder_id = $1 ORDER BY retrieved_at DESC, chain_id DESC",
        )
        .bind(responder_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_chain_by_content_id(
        &self,
        content_id: &str,
    ) -> MetadataResult<Option<ChainRow>> {
        let row = sqlx::query_as::<_, ChainRow>(
            r#"
            SELECT * FROM chains WHERE content_id = $1
            ORDER BY retrieved_at DESC, chain_id DESC
            LIMIT 1
            "#,
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn count_chains_for_responder(&self, responder_id: Uuid) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chains WHERE responder_id = $1")
            .bind(responder_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl LocationRepo for PostgresStore {
    async fn create_location(&self, location: &LocationRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO locations (
                location_id, name, selector, validator_hash, public_key,
                key_id, created_at, registered_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(location.location_id)
        .bind(&location.name)
        .bind(&location.selector)
        .bind(&location.validator_hash)
        .bind(&location.public_key)
        .bind(location.key_id)
        .bind(location.created_at)
        .bind(location.registered_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_unique_violation(e, || {
                format!("location {} conflicts with an existing invite", location.name)
            })
        })?;
        Ok(())
    }

    async fn get_location(&self, location_id: Uuid) -> MetadataResult<Option<LocationRow>> {
        let row =
            sqlx::query_as::<_, LocationRow>("SELECT * FROM locations WHERE location_id = $1")
                .bind(location_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn get_location_by_selector(
        &self,
        selector: &[u8],
    ) -> MetadataResult<Option<LocationRow>> {
        let row = sqlx::query_as::<_, LocationRow>("SELECT * FROM locations WHERE selector = $1")
            .bind(selector)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_location_by_key_id(
        &self,
        key_id: Uuid,
    ) -> MetadataResult<Option<LocationRow>> {
        let row = sqlx::query_as::<_, LocationRow>("SELECT * FROM locations WHERE key_id = $1")
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_locations(&self) -> MetadataResult<Vec<LocationRow>> {
        let rows = sqlx::query_as::<_, LocationRow>(
            "SELECT * FROM locations ORDER BY name, created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn register_location(
        &self,
        location_id: Uuid,
        public_key: &str,
        key_id: Uuid,
        now: OffsetDateTime,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE locations
            SET public_key = $1, key_id = $2, registered_at = $3
            WHERE location_id = $4 AND public_key IS NULL
            "#,
        )
        .bind(public_key)
        .bind(key_id)
        .bind(now)
        .bind(location_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, || format!("key id {key_id} already registered")))?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl ResultRepo for PostgresStore {
    async fn insert_result(&self, result: &ResultRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO results (
                result_id, chain_id, location_id, retrieved_at, ping, ocsp, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(result.result_id)
        .bind(result.chain_id)
        .bind(result.location_id)
        .bind(result.retrieved_at)
        .bind(result.ping)
        .bind(result.ocsp)
        .bind(result.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            foreign_key_violation(e, || {
                format!("chain {} or location {}", result.chain_id, result.location_id)
            })
        })?;
        Ok(())
    }

    async fn count_results_for_chain(&self, chain_id: Uuid) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM results WHERE chain_id = $1")
            .bind(chain_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn count_results_for_location(&self, location_id: Uuid) -> MetadataResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM results WHERE location_id = $1")
                .bind(location_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn latest_results(&self) -> MetadataResult<Vec<LatestResultRow>> {
        let rows = sqlx::query_as::<_, LatestResultRow>(crate::store::LATEST_RESULTS_SQL)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
