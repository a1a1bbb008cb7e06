//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{AuthorityRepo, ChainRepo, LocationRepo, ResponderRepo, ResultRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    AuthorityRepo + ResponderRepo + ChainRepo + LocationRepo + ResultRepo + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MetadataError::Internal(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single connection serializes writers; concurrent submissions
            // would otherwise hit "database is locked".
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::warn!(
            query_timeout_secs = query_timeout_secs,
            "SQLite query timeout is advisory only; slow statements cannot be cancelled. \
             Use PostgreSQL for deployments with many concurrent probe agents."
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Latest result per (responder, location). Shared by both backends; uses no
/// placeholders.
pub(crate) const LATEST_RESULTS_SQL: &str = r#"
SELECT
    a.authority_id AS authority_id,
    a.name AS authority_name,
    r.responder_id AS responder_id,
    r.url AS responder_url,
    l.location_id AS location_id,
    l.name AS location_name,
    res.retrieved_at AS retrieved_at,
    res.ping AS ping,
    res.ocsp AS ocsp
FROM results res
JOIN chains c ON c.chain_id = res.chain_id
JOIN responders r ON r.responder_id = c.responder_id
JOIN authorities a ON a.authority_id = r.authority_id
JOIN locations l ON l.location_id = res.location_id
WHERE NOT EXISTS (
    SELECT 1 FROM results newer
    JOIN chains nc ON nc.chain_id = newer.chain_id
    WHERE nc.responder_id = c.responder_id
      AND newer.location_id = res.location_id
      AND (newer.retrieved_at > res.retrieved_at
           OR (newer.retrieved_at = res.retrieved_at AND newer.result_id > res.result_id))
)
ORDER BY a.cardinality DESC, a.name, r.cardinality DESC, r.url, l.name
"#;

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::error::{check_cardinality, map_unique_violation};
    use crate::models::*;
    use time::format_description::BorrowedFormatItem;
    use time::macros::format_description;
    use time::{OffsetDateTime, UtcOffset};
    use uuid::Uuid;

    /// RFC 3339 in UTC with a fixed nine-digit fraction, so text comparison
    /// in SQL (`ORDER BY`, `MAX`, `>`) agrees with chronological order.
    const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z"
    );

    fn sqlite_timestamp(at: OffsetDateTime) -> MetadataResult<String> {
        at.to_offset(UtcOffset::UTC)
            .format(TIMESTAMP_FORMAT)
            .map_err(|e| MetadataError::Internal(format!("failed to format timestamp: {e}")))
    }

    #[async_trait]
    impl AuthorityRepo for SqliteStore {
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
                VALUES (?, ?, ?, ?)
                ON CONFLICT(name) DO UPDATE SET
                    cardinality = excluded.cardinality,
                    last_updated = MAX(authorities.last_updated, excluded.last_updated)
                RETURNING authority_id, name, cardinality, last_updated
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(cardinality)
            .bind(sqlite_timestamp(now)?)
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_authority(&self, authority_id: Uuid) -> MetadataResult<Option<AuthorityRow>> {
            let row = sqlx::query_as::<_, AuthorityRow>(
                "SELECT * FROM authorities WHERE authority_id = ?",
            )
            .bind(authority_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_authority_by_name(&self, name: &str) -> MetadataResult<Option<AuthorityRow>> {
            let row = sqlx::query_as::<_, AuthorityRow>("SELECT * FROM authorities WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn top_authorities(&self, n: u32) -> MetadataResult<Vec<AuthorityRow>> {
            let rows = sqlx::query_as::<_, AuthorityRow>(
                "SELECT * FROM authorities ORDER BY cardinality DESC, name LIMIT ?",
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
    impl ResponderRepo for SqliteStore {
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
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(authority_id, url) DO UPDATE SET
                    cardinality = excluded.cardinality,
                    last_updated = MAX(responders.last_updated, excluded.last_updated)
                RETURNING responder_id, authority_id, url, cardinality, last_updated
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(authority_id)
            .bind(url)
            .bind(cardinality)
            .bind(sqlite_timestamp(now)?)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| foreign_key_violation(e, || format!("authority {authority_id}")))?;
            Ok(row)
        }

        async fn get_responder(&self, responder_id: Uuid) -> MetadataResult<Option<ResponderRow>> {
            let row = sqlx::query_as::<_, ResponderRow>(
                "SELECT * FROM responders WHERE responder_id = ?",
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
                "SELECT * FROM responders WHERE authority_id = ? ORDER BY cardinality DESC, url",
            )
            .bind(authority_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl ChainRepo for SqliteStore {
        async fn insert_chain(&self, chain: &ChainRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO chains (
                    chain_id, responder_id, subject_certificate, issuer_certificate,
                    content_id, retrieved_at
                ) VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(chain.chain_id)
            .bind(chain.responder_id)
            .bind(&chain.subject_certificate)
            .bind(&chain.issuer_certificate)
            .bind(&chain.content_id)
            .bind(sqlite_timestamp(chain.retrieved_at)?)
            .execute(&self.pool)
            .await
            .map_err(|e| foreign_key_violation(e, || format!("responder {}", chain.responder_id)))?;
            Ok(())
        }

        async fn get_chain(&self, chain_id: Uuid) -> MetadataResult<Option<ChainRow>> {
            let row = sqlx::query_as::<_, ChainRow>("SELECT * FROM chains WHERE chain_id = ?")
                .bind(chain_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn most_recent_chain(&self, responder_id: Uuid) -> MetadataResult<Option<ChainRow>> {
            let row = sqlx::query_as::<_, ChainRow>(
                r#"
                SELECT * FROM chains WHERE responder_id = ?
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
                "SELECT * FROM chains WHERE responder_id = ? ORDER BY retrieved_at DESC, chain_id DESC",
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
                SELECT * FROM chains WHERE content_id = ?
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
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chains WHERE responder_id = ?")
                .bind(responder_id)
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        }
    }

    #[async_trait]
    impl LocationRepo for SqliteStore {
        async fn create_location(&self, location: &LocationRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO locations (
                    location_id, name, selector, validator_hash, public_key,
                    key_id, created_at, registered_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(location.location_id)
            .bind(&location.name)
            .bind(&location.selector)
            .bind(&location.validator_hash)
            .bind(&location.public_key)
            .bind(location.key_id)
            .bind(sqlite_timestamp(location.created_at)?)
            .bind(location.registered_at.map(sqlite_timestamp).transpose()?)
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
                sqlx::query_as::<_, LocationRow>("SELECT * FROM locations WHERE location_id = ?")
                    .bind(location_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn get_location_by_selector(
            &self,
            selector: &[u8],
        ) -> MetadataResult<Option<LocationRow>> {
            let row = sqlx::query_as::<_, LocationRow>("SELECT * FROM locations WHERE selector = ?")
                .bind(selector)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_location_by_key_id(
            &self,
            key_id: Uuid,
        ) -> MetadataResult<Option<LocationRow>> {
            let row = sqlx::query_as::<_, LocationRow>("SELECT * FROM locations WHERE key_id = ?")
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
                SET public_key = ?, key_id = ?, registered_at = ?
                WHERE location_id = ? AND public_key IS NULL
                "#,
            )
            .bind(public_key)
            .bind(key_id)
            .bind(sqlite_timestamp(now)?)
            .bind(location_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, || format!("key id {key_id} already registered")))?;
            Ok(result.rows_affected() == 1)
        }
    }

    #[async_trait]
    impl ResultRepo for SqliteStore {
        async fn insert_result(&self, result: &ResultRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO results (
                    result_id, chain_id, location_id, retrieved_at, ping, ocsp, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(result.result_id)
            .bind(result.chain_id)
            .bind(result.location_id)
            .bind(sqlite_timestamp(result.retrieved_at)?)
            .bind(result.ping)
            .bind(result.ocsp)
            .bind(sqlite_timestamp(result.created_at)?)
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
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM results WHERE chain_id = ?")
                .bind(chain_id)
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        }

        async fn count_results_for_location(&self, location_id: Uuid) -> MetadataResult<u64> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM results WHERE location_id = ?")
                    .bind(location_id)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count as u64)
        }

        async fn latest_results(&self) -> MetadataResult<Vec<LatestResultRow>> {
            let rows = sqlx::query_as::<_, LatestResultRow>(LATEST_RESULTS_SQL)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }
    }

    /// SQLite: "FOREIGN KEY constraint failed".
    fn foreign_key_violation(err: sqlx::Error, what: impl FnOnce() -> String) -> MetadataError {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.message().contains("FOREIGN KEY constraint")
        {
            return MetadataError::Constraint(format!("unknown {}", what()));
        }
        MetadataError::Database(err)
    }
}

const SCHEMA_SQL: &str = r#"
-- Certificate authorities ranked by observed certificate volume
CREATE TABLE IF NOT EXISTS authorities (
    authority_id BLOB PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    cardinality INTEGER NOT NULL CHECK (cardinality >= 0),
    last_updated TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_authorities_cardinality ON authorities(cardinality DESC);

-- OCSP endpoints
CREATE TABLE IF NOT EXISTS responders (
    responder_id BLOB PRIMARY KEY,
    authority_id BLOB NOT NULL REFERENCES authorities(authority_id),
    url TEXT NOT NULL,
    cardinality INTEGER NOT NULL CHECK (cardinality >= 0),
    last_updated TEXT NOT NULL,
    UNIQUE (authority_id, url)
);

-- Cached certificate pairs (insert-only)
CREATE TABLE IF NOT EXISTS chains (
    chain_id BLOB PRIMARY KEY,
    responder_id BLOB NOT NULL REFERENCES responders(responder_id),
    subject_certificate BLOB NOT NULL,
    issuer_certificate BLOB NOT NULL,
    content_id TEXT NOT NULL,
    retrieved_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chains_responder ON chains(responder_id, retrieved_at);
CREATE INDEX IF NOT EXISTS idx_chains_content_id ON chains(content_id, retrieved_at);

-- Probe agents
CREATE TABLE IF NOT EXISTS locations (
    location_id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    selector BLOB NOT NULL UNIQUE,
    validator_hash TEXT NOT NULL,
    public_key TEXT,
    key_id BLOB UNIQUE,
    created_at TEXT NOT NULL,
    registered_at TEXT
);

-- Measurement log (append-only)
CREATE TABLE IF NOT EXISTS results (
    result_id BLOB PRIMARY KEY,
    chain_id BLOB NOT NULL REFERENCES chains(chain_id),
    location_id BLOB NOT NULL REFERENCES locations(location_id),
    retrieved_at TEXT NOT NULL,
    ping INTEGER NOT NULL,
    ocsp INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_results_chain ON results(chain_id);
CREATE INDEX IF NOT EXISTS idx_results_location ON results(location_id, retrieved_at);
"#;
