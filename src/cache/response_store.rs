//! Persistent fingerprint → response store backed by SQLite.
//!
//! Entries are written once (first capture wins) inside a transaction together
//! with their audit row; `cache_log` is append-only and records every fetch.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::path::Path;

use crate::db::{migrate, Db};
use crate::error::{Result, WikinetError};

/// A raw response body plus the time it was originally captured
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub body: String,
    pub retrieved_at: DateTime<Utc>,
}

/// What happened to a single fetch call, as recorded in `cache_log`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    HitMemory,
    HitStore,
    Stored,
    Failed,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::HitMemory => "hit-memory",
            CacheOutcome::HitStore => "hit-store",
            CacheOutcome::Stored => "stored",
            CacheOutcome::Failed => "failed",
        }
    }
}

/// Aggregate view of the store, used by the `cache-stats` binary
#[derive(Debug, Clone, Default)]
pub struct CacheSummary {
    pub entries: i64,
    pub entries_by_endpoint: Vec<(String, i64)>,
    pub log_by_outcome: Vec<(String, i64)>,
    pub oldest: Option<String>,
    pub newest: Option<String>,
}

/// SQLite-backed response cache
#[derive(Debug, Clone)]
pub struct ResponseStore {
    db: Db,
}

impl ResponseStore {
    /// Open (or create) the cache database and apply pending migrations
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Db::new(path);
        db.with_connection(migrate::run_migrations).await?;
        Ok(Self { db })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Look up a cached response by fingerprint
    pub async fn get(&self, fingerprint: &str) -> Result<Option<CachedResponse>> {
        let fingerprint = fingerprint.to_string();
        self.db
            .with_connection(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT body, retrieved_at FROM http_cache WHERE fingerprint = ?1",
                        params![fingerprint],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                    )
                    .optional()?;

                match row {
                    Some((body, retrieved_at)) => {
                        let retrieved_at = DateTime::parse_from_rfc3339(&retrieved_at)
                            .map_err(|e| {
                                WikinetError::InvalidInput(format!(
                                    "Corrupt retrieved_at '{}' in cache: {}",
                                    retrieved_at, e
                                ))
                            })?
                            .with_timezone(&Utc);
                        Ok(Some(CachedResponse { body, retrieved_at }))
                    }
                    None => Ok(None),
                }
            })
            .await
    }

    /// Store a response and its audit row atomically.
    ///
    /// An existing entry for the same fingerprint is kept (first capture wins).
    pub async fn put(&self, fingerprint: &str, endpoint: &str, response: &CachedResponse) -> Result<()> {
        let fingerprint = fingerprint.to_string();
        let endpoint = endpoint.to_string();
        let body = response.body.clone();
        let retrieved_at = response.retrieved_at.to_rfc3339();

        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO http_cache (fingerprint, endpoint, body, retrieved_at) \
                     VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT(fingerprint) DO NOTHING",
                    params![fingerprint, endpoint, body, retrieved_at],
                )?;
                tx.execute(
                    "INSERT INTO cache_log (fingerprint, endpoint, outcome, recorded_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![fingerprint, endpoint, CacheOutcome::Stored.as_str(), Utc::now().to_rfc3339()],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    /// Append an audit row for a fetch that did not store anything
    pub async fn record(&self, fingerprint: &str, endpoint: &str, outcome: CacheOutcome) -> Result<()> {
        let fingerprint = fingerprint.to_string();
        let endpoint = endpoint.to_string();

        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT INTO cache_log (fingerprint, endpoint, outcome, recorded_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![fingerprint, endpoint, outcome.as_str(), Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await
    }

    /// Number of audit rows for one fingerprint
    pub async fn log_count(&self, fingerprint: &str) -> Result<i64> {
        let fingerprint = fingerprint.to_string();
        self.db
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM cache_log WHERE fingerprint = ?1",
                    params![fingerprint],
                    |row| row.get(0),
                )
                .map_err(WikinetError::from)
            })
            .await
    }

    pub async fn summary(&self) -> Result<CacheSummary> {
        self.db
            .with_connection(|conn| {
                let entries: i64 =
                    conn.query_row("SELECT COUNT(*) FROM http_cache", [], |row| row.get(0))?;

                let mut stmt = conn.prepare(
                    "SELECT endpoint, COUNT(*) FROM http_cache GROUP BY endpoint ORDER BY COUNT(*) DESC",
                )?;
                let entries_by_endpoint = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

                let mut stmt = conn.prepare(
                    "SELECT outcome, COUNT(*) FROM cache_log GROUP BY outcome ORDER BY outcome",
                )?;
                let log_by_outcome = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

                let (oldest, newest) = conn.query_row(
                    "SELECT MIN(retrieved_at), MAX(retrieved_at) FROM http_cache",
                    [],
                    |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
                )?;

                Ok(CacheSummary {
                    entries,
                    entries_by_endpoint,
                    log_by_outcome,
                    oldest,
                    newest,
                })
            })
            .await
    }
}
