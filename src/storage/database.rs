//! Database Layer with Connection Pooling and Safe Transactions
//!
//! SQLite persistence for the content cache, diagram cache, conversation
//! turns and run history:
//! - Connection pooling via r2d2 for concurrent access
//! - Panic-safe transactions with automatic rollback
//! - Version-tracked migrations
//! - WAL mode for concurrent readers during analysis

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};

use crate::types::{AtlasError, Result, ResultExt};

/// Shared database handle for async contexts.
pub type SharedDatabase = Arc<Database>;

const SCHEMA: &str = include_str!("schema.sql");

/// Current schema version for migration tracking
const SCHEMA_VERSION: u32 = 2;

struct Migration {
    version: u32,
    description: &'static str,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 2,
    description: "Index conversation turns by time",
    up: "CREATE INDEX IF NOT EXISTS idx_turns_asked ON conversation_turns(asked_at)",
}];

/// Row of the persistent record tier, verified by the cache before use
#[derive(Debug, Clone)]
pub struct StoredRecordRow {
    pub content_hash: String,
    pub record_json: String,
    pub checksum: u32,
    pub size_bytes: usize,
    pub created_at: DateTime<Utc>,
}

/// One persisted conversation turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRow {
    pub session_id: String,
    pub turn_index: usize,
    pub question: String,
    pub answer: String,
    pub cited_json: String,
    pub grounded: bool,
    pub asked_at: DateTime<Utc>,
}

/// Connection pool configuration
///
/// Pool size is calculated from CPU cores.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: u32,
    /// Minimum idle connections to keep ready
    pub min_idle: u32,
    /// Timeout for acquiring a connection (seconds)
    pub connection_timeout_secs: u64,
}

impl PoolConfig {
    const MIN_POOL_SIZE: u32 = 4;
    const MAX_POOL_SIZE: u32 = 32;

    /// Formula: clamp(cores * 2, MIN, MAX)
    pub fn optimal_pool_size() -> u32 {
        let cores = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(4);
        (cores * 2).clamp(Self::MIN_POOL_SIZE, Self::MAX_POOL_SIZE)
    }

    pub fn auto() -> Self {
        let max_size = Self::optimal_pool_size();
        Self {
            max_size,
            min_idle: (max_size / 4).max(2),
            connection_timeout_secs: 30,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::auto()
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AtlasError::Storage(format!("invalid timestamp '{}': {}", s, e)))
}

/// Thread-safe database with connection pooling.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, PoolConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: PoolConfig) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let manager =
            SqliteConnectionManager::file(path.as_ref()).with_init(Self::configure_connection);

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(std::time::Duration::from_secs(
                config.connection_timeout_secs,
            ))
            .build(manager)
            .map_err(|e| AtlasError::Storage(format!("Failed to create connection pool: {}", e)))?;

        Ok(Self { pool })
    }

    /// Open an in-memory database for testing or temporary use.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();

        // A single connection keeps every caller on the same in-memory database
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| AtlasError::Storage(format!("Failed to create in-memory pool: {}", e)))?;

        Ok(Self { pool })
    }

    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA busy_timeout = 5000;
            PRAGMA wal_autocheckpoint = 1000;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            AtlasError::Storage(format!("Failed to acquire database connection: {}", e))
        })
    }

    /// Initialize database schema.
    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        let current_version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        conn.execute_batch(SCHEMA)
            .with_context("Failed to initialize database schema")?;
        drop(conn);

        // Fresh databases get every column from schema.sql directly
        if current_version == 0 {
            let conn = self.conn()?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to set schema version")?;
            return Ok(());
        }

        self.migrate(current_version)
    }

    fn migrate(&self, current_version: u32) -> Result<()> {
        let conn = self.conn()?;

        for migration in MIGRATIONS {
            if migration.version > current_version {
                conn.execute_batch(migration.up).with_context(format!(
                    "Failed to apply migration {}: {}",
                    migration.version, migration.description
                ))?;

                tracing::info!(
                    "Applied migration {}: {}",
                    migration.version,
                    migration.description
                );
            }
        }

        if current_version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to update schema version")?;
        }

        Ok(())
    }

    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.conn()?;
        Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
    }

    /// Execute `f` inside a transaction; panics and errors roll back.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .with_context("Failed to start transaction")?;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&tx)));

        match result {
            Ok(Ok(value)) => {
                tx.commit().with_context("Failed to commit transaction")?;
                Ok(value)
            }
            // Transaction rolls back on drop
            Ok(Err(e)) => Err(e),
            Err(panic_payload) => {
                let panic_msg = panic_payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic_payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "Unknown panic".to_string());

                tracing::error!("Transaction panicked: {}", panic_msg);
                Err(AtlasError::Storage(format!(
                    "Transaction panicked: {}",
                    panic_msg
                )))
            }
        }
    }

    // =========================================================================
    // Analysis Records
    // =========================================================================

    /// Insert or replace a record row; the statement commits fully or not at all.
    pub fn put_record(&self, content_hash: &str, record_json: &str, checksum: u32) -> Result<()> {
        let now = timestamp(Utc::now());
        self.transaction(|conn| {
            conn.execute(
                "INSERT INTO analysis_records
                    (content_hash, record_json, checksum, size_bytes, created_at, accessed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(content_hash) DO UPDATE SET
                    record_json = excluded.record_json,
                    checksum = excluded.checksum,
                    size_bytes = excluded.size_bytes,
                    accessed_at = excluded.accessed_at",
                params![
                    content_hash,
                    record_json,
                    checksum as i64,
                    record_json.len() as i64,
                    now
                ],
            )?;
            Ok(())
        })
    }

    /// Load a record row and bump its access time.
    pub fn load_record(&self, content_hash: &str) -> Result<Option<StoredRecordRow>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT content_hash, record_json, checksum, size_bytes, created_at
                 FROM analysis_records WHERE content_hash = ?1",
                params![content_hash],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((hash, json, checksum, size, created_at)) = row else {
            return Ok(None);
        };

        conn.execute(
            "UPDATE analysis_records SET accessed_at = ?1 WHERE content_hash = ?2",
            params![timestamp(Utc::now()), content_hash],
        )?;

        Ok(Some(StoredRecordRow {
            content_hash: hash,
            record_json: json,
            checksum: u32::try_from(checksum).map_err(|_| {
                AtlasError::corruption(content_hash, format!("checksum out of range: {}", checksum))
            })?,
            size_bytes: size.max(0) as usize,
            created_at: parse_timestamp(&created_at)?,
        }))
    }

    pub fn has_record(&self, content_hash: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM analysis_records WHERE content_hash = ?1",
                params![content_hash],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// (row count, total bytes) of the persistent record tier
    pub fn record_stats(&self) -> Result<(usize, usize)> {
        let conn = self.conn()?;
        let (count, bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM analysis_records",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((count.max(0) as usize, bytes.max(0) as usize))
    }

    /// Delete records not accessed since `cutoff`
    pub fn delete_records_accessed_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "DELETE FROM analysis_records WHERE accessed_at < ?1",
            params![timestamp(cutoff)],
        )?)
    }

    pub fn clear_records(&self) -> Result<usize> {
        let conn = self.conn()?;
        let records = conn.execute("DELETE FROM analysis_records", [])?;
        conn.execute("DELETE FROM diagram_models", [])?;
        Ok(records)
    }

    // =========================================================================
    // Diagram Models
    // =========================================================================

    pub fn put_diagram(&self, input_key: &str, model_json: &str, checksum: u32) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO diagram_models (input_key, model_json, checksum, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![input_key, model_json, checksum as i64, timestamp(Utc::now())],
        )?;
        Ok(())
    }

    pub fn load_diagram(&self, input_key: &str) -> Result<Option<(String, u32)>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT model_json, checksum FROM diagram_models WHERE input_key = ?1",
                params![input_key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        match row {
            Some((json, checksum)) => {
                let checksum = u32::try_from(checksum).map_err(|_| {
                    AtlasError::corruption(input_key, format!("checksum out of range: {}", checksum))
                })?;
                Ok(Some((json, checksum)))
            }
            None => Ok(None),
        }
    }

    // =========================================================================
    // Conversation Turns
    // =========================================================================

    pub fn append_turn(&self, turn: &TurnRow) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO conversation_turns
                (session_id, turn_index, question, answer, cited_json, grounded, asked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                turn.session_id,
                turn.turn_index as i64,
                turn.question,
                turn.answer,
                turn.cited_json,
                turn.grounded,
                timestamp(turn.asked_at)
            ],
        )?;
        Ok(())
    }

    pub fn load_turns(&self, session_id: &str) -> Result<Vec<TurnRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, turn_index, question, answer, cited_json, grounded, asked_at
             FROM conversation_turns WHERE session_id = ?1 ORDER BY turn_index",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut turns = Vec::new();
        for row in rows {
            let (session_id, index, question, answer, cited_json, grounded, asked_at) = row?;
            turns.push(TurnRow {
                session_id,
                turn_index: index.max(0) as usize,
                question,
                answer,
                cited_json,
                grounded,
                asked_at: parse_timestamp(&asked_at)?,
            });
        }
        Ok(turns)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "DELETE FROM conversation_turns WHERE session_id = ?1",
            params![session_id],
        )?)
    }

    /// Delete sessions whose latest turn is older than `cutoff`
    pub fn delete_sessions_idle_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "DELETE FROM conversation_turns WHERE session_id IN (
                SELECT session_id FROM conversation_turns
                GROUP BY session_id HAVING MAX(asked_at) < ?1
             )",
            params![timestamp(cutoff)],
        )?)
    }

    // =========================================================================
    // Runs
    // =========================================================================

    pub fn save_run(
        &self,
        run_id: &str,
        snapshot_id: &str,
        state: &str,
        status_json: &str,
        started_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO runs
                (run_id, snapshot_id, state, status_json, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id,
                snapshot_id,
                state,
                status_json,
                timestamp(started_at),
                finished_at.map(timestamp)
            ],
        )?;
        Ok(())
    }

    /// Status JSON of the most recently started run
    pub fn load_latest_run(&self) -> Result<Option<String>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT status_json FROM runs ORDER BY started_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?)
    }
}
