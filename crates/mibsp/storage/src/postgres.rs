//! PostgreSQL adapter for MIBSP storage.
//!
//! This adapter is the transactional source of truth shared by every worker
//! process. `sequence` is the primary key of `mibsp_ledger_entries`, so two
//! writers racing on the same tail cannot both commit: the loser receives a
//! unique violation, surfaced as [`StorageError::TailMoved`]. A trigger
//! rejects `UPDATE`, `DELETE` and `TRUNCATE` on the entry table.

use crate::model::{LedgerQuery, QueryWindow, StoredEntry, TailRef};
use crate::traits::{LedgerStore, TrackingIdRegistry};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mibsp_types::{Actor, Detail, LedgerEntry, LinkHash, SubjectRef, TrackingId};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};

/// Arbitrary constant used to serialize schema initialization across workers.
const SCHEMA_LOCK_KEY: i64 = 0x6d69_6273_705f_6c67;

const ENTRY_COLUMNS: &str = "sequence, timestamp, actor_role, actor_id, action, subject_ref, \
                             detail, prev_link_hash, link_hash";

/// PostgreSQL-backed storage adapter.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS mibsp_ledger_entries (
                sequence BIGINT PRIMARY KEY CHECK (sequence > 0),
                timestamp TIMESTAMPTZ NOT NULL,
                actor_role TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                action TEXT NOT NULL,
                subject_ref TEXT NOT NULL,
                detail TEXT NOT NULL,
                prev_link_hash CHAR(64) NOT NULL,
                link_hash CHAR(64) NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS mibsp_ledger_entries_action_idx ON mibsp_ledger_entries (action)",
            "CREATE INDEX IF NOT EXISTS mibsp_ledger_entries_actor_idx ON mibsp_ledger_entries (actor_id)",
            "CREATE INDEX IF NOT EXISTS mibsp_ledger_entries_subject_idx ON mibsp_ledger_entries (subject_ref)",
            "CREATE INDEX IF NOT EXISTS mibsp_ledger_entries_timestamp_idx ON mibsp_ledger_entries (timestamp)",
            r#"
            CREATE OR REPLACE FUNCTION mibsp_ledger_reject_mutation() RETURNS trigger AS $$
            BEGIN
                RAISE EXCEPTION 'mibsp_ledger_entries is append-only (% rejected)', TG_OP;
            END;
            $$ LANGUAGE plpgsql
            "#,
            "DROP TRIGGER IF EXISTS mibsp_ledger_append_only ON mibsp_ledger_entries",
            r#"
            CREATE TRIGGER mibsp_ledger_append_only
                BEFORE UPDATE OR DELETE ON mibsp_ledger_entries
                FOR EACH ROW EXECUTE FUNCTION mibsp_ledger_reject_mutation()
            "#,
            "DROP TRIGGER IF EXISTS mibsp_ledger_no_truncate ON mibsp_ledger_entries",
            r#"
            CREATE TRIGGER mibsp_ledger_no_truncate
                BEFORE TRUNCATE ON mibsp_ledger_entries
                FOR EACH STATEMENT EXECUTE FUNCTION mibsp_ledger_reject_mutation()
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS mibsp_tracking_ids (
                tracking_id CHAR(11) PRIMARY KEY,
                issued_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        ];

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Backend(format!("schema lock failed: {e}")))?;
        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        tx.commit()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresStorage {
    async fn read_tail(&self) -> StorageResult<Option<LedgerEntry>> {
        let sql =
            format!("SELECT {ENTRY_COLUMNS} FROM mibsp_ledger_entries ORDER BY sequence DESC LIMIT 1");
        let row = sqlx::query(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        row.map(entry_from_row).transpose()
    }

    async fn insert_if_tail_unchanged(
        &self,
        expected_tail: Option<TailRef>,
        entry: &LedgerEntry,
    ) -> StorageResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let current = sqlx::query(
            "SELECT sequence, link_hash FROM mibsp_ledger_entries ORDER BY sequence DESC LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?
        .map(|row| -> StorageResult<TailRef> {
            Ok(TailRef {
                sequence: from_i64(get(&row, "sequence")?)?,
                link_hash: parse_hash(&get::<String>(&row, "link_hash")?)?,
            })
        })
        .transpose()?;

        if current != expected_tail {
            return Err(StorageError::TailMoved {
                expected: expected_tail.map(|t| t.sequence),
                found: current.map(|t| t.sequence),
            });
        }
        let follows = match expected_tail {
            Some(tail) => {
                tail.sequence.checked_add(1) == Some(entry.sequence)
                    && entry.prev_link_hash == tail.link_hash
            }
            None => entry.sequence == 1 && entry.prev_link_hash.is_genesis(),
        };
        if !follows {
            return Err(StorageError::InvariantViolation(format!(
                "entry {} does not extend the current tail",
                entry.sequence
            )));
        }

        let sql = format!(
            "INSERT INTO mibsp_ledger_entries ({ENTRY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        );
        sqlx::query(&sql)
            .bind(to_i64(entry.sequence)?)
            .bind(entry.timestamp)
            .bind(entry.actor.role().code())
            .bind(entry.actor.id())
            .bind(entry.action.code())
            .bind(entry.subject_ref.as_str())
            .bind(entry.detail.as_str())
            .bind(entry.prev_link_hash.to_hex())
            .bind(entry.link_hash.to_hex())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_append_error(e, expected_tail))?;

        tx.commit()
            .await
            .map_err(|e| map_append_error(e, expected_tail))?;
        Ok(())
    }

    async fn scan_ascending(&self, from: u64, to: u64) -> StorageResult<Vec<StoredEntry>> {
        if from > to {
            return Ok(vec![]);
        }
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM mibsp_ledger_entries \
             WHERE sequence BETWEEN $1 AND $2 ORDER BY sequence ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(to_i64(from)?)
            .bind(to_i64(to)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        rows.into_iter().map(stored_from_row).collect()
    }

    async fn get_entry(&self, sequence: u64) -> StorageResult<Option<LedgerEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM mibsp_ledger_entries WHERE sequence = $1");
        let row = sqlx::query(&sql)
            .bind(to_i64(sequence)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        row.map(entry_from_row).transpose()
    }

    async fn query_entries(
        &self,
        query: &LedgerQuery,
        window: QueryWindow,
    ) -> StorageResult<Vec<LedgerEntry>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {ENTRY_COLUMNS} FROM mibsp_ledger_entries WHERE TRUE"
        ));
        push_filters(&mut builder, query);
        builder.push(" ORDER BY sequence DESC");
        if window.limit > 0 {
            builder.push(" LIMIT ").push_bind(to_i64(window.limit as u64)?);
        }
        builder
            .push(" OFFSET ")
            .push_bind(to_i64(window.offset as u64)?);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        rows.into_iter().map(entry_from_row).collect()
    }

    async fn count_entries(&self, query: &LedgerQuery) -> StorageResult<u64> {
        let mut builder =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM mibsp_ledger_entries WHERE TRUE");
        push_filters(&mut builder, query);
        let count: i64 = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        from_i64(count)
    }
}

#[async_trait]
impl TrackingIdRegistry for PostgresStorage {
    async fn exists(&self, id: &TrackingId) -> StorageResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM mibsp_tracking_ids WHERE tracking_id = $1)",
        )
        .bind(id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn register(&self, id: &TrackingId) -> StorageResult<bool> {
        let result = sqlx::query(
            "INSERT INTO mibsp_tracking_ids (tracking_id) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(result.rows_affected() == 1)
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &LedgerQuery) {
    if let Some(action) = query.action {
        builder.push(" AND action = ").push_bind(action.code());
    }
    if let Some(ref actor) = query.actor {
        builder
            .push(" AND actor_id ILIKE ")
            .push_bind(format!("%{}%", escape_like(actor)));
    }
    if let Some(role) = query.role {
        builder.push(" AND actor_role = ").push_bind(role.code());
    }
    if let Some(ref subject) = query.subject {
        builder
            .push(" AND subject_ref = ")
            .push_bind(subject.as_str().to_string());
    }
    if let Some(since) = query.since {
        builder.push(" AND timestamp >= ").push_bind(since);
    }
    if let Some(until) = query.until {
        builder.push(" AND timestamp <= ").push_bind(until);
    }
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Columns of one ledger row, as text, before any decoding.
struct RawRow {
    sequence: u64,
    timestamp: DateTime<Utc>,
    actor_role: String,
    actor_id: String,
    action: String,
    subject_ref: String,
    detail: String,
    prev_link_hash: String,
    link_hash: String,
}

impl RawRow {
    fn read(row: &PgRow) -> StorageResult<Self> {
        Ok(Self {
            sequence: from_i64(get(row, "sequence")?)?,
            timestamp: get(row, "timestamp")?,
            actor_role: get(row, "actor_role")?,
            actor_id: get(row, "actor_id")?,
            action: get(row, "action")?,
            subject_ref: get(row, "subject_ref")?,
            detail: get(row, "detail")?,
            prev_link_hash: get(row, "prev_link_hash")?,
            link_hash: get(row, "link_hash")?,
        })
    }

    /// Structural decode: codes and hashes must parse, everything else is
    /// taken as stored.
    fn decode(self) -> Result<LedgerEntry, String> {
        let role = self
            .actor_role
            .parse()
            .map_err(|e| format!("actor_role: {e}"))?;
        let action = self.action.parse().map_err(|e| format!("action: {e}"))?;
        let prev_link_hash = self
            .prev_link_hash
            .trim()
            .parse()
            .map_err(|e| format!("prev_link_hash: {e}"))?;
        let link_hash = self
            .link_hash
            .trim()
            .parse()
            .map_err(|e| format!("link_hash: {e}"))?;
        Ok(LedgerEntry {
            sequence: self.sequence,
            timestamp: self.timestamp,
            actor: Actor::from_stored(role, self.actor_id),
            action,
            subject_ref: SubjectRef::from_stored(self.subject_ref),
            detail: Detail::text(self.detail),
            prev_link_hash,
            link_hash,
        })
    }
}

fn entry_from_row(row: PgRow) -> StorageResult<LedgerEntry> {
    let raw = RawRow::read(&row)?;
    let sequence = raw.sequence;
    raw.decode()
        .map_err(|reason| StorageError::Serialization(format!("entry {sequence}: {reason}")))
}

fn stored_from_row(row: PgRow) -> StorageResult<StoredEntry> {
    let raw = RawRow::read(&row)?;
    let position = raw.sequence;
    Ok(match raw.decode() {
        Ok(entry) => StoredEntry::Decoded { position, entry },
        Err(reason) => StoredEntry::Undecodable { position, reason },
    })
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> StorageResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StorageError::Backend(e.to_string()))
}

fn parse_hash(raw: &str) -> StorageResult<LinkHash> {
    raw.trim()
        .parse()
        .map_err(|e| StorageError::Serialization(format!("{e}")))
}

fn map_append_error(err: sqlx::Error, expected_tail: Option<TailRef>) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StorageError::TailMoved {
                expected: expected_tail.map(|t| t.sequence),
                found: None,
            };
        }
    }
    StorageError::Backend(err.to_string())
}

fn to_i64(value: u64) -> StorageResult<i64> {
    i64::try_from(value).map_err(|_| StorageError::InvalidInput(format!("{value} exceeds i64")))
}

fn from_i64(value: i64) -> StorageResult<u64> {
    u64::try_from(value)
        .map_err(|_| StorageError::InvariantViolation(format!("negative value {value} in ledger")))
}
